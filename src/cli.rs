//! Command-line interface for runvault
//!
//! Exposes the disk-only core operations: verify, replay, migrate, reindex.
//! Job submission and payload execution are collaborator surfaces and have
//! no CLI here.

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use runvault_engine::reindex::{NoopIndexSink, reindex};
use runvault_migrate::{builtin_registry, migrate_all};
use runvault_verify::{replay, verify_run};

/// Process exit codes.
pub mod exit_codes {
    /// Command completed and the result is positive.
    pub const OK: i32 = 0;
    /// Command completed and the result is negative (invalid run, failed
    /// migrations).
    pub const CHECK_FAILED: i32 = 1;
}

#[derive(Parser)]
#[command(
    name = "runvault",
    version,
    about = "Deterministic content-addressed execution engine for governed AI pipelines"
)]
pub struct Cli {
    /// Verbose structured logging
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Re-derive all hashes and identifiers of a run from disk and check
    /// them against its manifest
    Verify {
        /// Path to a finalized run directory
        run_dir: Utf8PathBuf,
        /// Emit the report as canonical JSON
        #[arg(long)]
        json: bool,
    },
    /// Rapid structural probe: could this run be replayed?
    Replay {
        /// Path to a finalized run directory
        run_dir: Utf8PathBuf,
    },
    /// Migrate every manifest beneath an artifacts root to a target schema
    /// version
    Migrate {
        /// Artifacts root to sweep
        #[arg(long)]
        root: Utf8PathBuf,
        /// Target schema version
        #[arg(long, default_value = runvault_artifact::SCHEMA_VERSION)]
        target: String,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild any external index by re-reading every manifest
    Reindex {
        /// Artifacts root to sweep
        #[arg(long)]
        root: Utf8PathBuf,
    },
}

/// Run a parsed command, returning the process exit code.
pub fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Verify { run_dir, json } => {
            let report = verify_run(run_dir);
            if *json {
                print!("{}", runvault_utils::canon::to_canonical_json(&report)?);
            } else {
                for (name, check) in &report.checks {
                    let status = if check.valid { "ok" } else { "FAIL" };
                    match &check.detail {
                        Some(detail) => println!("{name}: {status} ({detail})"),
                        None => println!("{name}: {status}"),
                    }
                }
                println!("valid: {}", report.valid);
            }
            Ok(if report.valid {
                exit_codes::OK
            } else {
                exit_codes::CHECK_FAILED
            })
        }
        Command::Replay { run_dir } => {
            let (can_replay, diagnostics) = replay(run_dir);
            for diagnostic in &diagnostics {
                println!("{diagnostic}");
            }
            println!("can_replay: {can_replay}");
            Ok(if can_replay {
                exit_codes::OK
            } else {
                exit_codes::CHECK_FAILED
            })
        }
        Command::Migrate {
            root,
            target,
            dry_run,
        } => {
            let registry = builtin_registry();
            let stats = migrate_all(&registry, root, target, *dry_run);
            println!(
                "scanned: {}, migrated: {}, already current: {}, failed: {}",
                stats.scanned,
                stats.migrated,
                stats.already_current,
                stats.failed.len()
            );
            for (path, error) in &stats.failed {
                eprintln!("{path}: {error}");
            }
            Ok(if stats.failed.is_empty() {
                exit_codes::OK
            } else {
                exit_codes::CHECK_FAILED
            })
        }
        Command::Reindex { root } => {
            let count = reindex(root, &mut NoopIndexSink);
            println!("reindexed: {count}");
            Ok(exit_codes::OK)
        }
    }
}
