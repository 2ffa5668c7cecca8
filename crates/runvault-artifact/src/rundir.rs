//! Run directory lifecycle
//!
//! A run is built under `artifacts/<job_id>/.tmp/<uuid>/` and moved to
//! `artifacts/<job_id>/<run_id>/` with a single rename once its identity is
//! known. A partially built run is therefore never visible at a canonical
//! path.
//!
//! Finalize policy when the target already exists:
//! - matching `inputs_hash` → idempotent replay: the build directory is
//!   discarded and the existing run is returned;
//! - differing `inputs_hash` (a short-prefix collision) → deterministic
//!   numeric suffixes `-2`, `-3`, … are probed in order.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use runvault_identity::{IdentityError, derive_run_id};
use runvault_utils::atomic_write::rename_dir_atomic;
use runvault_utils::paths::ensure_dir_all;

use crate::manifest::read_manifest;
use crate::model::Manifest;

/// Directory name for pre-finalize build directories, per job.
pub const TMP_DIR: &str = ".tmp";

/// Directory holding the legacy run-id aliases.
pub const RUNS_ALIAS_DIR: &str = "runs";

#[derive(Error, Debug)]
pub enum RunDirError {
    #[error("failed to allocate build directory under {path}: {source}")]
    Allocate {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to finalize run directory into {path}: {reason}")]
    Finalize { path: String, reason: String },

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// A pre-finalize build directory. Dropped builds are swept by an external
/// time-based policy, so abandoning one is safe.
#[derive(Debug)]
pub struct BuildDir {
    pub path: Utf8PathBuf,
    job_id: String,
}

impl BuildDir {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// Result of probing for an existing run before the payload executes.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// An identical run already exists; skip the payload entirely.
    Replay {
        run_id: String,
        run_dir: Utf8PathBuf,
        manifest: Manifest,
    },
    /// No identical run exists; `run_id` is the first free candidate
    /// (collision-suffixed when the unsuffixed slot is taken by distinct
    /// inputs).
    Fresh { run_id: String },
}

/// Result of finalizing a build directory.
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// The build directory became the canonical run directory.
    Finalized {
        run_id: String,
        run_dir: Utf8PathBuf,
    },
    /// An identical run already existed; the build directory was discarded.
    Replayed {
        run_id: String,
        run_dir: Utf8PathBuf,
        manifest: Manifest,
    },
}

/// Controls the atomic lifecycle of `artifacts/<job_id>/<run_id>/`.
pub struct RunDirManager {
    artifacts_root: Utf8PathBuf,
}

impl RunDirManager {
    #[must_use]
    pub fn new(artifacts_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            artifacts_root: artifacts_root.into(),
        }
    }

    #[must_use]
    pub fn artifacts_root(&self) -> &Utf8Path {
        &self.artifacts_root
    }

    /// Allocate a fresh build directory for `job_id`.
    pub fn allocate_build_dir(&self, job_id: &str) -> Result<BuildDir, RunDirError> {
        let path = self
            .artifacts_root
            .join(job_id)
            .join(TMP_DIR)
            .join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(path.as_std_path()).map_err(|source| RunDirError::Allocate {
            path: path.to_string(),
            source,
        })?;
        debug!(%path, job_id, "allocated build directory");
        Ok(BuildDir {
            path,
            job_id: job_id.to_string(),
        })
    }

    /// Discard a build directory (canceled or superseded run). Best-effort.
    pub fn discard(&self, build: BuildDir) {
        if let Err(e) = std::fs::remove_dir_all(build.path.as_std_path()) {
            warn!(path = %build.path, error = %e, "failed to remove build directory");
        }
    }

    /// Probe for an existing run with this identity before the payload runs.
    ///
    /// Applies the same replay/collision policy as [`Self::finalize`] without
    /// moving anything; the payload is skipped when an identical run already
    /// sits at a canonical path.
    pub fn probe(&self, job_id: &str, inputs_hash: &str) -> Result<ProbeOutcome, RunDirError> {
        let job_dir = self.artifacts_root.join(job_id);
        let mut suffix: Option<u32> = None;

        loop {
            let run_id = derive_run_id(inputs_hash, suffix)?;
            let target = job_dir.join(&run_id);

            if !target.exists() {
                return Ok(ProbeOutcome::Fresh { run_id });
            }

            match read_manifest(&target) {
                Ok(manifest) if manifest.inputs_hash == inputs_hash => {
                    return Ok(ProbeOutcome::Replay {
                        run_id,
                        run_dir: target,
                        manifest,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %target, error = %e, "occupant manifest unreadable");
                }
            }
            suffix = Some(suffix.map_or(2, |n| n + 1));
        }
    }

    /// Finalize `build` into its content-addressed location.
    ///
    /// The base `run_id` is derived from `inputs_hash`; the collision suffix
    /// is a directory-naming concern only and never feeds back into any hash.
    pub fn finalize(
        &self,
        build: BuildDir,
        inputs_hash: &str,
    ) -> Result<FinalizeOutcome, RunDirError> {
        let job_dir = self.artifacts_root.join(build.job_id());
        let mut suffix: Option<u32> = None;

        loop {
            let run_id = derive_run_id(inputs_hash, suffix)?;
            let target = job_dir.join(&run_id);

            if !target.exists() {
                match rename_dir_atomic(&build.path, &target) {
                    Ok(()) => {
                        info!(%run_id, run_dir = %target, "run finalized");
                        self.create_legacy_alias(build.job_id(), &run_id, &target);
                        return Ok(FinalizeOutcome::Finalized {
                            run_id,
                            run_dir: target,
                        });
                    }
                    // Lost the race to a concurrent finalize of the same
                    // identity; fall through and inspect the occupant.
                    Err(e) if target.exists() => {
                        debug!(%run_id, error = %e, "finalize race, inspecting occupant");
                    }
                    Err(e) => {
                        return Err(RunDirError::Finalize {
                            path: target.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            // An occupant without a readable manifest is non-replayable:
            // keep probing suffixes rather than failing the finalize.
            let occupant = match read_manifest(&target) {
                Ok(manifest) => Some(manifest),
                Err(source) => {
                    warn!(path = %target, error = %source, "occupant manifest unreadable");
                    None
                }
            };

            if let Some(occupant) = occupant.filter(|m| m.inputs_hash == inputs_hash) {
                info!(%run_id, run_dir = %target, "idempotent replay");
                self.discard(build);
                return Ok(FinalizeOutcome::Replayed {
                    run_id,
                    run_dir: target,
                    manifest: occupant,
                });
            }

            // Full 128-bit prefix collision across distinct inputs. Probe
            // the next deterministic suffix.
            suffix = Some(suffix.map_or(2, |n| n + 1));
            warn!(
                %run_id,
                next_suffix = ?suffix,
                "run id collision with distinct inputs"
            );
        }
    }

    /// Path of an existing canonical run directory, replay checks only.
    #[must_use]
    pub fn run_dir(&self, job_id: &str, run_id: &str) -> Utf8PathBuf {
        self.artifacts_root.join(job_id).join(run_id)
    }

    /// Best-effort `artifacts/runs/<run_id>` alias with a relative target.
    /// Link failure is never fatal; some filesystems cannot hold links.
    fn create_legacy_alias(&self, job_id: &str, run_id: &str, _target: &Utf8Path) {
        let alias_dir = self.artifacts_root.join(RUNS_ALIAS_DIR);
        if ensure_dir_all(&alias_dir).is_err() {
            return;
        }
        let alias = alias_dir.join(run_id);
        if alias.exists() {
            return;
        }
        let relative_target = format!("../{job_id}/{run_id}");
        if let Err(e) = symlink_dir(&relative_target, &alias) {
            debug!(alias = %alias, error = %e, "legacy alias not created");
        }
    }
}

#[cfg(unix)]
fn symlink_dir(target: &str, link: &Utf8Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link.as_std_path())
}

#[cfg(windows)]
fn symlink_dir(target: &str, link: &Utf8Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link.as_std_path())
}
