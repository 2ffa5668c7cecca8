//! runvault CLI binary
//!
//! Minimal entrypoint: argument parsing and logging bootstrap live here,
//! all behavior in the library.

use clap::Parser;

fn main() {
    let cli = runvault::cli::Cli::parse();

    if let Err(e) = runvault_utils::logging::init_tracing(cli.verbose) {
        eprintln!("warning: logging initialization failed: {e}");
    }

    match runvault::cli::run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
