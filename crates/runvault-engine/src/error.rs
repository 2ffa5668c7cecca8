//! Engine-level error type
//!
//! Aggregates the per-crate errors along the propagation policy: input
//! resolution and prior-binding errors abort before any filesystem mutation;
//! snapshot I/O errors abort mid-build and leave the build directory for the
//! sweeper; payload failures are NOT errors (they finalize a failed
//! manifest).

use thiserror::Error;

use runvault_artifact::{ChainError, ManifestError, RunDirError, SnapshotError};
use runvault_context::ContextError;
use runvault_doctrine::DoctrineError;
use runvault_identity::IdentityError;

use crate::brief::BriefError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("brief error: {0}")]
    Brief(#[from] BriefError),

    #[error("doctrine error: {0}")]
    Doctrine(#[from] DoctrineError),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("prior artifact error: {0}")]
    Chain(#[from] ChainError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("run directory error: {0}")]
    RunDir(#[from] RunDirError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("output write failed at {path}: {reason}")]
    OutputWrite { path: String, reason: String },
}
