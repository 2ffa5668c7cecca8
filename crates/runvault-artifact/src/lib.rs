//! Content-addressed artifact layout
//!
//! Owns everything that lives under `artifacts/`: the canonical snapshot
//! files, the atomic build → finalize lifecycle of a run directory, the
//! prior-artifact binding that chains stages together, and the manifest that
//! records a run's identity.
//!
//! Layout (authoritative):
//!
//! ```text
//! artifacts/
//!   <job_id>/
//!     .tmp/<uuid>/                 build directories, pre-finalize
//!     <run_id>/
//!       inputs/*.resolved.json     canonical snapshots
//!       outputs/*                  stage outputs, each in manifest.artifacts
//!       manifest.json
//!   runs/<run_id> -> ../<job_id>/<run_id>   best-effort legacy alias
//! ```

pub mod chain;
pub mod manifest;
pub mod model;
pub mod rundir;
pub mod snapshot;

pub use chain::{ChainError, PriorArtifactBinder, PriorArtifactBinding, PriorManifestSubset};
pub use manifest::{ManifestError, deterministic_projection, read_manifest, write_manifest};
pub use model::{
    ChainMetadata, Manifest, MigrationRecord, PriorStageRef, RunStatus, SCHEMA_VERSION,
    SnapshotMeta,
};
pub use rundir::{BuildDir, FinalizeOutcome, ProbeOutcome, RunDirError, RunDirManager};
pub use snapshot::{SnapshotError, SnapshotWriter};
