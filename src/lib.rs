//! runvault - a deterministic, content-addressed execution engine for
//! governed AI pipelines
//!
//! Given a brief, a corpus, a model configuration, and a versioned prompt
//! doctrine, runvault produces artifacts whose identity is the hash of their
//! inputs. Re-executing with identical inputs is a no-op returning the
//! existing artifact; changing any input byte produces a new, distinct
//! artifact directory. Every finalized run can be re-proved from disk bytes
//! alone.
//!
//! This crate is the facade over the workspace: the member crates carry the
//! codec, doctrine store, context resolver, identity kernel, artifact
//! layout, verifier, and migration engine.

pub mod cli;

/// Returns the runvault version string.
#[must_use]
pub fn runvault_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Core types and operations re-exported for external consumers.
pub use runvault_artifact::{
    ChainMetadata, Manifest, MigrationRecord, RunStatus, SCHEMA_VERSION, SnapshotMeta,
    deterministic_projection,
};
pub use runvault_context::{ContextPack, ContextSpec};
pub use runvault_doctrine::{DoctrineConfig, DoctrineReference, DoctrineStore};
pub use runvault_engine::{
    Brief, Engine, EngineConfig, EngineError, FixedOutputAdapter, LlmAdapter, ModelConfig,
    ObservabilityEmitter, RunParams, reindex,
};
pub use runvault_identity::{compute_inputs_hash, derive_run_id};
pub use runvault_migrate::{MigrationRegistry, apply_manifest, builtin_registry, migrate_all};
pub use runvault_verify::{VerifyReport, replay, verify_run};
