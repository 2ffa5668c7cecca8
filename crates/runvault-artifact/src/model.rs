//! Manifest data model
//!
//! The manifest is the canonical record of a run. Determinism-critical fields
//! (`job_id`, `run_id`, `inputs_hash`, the snapshot map, the doctrine
//! reference, the artifacts map) are immutable once a run directory is
//! finalized. Volatile fields carry audit detail and are excluded from the
//! deterministic projection in [`crate::manifest`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use runvault_doctrine::DoctrineReference;
use serde::{Deserialize, Serialize};

/// Current manifest schema version.
pub const SCHEMA_VERSION: &str = "1.2.0";

/// Metadata for one persisted file, snapshot or output alike.
///
/// `path` is run-relative with forward slashes; `sha256` is the hash of the
/// on-disk bytes, never of an in-memory form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    IdempotentReplay,
}

/// One upstream run this run consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorStageRef {
    pub run_id: String,
    pub job_id: String,
    pub stage: String,
}

/// Chain structure recorded for chainable stages.
///
/// `prior_stages` is a list for forward compatibility; no current pipeline
/// binds more than one prior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub is_chainable_stage: bool,
    pub prior_stages: Vec<PriorStageRef>,
}

/// Audit entry appended by each applied migration.
///
/// `applied_at` is wall-clock audit detail and never participates in any
/// hash or deterministic comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub from_version: String,
    pub to_version: String,
    pub applied_at: String,
    pub changes: Vec<String>,
    pub checksum_before: String,
    pub checksum_after: String,
}

/// The canonical record of a run, written to `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: String,
    pub job_id: String,
    pub run_id: String,
    pub queue_job_id: Option<String>,
    pub job_ref: String,
    pub job_type: String,
    pub status: RunStatus,
    pub inputs_hash: String,
    pub input_snapshots: BTreeMap<String, SnapshotMeta>,
    pub doctrine: DoctrineReference,
    pub artifacts: BTreeMap<String, SnapshotMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_metadata: Option<ChainMetadata>,
    #[serde(default)]
    pub migration_history: Vec<MigrationRecord>,

    // Volatile fields: full projection only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub langfuse_trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

impl Manifest {
    /// True when this run recorded chain structure.
    #[must_use]
    pub fn is_chainable(&self) -> bool {
        self.chain_metadata
            .as_ref()
            .is_some_and(|c| c.is_chainable_stage)
    }
}
