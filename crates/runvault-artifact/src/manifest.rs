//! Manifest assembly, persistence, and the deterministic projection
//!
//! Two projections exist. The **full projection** is what `manifest.json`
//! holds on disk: everything, volatile fields included. The **deterministic
//! projection** strips the volatile fields and is byte-stable across runs
//! with identical inputs; it is the form used for cross-implementation
//! comparison and for the migration engine's invariance checks.

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use thiserror::Error;

use runvault_utils::atomic_write::write_bytes_atomic;
use runvault_utils::canon::{self, to_canonical_json};

use crate::model::Manifest;

/// Filename of the manifest inside a run directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Top-level manifest fields excluded from the deterministic projection.
pub const VOLATILE_FIELDS: &[&str] = &[
    "started_at",
    "finished_at",
    "langfuse_trace_id",
    "failure_detail",
];

/// Doctrine-reference sub-fields excluded from the deterministic projection.
pub const VOLATILE_DOCTRINE_FIELDS: &[&str] = &["resolved_at"];

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest not found at {path}")]
    NotFound { path: String },

    #[error("failed to read manifest at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("manifest could not be encoded: {0}")]
    Encode(#[from] canon::CanonError),

    #[error("manifest write failed at {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

/// Path of the manifest file inside `run_dir`.
#[must_use]
pub fn manifest_path(run_dir: &Utf8Path) -> Utf8PathBuf {
    run_dir.join(MANIFEST_FILE)
}

/// Write the full projection to `<run_dir>/manifest.json` in the canonical
/// pretty form, atomically.
pub fn write_manifest(run_dir: &Utf8Path, manifest: &Manifest) -> Result<(), ManifestError> {
    let path = manifest_path(run_dir);
    let encoded = to_canonical_json(manifest)?;
    write_bytes_atomic(&path, encoded.as_bytes()).map_err(|e| ManifestError::WriteFailed {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Read and parse `<run_dir>/manifest.json`.
pub fn read_manifest(run_dir: &Utf8Path) -> Result<Manifest, ManifestError> {
    let value = read_manifest_value(run_dir)?;
    serde_json::from_value(value).map_err(|source| ManifestError::Parse {
        path: manifest_path(run_dir).to_string(),
        source,
    })
}

/// Read `<run_dir>/manifest.json` as raw JSON, preserving fields the typed
/// model does not know about (needed by the migration engine).
pub fn read_manifest_value(run_dir: &Utf8Path) -> Result<Value, ManifestError> {
    let path = manifest_path(run_dir);
    if !path.is_file() {
        return Err(ManifestError::NotFound {
            path: path.to_string(),
        });
    }
    let bytes = std::fs::read(path.as_std_path()).map_err(|source| ManifestError::Read {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ManifestError::Parse {
        path: path.to_string(),
        source,
    })
}

/// Deterministic projection of a typed manifest.
pub fn deterministic_projection(manifest: &Manifest) -> Result<Value, canon::CanonError> {
    let value = serde_json::to_value(manifest)?;
    Ok(deterministic_projection_value(&value))
}

/// Deterministic projection of a raw manifest value.
///
/// Strips the volatile top-level fields, the volatile doctrine sub-fields,
/// and the wall-clock `applied_at` inside each migration-history entry. No
/// other field is touched.
#[must_use]
pub fn deterministic_projection_value(manifest: &Value) -> Value {
    let mut projected = manifest.clone();

    if let Some(map) = projected.as_object_mut() {
        for field in VOLATILE_FIELDS {
            map.remove(*field);
        }
        if let Some(doctrine) = map.get_mut("doctrine").and_then(Value::as_object_mut) {
            for field in VOLATILE_DOCTRINE_FIELDS {
                doctrine.remove(*field);
            }
        }
        if let Some(history) = map.get_mut("migration_history").and_then(Value::as_array_mut) {
            for entry in history {
                if let Some(entry) = entry.as_object_mut() {
                    entry.remove("applied_at");
                }
            }
        }
    }

    projected
}

/// Canonical compact bytes of the deterministic projection, the unit of
/// byte-stable comparison.
pub fn deterministic_bytes(manifest: &Value) -> Result<String, canon::CanonError> {
    canon::to_compact_canonical_json(&deterministic_projection_value(manifest))
}
