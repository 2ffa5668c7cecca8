//! Snapshot writer
//!
//! Persists each resolved input to its canonical path under the pending run
//! directory. The returned hash is always computed from a read-back of the
//! written file: the source of truth for every snapshot hash is the on-disk
//! byte sequence, not the in-memory encoded form.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;

use runvault_utils::atomic_write::write_bytes_atomic;
use runvault_utils::canon::{self, sha256_file};

use crate::model::SnapshotMeta;

/// Directory under the run directory holding all input snapshots.
pub const INPUTS_DIR: &str = "inputs";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot '{name}' could not be encoded: {source}")]
    Encode {
        name: String,
        source: canon::CanonError,
    },

    #[error("snapshot write failed at {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("snapshot read-back failed at {path}: {source}")]
    ReadBack {
        path: String,
        source: std::io::Error,
    },
}

/// Writes canonical snapshot files into one run's build directory.
pub struct SnapshotWriter {
    run_dir: Utf8PathBuf,
}

impl SnapshotWriter {
    #[must_use]
    pub fn new(run_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// Write a `<name>.resolved.json` snapshot (brief, context, doctrine,
    /// prior_artifact).
    pub fn write_resolved<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<SnapshotMeta, SnapshotError> {
        self.write(name, &format!("{name}.resolved.json"), value)
    }

    /// Write a snapshot under a domain-specific filename
    /// (e.g. `model_config.json`).
    pub fn write(
        &self,
        name: &str,
        file_name: &str,
        value: &impl Serialize,
    ) -> Result<SnapshotMeta, SnapshotError> {
        let encoded = canon::to_canonical_json(value).map_err(|source| SnapshotError::Encode {
            name: name.to_string(),
            source,
        })?;

        let rel_path = format!("{INPUTS_DIR}/{file_name}");
        let abs_path = self.run_dir.join(&rel_path);

        write_bytes_atomic(&abs_path, encoded.as_bytes()).map_err(|e| {
            SnapshotError::WriteFailed {
                path: abs_path.to_string(),
                reason: e.to_string(),
            }
        })?;

        // Mandatory read-back: hash what the filesystem holds.
        let (sha256, bytes) = read_back(&abs_path)?;

        Ok(SnapshotMeta {
            path: rel_path,
            sha256,
            bytes,
        })
    }
}

fn read_back(path: &Utf8Path) -> Result<(String, u64), SnapshotError> {
    sha256_file(path).map_err(|source| SnapshotError::ReadBack {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use runvault_utils::canon::sha256_hex;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> SnapshotWriter {
        SnapshotWriter::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap())
    }

    #[test]
    fn writes_canonical_bytes_and_hashes_read_back() {
        let dir = TempDir::new().unwrap();
        let meta = writer(&dir)
            .write_resolved("brief", &json!({"job_id": "demo-001", "a": 1}))
            .unwrap();

        assert_eq!(meta.path, "inputs/brief.resolved.json");
        let on_disk = fs::read(dir.path().join("inputs/brief.resolved.json")).unwrap();
        assert_eq!(meta.sha256, sha256_hex(&on_disk));
        assert_eq!(meta.bytes, on_disk.len() as u64);
        // Canonical pretty form: sorted keys, trailing newline.
        let text = String::from_utf8(on_disk).unwrap();
        assert!(text.starts_with("{\n  \"a\": 1"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn domain_filename_is_respected() {
        let dir = TempDir::new().unwrap();
        let meta = writer(&dir)
            .write("model_config", "model_config.json", &json!({"model": "m"}))
            .unwrap();
        assert_eq!(meta.path, "inputs/model_config.json");
        assert!(dir.path().join("inputs/model_config.json").exists());
    }

    #[test]
    fn identical_values_produce_identical_snapshots() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let value = json!({"z": [1, 2], "a": {"nested": true}});
        let meta_a = writer(&dir_a).write_resolved("context", &value).unwrap();
        let meta_b = writer(&dir_b).write_resolved("context", &value).unwrap();
        assert_eq!(meta_a.sha256, meta_b.sha256);
        assert_eq!(meta_a.bytes, meta_b.bytes);
    }

    #[test]
    fn unrepresentable_value_is_an_encode_error() {
        let dir = TempDir::new().unwrap();
        let err = writer(&dir)
            .write_resolved("bad", &f64::INFINITY)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Encode { .. }));
    }
}
