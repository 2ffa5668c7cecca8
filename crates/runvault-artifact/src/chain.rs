//! Prior-artifact binding for chainable stages
//!
//! A chainable stage consumes an upstream run's outputs as first-class
//! hashed inputs. The binder locates the prior run on disk, validates the
//! declared outputs, and hashes their *current* bytes; the resulting binding
//! record becomes the `prior_artifact` snapshot, so any drift in the prior's
//! outputs surfaces as a new downstream `run_id`.
//!
//! Requiring an already-finalized prior on disk is also the acyclicity
//! proof: a binding can only point backwards in creation order.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use runvault_utils::canon::sha256_file;

use crate::manifest::{MANIFEST_FILE, read_manifest};
use crate::model::Manifest;
use crate::rundir::{RUNS_ALIAS_DIR, TMP_DIR};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("prior run '{run_id}' not found under {root}")]
    PriorRunNotFound { run_id: String, root: String },

    #[error("prior run '{run_id}' is missing required output '{output}'")]
    PriorOutputMissing { run_id: String, output: String },

    #[error("prior run '{run_id}' manifest is inconsistent: {reason}")]
    PriorManifestInconsistent { run_id: String, reason: String },

    #[error("failed to hash prior output {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Identity-bearing subset of the prior manifest, embedded in the binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorManifestSubset {
    pub schema_version: String,
    pub job_type: String,
    pub inputs_hash: String,
}

/// The `prior_artifact` snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorArtifactBinding {
    pub prior_run_id: String,
    pub prior_job_id: String,
    pub prior_stage: String,
    pub prior_manifest_subset: PriorManifestSubset,
    pub required_outputs: Vec<String>,
    pub prior_output_hashes: BTreeMap<String, String>,
}

/// Discovers and validates prior runs beneath an artifacts root.
pub struct PriorArtifactBinder {
    artifacts_root: Utf8PathBuf,
}

impl PriorArtifactBinder {
    #[must_use]
    pub fn new(artifacts_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            artifacts_root: artifacts_root.into(),
        }
    }

    /// Bind to `prior_run_id`, validating and hashing `required_outputs`.
    pub fn bind(
        &self,
        prior_run_id: &str,
        required_outputs: &[String],
    ) -> Result<PriorArtifactBinding, ChainError> {
        let (run_dir, manifest) = self.locate(prior_run_id)?;

        if manifest.run_id != prior_run_id {
            return Err(ChainError::PriorManifestInconsistent {
                run_id: prior_run_id.to_string(),
                reason: format!(
                    "manifest records run_id '{}' at {run_dir}",
                    manifest.run_id
                ),
            });
        }

        let mut prior_output_hashes = BTreeMap::new();
        for output in required_outputs {
            let meta = manifest.artifacts.get(output).ok_or_else(|| {
                ChainError::PriorOutputMissing {
                    run_id: prior_run_id.to_string(),
                    output: output.clone(),
                }
            })?;

            let output_path = run_dir.join(&meta.path);
            if !output_path.is_file() {
                return Err(ChainError::PriorOutputMissing {
                    run_id: prior_run_id.to_string(),
                    output: output.clone(),
                });
            }

            // Hash the bytes as they are now, not as the prior manifest
            // recorded them; the downstream identity must track drift.
            let (sha256, _) = sha256_file(&output_path).map_err(|source| ChainError::Io {
                path: output_path.to_string(),
                source,
            })?;
            prior_output_hashes.insert(output.clone(), sha256);
        }

        debug!(
            prior_run_id,
            outputs = prior_output_hashes.len(),
            "bound prior artifact"
        );

        Ok(PriorArtifactBinding {
            prior_run_id: prior_run_id.to_string(),
            prior_job_id: manifest.job_id.clone(),
            prior_stage: manifest.job_type.clone(),
            prior_manifest_subset: PriorManifestSubset {
                schema_version: manifest.schema_version.clone(),
                job_type: manifest.job_type.clone(),
                inputs_hash: manifest.inputs_hash.clone(),
            },
            required_outputs: required_outputs.to_vec(),
            prior_output_hashes,
        })
    }

    /// Scan `artifacts/*/` for a run directory named `prior_run_id` with a
    /// manifest present; first match in lexicographic job-directory order.
    fn locate(&self, prior_run_id: &str) -> Result<(Utf8PathBuf, Manifest), ChainError> {
        let mut job_dirs: Vec<Utf8PathBuf> = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.artifacts_root.as_std_path()) {
            for entry in entries.flatten() {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if name == RUNS_ALIAS_DIR || name == TMP_DIR {
                    continue;
                }
                let path = self.artifacts_root.join(&name);
                if path.is_dir() {
                    job_dirs.push(path);
                }
            }
        }
        job_dirs.sort();

        for job_dir in job_dirs {
            let candidate = job_dir.join(prior_run_id);
            if candidate.join(MANIFEST_FILE).is_file() {
                let manifest = read_manifest(&candidate).map_err(|e| {
                    ChainError::PriorManifestInconsistent {
                        run_id: prior_run_id.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                return Ok((candidate, manifest));
            }
        }

        Err(ChainError::PriorRunNotFound {
            run_id: prior_run_id.to_string(),
            root: self.artifacts_root.to_string(),
        })
    }
}
