//! Run verification
//!
//! Re-derives every hash and identifier of a finalized run from on-disk
//! bytes and cross-checks them against `manifest.json`. The verifier knows
//! nothing about the stage that produced the run: it iterates the manifest's
//! declared snapshot and artifact maps rather than any hard-coded name list,
//! so stage-specific snapshots are covered automatically.
//!
//! Mismatches are never errors; they come back as a structured
//! [`VerifyReport`].

use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use runvault_artifact::manifest::read_manifest;
use runvault_artifact::model::{Manifest, SnapshotMeta};
use runvault_identity::{compute_inputs_hash, derive_run_id, split_run_id};
use runvault_utils::canon::sha256_file;

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn ok() -> Self {
        Self {
            valid: true,
            detail: None,
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            valid: false,
            detail: Some(detail.into()),
        }
    }
}

/// Structured verification report: overall validity plus the per-check
/// breakdown, keyed by check name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub checks: BTreeMap<String, CheckResult>,
}

impl VerifyReport {
    fn from_checks(checks: BTreeMap<String, CheckResult>) -> Self {
        Self {
            valid: checks.values().all(|c| c.valid),
            checks,
        }
    }

    #[must_use]
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.get(name)
    }
}

/// Verify a finalized run directory.
#[must_use]
pub fn verify_run(run_dir: &Utf8Path) -> VerifyReport {
    let mut checks = BTreeMap::new();

    let manifest = match read_manifest(run_dir) {
        Ok(m) => m,
        Err(e) => {
            checks.insert(
                "manifest_readable".to_string(),
                CheckResult::fail(e.to_string()),
            );
            return VerifyReport::from_checks(checks);
        }
    };

    checks.insert(
        "snapshots_present".to_string(),
        files_present(run_dir, &manifest.input_snapshots),
    );
    checks.insert(
        "snapshot_hashes".to_string(),
        files_match_hashes(run_dir, &manifest.input_snapshots),
    );
    checks.insert(
        "artifact_hashes".to_string(),
        files_match_hashes(run_dir, &manifest.artifacts),
    );
    checks.insert(
        "inputs_hash_derivation".to_string(),
        inputs_hash_derivation_from_disk(run_dir, &manifest),
    );
    checks.insert(
        "run_id_derivation".to_string(),
        run_id_derivation(&manifest),
    );
    checks.insert(
        "job_id_consistency".to_string(),
        job_id_consistency(run_dir, &manifest),
    );
    checks.insert(
        "chainable_structure".to_string(),
        chainable_structure(run_dir, &manifest),
    );

    let report = VerifyReport::from_checks(checks);
    debug!(run_dir = %run_dir, valid = report.valid, "verification complete");
    report
}

/// Weaker probe: is this run structurally replayable? Checks manifest
/// parseability, snapshot presence, and identity derivation without
/// re-hashing file contents.
#[must_use]
pub fn replay(run_dir: &Utf8Path) -> (bool, Vec<String>) {
    let mut diagnostics = Vec::new();

    let manifest = match read_manifest(run_dir) {
        Ok(m) => m,
        Err(e) => {
            diagnostics.push(format!("manifest unreadable: {e}"));
            return (false, diagnostics);
        }
    };

    for (name, meta) in &manifest.input_snapshots {
        if !run_dir.join(&meta.path).is_file() {
            diagnostics.push(format!("snapshot '{name}' missing at {}", meta.path));
        }
    }

    let derivation = inputs_hash_derivation_recorded(&manifest);
    if !derivation.valid {
        diagnostics.push(
            derivation
                .detail
                .unwrap_or_else(|| "inputs_hash derivation mismatch".to_string()),
        );
    }

    (diagnostics.is_empty(), diagnostics)
}

fn files_present(run_dir: &Utf8Path, files: &BTreeMap<String, SnapshotMeta>) -> CheckResult {
    let missing: Vec<&str> = files
        .iter()
        .filter(|(_, meta)| !run_dir.join(&meta.path).is_file())
        .map(|(name, _)| name.as_str())
        .collect();
    if missing.is_empty() {
        CheckResult::ok()
    } else {
        CheckResult::fail(format!("missing: {}", missing.join(", ")))
    }
}

fn files_match_hashes(run_dir: &Utf8Path, files: &BTreeMap<String, SnapshotMeta>) -> CheckResult {
    let mut mismatches = Vec::new();
    for (name, meta) in files {
        let path = run_dir.join(&meta.path);
        match sha256_file(&path) {
            Ok((sha256, bytes)) => {
                if sha256 != meta.sha256 {
                    mismatches.push(format!("{name}: hash mismatch"));
                } else if bytes != meta.bytes {
                    mismatches.push(format!(
                        "{name}: size mismatch ({bytes} != {})",
                        meta.bytes
                    ));
                }
            }
            Err(e) => mismatches.push(format!("{name}: {e}")),
        }
    }
    if mismatches.is_empty() {
        CheckResult::ok()
    } else {
        CheckResult::fail(mismatches.join("; "))
    }
}

/// Re-hash every declared snapshot from disk and re-run the identity kernel
/// over the fresh map. Tampering with any snapshot file therefore fails this
/// check as well as `snapshot_hashes`.
fn inputs_hash_derivation_from_disk(run_dir: &Utf8Path, manifest: &Manifest) -> CheckResult {
    let mut hash_map = BTreeMap::new();
    for (name, meta) in &manifest.input_snapshots {
        match sha256_file(&run_dir.join(&meta.path)) {
            Ok((sha256, _)) => {
                hash_map.insert(name.clone(), sha256);
            }
            Err(e) => return CheckResult::fail(format!("snapshot '{name}' unreadable: {e}")),
        }
    }

    match compute_inputs_hash(&hash_map) {
        Ok(derived) if derived == manifest.inputs_hash => CheckResult::ok(),
        Ok(derived) => CheckResult::fail(format!(
            "derived {derived}, manifest records {}",
            manifest.inputs_hash
        )),
        Err(e) => CheckResult::fail(e.to_string()),
    }
}

/// Derivation over the manifest's recorded snapshot hash map, without
/// touching file contents. Used by the rapid replay probe.
fn inputs_hash_derivation_recorded(manifest: &Manifest) -> CheckResult {
    let hash_map: BTreeMap<String, String> = manifest
        .input_snapshots
        .iter()
        .map(|(name, meta)| (name.clone(), meta.sha256.clone()))
        .collect();

    match compute_inputs_hash(&hash_map) {
        Ok(derived) if derived == manifest.inputs_hash => CheckResult::ok(),
        Ok(derived) => CheckResult::fail(format!(
            "derived {derived}, manifest records {}",
            manifest.inputs_hash
        )),
        Err(e) => CheckResult::fail(e.to_string()),
    }
}

fn run_id_derivation(manifest: &Manifest) -> CheckResult {
    let (prefix, suffix) = split_run_id(&manifest.run_id);

    if let Some(suffix) = suffix {
        // A recorded collision suffix must be the deterministic numeric form.
        if suffix.parse::<u32>().map_or(true, |n| n < 2) {
            return CheckResult::fail(format!("malformed collision suffix '-{suffix}'"));
        }
    }

    match derive_run_id(&manifest.inputs_hash, None) {
        Ok(derived) if derived == prefix => CheckResult::ok(),
        Ok(derived) => CheckResult::fail(format!(
            "derived {derived}, manifest records {prefix}"
        )),
        Err(e) => CheckResult::fail(e.to_string()),
    }
}

fn job_id_consistency(run_dir: &Utf8Path, manifest: &Manifest) -> CheckResult {
    let Some(brief_meta) = manifest.input_snapshots.get("brief") else {
        return CheckResult::fail("manifest declares no brief snapshot");
    };

    let path = run_dir.join(&brief_meta.path);
    let bytes = match std::fs::read(path.as_std_path()) {
        Ok(b) => b,
        Err(e) => return CheckResult::fail(format!("brief snapshot unreadable: {e}")),
    };
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => return CheckResult::fail(format!("brief snapshot unparsable: {e}")),
    };

    match value.get("job_id").and_then(serde_json::Value::as_str) {
        Some(job_id) if job_id == manifest.job_id => CheckResult::ok(),
        Some(job_id) => CheckResult::fail(format!(
            "brief records job_id '{job_id}', manifest records '{}'",
            manifest.job_id
        )),
        None => CheckResult::fail("brief snapshot has no job_id"),
    }
}

fn chainable_structure(run_dir: &Utf8Path, manifest: &Manifest) -> CheckResult {
    let declared = manifest.input_snapshots.get("prior_artifact");
    if !manifest.is_chainable() && declared.is_none() {
        return CheckResult::ok();
    }

    let Some(meta) = declared else {
        return CheckResult::fail("chain_metadata present but no prior_artifact snapshot");
    };

    let path = run_dir.join(&meta.path);
    let bytes = match std::fs::read(path.as_std_path()) {
        Ok(b) => b,
        Err(e) => return CheckResult::fail(format!("prior_artifact snapshot unreadable: {e}")),
    };
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => return CheckResult::fail(format!("prior_artifact snapshot unparsable: {e}")),
    };

    let mut missing = Vec::new();
    for field in ["prior_run_id", "prior_output_hashes", "required_outputs"] {
        if value.get(field).is_none() {
            missing.push(field);
        }
    }
    if missing.is_empty() {
        CheckResult::ok()
    } else {
        CheckResult::fail(format!(
            "prior_artifact snapshot missing fields: {}",
            missing.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use runvault_artifact::manifest::write_manifest;
    use runvault_artifact::model::{RunStatus, SCHEMA_VERSION};
    use runvault_artifact::snapshot::SnapshotWriter;
    use runvault_doctrine::DoctrineReference;
    use runvault_utils::canon::sha256_hex;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    /// Build a self-consistent finalized run directory by hand.
    fn seed_run(dir: &TempDir) -> Utf8PathBuf {
        let run_dir = Utf8PathBuf::from_path_buf(dir.path().join("run")).unwrap();
        let writer = SnapshotWriter::new(run_dir.clone());

        let mut input_snapshots = BTreeMap::new();
        input_snapshots.insert(
            "brief".to_string(),
            writer
                .write_resolved("brief", &json!({"job_id": "demo-001", "job_type": "synthesis"}))
                .unwrap(),
        );
        input_snapshots.insert(
            "model_config".to_string(),
            writer
                .write("model_config", "model_config.json", &json!({"temperature": 0.0}))
                .unwrap(),
        );

        fs::create_dir_all(run_dir.join("outputs").as_std_path()).unwrap();
        fs::write(run_dir.join("outputs/output.txt").as_std_path(), b"result\n").unwrap();
        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            "output.txt".to_string(),
            SnapshotMeta {
                path: "outputs/output.txt".to_string(),
                sha256: sha256_hex(b"result\n"),
                bytes: 7,
            },
        );

        let hash_map: BTreeMap<String, String> = input_snapshots
            .iter()
            .map(|(k, v)| (k.clone(), v.sha256.clone()))
            .collect();
        let inputs_hash = compute_inputs_hash(&hash_map).unwrap();
        let run_id = derive_run_id(&inputs_hash, None).unwrap();

        let manifest = Manifest {
            schema_version: SCHEMA_VERSION.to_string(),
            job_id: "demo-001".to_string(),
            run_id,
            queue_job_id: None,
            job_ref: "jobs/demo-001.json".to_string(),
            job_type: "synthesis".to_string(),
            status: RunStatus::Succeeded,
            inputs_hash,
            input_snapshots,
            doctrine: DoctrineReference {
                doctrine_id: "example".to_string(),
                version: "v1.0.0".to_string(),
                sha256: sha256_hex(b"hello\n"),
                resolved_path: "prompts/example/v1.0.0.md".to_string(),
                resolved_at: None,
            },
            artifacts,
            chain_metadata: None,
            migration_history: Vec::new(),
            started_at: None,
            finished_at: None,
            langfuse_trace_id: None,
            failure_detail: None,
        };
        write_manifest(&run_dir, &manifest).unwrap();
        run_dir
    }

    #[test]
    fn intact_run_verifies() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);
        let report = verify_run(&run_dir);
        assert!(report.valid, "{report:?}");
        assert!(report.check("chainable_structure").unwrap().valid);
    }

    #[test]
    fn tampered_snapshot_fails_hash_and_derivation_checks() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);

        // Flip one byte of the brief snapshot out of band, leaving the JSON
        // well-formed and job_id untouched.
        let brief_path = run_dir.join("inputs/brief.resolved.json");
        let text = fs::read_to_string(brief_path.as_std_path()).unwrap();
        fs::write(
            brief_path.as_std_path(),
            text.replace("synthesis", "synthesiX"),
        )
        .unwrap();

        let report = verify_run(&run_dir);
        assert!(!report.valid);
        assert!(!report.check("snapshot_hashes").unwrap().valid);
        assert!(!report.check("inputs_hash_derivation").unwrap().valid);
        assert!(report.check("job_id_consistency").unwrap().valid);
    }

    #[test]
    fn corrupted_inputs_hash_fails_derivations() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);

        let mut manifest = read_manifest(&run_dir).unwrap();
        manifest.inputs_hash = format!("sha256:{}", "f".repeat(64));
        write_manifest(&run_dir, &manifest).unwrap();

        let report = verify_run(&run_dir);
        assert!(!report.valid);
        assert!(!report.check("inputs_hash_derivation").unwrap().valid);
        assert!(!report.check("run_id_derivation").unwrap().valid);
        assert!(report.check("job_id_consistency").unwrap().valid);
    }

    #[test]
    fn missing_snapshot_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);
        fs::remove_file(run_dir.join("inputs/model_config.json").as_std_path()).unwrap();

        let report = verify_run(&run_dir);
        assert!(!report.valid);
        let check = report.check("snapshots_present").unwrap();
        assert!(!check.valid);
        assert!(check.detail.as_ref().unwrap().contains("model_config"));
    }

    #[test]
    fn tampered_output_fails_artifact_hashes() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);
        fs::write(run_dir.join("outputs/output.txt").as_std_path(), b"edited\n").unwrap();

        let report = verify_run(&run_dir);
        assert!(!report.valid);
        assert!(!report.check("artifact_hashes").unwrap().valid);
    }

    #[test]
    fn collision_suffix_is_accepted_by_run_id_check() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);
        let mut manifest = read_manifest(&run_dir).unwrap();
        manifest.run_id = format!("{}-2", manifest.run_id);
        write_manifest(&run_dir, &manifest).unwrap();

        let report = verify_run(&run_dir);
        assert!(report.check("run_id_derivation").unwrap().valid);
    }

    #[test]
    fn chainable_run_requires_prior_artifact_snapshot() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);
        let mut manifest = read_manifest(&run_dir).unwrap();
        manifest.chain_metadata = Some(runvault_artifact::model::ChainMetadata {
            is_chainable_stage: true,
            prior_stages: vec![],
        });
        write_manifest(&run_dir, &manifest).unwrap();

        let report = verify_run(&run_dir);
        assert!(!report.check("chainable_structure").unwrap().valid);
    }

    #[test]
    fn replay_probe_passes_for_intact_run() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);
        let (can_replay, diagnostics) = replay(&run_dir);
        assert!(can_replay, "{diagnostics:?}");
    }

    #[test]
    fn replay_probe_reports_missing_snapshots() {
        let dir = TempDir::new().unwrap();
        let run_dir = seed_run(&dir);
        fs::remove_file(run_dir.join("inputs/brief.resolved.json").as_std_path()).unwrap();

        let (can_replay, diagnostics) = replay(&run_dir);
        assert!(!can_replay);
        assert!(diagnostics.iter().any(|d| d.contains("brief")));
    }
}
