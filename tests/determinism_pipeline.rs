//! End-to-end determinism scenarios
//!
//! Exercises the full pipeline through the public engine surface: fresh
//! runs, idempotent replay, input drift, chain binding, migration, and
//! tamper detection, all against real temp-dir artifact trees.

mod common;

use common::{TestRepo, brief_with_job_type, chain_brief, count_files, default_params, demo_brief};

use runvault::{
    Brief, ModelConfig, RunParams, RunStatus, SCHEMA_VERSION, builtin_registry, verify_run,
};
use runvault_migrate::apply_manifest;
use std::fs;

/// S1: a fresh run produces the full canonical layout.
#[test]
fn fresh_run_produces_canonical_artifact() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"generated output\n");

    let manifest = engine.execute_run(&demo_brief(), &default_params()).unwrap();

    assert_eq!(manifest.status, RunStatus::Succeeded);
    assert_eq!(manifest.schema_version, SCHEMA_VERSION);
    assert!(manifest.inputs_hash.starts_with("sha256:"));
    let digest = manifest.inputs_hash.strip_prefix("sha256:").unwrap();
    assert_eq!(manifest.run_id, digest[..32].to_string());

    let run_dir = repo
        .config
        .artifacts_root
        .join("demo-001")
        .join(&manifest.run_id);
    assert!(run_dir.is_dir());

    // Four standard snapshots, no prior_artifact for a non-chainable stage.
    for snapshot in [
        "inputs/brief.resolved.json",
        "inputs/context.resolved.json",
        "inputs/model_config.json",
        "inputs/doctrine.resolved.json",
    ] {
        assert!(run_dir.join(snapshot).is_file(), "missing {snapshot}");
    }
    assert!(!run_dir.join("inputs/prior_artifact.resolved.json").exists());
    assert!(run_dir.join("outputs/output.txt").is_file());
    assert_eq!(
        fs::read(run_dir.join("outputs/output.txt").as_std_path()).unwrap(),
        b"generated output\n"
    );
}

/// S2 / P1: identical re-invocation replays without writing.
#[test]
fn replay_returns_existing_run_without_writes() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"generated output\n");

    let first = engine.execute_run(&demo_brief(), &default_params()).unwrap();
    let run_dir = repo
        .config
        .artifacts_root
        .join("demo-001")
        .join(&first.run_id);
    let files_before = count_files(&run_dir);

    let second = engine.execute_run(&demo_brief(), &default_params()).unwrap();

    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.status, RunStatus::IdempotentReplay);
    assert_eq!(count_files(&run_dir), files_before);

    // The on-disk manifest still records the original success.
    let on_disk = runvault_artifact::manifest::read_manifest(&run_dir).unwrap();
    assert_eq!(on_disk.status, RunStatus::Succeeded);
}

/// S3 / P2: a single-character brief drift yields a distinct coexisting run.
#[test]
fn brief_drift_produces_distinct_run() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"generated output\n");

    let original = engine.execute_run(&demo_brief(), &default_params()).unwrap();
    let drifted = engine
        .execute_run(&brief_with_job_type("synthesisX"), &default_params())
        .unwrap();

    assert_ne!(original.run_id, drifted.run_id);
    let job_dir = repo.config.artifacts_root.join("demo-001");
    assert!(job_dir.join(&original.run_id).is_dir());
    assert!(job_dir.join(&drifted.run_id).is_dir());
}

/// P2: model configuration participates in identity; volatile params do not.
#[test]
fn model_config_drift_changes_run_id() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"generated output\n");

    let base = engine.execute_run(&demo_brief(), &default_params()).unwrap();

    let warmer = RunParams {
        model_config: ModelConfig {
            temperature: 0.7,
            ..ModelConfig::default()
        },
        ..RunParams::default()
    };
    let drifted = engine.execute_run(&demo_brief(), &warmer).unwrap();
    assert_ne!(base.run_id, drifted.run_id);

    let with_volatile = RunParams {
        queue_job_id: Some("queue-42".to_string()),
        langfuse_trace_id: Some("trace-42".to_string()),
        ..RunParams::default()
    };
    let replayed = engine.execute_run(&demo_brief(), &with_volatile).unwrap();
    assert_eq!(base.run_id, replayed.run_id);
    assert_eq!(replayed.status, RunStatus::IdempotentReplay);
}

/// P2 for the retrieve strategy: corpus content participates in identity.
#[test]
fn corpus_drift_changes_retrieve_run_id() {
    let repo = TestRepo::new();
    repo.write_corpus_file("notes/governance.md", "governance rules for pipelines");
    let engine = repo.engine(b"generated output\n");

    let brief = Brief::from_json_str(
        r#"{
            "job_id": "demo-003",
            "job_type": "synthesis",
            "doctrine": {"id": "example", "version": "v1.0.0"},
            "context": {"query": "governance", "top_k": 3}
        }"#,
        "jobs/demo-003.json",
    )
    .unwrap();

    let before = engine.execute_run(&brief, &default_params()).unwrap();
    repo.write_corpus_file("notes/governance.md", "governance rules for pipelines v2");
    let after = engine.execute_run(&brief, &default_params()).unwrap();

    assert_ne!(before.run_id, after.run_id);
}

/// S4 / P4: chain binding tracks the prior's output bytes.
#[test]
fn chain_binding_depends_on_prior_output_bytes() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"upstream output\n");

    let prior = engine.execute_run(&demo_brief(), &default_params()).unwrap();

    let chained = engine
        .execute_run(&chain_brief(&prior.run_id), &default_params())
        .unwrap();
    assert_eq!(chained.input_snapshots.len(), 5);
    assert!(chained.input_snapshots.contains_key("prior_artifact"));
    let chain_meta = chained.chain_metadata.as_ref().unwrap();
    assert!(chain_meta.is_chainable_stage);
    assert_eq!(chain_meta.prior_stages[0].run_id, prior.run_id);

    // Rebinding against unchanged outputs reproduces the original identity.
    let rebound = engine
        .execute_run(&chain_brief(&prior.run_id), &default_params())
        .unwrap();
    assert_eq!(rebound.run_id, chained.run_id);
    assert_eq!(rebound.status, RunStatus::IdempotentReplay);

    // Overwriting the prior's output out of band changes the downstream id.
    let prior_output = repo
        .config
        .artifacts_root
        .join("demo-001")
        .join(&prior.run_id)
        .join("outputs/output.txt");
    fs::write(prior_output.as_std_path(), b"tampered upstream\n").unwrap();

    let rebound_after_tamper = engine
        .execute_run(&chain_brief(&prior.run_id), &default_params())
        .unwrap();
    assert_ne!(rebound_after_tamper.run_id, chained.run_id);
}

/// P4: upstream input drift propagates through the chain.
#[test]
fn upstream_drift_propagates_to_chained_run() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"upstream output\n");

    let prior_a = engine.execute_run(&demo_brief(), &default_params()).unwrap();
    let chained_a = engine
        .execute_run(&chain_brief(&prior_a.run_id), &default_params())
        .unwrap();

    // Different upstream inputs, different upstream identity.
    let prior_b = engine
        .execute_run(&brief_with_job_type("synthesis-v2"), &default_params())
        .unwrap();
    assert_ne!(prior_a.run_id, prior_b.run_id);

    let chained_b = engine
        .execute_run(&chain_brief(&prior_b.run_id), &default_params())
        .unwrap();
    assert_ne!(chained_a.run_id, chained_b.run_id);
}

/// S5 / P5: the 1.0.0 → 1.2.0 migration path preserves identity.
#[test]
fn migration_preserves_identity_fields() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"generated output\n");
    let manifest = engine.execute_run(&demo_brief(), &default_params()).unwrap();

    let run_dir = repo
        .config
        .artifacts_root
        .join("demo-001")
        .join(&manifest.run_id);
    let manifest_path = run_dir.join("manifest.json");

    // Rewind the on-disk manifest to schema 1.0.0 (pre snapshot-map era).
    let mut value = runvault_artifact::manifest::read_manifest_value(&run_dir).unwrap();
    let map = value.as_object_mut().unwrap();
    map.insert("schema_version".into(), serde_json::json!("1.0.0"));
    map.remove("input_snapshots");
    map.remove("chain_metadata");
    fs::write(
        manifest_path.as_std_path(),
        serde_json::to_vec_pretty(&value).unwrap(),
    )
    .unwrap();

    let outcome = apply_manifest(&builtin_registry(), &manifest_path, "1.2.0", false).unwrap();
    let migrated = &outcome.manifest;

    assert_eq!(migrated["schema_version"], "1.2.0");
    assert!(migrated["input_snapshots"].is_object());
    assert_eq!(migrated["chain_metadata"]["is_chainable_stage"], false);
    assert_eq!(migrated["migration_history"].as_array().unwrap().len(), 1);
    assert_eq!(migrated["job_id"], value["job_id"]);
    assert_eq!(migrated["run_id"], value["run_id"]);
    assert_eq!(migrated["artifacts"], value["artifacts"]);
    assert!(manifest_path
        .as_std_path()
        .parent()
        .unwrap()
        .join("manifest.json.backup")
        .exists());

    // Applying the same migration again is a no-op.
    let again = apply_manifest(&builtin_registry(), &manifest_path, "1.2.0", false).unwrap();
    assert!(again.is_noop());
}

/// P3: every finalized run verifies from disk alone.
#[test]
fn finalized_runs_verify_clean() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"generated output\n");
    let manifest = engine.execute_run(&demo_brief(), &default_params()).unwrap();

    let run_dir = repo
        .config
        .artifacts_root
        .join("demo-001")
        .join(&manifest.run_id);
    let report = verify_run(&run_dir);
    assert!(report.valid, "{report:?}");
}

/// S6: tampering with a snapshot is caught, while job_id consistency holds.
#[test]
fn verifier_catches_snapshot_tamper() {
    let repo = TestRepo::new();
    let engine = repo.engine(b"generated output\n");
    let manifest = engine.execute_run(&demo_brief(), &default_params()).unwrap();

    let run_dir = repo
        .config
        .artifacts_root
        .join("demo-001")
        .join(&manifest.run_id);
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

/// P7: the deterministic projection is byte-identical across independent
/// processes executing the same inputs.
#[test]
fn deterministic_projection_is_byte_identical_across_repos() {
    let projections: Vec<String> = (0..2)
        .map(|_| {
            let repo = TestRepo::new();
            let engine = repo.engine(b"generated output\n");
            let manifest = engine.execute_run(&demo_brief(), &default_params()).unwrap();
            let projected = runvault::deterministic_projection(&manifest).unwrap();
            runvault_utils::canon::to_compact_canonical_json(&projected).unwrap()
        })
        .collect();

    assert_eq!(projections[0], projections[1]);
    assert!(!projections[0].contains("started_at"));
    assert!(!projections[0].contains("langfuse"));
}
