//! `execute_run`: the strict order of one run
//!
//! resolve inputs → write snapshots → compute `inputs_hash` → derive
//! `run_id` → check for replay → execute payload → write outputs → write
//! manifest → finalize. The replay check sits before the payload so an
//! idempotent re-invocation never pays for an LLM call.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use runvault_artifact::manifest::write_manifest;
use runvault_artifact::model::{
    ChainMetadata, Manifest, PriorStageRef, RunStatus, SCHEMA_VERSION, SnapshotMeta,
};
use runvault_artifact::rundir::{FinalizeOutcome, ProbeOutcome, RunDirManager};
use runvault_artifact::snapshot::SnapshotWriter;
use runvault_artifact::{PriorArtifactBinder, PriorArtifactBinding};
use runvault_context as context;
use runvault_doctrine::{DoctrineConfig, DoctrineReference, DoctrineStore};
use runvault_identity::compute_inputs_hash;
use runvault_utils::atomic_write::write_bytes_atomic;
use runvault_utils::canon::sha256_file;

use crate::adapter::{LlmAdapter, ModelConfig, NoopEmitter, ObservabilityEmitter};
use crate::brief::Brief;
use crate::error::EngineError;

/// Snapshot names. The set is open: stage adapters may add their own through
/// the writer, and the verifier iterates whatever the manifest declares.
const SNAP_BRIEF: &str = "brief";
const SNAP_CONTEXT: &str = "context";
const SNAP_MODEL_CONFIG: &str = "model_config";
const SNAP_DOCTRINE: &str = "doctrine";
const SNAP_PRIOR_ARTIFACT: &str = "prior_artifact";

/// Immutable engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub artifacts_root: Utf8PathBuf,
    pub repo_root: Utf8PathBuf,
    pub corpus_root: Utf8PathBuf,
    pub doctrine: DoctrineConfig,
}

impl EngineConfig {
    /// Conventional layout beneath a repository root: `artifacts/` and
    /// `corpus/` siblings, default doctrine roots.
    pub fn for_repo(repo_root: impl Into<Utf8PathBuf>) -> Self {
        let repo_root = repo_root.into();
        Self {
            artifacts_root: repo_root.join("artifacts"),
            corpus_root: repo_root.join("corpus"),
            doctrine: DoctrineConfig::default(),
            repo_root,
        }
    }
}

/// Per-run collaborator parameters.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    /// Ephemeral queue identifier; recorded for audit, excluded from hashes.
    pub queue_job_id: Option<String>,
    pub model_config: ModelConfig,
    /// Name of the primary output artifact.
    pub output_name: Option<String>,
    pub langfuse_trace_id: Option<String>,
}

impl RunParams {
    fn output_name(&self) -> &str {
        self.output_name.as_deref().unwrap_or("output.txt")
    }
}

/// The deterministic execution engine.
pub struct Engine {
    config: EngineConfig,
    doctrine_store: DoctrineStore,
    rundir: RunDirManager,
    adapter: Box<dyn LlmAdapter>,
    emitter: Box<dyn ObservabilityEmitter>,
}

impl Engine {
    pub fn new(config: EngineConfig, adapter: Box<dyn LlmAdapter>) -> Self {
        Self::with_emitter(config, adapter, Box::new(NoopEmitter))
    }

    pub fn with_emitter(
        config: EngineConfig,
        adapter: Box<dyn LlmAdapter>,
        emitter: Box<dyn ObservabilityEmitter>,
    ) -> Self {
        let doctrine_store =
            DoctrineStore::new(config.repo_root.clone(), config.doctrine.clone());
        let rundir = RunDirManager::new(config.artifacts_root.clone());
        Self {
            config,
            doctrine_store,
            rundir,
            adapter,
            emitter,
        }
    }

    /// Execute one run. Returns the existing manifest (status
    /// `idempotent_replay`) when an identical run is already finalized.
    pub fn execute_run(
        &self,
        brief: &Brief,
        params: &RunParams,
    ) -> Result<Manifest, EngineError> {
        let started_at = Utc::now();

        // Input resolution: everything that can fail before the filesystem
        // is touched fails here.
        let (doctrine_bytes, doctrine_ref) = self
            .doctrine_store
            .load(&brief.doctrine_id, &brief.doctrine_version)?;
        let context_pack = context::resolve(&brief.context, &self.config.corpus_root)?;
        let prior_binding = self.bind_prior(brief)?;

        // Snapshot phase: materialize every input under the build directory.
        let build = self.rundir.allocate_build_dir(&brief.job_id)?;
        let writer = SnapshotWriter::new(build.path.clone());

        let mut snapshots: BTreeMap<String, SnapshotMeta> = BTreeMap::new();
        snapshots.insert(
            SNAP_BRIEF.to_string(),
            writer.write_resolved(SNAP_BRIEF, &brief.canonical_value())?,
        );
        snapshots.insert(
            SNAP_CONTEXT.to_string(),
            writer.write_resolved(SNAP_CONTEXT, &context_pack)?,
        );
        snapshots.insert(
            SNAP_MODEL_CONFIG.to_string(),
            writer.write(SNAP_MODEL_CONFIG, "model_config.json", &params.model_config)?,
        );
        snapshots.insert(
            SNAP_DOCTRINE.to_string(),
            writer.write_resolved(SNAP_DOCTRINE, &doctrine_ref)?,
        );
        if let Some(binding) = &prior_binding {
            snapshots.insert(
                SNAP_PRIOR_ARTIFACT.to_string(),
                writer.write_resolved(SNAP_PRIOR_ARTIFACT, binding)?,
            );
        }

        // Identity phase.
        let hash_map: BTreeMap<String, String> = snapshots
            .iter()
            .map(|(name, meta)| (name.clone(), meta.sha256.clone()))
            .collect();
        let inputs_hash = compute_inputs_hash(&hash_map)?;

        // Replay check before the payload: skip the LLM call entirely when
        // an identical run exists.
        let run_id = match self.rundir.probe(&brief.job_id, &inputs_hash)? {
            ProbeOutcome::Replay {
                run_id,
                mut manifest,
                ..
            } => {
                self.rundir.discard(build);
                manifest.status = RunStatus::IdempotentReplay;
                self.emitter
                    .emit_run(&brief.job_id, &run_id, &inputs_hash);
                return Ok(manifest);
            }
            ProbeOutcome::Fresh { run_id } => run_id,
        };

        // Payload. A failing adapter still produces a finalized artifact.
        let (status, artifacts, failure_detail) =
            self.run_payload(&build.path, brief, params, &doctrine_bytes, &context_pack)?;

        let manifest = Manifest {
            schema_version: SCHEMA_VERSION.to_string(),
            job_id: brief.job_id.clone(),
            run_id: run_id.clone(),
            queue_job_id: params.queue_job_id.clone(),
            job_ref: brief.job_ref.clone(),
            job_type: brief.job_type.clone(),
            status,
            inputs_hash: inputs_hash.clone(),
            input_snapshots: snapshots,
            doctrine: scrub_doctrine(doctrine_ref),
            artifacts,
            chain_metadata: chain_metadata(prior_binding.as_ref()),
            migration_history: Vec::new(),
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            langfuse_trace_id: params.langfuse_trace_id.clone(),
            failure_detail,
        };
        write_manifest(&build.path, &manifest)?;

        // Finalize: single rename into the canonical path.
        let manifest = match self.rundir.finalize(build, &inputs_hash)? {
            FinalizeOutcome::Finalized { run_id: final_id, run_dir } => {
                if final_id != manifest.run_id {
                    // Lost a collision race after the probe; the directory
                    // name won, so the manifest follows it.
                    let mut corrected = manifest;
                    corrected.run_id = final_id;
                    write_manifest(&run_dir, &corrected)?;
                    corrected
                } else {
                    manifest
                }
            }
            FinalizeOutcome::Replayed { mut manifest, .. } => {
                // A concurrent process finalized the identical run first.
                manifest.status = RunStatus::IdempotentReplay;
                manifest
            }
        };

        self.emitter
            .emit_run(&manifest.job_id, &manifest.run_id, &manifest.inputs_hash);
        info!(
            job_id = %manifest.job_id,
            run_id = %manifest.run_id,
            status = ?manifest.status,
            "run complete"
        );
        Ok(manifest)
    }

    fn bind_prior(&self, brief: &Brief) -> Result<Option<PriorArtifactBinding>, EngineError> {
        let Some(prior_run_id) = &brief.prior_run_id else {
            return Ok(None);
        };
        let binder = PriorArtifactBinder::new(self.config.artifacts_root.clone());
        Ok(Some(binder.bind(prior_run_id, &brief.required_outputs)?))
    }

    /// Invoke the adapter and persist its output. Adapter failure is
    /// captured, not propagated: the run finalizes with `status: "failed"`.
    fn run_payload(
        &self,
        build_dir: &Utf8PathBuf,
        brief: &Brief,
        params: &RunParams,
        doctrine_bytes: &[u8],
        context_pack: &context::ContextPack,
    ) -> Result<(RunStatus, BTreeMap<String, SnapshotMeta>, Option<String>), EngineError> {
        let prompt = compose_prompt(doctrine_bytes, context_pack, &brief.canonical_value());

        match self.adapter.invoke(&prompt, &params.model_config) {
            Ok(output) => {
                let output_name = params.output_name();
                let rel_path = format!("outputs/{output_name}");
                let abs_path = build_dir.join(&rel_path);
                write_bytes_atomic(&abs_path, &output.content).map_err(|e| {
                    EngineError::OutputWrite {
                        path: abs_path.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let (sha256, bytes) =
                    sha256_file(&abs_path).map_err(|e| EngineError::OutputWrite {
                        path: abs_path.to_string(),
                        reason: e.to_string(),
                    })?;

                let mut artifacts = BTreeMap::new();
                artifacts.insert(
                    output_name.to_string(),
                    SnapshotMeta {
                        path: rel_path,
                        sha256,
                        bytes,
                    },
                );
                Ok((RunStatus::Succeeded, artifacts, None))
            }
            Err(e) => {
                warn!(job_id = %brief.job_id, error = %e, "payload failed");
                Ok((RunStatus::Failed, BTreeMap::new(), Some(e.to_string())))
            }
        }
    }
}

/// The prompt handed to the adapter: doctrine, then context, then the
/// canonical brief. Stage adapters with richer templating sit outside the
/// core and receive the same materials.
fn compose_prompt(
    doctrine_bytes: &[u8],
    context_pack: &context::ContextPack,
    brief_value: &Value,
) -> Vec<u8> {
    let mut prompt = Vec::new();
    prompt.extend_from_slice(doctrine_bytes);
    prompt.extend_from_slice(b"\n\n");
    prompt.extend_from_slice(context_pack.content_blob.as_bytes());
    prompt.extend_from_slice(b"\n\n");
    prompt.extend_from_slice(
        runvault_utils::canon::to_canonical_json(brief_value)
            .unwrap_or_default()
            .as_bytes(),
    );
    prompt
}

fn chain_metadata(binding: Option<&PriorArtifactBinding>) -> Option<ChainMetadata> {
    binding.map(|b| ChainMetadata {
        is_chainable_stage: true,
        prior_stages: vec![PriorStageRef {
            run_id: b.prior_run_id.clone(),
            job_id: b.prior_job_id.clone(),
            stage: b.prior_stage.clone(),
        }],
    })
}

/// The manifest stores the doctrine reference without its in-memory
/// resolution timestamp.
fn scrub_doctrine(mut reference: DoctrineReference) -> DoctrineReference {
    reference.resolved_at = None;
    reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FixedOutputAdapter, LlmAdapterError, LlmOutput};
    use std::fs;
    use tempfile::TempDir;

    struct FailingAdapter;

    impl LlmAdapter for FailingAdapter {
        fn invoke(
            &self,
            _prompt: &[u8],
            _model: &ModelConfig,
        ) -> Result<LlmOutput, LlmAdapterError> {
            Err(LlmAdapterError("provider unavailable".to_string()))
        }
    }

    fn test_repo() -> (TempDir, EngineConfig) {
        let dir = TempDir::new().unwrap();
        let repo_root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let doctrine_dir = repo_root.join("prompts/example");
        fs::create_dir_all(doctrine_dir.as_std_path()).unwrap();
        fs::write(doctrine_dir.join("v1.0.0.md").as_std_path(), b"hello\n").unwrap();
        fs::create_dir_all(repo_root.join("corpus").as_std_path()).unwrap();
        let config = EngineConfig::for_repo(repo_root);
        (dir, config)
    }

    fn demo_brief() -> Brief {
        Brief::from_json_str(
            r#"{
                "job_id": "demo-001",
                "job_type": "synthesis",
                "doctrine": {"id": "example", "version": "v1.0.0"}
            }"#,
            "jobs/demo-001.json",
        )
        .unwrap()
    }

    #[test]
    fn fresh_run_finalizes_with_four_snapshots() {
        let (_dir, config) = test_repo();
        let engine = Engine::new(config.clone(), Box::new(FixedOutputAdapter::new(b"out\n".to_vec())));

        let manifest = engine.execute_run(&demo_brief(), &RunParams::default()).unwrap();

        assert_eq!(manifest.status, RunStatus::Succeeded);
        assert_eq!(manifest.input_snapshots.len(), 4);
        assert!(manifest.inputs_hash.starts_with("sha256:"));
        assert_eq!(manifest.run_id.len(), 32);
        assert!(manifest.chain_metadata.is_none());
        assert!(manifest.doctrine.resolved_at.is_none());

        let run_dir = config.artifacts_root.join("demo-001").join(&manifest.run_id);
        assert!(run_dir.join("manifest.json").is_file());
        assert!(run_dir.join("inputs/brief.resolved.json").is_file());
        assert!(run_dir.join("outputs/output.txt").is_file());
    }

    #[test]
    fn second_run_is_idempotent_replay() {
        let (_dir, config) = test_repo();
        let engine = Engine::new(config, Box::new(FixedOutputAdapter::new(b"out\n".to_vec())));

        let first = engine.execute_run(&demo_brief(), &RunParams::default()).unwrap();
        let second = engine.execute_run(&demo_brief(), &RunParams::default()).unwrap();

        assert_eq!(first.run_id, second.run_id);
        assert_eq!(second.status, RunStatus::IdempotentReplay);
    }

    #[test]
    fn queue_job_id_does_not_affect_identity() {
        let (_dir, config) = test_repo();
        let engine = Engine::new(config, Box::new(FixedOutputAdapter::new(b"out\n".to_vec())));

        let first = engine.execute_run(&demo_brief(), &RunParams::default()).unwrap();
        let replay = engine
            .execute_run(
                &demo_brief(),
                &RunParams {
                    queue_job_id: Some("queue-999".to_string()),
                    langfuse_trace_id: Some("trace-1".to_string()),
                    ..RunParams::default()
                },
            )
            .unwrap();

        assert_eq!(first.run_id, replay.run_id);
        assert_eq!(replay.status, RunStatus::IdempotentReplay);
    }

    #[test]
    fn payload_failure_finalizes_failed_manifest() {
        let (_dir, config) = test_repo();
        let engine = Engine::new(config.clone(), Box::new(FailingAdapter));

        let manifest = engine.execute_run(&demo_brief(), &RunParams::default()).unwrap();

        assert_eq!(manifest.status, RunStatus::Failed);
        assert!(manifest.artifacts.is_empty());
        assert!(
            manifest
                .failure_detail
                .as_ref()
                .unwrap()
                .contains("provider unavailable")
        );

        // The failed run still sits at its canonical path with snapshots
        // intact for post-mortem.
        let run_dir = config.artifacts_root.join("demo-001").join(&manifest.run_id);
        assert!(run_dir.join("manifest.json").is_file());
        assert!(run_dir.join("inputs/doctrine.resolved.json").is_file());
    }

    #[test]
    fn unknown_doctrine_aborts_before_any_write() {
        let (_dir, config) = test_repo();
        let engine = Engine::new(config.clone(), Box::new(FixedOutputAdapter::new(Vec::new())));

        let brief = Brief::from_json_str(
            r#"{
                "job_id": "demo-001",
                "job_type": "synthesis",
                "doctrine": {"id": "rogue", "version": "v1.0.0"}
            }"#,
            "jobs/demo-001.json",
        )
        .unwrap();

        let err = engine.execute_run(&brief, &RunParams::default()).unwrap_err();
        assert!(matches!(err, EngineError::Doctrine(_)));
        assert!(!config.artifacts_root.join("demo-001").exists());
    }

    #[test]
    fn chainable_run_without_prior_aborts_cleanly() {
        let (_dir, config) = test_repo();
        let engine = Engine::new(config.clone(), Box::new(FixedOutputAdapter::new(Vec::new())));

        let brief = Brief::from_json_str(
            r#"{
                "job_id": "demo-002",
                "job_type": "review",
                "doctrine": {"id": "example", "version": "v1.0.0"},
                "prior_run_id": "feedfacefeedfacefeedfacefeedface",
                "required_outputs": ["output.txt"]
            }"#,
            "jobs/demo-002.json",
        )
        .unwrap();

        let err = engine.execute_run(&brief, &RunParams::default()).unwrap_err();
        assert!(matches!(err, EngineError::Chain(_)));
        assert!(!config.artifacts_root.join("demo-002").exists());
    }
}
