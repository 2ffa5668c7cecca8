//! Collaborator seams: the LLM adapter and the observability emitter
//!
//! Provider backends (HTTP clients, CLI wrappers) live outside the core; the
//! engine only sees a pure function from `(prompt bytes, model config)` to
//! output bytes. The model configuration itself is a hashed input, so any
//! provider or sampling change produces a new `run_id` whether or not the
//! provider is deterministic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model configuration, snapshotted as `model_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    pub cache_flag: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            temperature: 0.0,
            top_p: 1.0,
            response_schema: None,
            cache_flag: false,
        }
    }
}

/// Usage metadata returned by a provider. Recorded in the volatile
/// projection only; never hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMeta {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Raw provider output.
#[derive(Debug, Clone)]
pub struct LlmOutput {
    pub content: Vec<u8>,
    pub usage: UsageMeta,
}

/// Provider failure, opaque to the core.
#[derive(Error, Debug)]
#[error("llm adapter failed: {0}")]
pub struct LlmAdapterError(pub String);

/// The payload seam. Implementations may block; the engine treats the call
/// as opaque.
pub trait LlmAdapter {
    fn invoke(&self, prompt: &[u8], model: &ModelConfig) -> Result<LlmOutput, LlmAdapterError>;
}

/// Adapter returning fixed bytes; the unit of determinism testing.
pub struct FixedOutputAdapter {
    content: Vec<u8>,
}

impl FixedOutputAdapter {
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl LlmAdapter for FixedOutputAdapter {
    fn invoke(&self, _prompt: &[u8], _model: &ModelConfig) -> Result<LlmOutput, LlmAdapterError> {
        Ok(LlmOutput {
            content: self.content.clone(),
            usage: UsageMeta::default(),
        })
    }
}

/// Downstream span/index emitter. Must be no-op safe: implementations
/// swallow their own failures, and nothing the emitter does participates in
/// any hash.
pub trait ObservabilityEmitter {
    fn emit_run(&self, job_id: &str, run_id: &str, inputs_hash: &str);
}

/// The default emitter: does nothing.
pub struct NoopEmitter;

impl ObservabilityEmitter for NoopEmitter {
    fn emit_run(&self, _job_id: &str, _run_id: &str, _inputs_hash: &str) {}
}
