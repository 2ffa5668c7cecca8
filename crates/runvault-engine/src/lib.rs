//! Run orchestration
//!
//! Ties the resolution, snapshotting, identity, and artifact layers together
//! behind [`Engine::execute_run`]. The LLM call itself is behind the
//! [`LlmAdapter`] seam: from the engine's point of view it is a pure
//! function from `(prompt bytes, model config)` to output bytes, and its
//! failure still produces a finalized artifact with `status: "failed"`.

pub mod adapter;
pub mod brief;
pub mod engine;
pub mod error;
pub mod reindex;

pub use adapter::{
    FixedOutputAdapter, LlmAdapter, LlmAdapterError, LlmOutput, ModelConfig, NoopEmitter,
    ObservabilityEmitter, UsageMeta,
};
pub use brief::{Brief, BriefError};
pub use engine::{Engine, EngineConfig, RunParams};
pub use error::EngineError;
pub use reindex::{IndexSink, NoopIndexSink, reindex};
