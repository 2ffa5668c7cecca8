//! Brief: the governance request that starts a run
//!
//! A brief is immutable within a run. Its canonical snapshot must stay
//! byte-stable across backward-compatible schema extensions, so the parser
//! records which keys the source document actually set and the canonical
//! serialization excludes optional fields that are both unset in the source
//! and at their built-in defaults. That explicit-key gate is the only place
//! where "what the user wrote" and "what the defaults imply" differ in the
//! hash.

use std::collections::BTreeSet;

use camino::Utf8Path;
use runvault_context::ContextSpec;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Built-in default for `generation_mode`.
pub const DEFAULT_GENERATION_MODE: &str = "single";

/// Built-in default for `variant_count`.
pub const DEFAULT_VARIANT_COUNT: u64 = 1;

#[derive(Error, Debug)]
pub enum BriefError {
    #[error("failed to read brief at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("brief is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("brief is malformed: {0}")]
    Malformed(String),

    #[error("brief is missing required field '{0}'")]
    MissingField(&'static str),
}

/// A parsed brief plus the set of keys its source document explicitly set.
#[derive(Debug, Clone, PartialEq)]
pub struct Brief {
    pub job_id: String,
    pub job_type: String,
    /// Repo-relative path of the source brief document.
    pub job_ref: String,
    pub doctrine_id: String,
    pub doctrine_version: String,
    pub context: ContextSpec,
    pub prior_run_id: Option<String>,
    pub required_outputs: Vec<String>,
    pub generation_mode: String,
    pub variant_count: u64,
    explicit_keys: BTreeSet<String>,
}

impl Brief {
    /// Parse a brief from its JSON text. `job_ref` is the repo-relative path
    /// the text came from and is recorded in the manifest, not hashed as part
    /// of the brief body.
    pub fn from_json_str(text: &str, job_ref: impl Into<String>) -> Result<Self, BriefError> {
        let value: Value = serde_json::from_str(text)?;
        let map = value
            .as_object()
            .ok_or_else(|| BriefError::Malformed("brief is not a JSON object".to_string()))?;

        let explicit_keys: BTreeSet<String> = map.keys().cloned().collect();

        let job_id = required_str(map, "job_id")?;
        let job_type = required_str(map, "job_type")?;

        let doctrine = map
            .get("doctrine")
            .and_then(Value::as_object)
            .ok_or(BriefError::MissingField("doctrine"))?;
        let doctrine_id = required_str(doctrine, "id")
            .map_err(|_| BriefError::MissingField("doctrine.id"))?;
        let doctrine_version = required_str(doctrine, "version")
            .map_err(|_| BriefError::MissingField("doctrine.version"))?;

        let context = match map.get("context") {
            Some(ctx) => serde_json::from_value(ctx.clone())
                .map_err(|e| BriefError::Malformed(format!("context: {e}")))?,
            None => ContextSpec::Glob { patterns: vec![] },
        };

        let prior_run_id = map
            .get("prior_run_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let required_outputs = match map.get("required_outputs") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| BriefError::Malformed(format!("required_outputs: {e}")))?,
            None => Vec::new(),
        };

        let generation_mode = map
            .get("generation_mode")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_GENERATION_MODE)
            .to_string();
        let variant_count = map
            .get("variant_count")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_VARIANT_COUNT);

        Ok(Self {
            job_id,
            job_type,
            job_ref: job_ref.into(),
            doctrine_id,
            doctrine_version,
            context,
            prior_run_id,
            required_outputs,
            generation_mode,
            variant_count,
            explicit_keys,
        })
    }

    /// Read and parse a brief file; `job_ref` becomes the path relative to
    /// `repo_root` when the file sits beneath it.
    pub fn from_file(path: &Utf8Path, repo_root: &Utf8Path) -> Result<Self, BriefError> {
        let text = std::fs::read_to_string(path.as_std_path()).map_err(|source| BriefError::Io {
            path: path.to_string(),
            source,
        })?;
        let job_ref = runvault_utils::paths::to_repo_relative(path, repo_root)
            .unwrap_or_else(|| path.to_string());
        Self::from_json_str(&text, job_ref)
    }

    /// True when this brief requests a chainable stage.
    #[must_use]
    pub fn is_chainable(&self) -> bool {
        self.prior_run_id.is_some()
    }

    /// Whether the source document explicitly set `key`.
    #[must_use]
    pub fn is_explicit(&self, key: &str) -> bool {
        self.explicit_keys.contains(key)
    }

    /// The value snapshotted as `brief.resolved.json`.
    ///
    /// Required fields are always present. Optional fields appear if and
    /// only if the source set them explicitly or their value differs from
    /// the built-in default, which keeps `run_id` stable when new optional
    /// fields grow defaults.
    #[must_use]
    pub fn canonical_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("job_id".to_string(), json!(self.job_id));
        map.insert("job_type".to_string(), json!(self.job_type));
        map.insert(
            "doctrine".to_string(),
            json!({ "id": self.doctrine_id, "version": self.doctrine_version }),
        );
        map.insert("context".to_string(), json!(self.context));

        if let Some(prior_run_id) = &self.prior_run_id {
            map.insert("prior_run_id".to_string(), json!(prior_run_id));
        }
        if self.is_explicit("required_outputs") || !self.required_outputs.is_empty() {
            map.insert("required_outputs".to_string(), json!(self.required_outputs));
        }
        if self.is_explicit("generation_mode") || self.generation_mode != DEFAULT_GENERATION_MODE
        {
            map.insert("generation_mode".to_string(), json!(self.generation_mode));
        }
        if self.is_explicit("variant_count") || self.variant_count != DEFAULT_VARIANT_COUNT {
            map.insert("variant_count".to_string(), json!(self.variant_count));
        }

        Value::Object(map)
    }
}

fn required_str(map: &Map<String, Value>, key: &'static str) -> Result<String, BriefError> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(BriefError::MissingField(key))
}
