//! Doctrine store: versioned, whitelisted prompt templates
//!
//! A doctrine is an in-repo template addressed by an opaque
//! `(doctrine_id, version)` pair. Resolution searches a small fixed list of
//! repo-relative candidate roots and returns the first existing file's bytes
//! together with a [`DoctrineReference`] whose `sha256` participates in
//! `inputs_hash`.
//!
//! Both tokens are validated against path metacharacters before any
//! filesystem access, and the id must appear in the store's whitelist. The
//! whitelist and roots are immutable configuration passed at construction so
//! tests can build alternate stores without process-global state.

use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use runvault_utils::canon::sha256_hex;
use runvault_utils::paths::{has_path_metachars, to_repo_relative};

/// Doctrine ids shipped with the engine. Deployments extend this through
/// [`DoctrineConfig`], never by mutation.
static DEFAULT_WHITELIST: Lazy<BTreeSet<String>> = Lazy::new(|| {
    ["example", "governance-default", "synthesis", "review"]
        .into_iter()
        .map(str::to_string)
        .collect()
});

/// Candidate roots searched in order, relative to the repository root.
const DEFAULT_ROOTS: &[&str] = &["prompts", "doctrine"];

/// Extensions tried for each candidate root, in order.
const CANDIDATE_EXTENSIONS: &[&str] = &["md", "txt"];

/// Resolution failures for a `(doctrine_id, version)` pair.
#[derive(Error, Debug)]
pub enum DoctrineError {
    #[error("doctrine id '{id}' is not whitelisted")]
    NotWhitelisted { id: String },

    #[error("doctrine token '{token}' contains path metacharacters")]
    UnsafePath { token: String },

    #[error("doctrine '{id}' version '{version}' not found; searched {searched:?}")]
    NotFound {
        id: String,
        version: String,
        searched: Vec<String>,
    },

    #[error("failed to read doctrine file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// The hashed identity of a resolved doctrine.
///
/// `resolved_path` is repo-relative with forward slashes, never absolute.
/// `resolved_at` is in-memory bookkeeping only and is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctrineReference {
    pub doctrine_id: String,
    pub version: String,
    pub sha256: String,
    pub resolved_path: String,
    #[serde(skip)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Immutable store configuration.
#[derive(Debug, Clone)]
pub struct DoctrineConfig {
    pub whitelist: BTreeSet<String>,
    pub roots: Vec<Utf8PathBuf>,
}

impl Default for DoctrineConfig {
    fn default() -> Self {
        Self {
            whitelist: DEFAULT_WHITELIST.clone(),
            roots: DEFAULT_ROOTS.iter().map(Utf8PathBuf::from).collect(),
        }
    }
}

/// Resolves `(doctrine_id, version)` pairs inside a repository tree.
pub struct DoctrineStore {
    repo_root: Utf8PathBuf,
    config: DoctrineConfig,
}

impl DoctrineStore {
    pub fn new(repo_root: impl Into<Utf8PathBuf>, config: DoctrineConfig) -> Self {
        Self {
            repo_root: repo_root.into(),
            config,
        }
    }

    /// Store with the compiled-in whitelist and candidate roots.
    pub fn with_defaults(repo_root: impl Into<Utf8PathBuf>) -> Self {
        Self::new(repo_root, DoctrineConfig::default())
    }

    /// Resolve a doctrine to its file bytes and hashed reference.
    ///
    /// Candidate paths are `<root>/<id>/<version>.<ext>` for each configured
    /// root and each candidate extension; the first existing file wins.
    pub fn load(
        &self,
        doctrine_id: &str,
        version: &str,
    ) -> Result<(Vec<u8>, DoctrineReference), DoctrineError> {
        for token in [doctrine_id, version] {
            if token.is_empty() || has_path_metachars(token) {
                return Err(DoctrineError::UnsafePath {
                    token: token.to_string(),
                });
            }
        }

        if !self.config.whitelist.contains(doctrine_id) {
            return Err(DoctrineError::NotWhitelisted {
                id: doctrine_id.to_string(),
            });
        }

        let mut searched = Vec::new();
        for root in &self.config.roots {
            for ext in CANDIDATE_EXTENSIONS {
                let candidate = self
                    .repo_root
                    .join(root)
                    .join(doctrine_id)
                    .join(format!("{version}.{ext}"));
                if candidate.is_file() {
                    return self.read_resolved(doctrine_id, version, &candidate);
                }
                searched.push(candidate.to_string());
            }
        }

        Err(DoctrineError::NotFound {
            id: doctrine_id.to_string(),
            version: version.to_string(),
            searched,
        })
    }

    fn read_resolved(
        &self,
        doctrine_id: &str,
        version: &str,
        path: &Utf8Path,
    ) -> Result<(Vec<u8>, DoctrineReference), DoctrineError> {
        let content = fs::read(path.as_std_path()).map_err(|source| DoctrineError::Io {
            path: path.to_string(),
            source,
        })?;

        let resolved_path = to_repo_relative(path, &self.repo_root)
            .unwrap_or_else(|| path.as_str().to_string());

        let reference = DoctrineReference {
            doctrine_id: doctrine_id.to_string(),
            version: version.to_string(),
            sha256: sha256_hex(&content),
            resolved_path,
            resolved_at: Some(Utc::now()),
        };

        Ok((content, reference))
    }
}
