//! Context pack materialization
//!
//! The context pack is the corpus-derived half of a run's inputs. Two
//! strategies exist:
//!
//! - **glob**: pattern selection over the corpus; selected files are
//!   concatenated in lexicographic repo-relative path order.
//! - **retrieve**: deterministic BM25 keyword retrieval with a fixed query
//!   and top-k; ties break by ascending document path.
//!
//! The resulting [`ContextPack`] embeds both the content blob and the
//! selection spec, so a change to either file content or selection surfaces
//! as a snapshot hash change.

mod corpus;
mod retrieve;

pub use corpus::{CorpusDoc, list_corpus};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use runvault_utils::canon::sha256_hex;

/// Context resolution failures.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("corpus root does not exist: {root}")]
    CorpusMissing { root: String },

    #[error("invalid glob pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("corpus file is not valid UTF-8: {path}")]
    NonUtf8 { path: String },

    #[error("failed to read corpus file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to walk corpus tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// How the pack was selected from the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Glob,
    Retrieve,
}

/// Selection request, as carried by the brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextSpec {
    Glob { patterns: Vec<String> },
    Retrieve { query: String, top_k: usize },
}

/// A retrieval candidate with its BM25 score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub path: String,
    pub score: f64,
}

/// The recorded selection, embedded verbatim in the context snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionSpec {
    Glob {
        patterns: Vec<String>,
    },
    Retrieve {
        query: String,
        top_k: usize,
        scored: Vec<ScoredDoc>,
    },
}

/// The materialized context: one snapshot's worth of state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub strategy: Strategy,
    pub selection_spec: SelectionSpec,
    pub content_blob: String,
    pub content_hash: String,
}

/// Resolve the context pack from the corpus.
///
/// An empty pattern list or a query matching nothing produces an empty pack
/// (empty blob, hash of zero bytes) rather than an error.
pub fn resolve(spec: &ContextSpec, corpus_root: &Utf8Path) -> Result<ContextPack, ContextError> {
    let docs = if corpus_root.exists() {
        list_corpus(corpus_root)?
    } else if matches!(spec, ContextSpec::Glob { patterns } if patterns.is_empty()) {
        // An intentionally empty selection does not require a corpus on disk.
        Vec::new()
    } else {
        return Err(ContextError::CorpusMissing {
            root: corpus_root.to_string(),
        });
    };

    match spec {
        ContextSpec::Glob { patterns } => resolve_glob(patterns, &docs),
        ContextSpec::Retrieve { query, top_k } => {
            let (scored, blob) = retrieve::rank(query, *top_k, &docs);
            debug!(
                candidates = scored.len(),
                top_k, "retrieve strategy selected context"
            );
            Ok(ContextPack {
                strategy: Strategy::Retrieve,
                selection_spec: SelectionSpec::Retrieve {
                    query: query.clone(),
                    top_k: *top_k,
                    scored,
                },
                content_hash: sha256_hex(blob.as_bytes()),
                content_blob: blob,
            })
        }
    }
}

fn resolve_glob(patterns: &[String], docs: &[CorpusDoc]) -> Result<ContextPack, ContextError> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern).map_err(|source| ContextError::BadPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|source| ContextError::BadPattern {
        pattern: patterns.join(","),
        source,
    })?;

    // docs are already sorted by repo-relative path; the selected union keeps
    // that order regardless of which pattern matched.
    let mut blob = String::new();
    let mut selected = 0usize;
    for doc in docs {
        if set.is_match(&doc.rel_path) {
            blob.push_str(&doc.content);
            selected += 1;
        }
    }
    debug!(selected, patterns = patterns.len(), "glob strategy selected context");

    Ok(ContextPack {
        strategy: Strategy::Glob,
        selection_spec: SelectionSpec::Glob {
            patterns: patterns.to_vec(),
        },
        content_hash: sha256_hex(blob.as_bytes()),
        content_blob: blob,
    })
}
