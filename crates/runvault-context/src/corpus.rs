//! Corpus enumeration
//!
//! Lists regular files beneath a corpus root in lexicographic repo-relative
//! order. Symlinks are not followed, so the enumeration cannot escape the
//! root.

use camino::Utf8Path;
use walkdir::WalkDir;

use crate::ContextError;

/// One corpus document, addressed by its forward-slash repo-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusDoc {
    pub rel_path: String,
    pub content: String,
}

/// Enumerate and read every regular file under `corpus_root`, sorted by
/// relative path.
pub fn list_corpus(corpus_root: &Utf8Path) -> Result<Vec<CorpusDoc>, ContextError> {
    let mut docs = Vec::new();

    for entry in WalkDir::new(corpus_root.as_std_path()).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(corpus_root.as_std_path())
            .unwrap_or(entry.path());
        let rel_path = rel.to_string_lossy().replace('\\', "/");

        let bytes = std::fs::read(entry.path()).map_err(|source| ContextError::Io {
            path: rel_path.clone(),
            source,
        })?;
        let content = String::from_utf8(bytes).map_err(|_| ContextError::NonUtf8 {
            path: rel_path.clone(),
        })?;

        docs.push(CorpusDoc { rel_path, content });
    }

    docs.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(docs)
}
