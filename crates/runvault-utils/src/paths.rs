//! Path safety and repo-relative normalization
//!
//! Identifier components that become path segments (doctrine ids, versions,
//! job ids) are validated here before any filesystem access. Serialized paths
//! are always repo-relative with forward slashes, never absolute.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// True if `component` could escape its directory when joined into a path:
/// contains a path separator (either flavor) or a `..` traversal.
#[must_use]
pub fn has_path_metachars(component: &str) -> bool {
    component.contains('/') || component.contains('\\') || component.contains("..")
}

/// Normalize a path string to forward slashes for serialization.
#[must_use]
pub fn normalize_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Render `path` relative to `root` with forward slashes.
///
/// Returns `None` when `path` is not beneath `root`; serialized references
/// must never point outside the repository.
#[must_use]
pub fn to_repo_relative(path: &Utf8Path, root: &Utf8Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| normalize_slashes(rel.as_str()))
}

/// `create_dir_all` with context, tolerating a concurrently created directory.
pub fn ensure_dir_all(path: &Utf8Path) -> Result<()> {
    fs::create_dir_all(path.as_std_path())
        .with_context(|| format!("Failed to create directory: {path}"))
}

/// Convert a std path to a `Utf8PathBuf`, failing on non-UTF-8 names.
pub fn utf8_path(path: &std::path::Path) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|p| anyhow::anyhow!("Non-UTF-8 path: {}", p.display()))
}
