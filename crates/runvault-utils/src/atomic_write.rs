//! Atomic filesystem operations
//!
//! Snapshot files and manifests are written via temp file → fsync → rename so
//! a partially written file is never observable at its final path. Run
//! directories are finalized with a single `rename(2)`, which is the atomicity
//! boundary the whole artifact layout relies on.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use std::io::Write;

use tempfile::NamedTempFile;

/// Atomically write bytes to `path` (temp file in the same directory, fsync,
/// rename over the target).
pub fn write_bytes_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {parent}"))?;
    }

    let temp_dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("Failed to create temporary file in: {temp_dir}"))?;

    temp_file
        .write_all(bytes)
        .with_context(|| format!("Failed to write content for: {path}"))?;

    // Data must reach disk before the rename makes it visible.
    temp_file
        .as_file()
        .sync_all()
        .with_context(|| format!("Failed to fsync temporary file for: {path}"))?;

    temp_file
        .persist(path.as_std_path())
        .map_err(|e| anyhow::anyhow!(e.error))
        .with_context(|| format!("Failed to atomically write file: {path}"))?;

    Ok(())
}

/// Atomically move a fully built directory to its final location.
///
/// Fails if `to` already exists on platforms where `rename` does not replace
/// directories; callers are expected to have checked for an existing target
/// and routed through their replay/collision policy first.
pub fn rename_dir_atomic(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {parent}"))?;
    }
    fs::rename(from.as_std_path(), to.as_std_path())
        .with_context(|| format!("Failed to rename {from} -> {to}"))
}
