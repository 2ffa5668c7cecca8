//! Index rebuild
//!
//! The core never reads any external index; it only feeds one. `reindex`
//! walks an artifacts tree, re-reads every finalized manifest, and hands each
//! to the sink. Unreadable manifests are skipped with a warning, build
//! directories are ignored.

use camino::Utf8Path;
use tracing::warn;
use walkdir::WalkDir;

use runvault_artifact::manifest::read_manifest;
use runvault_artifact::model::Manifest;

/// Receiver for re-read manifests. Sinks swallow their own failures; a bad
/// index entry must never fail a reindex sweep.
pub trait IndexSink {
    fn index(&mut self, run_dir: &Utf8Path, manifest: &Manifest);
}

/// Sink that ignores everything (useful for counting sweeps).
pub struct NoopIndexSink;

impl IndexSink for NoopIndexSink {
    fn index(&mut self, _run_dir: &Utf8Path, _manifest: &Manifest) {}
}

/// Re-read every manifest beneath `artifacts_root` and feed the sink.
/// Returns the number of manifests indexed.
pub fn reindex(artifacts_root: &Utf8Path, sink: &mut dyn IndexSink) -> usize {
    let mut count = 0;

    for entry in WalkDir::new(artifacts_root.as_std_path())
        .follow_links(false)
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_file() || entry.file_name().to_str() != Some("manifest.json") {
            continue;
        }
        let Some(path_str) = entry.path().to_str() else {
            continue;
        };
        if path_str.contains("/.tmp/") || path_str.contains("\\.tmp\\") {
            continue;
        }

        let Some(run_dir) = Utf8Path::new(path_str).parent() else {
            continue;
        };
        match read_manifest(run_dir) {
            Ok(manifest) => {
                sink.index(run_dir, &manifest);
                count += 1;
            }
            Err(e) => {
                warn!(run_dir = %run_dir, error = %e, "skipping unreadable manifest");
            }
        }
    }

    count
}
