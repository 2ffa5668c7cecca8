//! Shared fixtures for the integration suites
#![allow(dead_code)]

use camino::Utf8PathBuf;
use std::fs;
use tempfile::TempDir;

use runvault::{Brief, Engine, EngineConfig, FixedOutputAdapter, RunParams};

/// A scratch repository with the conventional layout: a whitelisted doctrine
/// at `prompts/example/v1.0.0.md` containing `hello\n`, an empty `corpus/`,
/// and `artifacts/` reserved for runs.
pub struct TestRepo {
    _dir: TempDir,
    pub root: Utf8PathBuf,
    pub config: EngineConfig,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let doctrine_dir = root.join("prompts/example");
        fs::create_dir_all(doctrine_dir.as_std_path()).unwrap();
        fs::write(doctrine_dir.join("v1.0.0.md").as_std_path(), b"hello\n").unwrap();
        fs::create_dir_all(root.join("corpus").as_std_path()).unwrap();

        let config = EngineConfig::for_repo(root.clone());
        Self {
            _dir: dir,
            root,
            config,
        }
    }

    /// Engine whose adapter returns fixed bytes.
    pub fn engine(&self, output: &[u8]) -> Engine {
        Engine::new(
            self.config.clone(),
            Box::new(FixedOutputAdapter::new(output.to_vec())),
        )
    }

    pub fn write_corpus_file(&self, rel: &str, content: &str) {
        let path = self.root.join("corpus").join(rel);
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        fs::write(path.as_std_path(), content).unwrap();
    }
}

/// The S1 brief: fixed bytes, empty context, whitelisted doctrine.
pub fn demo_brief() -> Brief {
    brief_with_job_type("synthesis")
}

pub fn brief_with_job_type(job_type: &str) -> Brief {
    Brief::from_json_str(
        &format!(
            r#"{{
                "job_id": "demo-001",
                "job_type": "{job_type}",
                "doctrine": {{"id": "example", "version": "v1.0.0"}}
            }}"#
        ),
        "jobs/demo-001.json",
    )
    .unwrap()
}

pub fn chain_brief(prior_run_id: &str) -> Brief {
    Brief::from_json_str(
        &format!(
            r#"{{
                "job_id": "demo-002",
                "job_type": "review",
                "doctrine": {{"id": "example", "version": "v1.0.0"}},
                "prior_run_id": "{prior_run_id}",
                "required_outputs": ["output.txt"]
            }}"#
        ),
        "jobs/demo-002.json",
    )
    .unwrap()
}

pub fn default_params() -> RunParams {
    RunParams::default()
}

/// Recursively count regular files beneath a directory.
pub fn count_files(path: &Utf8PathBuf) -> usize {
    walk_count(path.as_std_path())
}

fn walk_count(path: &std::path::Path) -> usize {
    let mut count = 0;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += walk_count(&path);
            } else {
                count += 1;
            }
        }
    }
    count
}
