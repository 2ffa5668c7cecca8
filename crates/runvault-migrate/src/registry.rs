//! Migration registry and breadth-first path finding

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;

/// One named, additive schema migration.
///
/// `transform` is a pure function from manifest value to manifest value; the
/// engine sets `schema_version` and appends the audit entry itself.
/// `validate_after` receives both the pre- and post-transform manifests; the
/// engine additionally enforces the determinism-preservation contract on
/// every migration.
pub struct Migration {
    pub name: &'static str,
    pub from_version: &'static str,
    pub to_version: &'static str,
    pub changes: &'static [&'static str],
    pub transform: fn(Value) -> Result<Value, String>,
    pub validate_before: fn(&Value) -> Result<(), String>,
    pub validate_after: fn(&Value, &Value) -> Result<(), String>,
}

/// Accept any manifest object; the engine has already checked the version.
pub fn accept_object(manifest: &Value) -> Result<(), String> {
    if manifest.is_object() {
        Ok(())
    } else {
        Err("manifest is not a JSON object".to_string())
    }
}

/// Accept any post-transform object.
pub fn accept_transformed(_pre: &Value, post: &Value) -> Result<(), String> {
    accept_object(post)
}

/// Immutable set of registered migrations, fixed at construction.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, migration: Migration) {
        self.migrations.push(migration);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Shortest migration sequence from `from` to `to`, breadth-first.
    ///
    /// Returns `None` when no sequence exists. A registered composite
    /// migration shortens the path it covers.
    #[must_use]
    pub fn find_path(&self, from: &str, to: &str) -> Option<Vec<&Migration>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut edges: HashMap<&str, Vec<&Migration>> = HashMap::new();
        for migration in &self.migrations {
            edges.entry(migration.from_version).or_default().push(migration);
        }

        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut parent: HashMap<&str, &Migration> = HashMap::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(version) = queue.pop_front() {
            if version == to {
                break;
            }
            for migration in edges.get(version).map(Vec::as_slice).unwrap_or(&[]) {
                if visited.insert(migration.to_version) {
                    parent.insert(migration.to_version, migration);
                    queue.push_back(migration.to_version);
                }
            }
        }

        if !visited.contains(to) {
            return None;
        }

        let mut path = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let migration = parent[cursor];
            path.push(migration);
            cursor = migration.from_version;
        }
        path.reverse();
        Some(path)
    }
}
