//! Manifest schema migrations
//!
//! Migrations are additive transforms that advance a manifest's
//! `schema_version` while preserving every determinism-critical field.
//! A registry of named migrations is searched breadth-first for the shortest
//! path from the current version to the target; direct composite migrations
//! may be registered alongside hop-by-hop ones as path-shortening shortcuts.
//!
//! Apply flow per manifest: `validate_before` → deep-copy → `transform` →
//! `validate_after` → append one `migration_history` entry → write
//! `<path>.backup` with the pre-image → atomically rewrite `manifest.json`.
//! Dry-run stops short of the backup and the rewrite. Re-applying a
//! migration whose target version is already current is a no-op.

mod builtin;
mod registry;

pub use builtin::builtin_registry;
pub use registry::{Migration, MigrationRegistry, accept_object, accept_transformed};

use camino::Utf8Path;
use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use runvault_artifact::manifest::deterministic_projection_value;
use runvault_utils::atomic_write::write_bytes_atomic;
use runvault_utils::canon::{self, sha256_hex, to_canonical_json, to_compact_canonical_json};

/// Manifest fields whose bytes must survive any migration unchanged.
/// `doctrine` is compared through the deterministic projection so its
/// volatile sub-fields stay out of the comparison.
const PROTECTED_FIELDS: &[&str] = &[
    "job_id",
    "run_id",
    "inputs_hash",
    "input_snapshots",
    "doctrine",
    "artifacts",
];

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("manifest is not a JSON object")]
    NotAnObject,

    #[error("manifest has no schema_version")]
    MissingSchemaVersion,

    #[error("no migration path from {from} to {to}")]
    NoPath { from: String, to: String },

    #[error("migration '{migration}' validation failed: {reason}")]
    ValidationFailed { migration: String, reason: String },

    #[error("migration '{migration}' transform failed: {reason}")]
    Transform { migration: String, reason: String },

    #[error("failed to read manifest at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error(transparent)]
    Encode(#[from] canon::CanonError),
}

/// Result of migrating one manifest.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub from_version: String,
    pub to_version: String,
    /// Names of the migrations applied, in order. Empty for a no-op.
    pub applied: Vec<String>,
    pub dry_run: bool,
    /// The post-migration manifest (the would-be result under dry-run).
    pub manifest: Value,
}

impl MigrationOutcome {
    /// True when the manifest was already at the target version.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Aggregate statistics from a tree-wide migration sweep.
#[derive(Debug, Clone, Default)]
pub struct MigrateStats {
    pub scanned: usize,
    pub migrated: usize,
    pub already_current: usize,
    pub failed: Vec<(String, String)>,
}

/// Migrate a single `manifest.json` file to `target_version`.
pub fn apply_manifest(
    registry: &MigrationRegistry,
    manifest_path: &Utf8Path,
    target_version: &str,
    dry_run: bool,
) -> Result<MigrationOutcome, MigrateError> {
    let original_bytes =
        std::fs::read(manifest_path.as_std_path()).map_err(|source| MigrateError::Read {
            path: manifest_path.to_string(),
            source,
        })?;
    let original: Value =
        serde_json::from_slice(&original_bytes).map_err(|source| MigrateError::Parse {
            path: manifest_path.to_string(),
            source,
        })?;

    let from_version = schema_version_of(&original)?;

    // Idempotence: already at target is a successful no-op.
    if from_version == target_version {
        debug!(path = %manifest_path, version = target_version, "already at target version");
        return Ok(MigrationOutcome {
            from_version,
            to_version: target_version.to_string(),
            applied: Vec::new(),
            dry_run,
            manifest: original,
        });
    }

    let path = registry
        .find_path(&from_version, target_version)
        .ok_or_else(|| MigrateError::NoPath {
            from: from_version.clone(),
            to: target_version.to_string(),
        })?;

    let mut current = original.clone();
    let mut applied = Vec::new();
    for migration in &path {
        current = apply_step(migration, &current)?;
        applied.push(migration.name.to_string());
    }

    if !dry_run {
        let backup_path = camino::Utf8PathBuf::from(format!("{manifest_path}.backup"));
        write_bytes_atomic(&backup_path, &original_bytes).map_err(|e| {
            MigrateError::WriteFailed {
                path: backup_path.to_string(),
                reason: e.to_string(),
            }
        })?;

        let encoded = to_canonical_json(&current)?;
        write_bytes_atomic(manifest_path, encoded.as_bytes()).map_err(|e| {
            MigrateError::WriteFailed {
                path: manifest_path.to_string(),
                reason: e.to_string(),
            }
        })?;
        info!(path = %manifest_path, from = %from_version, to = target_version, "migration applied");
    }

    Ok(MigrationOutcome {
        from_version,
        to_version: target_version.to_string(),
        applied,
        dry_run,
        manifest: current,
    })
}

/// Migrate every `manifest.json` beneath `artifacts_root`.
///
/// Build directories under `.tmp/` and `.backup` files are skipped. A
/// failure on one manifest is recorded and does not stop the sweep.
pub fn migrate_all(
    registry: &MigrationRegistry,
    artifacts_root: &Utf8Path,
    target_version: &str,
    dry_run: bool,
) -> MigrateStats {
    let mut stats = MigrateStats::default();

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
        let manifest_path = Utf8Path::new(path_str);

        stats.scanned += 1;
        match apply_manifest(registry, manifest_path, target_version, dry_run) {
            Ok(outcome) if outcome.is_noop() => stats.already_current += 1,
            Ok(_) => stats.migrated += 1,
            Err(e) => {
                warn!(path = %manifest_path, error = %e, "migration failed");
                stats.failed.push((manifest_path.to_string(), e.to_string()));
            }
        }
    }

    stats
}

fn apply_step(migration: &Migration, manifest: &Value) -> Result<Value, MigrateError> {
    (migration.validate_before)(manifest).map_err(|reason| MigrateError::ValidationFailed {
        migration: migration.name.to_string(),
        reason,
    })?;

    let pre = manifest.clone();
    let mut post = (migration.transform)(pre.clone()).map_err(|reason| {
        MigrateError::Transform {
            migration: migration.name.to_string(),
            reason,
        }
    })?;

    if let Some(map) = post.as_object_mut() {
        map.insert(
            "schema_version".to_string(),
            Value::String(migration.to_version.to_string()),
        );
    } else {
        return Err(MigrateError::NotAnObject);
    }

    (migration.validate_after)(&pre, &post).map_err(|reason| MigrateError::ValidationFailed {
        migration: migration.name.to_string(),
        reason,
    })?;
    validate_determinism_contract(&pre, &post).map_err(|reason| {
        MigrateError::ValidationFailed {
            migration: migration.name.to_string(),
            reason,
        }
    })?;

    append_history(migration, &pre, &mut post)?;
    Ok(post)
}

/// Enforced for every migration regardless of its own `validate_after`:
/// any protected field present before the transform must be byte-identical
/// after it. Newly introduced fields are allowed; removal is not.
fn validate_determinism_contract(pre: &Value, post: &Value) -> Result<(), String> {
    let (Some(pre_map), Some(post_map)) = (pre.as_object(), post.as_object()) else {
        return Err("manifest is not a JSON object".to_string());
    };

    for field in PROTECTED_FIELDS {
        let Some(pre_value) = pre_map.get(*field) else {
            continue;
        };
        let Some(post_value) = post_map.get(*field) else {
            return Err(format!("protected field '{field}' was removed"));
        };

        // Compare through the deterministic projection so volatile doctrine
        // sub-fields do not count as drift.
        let pre_bytes = protected_bytes(field, pre_value).map_err(|e| e.to_string())?;
        let post_bytes = protected_bytes(field, post_value).map_err(|e| e.to_string())?;
        if pre_bytes != post_bytes {
            return Err(format!("protected field '{field}' changed during migration"));
        }
    }

    Ok(())
}

fn protected_bytes(field: &str, value: &Value) -> Result<String, canon::CanonError> {
    if field == "doctrine" {
        let wrapped = json!({ "doctrine": value });
        let projected = deterministic_projection_value(&wrapped);
        to_compact_canonical_json(&projected["doctrine"])
    } else {
        to_compact_canonical_json(value)
    }
}

fn append_history(
    migration: &Migration,
    pre: &Value,
    post: &mut Value,
) -> Result<(), MigrateError> {
    let checksum_before = sha256_hex(to_compact_canonical_json(pre)?.as_bytes());
    // Checksum of the transformed manifest, before this audit entry lands.
    let checksum_after = sha256_hex(to_compact_canonical_json(&*post)?.as_bytes());

    let entry = json!({
        "from_version": migration.from_version,
        "to_version": migration.to_version,
        "applied_at": Utc::now().to_rfc3339(),
        "changes": migration.changes,
        "checksum_before": checksum_before,
        "checksum_after": checksum_after,
    });

    let map = post.as_object_mut().ok_or(MigrateError::NotAnObject)?;
    match map.get_mut("migration_history") {
        Some(Value::Array(history)) => history.push(entry),
        _ => {
            map.insert("migration_history".to_string(), Value::Array(vec![entry]));
        }
    }
    Ok(())
}

fn schema_version_of(manifest: &Value) -> Result<String, MigrateError> {
    let map = manifest.as_object().ok_or(MigrateError::NotAnObject)?;
    map.get("schema_version")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(MigrateError::MissingSchemaVersion)
}
