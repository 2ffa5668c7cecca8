//! Built-in migration set
//!
//! Covers the manifest schema history: 1.0.0 manifests predate the snapshot
//! map, 1.1.0 manifests predate chain metadata. The direct 1.0.0 → 1.2.0
//! composite exists so the common case migrates in one hop (and one audit
//! entry).

use serde_json::{Value, json};

use crate::registry::{Migration, MigrationRegistry, accept_object, accept_transformed};

/// Registry holding the compiled-in migration set. Constructed fresh per
/// caller; tests build alternates with [`MigrationRegistry::register`].
#[must_use]
pub fn builtin_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();

    registry.register(Migration {
        name: "add_input_snapshots",
        from_version: "1.0.0",
        to_version: "1.1.0",
        changes: &["add input_snapshots map (empty when unknown)"],
        transform: add_input_snapshots,
        validate_before: accept_object,
        validate_after: accept_transformed,
    });

    registry.register(Migration {
        name: "add_chain_metadata",
        from_version: "1.1.0",
        to_version: "1.2.0",
        changes: &["add chain_metadata with is_chainable_stage=false"],
        transform: add_chain_metadata,
        validate_before: accept_object,
        validate_after: accept_transformed,
    });

    registry.register(Migration {
        name: "v1_0_0_to_v1_2_0",
        from_version: "1.0.0",
        to_version: "1.2.0",
        changes: &[
            "add input_snapshots map (empty when unknown)",
            "add chain_metadata with is_chainable_stage=false",
        ],
        transform: |manifest| add_chain_metadata(add_input_snapshots(manifest)?),
        validate_before: accept_object,
        validate_after: accept_transformed,
    });

    registry
}

fn add_input_snapshots(mut manifest: Value) -> Result<Value, String> {
    let map = manifest
        .as_object_mut()
        .ok_or_else(|| "manifest is not a JSON object".to_string())?;
    map.entry("input_snapshots").or_insert_with(|| json!({}));
    Ok(manifest)
}

fn add_chain_metadata(mut manifest: Value) -> Result<Value, String> {
    let map = manifest
        .as_object_mut()
        .ok_or_else(|| "manifest is not a JSON object".to_string())?;
    map.entry("chain_metadata").or_insert_with(|| {
        json!({
            "is_chainable_stage": false,
            "prior_stages": [],
        })
    });
    Ok(manifest)
}
