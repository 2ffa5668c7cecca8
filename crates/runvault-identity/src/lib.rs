//! Identity kernel: `inputs_hash` and `run_id` derivation
//!
//! A run's identity is a pure function of the snapshot-name → snapshot-hash
//! map. Nothing else — not wall-clock time, not queue identifiers, not the
//! collision suffix — participates. The map is encoded in the frozen compact
//! canonical form (keys sorted) and hashed with SHA-256.

use std::collections::BTreeMap;

use runvault_utils::canon::{self, HASH_PREFIX};
use thiserror::Error;

/// Number of hex characters lifted from `inputs_hash` into `run_id`
/// (128 bits of entropy).
pub const RUN_ID_HEX_LEN: usize = 32;

/// Identity derivation failures. All of these indicate a caller bug, not an
/// environmental condition.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("inputs hash is missing the '{HASH_PREFIX}' prefix: {0}")]
    MissingPrefix(String),

    #[error("inputs hash digest is too short: {got} hex chars, need {RUN_ID_HEX_LEN}")]
    DigestTooShort { got: usize },

    #[error("inputs hash digest contains non-hex characters: {0}")]
    NotHex(String),

    #[error("snapshot map could not be canonically encoded: {0}")]
    Encode(#[from] canon::CanonError),
}

/// Compute `inputs_hash` over the snapshot-name → snapshot-hash map.
///
/// Stable under re-ordering of insertion: the map is keyed through a
/// `BTreeMap` and serialized in the compact canonical form.
pub fn compute_inputs_hash(
    snapshot_hashes: &BTreeMap<String, String>,
) -> Result<String, IdentityError> {
    let encoded = canon::to_compact_canonical_json(snapshot_hashes)?;
    Ok(canon::sha256_hex(encoded.as_bytes()))
}

/// Derive `run_id` from `inputs_hash`: the first [`RUN_ID_HEX_LEN`] hex
/// characters of the digest, with an optional collision suffix appended as
/// `-<suffix>`.
pub fn derive_run_id(inputs_hash: &str, suffix: Option<u32>) -> Result<String, IdentityError> {
    let digest = inputs_hash
        .strip_prefix(HASH_PREFIX)
        .ok_or_else(|| IdentityError::MissingPrefix(inputs_hash.to_string()))?;

    if digest.len() < RUN_ID_HEX_LEN {
        return Err(IdentityError::DigestTooShort { got: digest.len() });
    }

    let prefix = &digest[..RUN_ID_HEX_LEN];
    if !prefix
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        return Err(IdentityError::NotHex(prefix.to_string()));
    }

    Ok(match suffix {
        Some(n) => format!("{prefix}-{n}"),
        None => prefix.to_string(),
    })
}

/// Split a possibly-suffixed `run_id` into its hash-derived prefix and the
/// recorded collision suffix.
#[must_use]
pub fn split_run_id(run_id: &str) -> (&str, Option<&str>) {
    match run_id.split_once('-') {
        Some((prefix, suffix)) => (prefix, Some(suffix)),
        None => (run_id, None),
    }
}
