//! Canonical JSON codec and SHA-256 hashing
//!
//! Two byte-stable encodings are frozen here and must never drift:
//!
//! - The **pretty form**: keys recursively sorted, 2-space indent, UTF-8
//!   without escaping of non-ASCII, exactly one trailing newline. Every
//!   snapshot file and `manifest.json` on disk uses this form.
//! - The **compact form**: same key ordering, `","` / `":"` separators, no
//!   indent, no trailing newline. `inputs_hash` and byte-stable field
//!   comparison during migration use this form.
//!
//! All hashing in the system flows through [`sha256_hex`] / [`sha256_file`].

use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix carried by every hash the system emits.
pub const HASH_PREFIX: &str = "sha256:";

/// Codec failures. These are programming errors: the only rejected inputs are
/// values JSON cannot represent (non-finite numbers, non-string map keys).
#[derive(Error, Debug)]
pub enum CanonError {
    #[error("value is not representable as canonical JSON: {0}")]
    Unrepresentable(#[from] serde_json::Error),
}

/// Encode a value in the canonical pretty form.
///
/// Keys are sorted lexicographically at every nesting level regardless of the
/// field order of the source type.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let json = serde_json::to_value(value)?;
    let mut out = String::new();
    write_pretty(&mut out, &json, 0);
    out.push('\n');
    Ok(out)
}

/// Encode a value in the frozen compact form used for hashing.
pub fn to_compact_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let json = serde_json::to_value(value)?;
    let mut out = String::new();
    write_compact(&mut out, &json);
    Ok(out)
}

/// Hash a byte sequence, rendered as `sha256:` + lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{HASH_PREFIX}{:x}", hasher.finalize())
}

/// Hash a file's current on-disk bytes, returning `(hash, byte_count)`.
///
/// Streaming read; the file is never held in memory whole.
pub fn sha256_file(path: &Utf8Path) -> std::io::Result<(String, u64)> {
    let mut file = File::open(path.as_std_path())?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((format!("{HASH_PREFIX}{:x}", hasher.finalize()), total))
}

// The writers below are the frozen contract. serde_json's own formatters are
// not used: output must stay byte-identical even if a future dependency turns
// on serde_json's `preserve_order` feature.

fn sorted_entries(map: &serde_json::Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn write_pretty(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Object(map) => {
            out.push_str("{\n");
            let entries = sorted_entries(map);
            let last = entries.len() - 1;
            for (i, (key, val)) in entries.into_iter().enumerate() {
                push_indent(out, depth + 1);
                write_string(out, key);
                out.push_str(": ");
                write_pretty(out, val, depth + 1);
                if i != last {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(out, depth);
            out.push('}');
        }
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Array(items) => {
            out.push_str("[\n");
            let last = items.len() - 1;
            for (i, item) in items.iter().enumerate() {
                push_indent(out, depth + 1);
                write_pretty(out, item, depth + 1);
                if i != last {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(out, depth);
            out.push(']');
        }
        scalar => write_scalar(out, scalar),
    }
}

fn write_compact(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let entries = sorted_entries(map);
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_compact(out, val);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_compact(out, item);
            }
            out.push(']');
        }
        scalar => write_scalar(out, scalar),
    }
}

fn write_scalar(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Object(_) | Value::Array(_) => unreachable!("handled by caller"),
    }
}

/// JSON string escape: control characters, quote, and backslash only.
/// Non-ASCII passes through as UTF-8.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}
