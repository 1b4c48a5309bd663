use anyhow::{Context, Result};
use blake3::Hasher;
use serde::Serialize;

/// Emit a value as JCS-canonical JSON (RFC 8785).
///
/// Checkpoints are stored this way so the same state always produces the same
/// bytes, whatever the field order of the source struct.
///
/// ```rust
/// use brdflow_utils::canonicalization::emit_jcs;
///
/// let json = emit_jcs(&serde_json::json!({"b": 1, "a": [true]})).unwrap();
/// assert_eq!(json, r#"{"a":[true],"b":1}"#);
/// ```
pub fn emit_jcs<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "Failed to serialize value to JSON")?;
    let json_bytes = serde_json_canonicalizer::to_vec(&json_value)
        .with_context(|| "Failed to canonicalize JSON using JCS")?;
    String::from_utf8(json_bytes).with_context(|| "JCS output contained invalid UTF-8")
}

/// BLAKE3 hex digest over length-prefixed parts.
///
/// Length prefixes keep `["ab", "c"]` and `["a", "bc"]` distinct.
#[must_use]
pub fn blake3_parts(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// BLAKE3 hex digest of a value's canonical JSON.
pub fn hash_jcs<T: Serialize>(value: &T) -> Result<String> {
    let json = emit_jcs(value)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}
