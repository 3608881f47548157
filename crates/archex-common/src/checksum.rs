//! Checksum utilities for content hashing and record identity
//!
//! Record identifiers must be stable across runs: the same file processed
//! twice yields the same identifiers, which is what lets a sink treat a
//! repeated commit as an upsert instead of a duplicate.

use crate::error::Result;

/// Separator between identifier components. Unit separator never appears in paths.
const ID_SEPARATOR: char = '\u{1f}';

/// Lowercase hex MD5 of a byte slice
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// MD5 of the canonical JSON encoding of a payload
///
/// `serde_json` writes object keys in map order, and `Value` objects are
/// `BTreeMap`-backed unless `preserve_order` is enabled, so equal payloads
/// always hash equally.
pub fn content_md5(payload: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(md5_hex(&bytes))
}

/// Deterministic identifier for one record of one source file
pub fn record_identifier(source_path: &str, sequence: u64, content_md5: &str) -> String {
    let key = format!(
        "{}{}{}{}{}",
        source_path, ID_SEPARATOR, sequence, ID_SEPARATOR, content_md5
    );
    md5_hex(key.as_bytes())
}
