//! Deterministic JSON canonicalization for content addressing.
//!
//! Every hash, event id, and signature in a Provara vault is computed over
//! the byte output of this crate, so the encoding must be byte-stable across
//! platforms and releases:
//!
//! - object keys sorted by Unicode codepoint at every depth
//! - no whitespace between tokens
//! - UTF-8 strings with the standard JSON escape set
//! - integers in shortest decimal form, floats in shortest round-trip form
//! - non-finite floats rejected
//! - `null` preserved, array order preserved

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Canonicalization failure.
#[derive(Debug, Error)]
pub enum CanonicalizeError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("non-finite number cannot be canonicalized")]
    NonFiniteNumber,
}

/// Serialize a JSON value to canonical bytes.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CanonicalizeError> {
    Ok(canonical_to_string(value)?.into_bytes())
}

/// Parse a JSON string and serialize it to canonical bytes.
pub fn canonicalize_str(json: &str) -> Result<Vec<u8>, CanonicalizeError> {
    let value: Value = serde_json::from_str(json)?;
    canonicalize(&value)
}

/// Canonicalize any `Serialize` type by round-tripping through `Value`.
pub fn canonicalize_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalizeError> {
    let value = serde_json::to_value(value)?;
    canonicalize(&value)
}

/// Serialize a JSON value to a canonical UTF-8 string.
pub fn canonical_to_string(value: &Value) -> Result<String, CanonicalizeError> {
    let mut out = String::with_capacity(128);
    write_value(&mut out, value)?;
    Ok(out)
}

/// True if `bytes` already is the canonical encoding of the value it parses to.
pub fn is_canonical(bytes: &[u8]) -> bool {
    let Ok(s) = core::str::from_utf8(bytes) else {
        return false;
    };
    match canonicalize_str(s) {
        Ok(canonical) => canonical == bytes,
        Err(_) => false,
    }
}

/// SHA-256 over the canonical bytes of a value.
pub fn canonical_hash(value: &Value) -> Result<[u8; 32], CanonicalizeError> {
    let bytes = canonicalize(value)?;
    let digest = Sha256::digest(&bytes);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    Ok(hash)
}

/// Lower-hex SHA-256 over the canonical bytes of a value.
pub fn canonical_hash_hex(value: &Value) -> Result<String, CanonicalizeError> {
    Ok(hex::encode(canonical_hash(value)?))
}

fn write_value(out: &mut String, value: &Value) -> Result<(), CanonicalizeError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n)?,
        Value::String(s) => write_string(out, s)?,
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map)?,
    }
    Ok(())
}

fn write_object(out: &mut String, map: &Map<String, Value>) -> Result<(), CanonicalizeError> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    // Plain &str ordering is codepoint ordering: UTF-8 byte order and
    // codepoint order coincide.
    keys.sort_unstable();

    out.push('{');
    for (idx, key) in keys.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        write_string(out, key)?;
        out.push(':');
        write_value(out, &map[*key])?;
    }
    out.push('}');
    Ok(())
}

fn write_string(out: &mut String, s: &str) -> Result<(), CanonicalizeError> {
    // serde_json emits the standard escape set and nothing more.
    let escaped = serde_json::to_string(s)?;
    out.push_str(&escaped);
    Ok(())
}

fn write_number(out: &mut String, n: &Number) -> Result<(), CanonicalizeError> {
    if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(CanonicalizeError::NonFiniteNumber);
        }
    }

    // serde_json renders integers in shortest decimal form and floats via
    // ryu (shortest round-trip). Normalize exponent spelling to `e<digits>`.
    let rendered = n.to_string();
    if rendered.contains(['e', 'E']) {
        let _ = write!(out, "{}", rendered.replace('E', "e").replace("e+", "e"));
    } else {
        out.push_str(&rendered);
    }
    Ok(())
}
