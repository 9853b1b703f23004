//! Payload fingerprinting for conflict detection.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fingerprint assigned to an empty body.
pub const EMPTY_BODY_FINGERPRINT: &str = "empty";

/// SHA-256 fingerprint of a request payload.
///
/// JSON bodies are canonicalized first (object keys sorted at every depth,
/// whitespace discarded) so two encodings of the same document collide.
/// Anything that does not parse as JSON is hashed as raw bytes.
pub fn payload_fingerprint(body: &[u8]) -> String {
    if body.is_empty() {
        return EMPTY_BODY_FINGERPRINT.to_string();
    }

    let digest = match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let mut canonical = Vec::with_capacity(body.len());
            match write_canonical(&value, &mut canonical) {
                Ok(()) => Sha256::digest(&canonical),
                Err(_) => Sha256::digest(body),
            }
        }
        Err(_) => Sha256::digest(body),
    };

    hex::encode(digest)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> serde_json::Result<()> {
    match value {
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        other => serde_json::to_writer(&mut *out, other)?,
    }
    Ok(())
}
