//! Cache keys for render requests.
//!
//! The spec is serialised canonically (object keys sorted at every depth) and
//! every component is length-prefixed before hashing, so two requests share a
//! fingerprint exactly when their parameters are structurally equal.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::types::RenderRequest;

const DOMAIN_TAG: &[u8] = b"chartd.fingerprint.v1";

/// Hex-encoded SHA-256 digest identifying a render request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(request: &RenderRequest) -> Self {
        let options = request.options();
        let mut canonical = String::new();
        write_canonical(request.spec(), &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);
        update_framed(&mut hasher, canonical.as_bytes());
        update_framed(&mut hasher, &options.width.to_be_bytes());
        update_framed(&mut hasher, &options.height.to_be_bytes());
        update_framed(&mut hasher, options.format.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Serialise `value` as JSON with object keys in sorted order.
pub(crate) fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, inner)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(inner, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, inner) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(inner, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::render::types::{OutputFormat, RenderOptions};

    fn request(spec: Value, width: u32, height: u32, format: OutputFormat) -> RenderRequest {
        RenderRequest::new(
            spec,
            RenderOptions {
                width,
                height,
                format,
            },
        )
        .expect("object spec")
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a: Value =
            serde_json::from_str(r#"{"type":"bar","data":[1,2,3],"style":{"a":1,"b":2}}"#)
                .expect("json");
        let b: Value =
            serde_json::from_str(r#"{"style":{"b":2,"a":1},"data":[1,2,3],"type":"bar"}"#)
                .expect("json");

        assert_eq!(
            Fingerprint::of(&request(a, 400, 300, OutputFormat::Png)),
            Fingerprint::of(&request(b, 400, 300, OutputFormat::Png))
        );
    }

    #[test]
    fn array_order_is_significant() {
        let a = request(json!({"data": [1, 2, 3]}), 800, 600, OutputFormat::Png);
        let b = request(json!({"data": [3, 2, 1]}), 800, 600, OutputFormat::Png);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn dimensions_do_not_run_together() {
        // "81" + "1" and "8" + "11" concatenate to the same digits.
        let a = request(json!({}), 81, 1, OutputFormat::Png);
        let b = request(json!({}), 8, 11, OutputFormat::Png);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn format_changes_fingerprint() {
        let png = request(json!({"type": "line"}), 800, 600, OutputFormat::Png);
        let svg = request(json!({"type": "line"}), 800, 600, OutputFormat::Svg);
        assert_ne!(Fingerprint::of(&png), Fingerprint::of(&svg));
    }

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let mut out = String::new();
        write_canonical(&json!({"z": {"y": 1, "x": [true, null]}, "a": "s"}), &mut out);
        assert_eq!(out, r#"{"a":"s","z":{"x":[true,null],"y":1}}"#);
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = Fingerprint::of(&request(json!({}), 800, 600, OutputFormat::Png));
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 12);
    }
}
