//! Canonical JSON rendering
//!
//! A deterministic rendering used wherever signatures apply: mapping keys are
//! sorted lexicographically at every depth, arrays keep their order, and
//! primitives render exactly as `serde_json` renders them. Two semantically
//! equal mappings therefore canonicalize byte-identically.

use serde_json::{Map, Value};

/// Render a JSON value canonically.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Render a JSON mapping canonically.
pub fn canonicalize_map(map: &Map<String, Value>) -> String {
    let mut out = String::new();
    write_object(&mut out, map);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_object(out, map),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        // Scalar rendering is delegated to serde_json so numbers and string
        // escapes match a standard encoder byte-for-byte.
        scalar => out.push_str(&render_scalar(scalar)),
    }
}

fn write_object(out: &mut String, map: &Map<String, Value>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_unstable();

    out.push('{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&render_scalar(&Value::String((*key).clone())));
        out.push(':');
        if let Some(value) = map.get(*key) {
            write_value(out, value);
        }
    }
    out.push('}');
}

fn render_scalar(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

#[cfg(test)]
mod tests {
    //! Unit tests for canonical JSON rendering.

    use serde_json::json;

    use super::*;

    /// Validates `canonicalize` behavior for the key ordering scenario.
    ///
    /// Assertions:
    /// - Confirms keys are sorted at the top level.
    /// - Confirms two permutations of the same mapping render
    ///   byte-identically.
    #[test]
    fn test_keys_sorted() {
        let a = json!({"b": 2, "a": 1});
        let b = json!({"a": 1, "b": 2});
        assert_eq!(canonicalize(&a), r#"{"a":1,"b":2}"#);
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    /// Validates `canonicalize` behavior for the nested depth scenario.
    ///
    /// Assertions:
    /// - Confirms keys are sorted at every nesting depth.
    /// - Confirms array order is preserved.
    #[test]
    fn test_nested_sorting_and_array_order() {
        let value = json!({
            "z": {"b": [3, 1, 2], "a": {"y": true, "x": null}},
            "a": "s"
        });
        assert_eq!(
            canonicalize(&value),
            r#"{"a":"s","z":{"a":{"x":null,"y":true},"b":[3,1,2]}}"#
        );
    }

    /// Validates `canonicalize` behavior for the primitive rendering
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms scalars render exactly as serde_json renders them,
    ///   including string escapes and float formatting.
    #[test]
    fn test_primitives_match_standard_encoder() {
        let value = json!({"s": "a\"b\n", "f": 1.5, "i": 42, "t": true});
        assert_eq!(canonicalize(&value), r#"{"f":1.5,"i":42,"s":"a\"b\n","t":true}"#);
    }

    /// Validates `canonicalize_map` equivalence with `canonicalize`.
    #[test]
    fn test_canonicalize_map() {
        let value = json!({"b": 2, "a": 1});
        if let serde_json::Value::Object(map) = value {
            assert_eq!(canonicalize_map(&map), r#"{"a":1,"b":2}"#);
        } else {
            unreachable!();
        }
    }
}
