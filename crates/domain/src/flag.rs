//! Flag data model
//!
//! A flag carries a heterogeneous value (`FlagValue`), a declared or inferred
//! type (`FlagType`), an enabled switch and a monotone version. The type of a
//! key is stable across versions; the evaluator treats a changed type as a
//! mismatch, never as a coercion.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Dynamically typed flag value.
///
/// Mirrors the JSON value space of the wire format. Mappings and sequences
/// are carried as raw `serde_json` values; the SDK never looks inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    /// JSON `null`.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value. All JSON numbers are widened to `f64`.
    Number(f64),
    /// String value.
    String(String),
    /// Ordered sequence of arbitrary JSON values.
    Array(Vec<Value>),
    /// JSON mapping.
    Object(Map<String, Value>),
}

impl FlagValue {
    /// Infer the flag type from the value shape.
    ///
    /// `Null`, sequences and mappings all infer [`FlagType::Json`].
    pub fn infer_type(&self) -> FlagType {
        match self {
            FlagValue::Bool(_) => FlagType::Boolean,
            FlagValue::String(_) => FlagType::String,
            FlagValue::Number(_) => FlagType::Number,
            FlagValue::Null | FlagValue::Array(_) | FlagValue::Object(_) => FlagType::Json,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FlagValue::Null)
    }

    /// Render the value as its JSON text, used when a flat string form is
    /// needed (analytics payloads, log fields).
    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Number(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<Value> for FlagValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FlagValue::Null,
            Value::Bool(b) => FlagValue::Bool(b),
            Value::Number(n) => FlagValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => FlagValue::String(s),
            Value::Array(items) => FlagValue::Array(items),
            Value::Object(map) => FlagValue::Object(map),
        }
    }
}

impl From<FlagValue> for Value {
    fn from(value: FlagValue) -> Self {
        match value {
            FlagValue::Null => Value::Null,
            FlagValue::Bool(b) => Value::Bool(b),
            FlagValue::Number(n) => {
                serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
            }
            FlagValue::String(s) => Value::String(s),
            FlagValue::Array(items) => Value::Array(items),
            FlagValue::Object(map) => Value::Object(map),
        }
    }
}

/// Declared type of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagType::Boolean => write!(f, "boolean"),
            FlagType::String => write!(f, "string"),
            FlagType::Number => write!(f, "number"),
            FlagType::Json => write!(f, "json"),
        }
    }
}

/// Authoritative state of one flag as delivered by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagState {
    /// Unique, non-empty flag key.
    pub key: String,
    /// Current value.
    pub value: FlagValue,
    /// Whether the flag is switched on.
    pub enabled: bool,
    /// Monotone version counter assigned by the service.
    #[serde(default)]
    pub version: u64,
    /// Declared type; absent on older payloads, inferred from the value then.
    #[serde(rename = "flagType", default, skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<FlagType>,
    /// Opaque server-side modification timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl FlagState {
    pub fn new(key: impl Into<String>, value: impl Into<FlagValue>, enabled: bool) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled,
            version: 0,
            declared_type: None,
            last_modified: None,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Effective type: the declared type when present, otherwise inferred
    /// from the value shape.
    pub fn flag_type(&self) -> FlagType {
        self.declared_type.unwrap_or_else(|| self.value.infer_type())
    }
}

/// Signed bootstrap payload: seed flags plus an optional HMAC over
/// `timestamp + "." + canonicalize(flags)`.
///
/// A missing signature marks the legacy (unsigned) path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Seed values, keyed by flag key.
    pub flags: Map<String, Value>,
    /// Lowercase-hex HMAC-SHA256, absent on legacy payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Milliseconds since epoch at signing time; `0` when unknown.
    #[serde(default)]
    pub timestamp: i64,
}

impl BootstrapConfig {
    pub fn unsigned(flags: Map<String, Value>) -> Self {
        Self { flags, signature: None, timestamp: 0 }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the flag data model.

    use super::*;

    /// Validates `FlagValue::infer_type` behavior across all value shapes.
    ///
    /// Assertions:
    /// - Confirms booleans infer `FlagType::Boolean`.
    /// - Confirms strings infer `FlagType::String`.
    /// - Confirms numbers infer `FlagType::Number`.
    /// - Confirms null, arrays and objects infer `FlagType::Json`.
    #[test]
    fn test_flag_value_infer_type() {
        assert_eq!(FlagValue::Bool(true).infer_type(), FlagType::Boolean);
        assert_eq!(FlagValue::String("x".into()).infer_type(), FlagType::String);
        assert_eq!(FlagValue::Number(4.2).infer_type(), FlagType::Number);
        assert_eq!(FlagValue::Null.infer_type(), FlagType::Json);
        assert_eq!(FlagValue::Array(vec![]).infer_type(), FlagType::Json);
        assert_eq!(FlagValue::Object(Map::new()).infer_type(), FlagType::Json);
    }

    /// Validates untagged serde round-trips for the flag value scenario.
    ///
    /// Assertions:
    /// - Confirms `true` deserializes to `FlagValue::Bool(true)`.
    /// - Confirms `42` deserializes to `FlagValue::Number(42.0)`.
    /// - Confirms `null` deserializes to `FlagValue::Null`.
    #[test]
    fn test_flag_value_wire_format() {
        let v: FlagValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, FlagValue::Bool(true));

        let v: FlagValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, FlagValue::Number(42.0));

        let v: FlagValue = serde_json::from_str("null").unwrap();
        assert_eq!(v, FlagValue::Null);

        let v: FlagValue = serde_json::from_str(r#"{"n":1}"#).unwrap();
        assert!(matches!(v, FlagValue::Object(_)));
    }

    /// Validates `FlagState` deserialization for the wire payload scenario.
    ///
    /// Assertions:
    /// - Confirms the declared `flagType` is honored.
    /// - Confirms `version` defaults to `0` when absent.
    #[test]
    fn test_flag_state_deserialize() {
        let flag: FlagState = serde_json::from_str(
            r#"{"key":"f","value":true,"enabled":true,"flagType":"boolean","version":7}"#,
        )
        .unwrap();
        assert_eq!(flag.key, "f");
        assert_eq!(flag.flag_type(), FlagType::Boolean);
        assert_eq!(flag.version, 7);

        let flag: FlagState =
            serde_json::from_str(r#"{"key":"g","value":"v","enabled":false}"#).unwrap();
        assert_eq!(flag.version, 0);
        assert!(!flag.enabled);
    }

    /// Validates `FlagState::flag_type` behavior for the inference fallback
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a missing declared type infers from the value.
    /// - Confirms a declared type wins over the value shape.
    #[test]
    fn test_flag_state_type_inference() {
        let flag = FlagState::new("f", 3.0, true);
        assert_eq!(flag.flag_type(), FlagType::Number);

        let mut flag = FlagState::new("g", true, true);
        flag.declared_type = Some(FlagType::Json);
        assert_eq!(flag.flag_type(), FlagType::Json);
    }

    /// Validates `BootstrapConfig::unsigned` behavior for the legacy payload
    /// scenario.
    #[test]
    fn test_bootstrap_unsigned() {
        let bootstrap = BootstrapConfig::unsigned(Map::new());
        assert!(!bootstrap.is_signed());
        assert_eq!(bootstrap.timestamp, 0);
    }

    /// Validates `FlagValue::render` behavior for the analytics string form
    /// scenario.
    #[test]
    fn test_flag_value_render() {
        assert_eq!(FlagValue::Bool(true).render(), "true");
        assert_eq!(FlagValue::String("a".into()).render(), "\"a\"");
        assert_eq!(FlagValue::Null.render(), "null");
    }
}
