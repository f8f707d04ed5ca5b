//! Evaluation context
//!
//! Identification and targeting attributes supplied by the consumer. The
//! context is cloned defensively on read; [`EvaluationContext::sanitized`]
//! produces the copy that is allowed to leave the process.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// User / environment attributes for an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    /// Stable user identifier; synthesized for anonymous contexts.
    pub user_id: String,
    /// Whether the identifier was synthesized rather than supplied.
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    /// Free-form targeting attributes.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
    /// Names of fields to strip before transmission.
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub private_attributes: HashSet<String>,
}

impl EvaluationContext {
    /// Context for a known user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), ..Self::default() }
    }

    /// Context for an anonymous user with a synthesized identifier.
    pub fn anonymous() -> Self {
        Self { user_id: format!("anon-{}", Uuid::new_v4()), anonymous: true, ..Self::default() }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }

    pub fn with_private_attribute(mut self, name: impl Into<String>) -> Self {
        self.private_attributes.insert(name.into());
        self
    }

    /// Overlay `other` onto this context. Set fields of `other` win; custom
    /// attributes and private-attribute names are unioned.
    pub fn merge(mut self, other: &EvaluationContext) -> Self {
        if !other.user_id.is_empty() {
            self.user_id = other.user_id.clone();
            self.anonymous = other.anonymous;
        }
        macro_rules! overlay {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        overlay!(email);
        overlay!(name);
        overlay!(country);
        overlay!(device_type);
        overlay!(os);
        overlay!(browser);
        for (k, v) in &other.custom {
            self.custom.insert(k.clone(), v.clone());
        }
        self.private_attributes.extend(other.private_attributes.iter().cloned());
        self
    }

    /// Copy with every private attribute removed, suitable for transmission.
    ///
    /// `email` is always treated as private. The private-attribute name set
    /// itself is not transmitted either.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        out.email = None;
        for name in &self.private_attributes {
            match name.as_str() {
                "email" => out.email = None,
                "name" => out.name = None,
                "country" => out.country = None,
                "deviceType" | "device_type" => out.device_type = None,
                "os" => out.os = None,
                "browser" => out.browser = None,
                custom_key => {
                    out.custom.remove(custom_key);
                }
            }
        }
        out.private_attributes = HashSet::new();
        out
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for context construction and sanitization.

    use super::*;

    /// Validates `EvaluationContext::anonymous` behavior for the synthesized
    /// identifier scenario.
    ///
    /// Assertions:
    /// - Ensures the synthesized id carries the `anon-` prefix.
    /// - Ensures `anonymous` is set.
    #[test]
    fn test_anonymous_context() {
        let ctx = EvaluationContext::anonymous();
        assert!(ctx.user_id.starts_with("anon-"));
        assert!(ctx.anonymous);
    }

    /// Validates `EvaluationContext::sanitized` behavior for the private
    /// attribute stripping scenario.
    ///
    /// Assertions:
    /// - Confirms `email` is always stripped.
    /// - Confirms named well-known and custom fields are stripped.
    /// - Confirms the private-attribute set is not transmitted.
    #[test]
    fn test_sanitized_strips_private_attributes() {
        let ctx = EvaluationContext::new("u1")
            .with_email("u1@example.com")
            .with_country("CH")
            .with_custom("plan", Value::String("pro".into()))
            .with_custom("ssn", Value::String("x".into()))
            .with_private_attribute("country")
            .with_private_attribute("ssn");

        let clean = ctx.sanitized();
        assert_eq!(clean.email, None);
        assert_eq!(clean.country, None);
        assert!(clean.custom.contains_key("plan"));
        assert!(!clean.custom.contains_key("ssn"));
        assert!(clean.private_attributes.is_empty());

        // the original is untouched
        assert_eq!(ctx.country.as_deref(), Some("CH"));
    }

    /// Validates `EvaluationContext::merge` behavior for the overlay
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms set fields of the overlay win.
    /// - Confirms unset fields of the overlay keep the base value.
    /// - Confirms custom attributes are unioned.
    #[test]
    fn test_merge_overlays() {
        let base = EvaluationContext::new("u1")
            .with_country("CH")
            .with_custom("a", Value::from(1));
        let overlay = EvaluationContext::new("u2").with_custom("b", Value::from(2));

        let merged = base.merge(&overlay);
        assert_eq!(merged.user_id, "u2");
        assert_eq!(merged.country.as_deref(), Some("CH"));
        assert!(merged.custom.contains_key("a"));
        assert!(merged.custom.contains_key("b"));
    }
}
