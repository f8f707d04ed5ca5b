//! Usage telemetry extracted from response headers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription state advertised by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trial,
    PastDue,
    Suspended,
    Cancelled,
}

impl FromStr for SubscriptionStatus {
    type Err = ();

    /// Case-insensitive parse against the five valid states.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "trial" => Ok(SubscriptionStatus::Trial),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "suspended" => Ok(SubscriptionStatus::Suspended),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Snapshot of the usage headers carried on a response.
///
/// The transport only forwards this record; acting on it is the consumer's
/// business.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTelemetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_usage_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_usage_percent: Option<f64>,
    #[serde(default)]
    pub rate_limit_warning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<SubscriptionStatus>,
}

impl UsageTelemetry {
    /// True when no usage header was present on the response.
    pub fn is_empty(&self) -> bool {
        self.api_usage_percent.is_none()
            && self.eval_usage_percent.is_none()
            && !self.rate_limit_warning
            && self.subscription_status.is_none()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for telemetry parsing.

    use super::*;

    /// Validates `SubscriptionStatus::from_str` behavior for the
    /// case-insensitive parse scenario.
    ///
    /// Assertions:
    /// - Confirms mixed-case input parses.
    /// - Confirms unknown states are rejected.
    #[test]
    fn test_subscription_status_parse() {
        assert_eq!("Active".parse::<SubscriptionStatus>(), Ok(SubscriptionStatus::Active));
        assert_eq!("PAST_DUE".parse::<SubscriptionStatus>(), Ok(SubscriptionStatus::PastDue));
        assert!("gold".parse::<SubscriptionStatus>().is_err());
    }

    /// Validates `UsageTelemetry::is_empty` behavior for the no-headers
    /// scenario.
    #[test]
    fn test_telemetry_is_empty() {
        assert!(UsageTelemetry::default().is_empty());
        let telemetry =
            UsageTelemetry { rate_limit_warning: true, ..UsageTelemetry::default() };
        assert!(!telemetry.is_empty());
    }
}
