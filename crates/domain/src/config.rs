//! SDK configuration surface
//!
//! Options are programmatic; there is no file-based configuration. The
//! builder applies the documented defaults and `validate` rejects anything
//! the runtime could not honor.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::errors::{FlagKitError, Result};
use crate::flag::BootstrapConfig;

/// Accepted credential prefixes. Keys are prefix-tagged strings with a
/// minimum total length of 10 characters.
pub const API_KEY_PREFIXES: [&str; 3] = ["sdk_", "srv_", "cli_"];

/// Minimum total credential length.
pub const API_KEY_MIN_LEN: usize = 10;

/// Validate a credential string against the accepted shape.
pub fn validate_api_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(FlagKitError::AuthMissing);
    }
    if key.len() < API_KEY_MIN_LEN {
        return Err(FlagKitError::ConfigInvalid(format!(
            "API key must be at least {API_KEY_MIN_LEN} characters"
        )));
    }
    if !API_KEY_PREFIXES.iter().any(|prefix| key.starts_with(prefix)) {
        return Err(FlagKitError::ConfigInvalid(
            "API key must start with sdk_, srv_ or cli_".to_string(),
        ));
    }
    Ok(())
}

/// What to do when bootstrap verification fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyFailurePolicy {
    /// Surface the typed security error.
    Error,
    /// Log a warning and continue without the bootstrap.
    #[default]
    Warn,
    /// Silently continue without the bootstrap.
    Ignore,
}

/// Bootstrap signature verification options.
#[derive(Debug, Clone)]
pub struct BootstrapVerification {
    pub enabled: bool,
    /// Maximum accepted payload age; unset disables the age bound.
    pub max_age: Option<Duration>,
    pub on_failure: VerifyFailurePolicy,
}

impl Default for BootstrapVerification {
    fn default() -> Self {
        Self { enabled: true, max_age: None, on_failure: VerifyFailurePolicy::Warn }
    }
}

/// Uniform delay applied inside every `evaluate` call when enabled.
///
/// Blurs cache-hit timing; applied unconditionally regardless of hit or
/// miss, so it costs latency-sensitive callers up to `max` per lookup.
#[derive(Debug, Clone, Default)]
pub struct EvaluationJitter {
    pub enabled: bool,
    pub min: Duration,
    pub max: Duration,
}

impl EvaluationJitter {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { enabled: true, min, max }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct FlagKitConfig {
    /// Required credential, `sdk_*` / `srv_*` / `cli_*`.
    pub api_key: String,
    /// Optional failover credential, swapped in on authentication rejection.
    pub secondary_api_key: Option<String>,
    /// Base URL all endpoint paths are relative to.
    pub base_url: String,
    /// Requested polling interval; the effective interval is
    /// `max(this, server-advertised)`.
    pub polling_interval: Duration,
    pub enable_polling: bool,
    pub enable_streaming: bool,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub max_cache_size: usize,
    /// Skip the network entirely and mark ready immediately.
    pub offline: bool,
    /// Per-call HTTP timeout (connect, read and write).
    pub timeout: Duration,
    /// Total attempts per request.
    pub retries: u32,
    /// Unsigned seed values, used when a key is not cached.
    pub bootstrap: Map<String, Value>,
    pub enable_request_signing: bool,
    /// Wrap exported cache snapshots with AES-GCM.
    pub enable_cache_encryption: bool,
    /// Raw 32-byte snapshot key; generated fresh when unset.
    pub cache_encryption_key: Option<Vec<u8>>,
    /// Signed seed payload, verified per `bootstrap_verification`.
    pub bootstrap_config: Option<BootstrapConfig>,
    pub bootstrap_verification: BootstrapVerification,
    pub evaluation_jitter: EvaluationJitter,
}

impl FlagKitConfig {
    /// Start building a configuration for the given API key.
    pub fn builder(api_key: impl Into<String>) -> FlagKitConfigBuilder {
        FlagKitConfigBuilder::new(api_key)
    }

    /// Check every option the runtime depends on.
    pub fn validate(&self) -> Result<()> {
        validate_api_key(&self.api_key)?;
        if let Some(secondary) = &self.secondary_api_key {
            validate_api_key(secondary)?;
        }
        if self.base_url.is_empty() {
            return Err(FlagKitError::ConfigInvalid("base_url must not be empty".to_string()));
        }
        if self.polling_interval < Duration::from_secs(1) {
            return Err(FlagKitError::ConfigInvalid(
                "polling_interval must be at least 1s".to_string(),
            ));
        }
        if self.retries == 0 {
            return Err(FlagKitError::ConfigInvalid("retries must be at least 1".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(FlagKitError::ConfigInvalid("timeout must be positive".to_string()));
        }
        if self.max_cache_size == 0 {
            return Err(FlagKitError::ConfigInvalid(
                "max_cache_size must be at least 1".to_string(),
            ));
        }
        if let Some(key) = &self.cache_encryption_key {
            if key.len() != 32 {
                return Err(FlagKitError::ConfigInvalid(
                    "cache_encryption_key must be exactly 32 bytes".to_string(),
                ));
            }
        }
        if self.evaluation_jitter.enabled && self.evaluation_jitter.min > self.evaluation_jitter.max
        {
            return Err(FlagKitError::ConfigInvalid(
                "evaluation_jitter.min must not exceed max".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`FlagKitConfig`] with the documented defaults.
#[derive(Debug)]
pub struct FlagKitConfigBuilder {
    config: FlagKitConfig,
}

impl FlagKitConfigBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            config: FlagKitConfig {
                api_key: api_key.into(),
                secondary_api_key: None,
                base_url: "https://api.flagkit.io/v1".to_string(),
                polling_interval: Duration::from_secs(30),
                enable_polling: true,
                enable_streaming: true,
                cache_enabled: true,
                cache_ttl: Duration::from_secs(300),
                max_cache_size: 1000,
                offline: false,
                timeout: Duration::from_secs(5),
                retries: 3,
                bootstrap: Map::new(),
                enable_request_signing: true,
                enable_cache_encryption: false,
                cache_encryption_key: None,
                bootstrap_config: None,
                bootstrap_verification: BootstrapVerification::default(),
                evaluation_jitter: EvaluationJitter::default(),
            },
        }
    }

    pub fn secondary_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.secondary_api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.config.polling_interval = interval;
        self
    }

    pub fn enable_polling(mut self, enabled: bool) -> Self {
        self.config.enable_polling = enabled;
        self
    }

    pub fn enable_streaming(mut self, enabled: bool) -> Self {
        self.config.enable_streaming = enabled;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn max_cache_size(mut self, size: usize) -> Self {
        self.config.max_cache_size = size;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.config.offline = offline;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Seed an unsigned bootstrap value.
    pub fn bootstrap_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.bootstrap.insert(key.into(), value);
        self
    }

    /// Seed the full unsigned bootstrap mapping.
    pub fn bootstrap(mut self, flags: Map<String, Value>) -> Self {
        self.config.bootstrap = flags;
        self
    }

    pub fn enable_request_signing(mut self, enabled: bool) -> Self {
        self.config.enable_request_signing = enabled;
        self
    }

    pub fn enable_cache_encryption(mut self, enabled: bool) -> Self {
        self.config.enable_cache_encryption = enabled;
        self
    }

    pub fn cache_encryption_key(mut self, key: Vec<u8>) -> Self {
        self.config.cache_encryption_key = Some(key);
        self
    }

    pub fn bootstrap_config(mut self, bootstrap: BootstrapConfig) -> Self {
        self.config.bootstrap_config = Some(bootstrap);
        self
    }

    pub fn bootstrap_verification(mut self, verification: BootstrapVerification) -> Self {
        self.config.bootstrap_verification = verification;
        self
    }

    pub fn evaluation_jitter(mut self, jitter: EvaluationJitter) -> Self {
        self.config.evaluation_jitter = jitter;
        self
    }

    pub fn build(self) -> Result<FlagKitConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for configuration validation.

    use super::*;

    /// Validates `validate_api_key` behavior for the credential format
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures all three prefixes are accepted.
    /// - Ensures short or unprefixed keys are rejected.
    #[test]
    fn test_api_key_format() {
        assert!(validate_api_key("sdk_abcdef1234").is_ok());
        assert!(validate_api_key("srv_abcdef1234").is_ok());
        assert!(validate_api_key("cli_abcdef1234").is_ok());

        assert!(validate_api_key("").is_err());
        assert!(validate_api_key("sdk_12").is_err());
        assert!(validate_api_key("key_abcdef1234").is_err());
    }

    /// Validates `FlagKitConfigBuilder` defaults against the documented
    /// configuration surface.
    ///
    /// Assertions:
    /// - Confirms cache TTL defaults to 5 minutes.
    /// - Confirms timeout defaults to 5 seconds and retries to 3.
    /// - Ensures signing defaults on and cache encryption off.
    #[test]
    fn test_builder_defaults() {
        let config = FlagKitConfig::builder("sdk_abcdef1234").build().unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retries, 3);
        assert_eq!(config.max_cache_size, 1000);
        assert!(config.enable_polling);
        assert!(config.enable_request_signing);
        assert!(!config.enable_cache_encryption);
        assert!(!config.offline);
        assert!(!config.evaluation_jitter.enabled);
    }

    /// Validates `FlagKitConfig::validate` behavior for the rejection
    /// scenarios.
    ///
    /// Assertions:
    /// - Ensures a sub-second polling interval is rejected.
    /// - Ensures zero retries are rejected.
    /// - Ensures an inverted jitter range is rejected.
    #[test]
    fn test_validation_rejections() {
        let result = FlagKitConfig::builder("sdk_abcdef1234")
            .polling_interval(Duration::from_millis(200))
            .build();
        assert!(result.is_err());

        let result = FlagKitConfig::builder("sdk_abcdef1234").retries(0).build();
        assert!(result.is_err());

        let result = FlagKitConfig::builder("sdk_abcdef1234")
            .evaluation_jitter(EvaluationJitter::new(
                Duration::from_millis(10),
                Duration::from_millis(5),
            ))
            .build();
        assert!(result.is_err());
    }

    /// Validates the secondary key path of `FlagKitConfig::validate`.
    #[test]
    fn test_secondary_key_validated() {
        let result = FlagKitConfig::builder("sdk_abcdef1234").secondary_api_key("bad").build();
        assert!(result.is_err());

        let result = FlagKitConfig::builder("sdk_abcdef1234")
            .secondary_api_key("sdk_bbbbbbbb")
            .build();
        assert!(result.is_ok());
    }
}
