//! Credential failover
//!
//! Holds the primary API key and an optional secondary. On an
//! authentication rejection the manager swaps to the secondary once; a
//! second rejection is surfaced to the caller. Readers observe a single
//! atomic snapshot per call, never a torn value.

use std::sync::atomic::{AtomicBool, Ordering};

use flagkit_domain::config::validate_api_key;
use flagkit_domain::Result;
use tracing::warn;

/// Primary/secondary credential selection.
pub struct CredentialManager {
    primary: String,
    secondary: Option<String>,
    using_secondary: AtomicBool,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("primary", &"[REDACTED]")
            .field("has_secondary", &self.secondary.is_some())
            .field("using_secondary", &self.using_secondary.load(Ordering::Acquire))
            .finish()
    }
}

impl CredentialManager {
    /// Validate and install the credentials.
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Result<Self> {
        let primary = primary.into();
        validate_api_key(&primary)?;
        if let Some(secondary) = &secondary {
            validate_api_key(secondary)?;
        }
        Ok(Self { primary, secondary, using_secondary: AtomicBool::new(false) })
    }

    /// The credential to attach to the next request.
    pub fn current(&self) -> String {
        if self.using_secondary.load(Ordering::Acquire) {
            if let Some(secondary) = &self.secondary {
                return secondary.clone();
            }
        }
        self.primary.clone()
    }

    /// Non-sensitive identifier of the current credential.
    pub fn key_id(&self) -> String {
        self.current().chars().take(8).collect()
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn is_using_secondary(&self) -> bool {
        self.using_secondary.load(Ordering::Acquire)
    }

    /// React to an authentication rejection.
    ///
    /// Swaps to the secondary when one exists and is not yet active, and
    /// returns `true`. Returns `false` when there is nothing left to fail
    /// over to; the caller surfaces the auth error then.
    pub fn on_auth_rejection(&self) -> bool {
        if self.secondary.is_none() {
            return false;
        }
        let switched = self
            .using_secondary
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if switched {
            warn!("authentication rejected, failing over to secondary credential");
        }
        switched
    }

    /// Return to the primary credential.
    pub fn reset_to_primary(&self) {
        self.using_secondary.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for credential failover.

    use super::*;

    /// Validates `CredentialManager::new` behavior for the validation
    /// scenario.
    #[test]
    fn test_credentials_validated() {
        assert!(CredentialManager::new("sdk_aaaaaaaa", None).is_ok());
        assert!(CredentialManager::new("bogus", None).is_err());
        assert!(CredentialManager::new("sdk_aaaaaaaa", Some("short".into())).is_err());
    }

    /// Validates the failover sequence: one swap to secondary, then refusal.
    ///
    /// Assertions:
    /// - Confirms the first rejection swaps and returns `true`.
    /// - Confirms `current()` serves the secondary afterwards.
    /// - Confirms a second rejection returns `false`.
    #[test]
    fn test_failover_once() {
        let manager =
            CredentialManager::new("sdk_aaaaaaaa", Some("sdk_bbbbbbbb".into())).unwrap();
        assert_eq!(manager.current(), "sdk_aaaaaaaa");
        assert!(!manager.is_using_secondary());

        assert!(manager.on_auth_rejection());
        assert_eq!(manager.current(), "sdk_bbbbbbbb");
        assert!(manager.is_using_secondary());

        assert!(!manager.on_auth_rejection(), "already on secondary");
    }

    /// Validates `on_auth_rejection` without a secondary.
    #[test]
    fn test_no_secondary_refuses() {
        let manager = CredentialManager::new("sdk_aaaaaaaa", None).unwrap();
        assert!(!manager.has_secondary());
        assert!(!manager.on_auth_rejection());
        assert_eq!(manager.current(), "sdk_aaaaaaaa");
    }

    /// Validates `reset_to_primary` after a failover.
    #[test]
    fn test_reset_to_primary() {
        let manager =
            CredentialManager::new("sdk_aaaaaaaa", Some("sdk_bbbbbbbb".into())).unwrap();
        assert!(manager.on_auth_rejection());
        manager.reset_to_primary();
        assert_eq!(manager.current(), "sdk_aaaaaaaa");
        // the secondary can be engaged again after a reset
        assert!(manager.on_auth_rejection());
    }

    /// Validates `key_id` derivation.
    #[test]
    fn test_key_id() {
        let manager = CredentialManager::new("sdk_abcdef1234", None).unwrap();
        assert_eq!(manager.key_id(), "sdk_abcd");
    }

    /// Validates redacted Debug output.
    #[test]
    fn test_debug_redacts() {
        let manager = CredentialManager::new("sdk_abcdef1234", None).unwrap();
        let debug = format!("{manager:?}");
        assert!(!debug.contains("abcdef1234"));
        assert!(debug.contains("[REDACTED]"));
    }
}
