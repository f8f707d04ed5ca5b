//! # FlagKit Domain
//!
//! Data model shared by every FlagKit crate.
//!
//! This crate contains:
//! - Flag types (`FlagState`, `FlagValue`, `FlagType`) and bootstrap payloads
//! - Evaluation context and result types
//! - The SDK configuration surface
//! - The SDK-wide error taxonomy and classification trait
//!
//! ## Architecture
//! - No dependencies on other FlagKit crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod context;
pub mod errors;
pub mod flag;
pub mod result;
pub mod telemetry;

// Re-export commonly used items
pub use config::{
    BootstrapVerification, EvaluationJitter, FlagKitConfig, FlagKitConfigBuilder,
    VerifyFailurePolicy,
};
pub use context::EvaluationContext;
pub use errors::{ErrorClassification, ErrorSeverity, FlagKitError, Result};
pub use flag::{BootstrapConfig, FlagState, FlagType, FlagValue};
pub use result::{EvaluationReason, EvaluationResult};
pub use telemetry::{SubscriptionStatus, UsageTelemetry};
