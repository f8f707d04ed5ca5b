//! Privacy utilities
//!
//! Message sanitization for user-visible error strings.

mod sanitize;

pub use sanitize::sanitize_message;
