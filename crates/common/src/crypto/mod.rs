//! Signing and encryption primitives
//!
//! - Canonical JSON rendering used as the signed-message body
//! - HMAC-SHA256 request signatures with an age/skew window
//! - AES-256-GCM wrapping for exported cache snapshots

mod canonical;
mod encryption;
mod signing;

pub use canonical::{canonicalize, canonicalize_map};
pub use encryption::{EncryptedBlob, EncryptionError, SnapshotCipher};
pub use signing::{
    create_request_signature, sign, verify_request_signature, RequestSignature,
    DEFAULT_MAX_AGE_MS, MAX_CLOCK_SKEW_MS,
};
