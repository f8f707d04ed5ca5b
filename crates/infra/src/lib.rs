//! # FlagKit Infra
//!
//! I/O layer of the SDK: the resilient HTTP transport, the polling and
//! streaming managers that keep the flag store fresh, the analytics event
//! queue, and the [`FlagKitClient`] facade that wires everything together.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod client;
pub mod events;
pub mod polling;
pub mod streaming;
pub mod transport;

pub use client::{ClientCallbacks, FlagKitClient};
pub use events::{AnalyticsEvent, EventQueue, EventQueueConfig, QueueStats};
pub use polling::{PollingConfig, PollingManager};
pub use streaming::{StreamState, StreamingCallbacks, StreamingConfig, StreamingManager};
pub use transport::{HttpTransport, TransportConfig, TransportResponse};
