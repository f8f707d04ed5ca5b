//! Streaming manager
//!
//! Maintains the push connection for low-latency flag updates and steps down
//! to polling when the stream is unusable. The protocol is a two-step token
//! exchange: a token fetch over the signed transport, then a server-sent-
//! events GET with the token in the query string. Incoming events are applied
//! to the flag store in receive order; a `flags_reset` replaces the full set
//! atomically.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eventsource_stream::{Event, Eventsource};
use flagkit_core::FlagStore;
use flagkit_domain::{FlagKitError, FlagState, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{HttpTransport, HEADER_API_KEY};

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Failed = 4,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Connecting,
            2 => StreamState::Connected,
            3 => StreamState::Reconnecting,
            4 => StreamState::Failed,
            _ => StreamState::Disconnected,
        }
    }
}

/// Atomic state cell; `try_begin_connect` is the compare-and-set that makes
/// simultaneous `connect()` callers produce exactly one initiator.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(StreamState::Disconnected as u8))
    }

    fn load(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: StreamState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn try_begin_connect(&self) -> bool {
        for from in [StreamState::Disconnected, StreamState::Failed, StreamState::Reconnecting] {
            if self
                .0
                .compare_exchange(
                    from as u8,
                    StreamState::Connecting as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }
}

/// Streaming configuration.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Expected heartbeat cadence from the server.
    pub heartbeat_interval: Duration,
    /// First reconnect delay; doubles per consecutive failure.
    pub reconnect_interval: Duration,
    /// Reconnect delay ceiling.
    pub max_reconnect_delay: Duration,
    /// Consecutive failures before stepping down to polling.
    pub max_reconnect_attempts: u32,
    /// Background streaming retry cadence after stepping down.
    pub failed_retry_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            failed_retry_interval: Duration::from_secs(300),
        }
    }
}

/// Callbacks invoked from the streaming worker. They must not block long.
#[derive(Clone, Default)]
pub struct StreamingCallbacks {
    /// Flags applied from the stream, in receive order.
    pub on_update: Option<Arc<dyn Fn(Vec<FlagState>) + Send + Sync>>,
    /// The service reported the subscription unusable.
    pub on_subscription_error: Option<Arc<dyn Fn(String) + Send + Sync>>,
    /// The service reported the connection limit reached.
    pub on_connection_limit: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Streaming has stepped down; polling should cover freshness.
    pub on_fallback_to_polling: Option<Arc<dyn Fn() + Send + Sync>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamToken {
    token: String,
    /// Seconds until the token expires.
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    key: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    code: String,
    #[serde(default)]
    message: String,
}

/// How one applied event leaves the session.
#[derive(Debug, PartialEq, Eq)]
enum EventOutcome {
    /// Keep reading.
    Applied,
    /// Clean up and reconnect immediately with a fresh token.
    Reconnect,
    /// Transport-level failure: reconnect with backoff.
    Backoff,
    /// Step down to polling now; streaming keeps retrying in the
    /// background.
    StepDown,
    /// Step down to polling; no automatic retry.
    Fatal,
}

/// How a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Reconnect,
    Failure,
    StepDown,
    Fatal,
}

struct Inner {
    transport: Arc<HttpTransport>,
    /// Dedicated client without a read timeout; the SSE GET is a long poll
    /// and is unblocked by cancellation, not by a deadline.
    http: reqwest::Client,
    base_url: String,
    store: Arc<FlagStore>,
    cache_ttl: Duration,
    config: StreamingConfig,
    callbacks: StreamingCallbacks,
    state: StateCell,
    last_heartbeat: Mutex<Instant>,
}

/// Push-update connection manager.
pub struct StreamingManager {
    inner: Arc<Inner>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingManager {
    pub fn new(
        transport: Arc<HttpTransport>,
        base_url: impl Into<String>,
        store: Arc<FlagStore>,
        cache_ttl: Duration,
        config: StreamingConfig,
        callbacks: StreamingCallbacks,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                http: reqwest::Client::new(),
                base_url: base_url.into(),
                store,
                cache_ttl,
                config,
                callbacks,
                state: StateCell::new(),
                last_heartbeat: Mutex::new(Instant::now()),
            }),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> StreamState {
        self.inner.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == StreamState::Connected
    }

    /// Begin connecting. Returns `true` when this call initiated the
    /// connection; concurrent callers and already-connected states return
    /// `false`.
    pub fn connect(&self) -> bool {
        if !self.inner.state.try_begin_connect() {
            return false;
        }

        let cancel = CancellationToken::new();
        let mut task = self.task.lock();
        if let Some(stale) = task.take() {
            stale.abort();
        }
        *self.cancel.lock() = cancel.clone();

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move {
            run_loop(inner, cancel).await;
        }));
        true
    }

    /// Cancel the connection and all timers, then await the worker with a
    /// bounded wait.
    pub async fn shutdown(&self) {
        self.cancel.lock().cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("stream worker did not stop within timeout");
            }
        }
        self.inner.state.store(StreamState::Disconnected);
    }
}

impl Drop for StreamingManager {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
    }
}

async fn run_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut consecutive_failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            inner.state.store(StreamState::Disconnected);
            return;
        }

        inner.state.store(StreamState::Connecting);
        let (end, was_connected) = run_session(&inner, &cancel).await;
        if was_connected {
            consecutive_failures = 0;
        }

        match end {
            SessionEnd::Shutdown => {
                inner.state.store(StreamState::Disconnected);
                return;
            }
            SessionEnd::Reconnect => {
                debug!("stream reconnecting with a fresh token");
            }
            SessionEnd::Failure => {
                consecutive_failures += 1;
                if consecutive_failures >= inner.config.max_reconnect_attempts {
                    warn!(
                        attempts = consecutive_failures,
                        "stream failed repeatedly, stepping down to polling"
                    );
                    if !step_down_and_wait(&inner, &cancel).await {
                        inner.state.store(StreamState::Disconnected);
                        return;
                    }
                    consecutive_failures = 0;
                } else {
                    inner.state.store(StreamState::Reconnecting);
                    let delay = reconnect_delay(&inner.config, consecutive_failures);
                    debug!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = consecutive_failures,
                        "stream reconnect backoff"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            inner.state.store(StreamState::Disconnected);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            SessionEnd::StepDown => {
                if !step_down_and_wait(&inner, &cancel).await {
                    inner.state.store(StreamState::Disconnected);
                    return;
                }
                consecutive_failures = 0;
            }
            SessionEnd::Fatal => {
                // Subscription-level refusal: no automatic retry.
                inner.state.store(StreamState::Failed);
                if let Some(fallback) = &inner.callbacks.on_fallback_to_polling {
                    fallback();
                }
                return;
            }
        }
    }
}

/// Enter FAILED, hand freshness to polling, and hold until the background
/// streaming retry is due. Returns `false` when cancelled during the wait.
async fn step_down_and_wait(inner: &Inner, cancel: &CancellationToken) -> bool {
    inner.state.store(StreamState::Failed);
    if let Some(fallback) = &inner.callbacks.on_fallback_to_polling {
        fallback();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(inner.config.failed_retry_interval) => true,
    }
}

/// `min(reconnect_interval · 2^(failures−1), max)`.
fn reconnect_delay(config: &StreamingConfig, failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
    config.reconnect_interval.saturating_mul(factor).min(config.max_reconnect_delay)
}

async fn fetch_token(inner: &Inner) -> Result<StreamToken> {
    let response =
        inner.transport.post("/sdk/stream/token", &serde_json::json!({})).await?;
    response.json::<StreamToken>()
}

/// One connection attempt: token fetch, stream open, read loop. The second
/// element reports whether the session reached CONNECTED.
async fn run_session(inner: &Inner, cancel: &CancellationToken) -> (SessionEnd, bool) {
    let mut token = match fetch_token(inner).await {
        Ok(token) => token,
        Err(err) => {
            warn!(error = %err, "stream token fetch failed");
            return (SessionEnd::Failure, false);
        }
    };

    let url = format!(
        "{}/sdk/stream?token={}",
        inner.base_url,
        urlencoding::encode(&token.token)
    );
    let request = inner
        .http
        .get(&url)
        .header(HEADER_API_KEY, inner.transport.credentials().current())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");

    let response = tokio::select! {
        _ = cancel.cancelled() => return (SessionEnd::Shutdown, false),
        sent = request.send() => match sent {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "stream open failed");
                return (SessionEnd::Failure, false);
            }
        }
    };
    if !response.status().is_success() {
        warn!(status = response.status().as_u16(), "stream rejected");
        return (SessionEnd::Failure, false);
    }

    inner.state.store(StreamState::Connected);
    *inner.last_heartbeat.lock() = Instant::now();
    info!("stream connected");

    let mut events = response.bytes_stream().eventsource();

    let refresh_in = |token: &StreamToken| {
        Duration::from_secs_f64((token.expires_in as f64 * 0.8).max(1.0))
    };
    let refresh = tokio::time::sleep(refresh_in(&token));
    tokio::pin!(refresh);

    let monitor_period = inner.config.heartbeat_interval.mul_f64(1.5);
    let mut monitor = tokio::time::interval_at(
        tokio::time::Instant::now() + monitor_period,
        monitor_period,
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return (SessionEnd::Shutdown, true),

            _ = &mut refresh => {
                match fetch_token(inner).await {
                    Ok(fresh) => {
                        debug!("stream token refreshed");
                        token = fresh;
                        refresh.as_mut().reset(tokio::time::Instant::now() + refresh_in(&token));
                    }
                    Err(err) => {
                        warn!(error = %err, "token refresh failed, reconnecting");
                        return (SessionEnd::Reconnect, true);
                    }
                }
            }

            _ = monitor.tick() => {
                let silent = inner.last_heartbeat.lock().elapsed();
                if silent > inner.config.heartbeat_interval.saturating_mul(2) {
                    warn!(silent_ms = silent.as_millis() as u64, "heartbeat stale, reconnecting");
                    return (SessionEnd::Failure, true);
                }
            }

            maybe_event = events.next() => match maybe_event {
                None => {
                    debug!("stream closed by server");
                    return (SessionEnd::Failure, true);
                }
                Some(Err(err)) => {
                    warn!(error = %err, "stream read failed");
                    return (SessionEnd::Failure, true);
                }
                Some(Ok(event)) => match apply_stream_event(
                    &event,
                    &inner.store,
                    inner.cache_ttl,
                    &inner.callbacks,
                    &inner.last_heartbeat,
                ) {
                    EventOutcome::Applied => {}
                    EventOutcome::Reconnect => return (SessionEnd::Reconnect, true),
                    EventOutcome::Backoff => return (SessionEnd::Failure, true),
                    EventOutcome::StepDown => return (SessionEnd::StepDown, true),
                    EventOutcome::Fatal => return (SessionEnd::Fatal, true),
                },
            },
        }
    }
}

/// Apply one decoded SSE event to the store. Unknown event names are
/// ignored; malformed payloads are logged and skipped.
fn apply_stream_event(
    event: &Event,
    store: &FlagStore,
    cache_ttl: Duration,
    callbacks: &StreamingCallbacks,
    last_heartbeat: &Mutex<Instant>,
) -> EventOutcome {
    match event.event.as_str() {
        "flag_updated" => {
            match serde_json::from_str::<FlagState>(&event.data) {
                Ok(flag) => {
                    debug!(key = %flag.key, version = flag.version, "flag updated from stream");
                    store.set(flag.clone(), cache_ttl);
                    if let Some(on_update) = &callbacks.on_update {
                        on_update(vec![flag]);
                    }
                }
                Err(err) => warn!(error = %err, "bad flag_updated payload"),
            }
            EventOutcome::Applied
        }
        "flag_deleted" => {
            match serde_json::from_str::<DeletePayload>(&event.data) {
                Ok(payload) => {
                    debug!(key = %payload.key, "flag deleted from stream");
                    store.remove(&payload.key);
                }
                Err(err) => warn!(error = %err, "bad flag_deleted payload"),
            }
            EventOutcome::Applied
        }
        "flags_reset" => {
            match serde_json::from_str::<Vec<FlagState>>(&event.data) {
                Ok(flags) => {
                    info!(count = flags.len(), "flag set replaced from stream");
                    store.replace_all(flags.clone(), cache_ttl);
                    if let Some(on_update) = &callbacks.on_update {
                        on_update(flags);
                    }
                }
                Err(err) => warn!(error = %err, "bad flags_reset payload"),
            }
            EventOutcome::Applied
        }
        "heartbeat" => {
            *last_heartbeat.lock() = Instant::now();
            EventOutcome::Applied
        }
        "error" => {
            let payload = serde_json::from_str::<ErrorPayload>(&event.data).unwrap_or_else(
                |_| ErrorPayload { code: "UNKNOWN".to_string(), message: event.data.clone() },
            );
            handle_stream_error(payload, callbacks)
        }
        other => {
            debug!(event = other, "ignoring unknown stream event");
            EventOutcome::Applied
        }
    }
}

fn handle_stream_error(payload: ErrorPayload, callbacks: &StreamingCallbacks) -> EventOutcome {
    match payload.code.as_str() {
        "TOKEN_INVALID" | "TOKEN_EXPIRED" => {
            debug!(code = %payload.code, "stream token rejected, reconnecting");
            EventOutcome::Reconnect
        }
        "SUBSCRIPTION_SUSPENDED" => {
            warn!("subscription suspended, stepping down to polling");
            if let Some(on_subscription_error) = &callbacks.on_subscription_error {
                on_subscription_error(payload.message);
            }
            EventOutcome::Fatal
        }
        "CONNECTION_LIMIT" => {
            warn!("stream connection limit reached");
            if let Some(on_connection_limit) = &callbacks.on_connection_limit {
                on_connection_limit();
            }
            EventOutcome::Backoff
        }
        "STREAMING_UNAVAILABLE" => {
            warn!("streaming unavailable, stepping down to polling until it returns");
            EventOutcome::StepDown
        }
        other => {
            warn!(code = other, message = %payload.message, "unrecognized stream error");
            EventOutcome::Applied
        }
    }
}

/// Map a stream error payload into the taxonomy. Used by callers that
/// surface stream failures through `on_error`.
pub(crate) fn stream_error_to_flagkit(code: &str, message: &str) -> FlagKitError {
    match code {
        "TOKEN_INVALID" => FlagKitError::StreamTokenInvalid,
        "TOKEN_EXPIRED" => FlagKitError::StreamTokenExpired,
        "SUBSCRIPTION_SUSPENDED" => FlagKitError::SubscriptionSuspended(message.to_string()),
        "CONNECTION_LIMIT" => FlagKitError::ConnectionLimit,
        "STREAMING_UNAVAILABLE" => FlagKitError::StreamingUnavailable,
        other => FlagKitError::Stream(format!("{other}: {message}")),
    }
}
