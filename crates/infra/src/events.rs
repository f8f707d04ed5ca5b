//! Analytics event queue
//!
//! Bounded mailbox of analytics events with non-blocking enqueue. A full
//! queue drops the new event rather than blocking or evicting. Flushes are
//! triggered by batch size and by a periodic timer; the flush drains the
//! buffer into a detached batch so the lock is not held during network I/O.
//! A failed send discards the batch: analytics are best-effort and retrying
//! here would unbound memory and distort the transport's breaker state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flagkit_domain::EvaluationContext;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::transport::{HttpTransport, SDK_VERSION};

/// Event queue configuration.
#[derive(Debug, Clone)]
pub struct EventQueueConfig {
    /// Buffer capacity; a full buffer drops new events.
    pub max_size: usize,
    /// Buffered count that schedules an early flush.
    pub batch_size: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self { max_size: 1000, batch_size: 10, flush_interval: Duration::from_secs(30) }
    }
}

/// One analytics event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub event_type: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    pub sdk_version: String,
    pub payload: Value,
    /// Context snapshot with private attributes stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EvaluationContext>,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub dropped: u64,
    pub flushed: u64,
}

/// Bounded batching analytics queue.
pub struct EventQueue {
    config: EventQueueConfig,
    transport: Arc<HttpTransport>,
    buffer: Mutex<Vec<AnalyticsEvent>>,
    dropped: AtomicU64,
    flushed: AtomicU64,
    session_id: String,
    environment_id: RwLock<Option<String>>,
    flush_signal: Arc<Notify>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    pub fn new(config: EventQueueConfig, transport: Arc<HttpTransport>) -> Self {
        Self {
            config,
            transport,
            buffer: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            session_id: Uuid::new_v4().to_string(),
            environment_id: RwLock::new(None),
            flush_signal: Arc::new(Notify::new()),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    /// Environment id applied to events enqueued from now on.
    pub fn set_environment_id(&self, environment_id: impl Into<String>) {
        *self.environment_id.write() = Some(environment_id.into());
    }

    /// Enqueue an event. Never blocks; a full queue drops the event.
    pub fn track(&self, event_type: impl Into<String>, payload: Value) {
        self.enqueue(event_type.into(), payload, None);
    }

    /// Enqueue an event with a context snapshot. Private attributes are
    /// stripped before the snapshot is stored.
    pub fn track_with_context(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        context: &EvaluationContext,
    ) {
        self.enqueue(event_type.into(), payload, Some(context.sanitized()));
    }

    fn enqueue(&self, event_type: String, payload: Value, context: Option<EvaluationContext>) {
        let event = AnalyticsEvent {
            event_type,
            timestamp: Utc::now().timestamp_millis(),
            session_id: self.session_id.clone(),
            environment_id: self.environment_id.read().clone(),
            sdk_version: SDK_VERSION.to_string(),
            payload,
            context,
        };

        let len = {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.config.max_size {
                drop(buffer);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("event queue full, dropping event");
                return;
            }
            buffer.push(event);
            buffer.len()
        };

        if len >= self.config.batch_size {
            self.flush_signal.notify_one();
        }
    }

    /// Start the flush worker: wakes on the batch-size signal and on the
    /// periodic timer.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let queue = Arc::clone(self);
        let signal = Arc::clone(&self.flush_signal);
        let interval = self.config.flush_interval;

        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = signal.notified() => {
                        queue.flush().await;
                    }
                    _ = tokio::time::sleep(interval) => {
                        queue.flush().await;
                    }
                }
            }
        }));
    }

    /// Drain the buffer and post the batch. Returns the number of events in
    /// the batch; a failed send discards them.
    pub async fn flush(&self) -> usize {
        let batch: Vec<AnalyticsEvent> = {
            let mut buffer = self.buffer.lock();
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        let body = serde_json::json!({ "events": batch });
        match self.transport.post("/sdk/events/batch", &body).await {
            Ok(_) => {
                self.flushed.fetch_add(count as u64, Ordering::Relaxed);
                debug!(count, "event batch delivered");
            }
            Err(err) => {
                self.dropped.fetch_add(count as u64, Ordering::Relaxed);
                warn!(count, error = %err, "event batch discarded after send failure");
            }
        }
        count
    }

    /// Current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.len(),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
        }
    }

    /// Cancel the timer, run one final flush, and stop the worker with a
    /// bounded wait.
    pub async fn stop(&self) {
        self.cancel.lock().cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("event worker did not stop within timeout");
            }
        }
        self.flush().await;
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the analytics event queue.

    use flagkit_common::resilience::CircuitBreaker;
    use flagkit_core::CredentialManager;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::transport::TransportConfig;

    fn transport(base_url: String) -> Arc<HttpTransport> {
        let credentials = Arc::new(CredentialManager::new("sdk_aaaaaaaa", None).unwrap());
        let breaker = Arc::new(CircuitBreaker::with_defaults());
        let config = TransportConfig {
            base_url,
            max_retries: 1,
            base_delay: Duration::from_millis(5),
            ..TransportConfig::default()
        };
        Arc::new(HttpTransport::new(config, credentials, breaker).unwrap())
    }

    fn queue_with(server_url: String, config: EventQueueConfig) -> Arc<EventQueue> {
        Arc::new(EventQueue::new(config, transport(server_url)))
    }

    /// Validates `EventQueue::track` behavior for the enqueue scenario.
    ///
    /// Assertions:
    /// - Confirms events land in the buffer with session and SDK metadata.
    #[test]
    fn test_track_enqueues() {
        let queue = queue_with("http://localhost:9".into(), EventQueueConfig::default());
        queue.track("evaluation", json!({"flagKey": "f"}));
        queue.track("custom", json!({"n": 1}));

        assert_eq!(queue.len(), 2);
        let buffer = queue.buffer.lock();
        assert_eq!(buffer[0].event_type, "evaluation");
        assert_eq!(buffer[0].sdk_version, SDK_VERSION);
        assert!(!buffer[0].session_id.is_empty());
        assert_eq!(buffer[0].session_id, buffer[1].session_id);
    }

    /// A full queue drops the new event and counts it.
    #[test]
    fn test_full_queue_drops_new() {
        let config = EventQueueConfig { max_size: 2, ..EventQueueConfig::default() };
        let queue = queue_with("http://localhost:9".into(), config);

        queue.track("a", json!({}));
        queue.track("b", json!({}));
        queue.track("c", json!({}));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().dropped, 1);
        // the oldest events survive; the newcomer was dropped
        assert_eq!(queue.buffer.lock()[0].event_type, "a");
    }

    /// Context snapshots are sanitized before storage.
    #[test]
    fn test_context_sanitized_on_enqueue() {
        let queue = queue_with("http://localhost:9".into(), EventQueueConfig::default());
        let context = EvaluationContext::new("u1")
            .with_email("u1@example.com")
            .with_custom("secret", json!("x"))
            .with_private_attribute("secret");

        queue.track_with_context("evaluation", json!({}), &context);

        let buffer = queue.buffer.lock();
        let snapshot = buffer[0].context.as_ref().unwrap();
        assert_eq!(snapshot.email, None);
        assert!(!snapshot.custom.contains_key("secret"));
    }

    /// Flush drains the buffer and posts one batch body.
    #[tokio::test]
    async fn test_flush_posts_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sdk/events/batch"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let queue = queue_with(server.uri(), EventQueueConfig::default());
        queue.set_environment_id("env-1");
        queue.track("evaluation", json!({"flagKey": "f"}));
        queue.track("evaluation", json!({"flagKey": "g"}));

        let sent = queue.flush().await;
        assert_eq!(sent, 2);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().flushed, 2);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["environmentId"], "env-1");
        assert_eq!(events[1]["payload"]["flagKey"], "g");
    }

    /// A failed send discards the batch and keeps the queue bounded.
    #[tokio::test]
    async fn test_failed_send_discards_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let queue = queue_with(server.uri(), EventQueueConfig::default());
        queue.track("evaluation", json!({}));

        let sent = queue.flush().await;
        assert_eq!(sent, 1);
        assert!(queue.is_empty(), "failed batch must not be re-queued");
        assert_eq!(queue.stats().dropped, 1);
        assert_eq!(queue.stats().flushed, 0);
    }

    /// Reaching the batch size wakes the worker without waiting for the
    /// periodic timer.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_size_triggers_flush() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sdk/events/batch"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let config = EventQueueConfig {
            batch_size: 3,
            flush_interval: Duration::from_secs(3600),
            ..EventQueueConfig::default()
        };
        let queue = queue_with(server.uri(), config);
        queue.start();

        for i in 0..3 {
            queue.track("evaluation", json!({ "i": i }));
        }

        // wait for the worker to pick up the signal
        for _ in 0..50 {
            if queue.is_empty() && !server.received_requests().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(queue.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        queue.stop().await;
    }

    /// `stop` runs a final flush.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_flushes_remainder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let queue = queue_with(server.uri(), EventQueueConfig::default());
        queue.start();
        queue.track("evaluation", json!({}));

        queue.stop().await;
        assert!(queue.is_empty());
        assert_eq!(queue.stats().flushed, 1);
    }
}
