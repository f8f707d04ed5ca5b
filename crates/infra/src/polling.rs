//! Polling manager
//!
//! Periodic refresh with multiplicative backoff on error. The first poll is
//! jittered so a fleet of clients does not synchronize; every later poll is
//! scheduled from the then-current interval. Errors from the poll callback
//! are caught and fed into the backoff, never propagated out of the worker.

use std::sync::Arc;
use std::time::Duration;

use flagkit_domain::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll callback type: one refresh attempt.
pub type PollFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval while healthy.
    pub base_interval: Duration,
    /// Uniform random addition to the first poll's delay.
    pub jitter: Duration,
    /// Interval growth factor per consecutive error.
    pub backoff_multiplier: u32,
    /// Interval ceiling under backoff.
    pub max_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
            backoff_multiplier: 2,
            max_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BackoffState {
    current_interval: Duration,
    consecutive_errors: u32,
}

/// Periodic poll scheduler with error backoff.
pub struct PollingManager {
    config: PollingConfig,
    on_poll: PollFn,
    state: Arc<Mutex<BackoffState>>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingManager {
    pub fn new(config: PollingConfig, on_poll: PollFn) -> Self {
        let state = Arc::new(Mutex::new(BackoffState {
            current_interval: config.base_interval,
            consecutive_errors: 0,
        }));
        Self {
            config,
            on_poll,
            state,
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    /// Start the worker. The first poll fires after
    /// `current_interval + U(0, jitter)`.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("polling already running");
            return;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let state = Arc::clone(&self.state);
        let on_poll = Arc::clone(&self.on_poll);
        let config = self.config.clone();

        info!(interval_ms = config.base_interval.as_millis() as u64, "starting poller");
        *task = Some(tokio::spawn(async move {
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            let mut delay =
                state.lock().current_interval + Duration::from_millis(jitter_ms);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("poll loop cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                // A panicking callback counts as a failed poll; the worker
                // must outlive it.
                let outcome = std::panic::AssertUnwindSafe((on_poll)())
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => Self::apply_success(&state, &config),
                    Ok(Err(err)) => {
                        warn!(error = %err, "poll failed");
                        Self::apply_error(&state, &config);
                    }
                    Err(_) => {
                        warn!("poll callback panicked");
                        Self::apply_error(&state, &config);
                    }
                }

                delay = state.lock().current_interval;
            }
        }));
    }

    /// Run one poll out of band without touching the schedule or backoff.
    pub async fn poll_now(&self) -> Result<()> {
        (self.on_poll)().await
    }

    /// Reset the backoff after a successful poll.
    pub fn on_success(&self) {
        Self::apply_success(&self.state, &self.config);
    }

    /// Grow the interval after a failed poll.
    pub fn on_error(&self) {
        Self::apply_error(&self.state, &self.config);
    }

    pub fn current_interval(&self) -> Duration {
        self.state.lock().current_interval
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.state.lock().consecutive_errors
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel the scheduled task.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    /// Cancel and await the worker with a bounded wait.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("poll worker did not stop within timeout");
            }
        }
    }

    fn apply_success(state: &Mutex<BackoffState>, config: &PollingConfig) {
        let mut state = state.lock();
        state.current_interval = config.base_interval;
        state.consecutive_errors = 0;
    }

    fn apply_error(state: &Mutex<BackoffState>, config: &PollingConfig) {
        let mut state = state.lock();
        let grown = state
            .current_interval
            .saturating_mul(config.backoff_multiplier.max(1));
        state.current_interval = grown.min(config.max_interval);
        state.consecutive_errors += 1;
    }
}

impl Drop for PollingManager {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the polling manager.
    //!
    //! Backoff arithmetic is tested synchronously; the worker loop with
    //! short intervals and a counting callback.

    use std::sync::atomic::{AtomicU32, Ordering};

    use flagkit_domain::FlagKitError;

    use super::*;

    fn config(base_ms: u64, max_ms: u64) -> PollingConfig {
        PollingConfig {
            base_interval: Duration::from_millis(base_ms),
            jitter: Duration::from_millis(1),
            backoff_multiplier: 2,
            max_interval: Duration::from_millis(max_ms),
        }
    }

    fn noop_poll() -> PollFn {
        Arc::new(|| async { Ok(()) }.boxed())
    }

    /// Tests the backoff arithmetic: base 100ms, multiplier 2, max 400ms.
    /// Five consecutive errors pin the interval at 400ms; one success resets
    /// it to 100ms.
    #[test]
    fn test_backoff_grows_and_resets() {
        let manager = PollingManager::new(config(100, 400), noop_poll());
        assert_eq!(manager.current_interval(), Duration::from_millis(100));

        for _ in 0..5 {
            manager.on_error();
        }
        assert_eq!(manager.current_interval(), Duration::from_millis(400));
        assert_eq!(manager.consecutive_errors(), 5);

        manager.on_success();
        assert_eq!(manager.current_interval(), Duration::from_millis(100));
        assert_eq!(manager.consecutive_errors(), 0);
    }

    /// Validates the intermediate backoff steps.
    #[test]
    fn test_backoff_steps() {
        let manager = PollingManager::new(config(100, 400), noop_poll());

        manager.on_error();
        assert_eq!(manager.current_interval(), Duration::from_millis(200));
        manager.on_error();
        assert_eq!(manager.current_interval(), Duration::from_millis(400));
        manager.on_error();
        assert_eq!(manager.current_interval(), Duration::from_millis(400));
    }

    /// The worker runs the callback repeatedly and stops on shutdown.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_polls_and_stops() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let poll: PollFn = Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });

        let manager = PollingManager::new(config(10, 40), poll);
        manager.start();
        assert!(manager.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.shutdown().await;
        let seen = calls.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected repeated polls, saw {seen}");
        assert!(!manager.is_running());

        // no further polls after shutdown
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    /// Callback errors are swallowed by the worker and feed the backoff.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_maps_errors_to_backoff() {
        let poll: PollFn = Arc::new(|| {
            async { Err(FlagKitError::Network("refused".into())) }.boxed()
        });

        let manager = PollingManager::new(config(10, 80), poll);
        manager.start();

        tokio::time::sleep(Duration::from_millis(120)).await;
        manager.shutdown().await;

        assert!(manager.consecutive_errors() >= 1);
        assert!(manager.current_interval() > Duration::from_millis(10));
    }

    /// `poll_now` runs out of band without touching the backoff state.
    #[tokio::test]
    async fn test_poll_now_leaves_schedule_alone() {
        let manager = PollingManager::new(
            config(100, 400),
            Arc::new(|| async { Err(FlagKitError::Network("down".into())) }.boxed()),
        );
        manager.on_error(); // interval now 200ms

        let result = manager.poll_now().await;
        assert!(result.is_err());
        assert_eq!(manager.current_interval(), Duration::from_millis(200));
        assert_eq!(manager.consecutive_errors(), 1);
    }

    /// A second `start` while running is a no-op.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_double_start_is_noop() {
        let manager = PollingManager::new(config(10, 40), noop_poll());
        manager.start();
        manager.start();
        assert!(manager.is_running());
        manager.shutdown().await;
    }
}
