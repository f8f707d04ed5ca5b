//! Client facade
//!
//! `FlagKitClient` wires the store, evaluator, credentials, transport,
//! polling, streaming and event queue into one handle. Evaluation is
//! synchronous and local; freshness is maintained by the background workers.
//! Initialization failures still mark the client ready — bootstrap, cache
//! and defaults keep answering — while the error is surfaced to the caller
//! and `on_error`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flagkit_common::crypto::SnapshotCipher;
use flagkit_common::privacy::sanitize_message;
use flagkit_common::resilience::{CircuitBreaker, SystemClock};
use flagkit_core::{verify_bootstrap, CredentialManager, Evaluator, FlagStore};
use flagkit_domain::{
    ErrorClassification, ErrorSeverity, EvaluationContext, EvaluationResult, FlagKitConfig,
    FlagKitError, FlagState, FlagType, FlagValue, Result, UsageTelemetry,
};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::events::{EventQueue, EventQueueConfig};
use crate::polling::{PollFn, PollingConfig, PollingManager};
use crate::streaming::{
    stream_error_to_flagkit, StreamState, StreamingCallbacks, StreamingConfig, StreamingManager,
};
use crate::transport::{HttpTransport, TransportConfig};

/// Consumer-supplied hooks. All of them are invoked from worker threads and
/// must not block long.
#[derive(Clone, Default)]
pub struct ClientCallbacks {
    pub on_ready: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(FlagKitError) + Send + Sync>>,
    pub on_update: Option<Arc<dyn Fn(Vec<FlagState>) + Send + Sync>>,
    pub on_usage_update: Option<Arc<dyn Fn(UsageTelemetry) + Send + Sync>>,
    pub on_subscription_error: Option<Arc<dyn Fn(String) + Send + Sync>>,
    pub on_connection_limit: Option<Arc<dyn Fn() + Send + Sync>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    #[serde(default)]
    flags: Vec<FlagState>,
    environment_id: Option<String>,
    server_time: Option<String>,
    polling_interval_seconds: Option<u64>,
    metadata: Option<SdkMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SdkMetadata {
    #[allow(dead_code)]
    sdk_version_min: Option<String>,
    #[allow(dead_code)]
    sdk_version_recommended: Option<String>,
    #[allow(dead_code)]
    sdk_version_latest: Option<String>,
    deprecation_warning: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatesResponse {
    #[serde(default)]
    flags: Vec<FlagState>,
    checked_at: Option<String>,
}

/// The FlagKit SDK client.
///
/// Fully instantiable: multiple independent clients are simultaneously
/// safe. Process-wide singleton accessors, if wanted, belong to the binding
/// layer.
pub struct FlagKitClient {
    config: FlagKitConfig,
    callbacks: ClientCallbacks,
    store: Arc<FlagStore>,
    evaluator: Evaluator<SystemClock>,
    transport: Arc<HttpTransport>,
    events: Arc<EventQueue>,
    polling: Mutex<Option<Arc<PollingManager>>>,
    streaming: Mutex<Option<Arc<StreamingManager>>>,
    cipher: Option<SnapshotCipher>,
    global_context: Mutex<Option<EvaluationContext>>,
    last_update: Mutex<Option<String>>,
    server_interval: Mutex<Option<Duration>>,
    ready_tx: watch::Sender<bool>,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for FlagKitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagKitClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FlagKitClient {
    /// Validate the configuration and assemble the client. No network I/O
    /// happens here; call [`FlagKitClient::initialize`] next.
    pub fn new(config: FlagKitConfig, callbacks: ClientCallbacks) -> Result<Arc<Self>> {
        config.validate()?;

        let credentials = Arc::new(CredentialManager::new(
            config.api_key.clone(),
            config.secondary_api_key.clone(),
        )?);
        let breaker = Arc::new(CircuitBreaker::with_defaults());

        let transport_config = TransportConfig {
            base_url: config.base_url.clone(),
            timeout: config.timeout,
            max_retries: config.retries,
            enable_signing: config.enable_request_signing,
            ..TransportConfig::default()
        };
        let mut transport = HttpTransport::new(transport_config, credentials, breaker)?;
        if let Some(on_usage) = callbacks.on_usage_update.clone() {
            transport = transport.with_telemetry_consumer(on_usage);
        }
        let transport = Arc::new(transport);

        let store = Arc::new(FlagStore::new(config.max_cache_size));
        let evaluator =
            Evaluator::new(Arc::clone(&store), config.evaluation_jitter.clone());
        evaluator.seed_bootstrap(Self::resolve_bootstrap(&config)?);

        let events = Arc::new(EventQueue::new(
            EventQueueConfig::default(),
            Arc::clone(&transport),
        ));

        let cipher = if config.enable_cache_encryption {
            let key = match &config.cache_encryption_key {
                Some(key) => key.clone(),
                None => SnapshotCipher::generate_key().to_vec(),
            };
            Some(
                SnapshotCipher::new(&key)
                    .map_err(|e| FlagKitError::EncryptionFailed(e.to_string()))?,
            )
        } else {
            None
        };

        let (ready_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            callbacks,
            store,
            evaluator,
            transport,
            events,
            polling: Mutex::new(None),
            streaming: Mutex::new(None),
            cipher,
            global_context: Mutex::new(None),
            last_update: Mutex::new(None),
            server_interval: Mutex::new(None),
            ready_tx,
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Merge the unsigned seed mapping with the verified signed payload.
    /// Signed values win; a rejected signed payload contributes nothing.
    fn resolve_bootstrap(config: &FlagKitConfig) -> Result<HashMap<String, FlagValue>> {
        let mut flags: HashMap<String, FlagValue> = config
            .bootstrap
            .iter()
            .map(|(key, value)| (key.clone(), FlagValue::from(value.clone())))
            .collect();

        if let Some(bootstrap) = &config.bootstrap_config {
            let trusted = verify_bootstrap(
                bootstrap,
                &config.api_key,
                &config.bootstrap_verification,
                &SystemClock,
            )?;
            if trusted {
                for (key, value) in &bootstrap.flags {
                    flags.insert(key.clone(), FlagValue::from(value.clone()));
                }
            }
        }
        Ok(flags)
    }

    /// Connect to the service and start the freshness workers.
    ///
    /// Offline clients skip the network and are ready immediately. A failed
    /// initial fetch still marks the client ready — evaluation falls back to
    /// bootstrap, cache and defaults — and the error is both returned and
    /// reported through `on_error`.
    #[instrument(skip(self))]
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.config.offline {
            info!("offline mode, skipping network initialization");
            self.mark_ready();
            return Ok(());
        }

        self.events.start();

        if !self.config.cache_enabled {
            // Nothing retains flag state without the cache; evaluation runs
            // on bootstrap and defaults alone.
            debug!("cache disabled, skipping refresh pipeline");
            self.mark_ready();
            return Ok(());
        }

        let first_fetch = self.refresh().await;

        if self.config.enable_polling {
            self.ensure_polling();
        }
        if self.config.enable_streaming {
            self.start_streaming();
        }
        self.mark_ready();

        if let Err(err) = first_fetch {
            self.report_error(&err);
            return Err(FlagKitError::InitFailed(err.to_string()));
        }
        Ok(())
    }

    /// Block until the client is ready, up to `timeout`. Returns whether
    /// readiness was observed.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready_tx.subscribe();
        if *ready.borrow() {
            return true;
        }
        tokio::time::timeout(timeout, async move {
            while ready.changed().await.is_ok() {
                if *ready.borrow() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Evaluate a flag with a default.
    pub fn evaluate(&self, key: &str, default: impl Into<FlagValue>) -> EvaluationResult {
        self.evaluate_detail(key, default.into(), None, None)
    }

    /// Evaluate with an expected type and per-call context.
    pub fn evaluate_detail(
        &self,
        key: &str,
        default: FlagValue,
        expected_type: Option<FlagType>,
        context: Option<&EvaluationContext>,
    ) -> EvaluationResult {
        let merged: Option<EvaluationContext> =
            match (self.global_context.lock().clone(), context) {
                (Some(global), Some(local)) => Some(global.merge(local)),
                (Some(global), None) => Some(global),
                (None, Some(local)) => Some(local.clone()),
                (None, None) => None,
            };

        let result = self.evaluator.evaluate(key, default, expected_type, merged.as_ref());

        if !self.config.offline && !self.shutdown.load(Ordering::Acquire) {
            let payload = json!({
                "flagKey": result.flag_key,
                "value": result.value,
                "reason": result.reason,
            });
            match &merged {
                Some(context) => self.events.track_with_context("evaluation", payload, context),
                None => self.events.track("evaluation", payload),
            }
        }
        result
    }

    /// Install a process-wide context merged under every per-call context.
    pub fn set_global_context(&self, context: EvaluationContext) {
        *self.global_context.lock() = Some(context);
    }

    pub fn clear_global_context(&self) {
        *self.global_context.lock() = None;
    }

    /// Enqueue a custom analytics event.
    pub fn track(&self, event_type: impl Into<String>, payload: serde_json::Value) {
        self.events.track(event_type, payload);
    }

    /// Force a refresh outside the polling schedule.
    pub async fn refresh_now(self: &Arc<Self>) -> Result<()> {
        self.refresh().await
    }

    /// Current streaming state, if streaming was started.
    pub fn stream_state(&self) -> Option<StreamState> {
        self.streaming.lock().as_ref().map(|manager| manager.state())
    }

    /// Store statistics.
    pub fn store_stats(&self) -> flagkit_core::StoreStats {
        self.store.stats()
    }

    /// Serialize the cached flag set, encrypted when snapshot encryption is
    /// enabled.
    pub fn export_snapshot(&self) -> Result<String> {
        let flags = self.store.all();
        let json = serde_json::to_string(&flags)
            .map_err(|e| FlagKitError::Internal(format!("snapshot serialize failed: {e}")))?;
        match &self.cipher {
            Some(cipher) => cipher
                .encrypt_to_string(json.as_bytes())
                .map_err(|e| FlagKitError::EncryptionFailed(e.to_string())),
            None => Ok(json),
        }
    }

    /// Load a snapshot produced by [`FlagKitClient::export_snapshot`].
    /// Returns the number of flags restored.
    pub fn restore_snapshot(&self, snapshot: &str) -> Result<usize> {
        let json = match &self.cipher {
            Some(cipher) => {
                let bytes = cipher
                    .decrypt_from_string(snapshot)
                    .map_err(|e| FlagKitError::EncryptionFailed(e.to_string()))?;
                String::from_utf8(bytes).map_err(|e| {
                    FlagKitError::EncryptionFailed(format!("snapshot not UTF-8: {e}"))
                })?
            }
            None => snapshot.to_string(),
        };
        let flags: Vec<FlagState> = serde_json::from_str(&json)
            .map_err(|e| FlagKitError::Internal(format!("snapshot parse failed: {e}")))?;
        let count = flags.len();
        self.store.set_many(flags, self.config.cache_ttl);
        Ok(count)
    }

    /// Shut the client down: stop polling, streaming and the event queue
    /// (with a final flush). Idempotent.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("closing client");

        let polling = self.polling.lock().take();
        if let Some(polling) = polling {
            polling.shutdown().await;
        }
        let streaming = self.streaming.lock().take();
        if let Some(streaming) = streaming {
            streaming.shutdown().await;
        }
        self.events.stop().await;
        info!("client closed");
    }

    // -- internals -----------------------------------------------------------

    async fn refresh(self: &Arc<Self>) -> Result<()> {
        let since = self.last_update.lock().clone();
        match since {
            None => self.fetch_init().await,
            Some(since) => self.fetch_updates(&since).await,
        }
    }

    async fn fetch_init(self: &Arc<Self>) -> Result<()> {
        let response = self.transport.get("/sdk/init").await?;
        let init: InitResponse = response.json()?;

        if let Some(environment_id) = init.environment_id {
            self.events.set_environment_id(environment_id);
        }
        if let Some(seconds) = init.polling_interval_seconds {
            *self.server_interval.lock() = Some(Duration::from_secs(seconds));
        }
        if let Some(warning) =
            init.metadata.and_then(|metadata| metadata.deprecation_warning)
        {
            warn!(%warning, "service deprecation notice");
        }
        if let Some(server_time) = init.server_time {
            *self.last_update.lock() = Some(server_time);
        }

        info!(count = init.flags.len(), "initial flag set fetched");
        self.apply_flags(init.flags);
        Ok(())
    }

    async fn fetch_updates(self: &Arc<Self>, since: &str) -> Result<()> {
        let path = format!("/sdk/updates?since={}", urlencoding::encode(since));
        let response = self.transport.get(&path).await?;
        let updates: UpdatesResponse = response.json()?;

        // The server value is opaque; carry it forward verbatim.
        if let Some(checked_at) = updates.checked_at {
            *self.last_update.lock() = Some(checked_at);
        }
        if !updates.flags.is_empty() {
            debug!(count = updates.flags.len(), "incremental flags fetched");
        }
        self.apply_flags(updates.flags);
        Ok(())
    }

    fn apply_flags(&self, flags: Vec<FlagState>) {
        if flags.is_empty() {
            return;
        }
        self.store.set_many(flags.clone(), self.config.cache_ttl);
        if let Some(on_update) = &self.callbacks.on_update {
            on_update(flags);
        }
    }

    /// Requested interval raised to the server-advertised one.
    fn effective_polling_interval(&self) -> Duration {
        let advertised = self.server_interval.lock().unwrap_or(Duration::ZERO);
        self.config.polling_interval.max(advertised)
    }

    /// Start the poller if it is not already running. Also the streaming
    /// fallback target, so it starts the poller even when polling was
    /// disabled in configuration.
    fn ensure_polling(self: &Arc<Self>) {
        let mut guard = self.polling.lock();
        if guard.as_ref().is_some_and(|manager| manager.is_running()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let on_poll: PollFn = Arc::new(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(client) => client.refresh().await,
                    None => Ok(()),
                }
            }
            .boxed()
        });

        let manager = Arc::new(PollingManager::new(
            PollingConfig {
                base_interval: self.effective_polling_interval(),
                ..PollingConfig::default()
            },
            on_poll,
        ));
        manager.start();
        *guard = Some(manager);
    }

    fn start_streaming(self: &Arc<Self>) {
        let mut guard = self.streaming.lock();
        if guard.is_some() {
            return;
        }

        let on_update = self.callbacks.on_update.clone();
        let subscription_weak = Arc::downgrade(self);
        let limit_weak = Arc::downgrade(self);
        let fallback_weak = Arc::downgrade(self);

        let callbacks = StreamingCallbacks {
            on_update,
            on_subscription_error: Some(Arc::new(move |message: String| {
                if let Some(client) = subscription_weak.upgrade() {
                    if let Some(on_subscription_error) = &client.callbacks.on_subscription_error {
                        on_subscription_error(message.clone());
                    }
                    client.report_error(&stream_error_to_flagkit(
                        "SUBSCRIPTION_SUSPENDED",
                        &message,
                    ));
                }
            })),
            on_connection_limit: Some(Arc::new(move || {
                if let Some(client) = limit_weak.upgrade() {
                    if let Some(on_connection_limit) = &client.callbacks.on_connection_limit {
                        on_connection_limit();
                    }
                    client.report_error(&stream_error_to_flagkit("CONNECTION_LIMIT", ""));
                }
            })),
            on_fallback_to_polling: Some(Arc::new(move || {
                if let Some(client) = fallback_weak.upgrade() {
                    info!("streaming stepped down, polling covers freshness");
                    client.ensure_polling();
                }
            })),
        };

        let manager = Arc::new(StreamingManager::new(
            Arc::clone(&self.transport),
            self.config.base_url.clone(),
            Arc::clone(&self.store),
            self.config.cache_ttl,
            StreamingConfig::default(),
            callbacks,
        ));
        manager.connect();
        *guard = Some(manager);
    }

    fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
        if let Some(on_ready) = &self.callbacks.on_ready {
            on_ready();
        }
    }

    fn report_error(&self, err: &FlagKitError) {
        let sanitized = sanitize_error(err);
        match sanitized.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                error!(error = %sanitized, "client error")
            }
            _ => warn!(error = %sanitized, "client error"),
        }
        if let Some(on_error) = &self.callbacks.on_error {
            on_error(sanitized);
        }
    }
}

/// Redact sensitive material from an error's message before it leaves the
/// SDK.
fn sanitize_error(err: &FlagKitError) -> FlagKitError {
    use FlagKitError as E;
    match err {
        E::InitFailed(m) => E::InitFailed(sanitize_message(m)),
        E::AuthInvalid(m) => E::AuthInvalid(sanitize_message(m)),
        E::AuthExpired(m) => E::AuthExpired(sanitize_message(m)),
        E::Forbidden(m) => E::Forbidden(sanitize_message(m)),
        E::Network(m) => E::Network(sanitize_message(m)),
        E::FlagNotFound(m) => E::FlagNotFound(sanitize_message(m)),
        E::CacheExpired(m) => E::CacheExpired(sanitize_message(m)),
        E::StaleCache(m) => E::StaleCache(sanitize_message(m)),
        E::EventSend(m) => E::EventSend(sanitize_message(m)),
        E::ConfigInvalid(m) => E::ConfigInvalid(sanitize_message(m)),
        E::SignatureInvalid(m) => E::SignatureInvalid(sanitize_message(m)),
        E::EncryptionFailed(m) => E::EncryptionFailed(sanitize_message(m)),
        E::BootstrapInvalid(m) => E::BootstrapInvalid(sanitize_message(m)),
        E::BootstrapExpired(m) => E::BootstrapExpired(sanitize_message(m)),
        E::SubscriptionSuspended(m) => E::SubscriptionSuspended(sanitize_message(m)),
        E::Stream(m) => E::Stream(sanitize_message(m)),
        E::Internal(m) => E::Internal(sanitize_message(m)),
        E::HttpStatus { status, message } => {
            E::HttpStatus { status: *status, message: sanitize_message(message) }
        }
        other => other.clone(),
    }
}
