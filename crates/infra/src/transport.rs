//! HTTP transport
//!
//! Every outbound call goes through here: request shaping (credential and
//! SDK headers, signature headers on mutating requests), circuit-breaker
//! gating, jittered exponential retries for recoverable failures, status
//! mapping into the error taxonomy, and usage-telemetry extraction from
//! response headers.

use std::sync::Arc;
use std::time::Duration;

use flagkit_common::crypto::create_request_signature;
use flagkit_common::resilience::{CircuitBreaker, SystemClock};
use flagkit_core::CredentialManager;
use flagkit_domain::{
    ErrorClassification, FlagKitError, Result, SubscriptionStatus, UsageTelemetry,
};
use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// SDK version reported on every request.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

// Outbound headers.
pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_SDK_VERSION: &str = "x-sdk-version";
pub const HEADER_SDK_LANGUAGE: &str = "x-sdk-language";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_SIGNATURE_TIMESTAMP: &str = "x-signature-timestamp";
pub const HEADER_KEY_ID: &str = "x-key-id";

// Inbound telemetry headers, all optional.
pub const HEADER_API_USAGE: &str = "x-api-usage";
pub const HEADER_EVAL_USAGE: &str = "x-eval-usage";
pub const HEADER_RATE_LIMIT_WARNING: &str = "x-rate-limit-warning";
pub const HEADER_SUBSCRIPTION_STATUS: &str = "x-subscription-status";

/// Callback receiving the telemetry record extracted from a response.
pub type TelemetryConsumer = Arc<dyn Fn(UsageTelemetry) + Send + Sync>;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL all paths are relative to.
    pub base_url: String,
    /// Per-call timeout applied uniformly to connect, read and write.
    pub timeout: Duration,
    /// Total attempts per request.
    pub max_retries: u32,
    /// First backoff delay.
    pub base_delay: Duration,
    /// Backoff growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Backoff ceiling before jitter.
    pub max_delay: Duration,
    /// Attach signature headers to mutating requests.
    pub enable_signing: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.flagkit.io/v1".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            enable_signing: true,
        }
    }
}

/// Response triple handed back to callers.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    pub telemetry: Option<UsageTelemetry>,
}

impl TransportResponse {
    /// Deserialize the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| FlagKitError::Internal(format!("response parse failed: {e}")))
    }
}

/// Resilient HTTP client for the FlagKit service.
pub struct HttpTransport {
    http: reqwest::Client,
    config: TransportConfig,
    credentials: Arc<CredentialManager>,
    breaker: Arc<CircuitBreaker>,
    telemetry_consumer: Option<TelemetryConsumer>,
}

impl HttpTransport {
    /// Build a transport over the given credentials and breaker.
    pub fn new(
        config: TransportConfig,
        credentials: Arc<CredentialManager>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| FlagKitError::ConfigInvalid(format!("http client: {e}")))?;
        Ok(Self { http, config, credentials, breaker, telemetry_consumer: None })
    }

    /// Attach a consumer for usage telemetry extracted from responses.
    pub fn with_telemetry_consumer(mut self, consumer: TelemetryConsumer) -> Self {
        self.telemetry_consumer = Some(consumer);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// GET a path relative to the base URL.
    pub async fn get(&self, path: &str) -> Result<TransportResponse> {
        self.execute(Method::GET, path, None).await
    }

    /// POST a JSON body to a path relative to the base URL.
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<TransportResponse> {
        let body = serde_json::to_string(body)
            .map_err(|e| FlagKitError::Internal(format!("body serialize failed: {e}")))?;
        self.execute(Method::POST, path, Some(body)).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<TransportResponse> {
        let attempts = self.config.max_retries.max(1);

        for attempt in 1..=attempts {
            match self.attempt(&method, path, body.as_deref()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        %method, path, attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after recoverable failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(%method, path, attempts, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }

        // attempts >= 1, so the loop always returns; this is the backstop.
        Err(FlagKitError::RetryLimit { attempts })
    }

    async fn attempt(
        &self,
        method: &Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<TransportResponse> {
        if !self.breaker.allow() {
            return Err(FlagKitError::CircuitOpen);
        }

        let url = format!("{}{}", self.config.base_url, path);
        let credential = self.credentials.current();

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(HEADER_API_KEY, &credential)
            .header(USER_AGENT, format!("flagkit-rust/{SDK_VERSION}"))
            .header(HEADER_SDK_VERSION, SDK_VERSION)
            .header(HEADER_SDK_LANGUAGE, "rust")
            .header(ACCEPT, "application/json");

        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json");
            if self.config.enable_signing && !body.is_empty() {
                let signature = create_request_signature(body, &credential, &SystemClock);
                request = request
                    .header(HEADER_SIGNATURE, signature.signature)
                    .header(HEADER_SIGNATURE_TIMESTAMP, signature.timestamp.to_string())
                    .header(HEADER_KEY_ID, signature.key_id);
            }
            request = request.body(body.to_string());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                self.breaker.record_failure();
                return Err(self.map_reqwest_error(err));
            }
        };

        let status = response.status().as_u16();
        let telemetry = extract_telemetry(response.headers());
        if let (Some(consumer), Some(telemetry)) = (&self.telemetry_consumer, &telemetry) {
            consumer(telemetry.clone());
        }
        let body = response.text().await.unwrap_or_default();

        if (200..300).contains(&status) {
            self.breaker.record_success();
            return Ok(TransportResponse { status, body, telemetry });
        }

        self.breaker.record_failure();
        Err(self.map_status(status, body))
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> FlagKitError {
        if err.is_timeout() {
            FlagKitError::Timeout(self.config.timeout)
        } else {
            FlagKitError::network(err)
        }
    }

    fn map_status(&self, status: u16, body: String) -> FlagKitError {
        match status {
            401 => {
                // Failover is the transport's job; surfacing the auth error
                // is the caller's.
                let switched = self.credentials.on_auth_rejection();
                FlagKitError::AuthInvalid(if switched {
                    "credential rejected, failed over to secondary".to_string()
                } else {
                    "credential rejected".to_string()
                })
            }
            403 => FlagKitError::Forbidden(truncate(&body)),
            404 => FlagKitError::FlagNotFound(truncate(&body)),
            429 => FlagKitError::RateLimited,
            500..=599 => FlagKitError::ServerStatus { status },
            _ => FlagKitError::HttpStatus { status, message: truncate(&body) },
        }
    }

    /// `min(base · multiplierᵃᵗᵗᵉᵐᵖᵗ⁻¹, max) + U(0, 0.1·delay)`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64;
        let exp = base * self.config.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.config.max_delay.as_millis() as f64);
        let jitter = rand::thread_rng().gen_range(0.0..=0.1) * capped;
        Duration::from_millis((capped + jitter) as u64)
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let cut = body.char_indices().take_while(|(i, _)| *i < MAX).map(|(i, c)| i + c.len_utf8());
        let end = cut.last().unwrap_or(0);
        format!("{}…", &body[..end])
    }
}

fn extract_telemetry(headers: &HeaderMap) -> Option<UsageTelemetry> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let telemetry = UsageTelemetry {
        api_usage_percent: header(HEADER_API_USAGE).and_then(|v| v.parse().ok()),
        eval_usage_percent: header(HEADER_EVAL_USAGE).and_then(|v| v.parse().ok()),
        rate_limit_warning: header(HEADER_RATE_LIMIT_WARNING)
            .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        subscription_status: header(HEADER_SUBSCRIPTION_STATUS)
            .and_then(|v| v.parse::<SubscriptionStatus>().ok()),
    };

    if telemetry.is_empty() {
        None
    } else {
        Some(telemetry)
    }
}
