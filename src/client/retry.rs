//! Retry loop around a single logical model call.
//!
//! One caller-visible `call` may issue several transport attempts: each
//! attempt takes a rate-limit slot, runs under the configured deadline,
//! and on a retryable failure backs off exponentially (with jitter)
//! before trying again. Non-retryable failures and exhausted budgets
//! surface the last classified error verbatim, never a generic message.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use super::classify::{classify, ErrorKind, TransportFailure};
use super::limiter::RateLimiter;

/// Raw model reply: zero or more text parts.
///
/// Zero parts is a valid (empty) success, not an error.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub parts: Vec<String>,
}

/// One shot at the wire. Implementations hold no retry logic; they report
/// failures as [`TransportFailure`] and let the client decide what to do.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, prompt: &str) -> Result<TransportResponse, TransportFailure>;
}

/// Tuning knobs for [`RetryingClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Credential for the upstream API. `None` (or empty) short-circuits
    /// every call with an authentication error before any network attempt.
    pub api_key: Option<String>,
    /// Model identifier passed through to the transport.
    pub model: String,
    /// Retries on top of the initial attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    /// Deadline applied to each individual transport attempt.
    pub base_timeout: Duration,
    /// First backoff delay; doubles per attempt.
    pub base_delay: Duration,
    /// Cap on the computed backoff delay.
    pub max_backoff: Duration,
    /// Rate-limit capacity per window.
    pub max_calls_per_window: usize,
    /// Rate-limit window duration.
    pub window: Duration,
    /// Release the rate-limit slot consumed by a failed retryable attempt
    /// before backing off, so retries are not double-charged.
    pub refund_on_retryable_failure: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            max_retries: 3,
            base_timeout: Duration::from_secs(30),
            base_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_calls_per_window: 10,
            window: Duration::from_secs(60),
            refund_on_retryable_failure: false,
        }
    }
}

/// Terminal outcome of one logical call, produced exactly once after all
/// internal retries are exhausted or a success occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub success: bool,
    pub text: String,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl CallResult {
    fn ok(text: String) -> Self {
        Self {
            success: true,
            text,
            error_kind: None,
            error_message: None,
        }
    }

    fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }

    /// Convert into a `Result` for callers that prefer `?` over field checks.
    pub fn into_result(self) -> Result<String, (ErrorKind, String)> {
        if self.success {
            Ok(self.text)
        } else {
            Err((
                self.error_kind.unwrap_or(ErrorKind::Unknown),
                self.error_message.unwrap_or_default(),
            ))
        }
    }
}

/// Read-only introspection surface, safe to print anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub has_api_key: bool,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub rate_limit: usize,
    pub window: Duration,
}

/// Wraps a [`Transport`] with rate limiting, bounded retries, and timeout
/// enforcement. Holds no file or session state; the network call is its
/// only side effect.
pub struct RetryingClient<T: Transport> {
    transport: T,
    config: ClientConfig,
    limiter: RateLimiter,
}

impl<T: Transport> RetryingClient<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let limiter = RateLimiter::new(config.max_calls_per_window, config.window);
        Self {
            transport,
            config,
            limiter,
        }
    }

    /// Issue one logical call, retrying transient failures internally.
    pub async fn call(&self, prompt: &str) -> CallResult {
        if self.config.api_key.as_deref().map_or(true, str::is_empty) {
            return CallResult::failed(ErrorKind::Authentication, "Invalid or missing API key");
        }

        let max_attempts = self.config.max_retries.saturating_add(1);
        for attempt in 0..max_attempts {
            self.limiter.acquire().await;

            let outcome =
                tokio::time::timeout(self.config.base_timeout, self.transport.send(prompt)).await;
            let failure = match outcome {
                Ok(Ok(response)) => {
                    debug!(attempt, parts = response.parts.len(), "call succeeded");
                    return CallResult::ok(response.parts.join("\n"));
                }
                Ok(Err(failure)) => failure,
                Err(_) => TransportFailure::Timeout,
            };

            let classified = classify(&failure, self.config.base_timeout);
            let attempts_left = max_attempts - attempt - 1;
            if !classified.retryable || attempts_left == 0 {
                warn!(
                    attempt,
                    kind = %classified.kind,
                    retryable = classified.retryable,
                    "call failed terminally: {}",
                    classified.message
                );
                return CallResult::failed(classified.kind, classified.message);
            }

            if self.config.refund_on_retryable_failure {
                self.limiter.refund().await;
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                attempt,
                kind = %classified.kind,
                delay_ms = delay.as_millis() as u64,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }

        // max_attempts >= 1, so the loop always returns before falling out.
        CallResult::failed(ErrorKind::Unknown, "no transport attempt was made")
    }

    /// Exponential backoff with jitter: base * 2^attempt, capped, then
    /// scaled by a random factor in [0.5, 1.5).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let raw = self.config.base_delay.saturating_mul(1u32 << exp);
        let capped = raw.min(self.config.max_backoff);
        capped.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            has_api_key: self.config.api_key.as_deref().is_some_and(|k| !k.is_empty()),
            model: self.config.model.clone(),
            timeout: self.config.base_timeout,
            max_retries: self.config.max_retries,
            rate_limit: self.config.max_calls_per_window,
            window: self.config.window,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
