//! Shared plumbing for external service providers.
//!
//! Both the embedding and generation backends talk to HTTP services with the
//! same failure modes, so the classification and retry loop live here.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors and timeouts → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Backoff: `base_delay × 2^(attempt-1)`, capped at `max_delay`

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Failure reported by a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("missing credentials: environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("provider is disabled")]
    Disabled,
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Unavailable(_)
        )
    }
}

/// Capped exponential backoff with a bounded retry count.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// The last error after retries ran out (or a non-transient failure).
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub last: ProviderError,
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    call = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient provider failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(Exhausted {
                    attempts: attempt,
                    last: e,
                })
            }
        }
    }
}

/// Read an API key from the environment variable named in config.
pub fn api_key_from_env(var: &str) -> Result<String, ProviderError> {
    std::env::var(var).map_err(|_| ProviderError::MissingCredentials(var.to_string()))
}

/// Map a non-success HTTP status and body to a [`ProviderError`].
pub fn classify_status(service: &str, status: u16, body: &str) -> ProviderError {
    let msg = format!("{} API error {}: {}", service, status, body);
    if status == 429 {
        return ProviderError::RateLimited(msg);
    }
    if status >= 500 {
        return ProviderError::Unavailable(msg);
    }
    let lower = body.to_lowercase();
    if lower.contains("context_length") || lower.contains("maximum context length") {
        return ProviderError::ContextLengthExceeded(msg);
    }
    ProviderError::Rejected(msg)
}

/// POST a JSON body once and return the parsed JSON response.
pub async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let mut req = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    if let Some(key) = bearer {
        req = req.header("Authorization", format!("Bearer {}", key));
    }

    let response = req
        .send()
        .await
        .map_err(|e| {
            ProviderError::Unavailable(format!("{} connection error ({}): {}", service, url, e))
        })?;

    let status = response.status();
    if status.is_success() {
        return response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", service, e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    Err(classify_status(service, status.as_u16(), &body_text))
}

/// Build an HTTP client with the configured request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {}", e)))
}
