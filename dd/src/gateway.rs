//! Text-generation gateway
//!
//! Wraps an [`LlmClient`] with bounded exponential backoff on rate limits and
//! a cap on concurrent provider calls. Every other error goes straight back
//! to the caller.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// Errors surfaced by the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Every attempt was rate limited
    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Generation failed: {0}")]
    Llm(LlmError),

    #[error("Provider returned no text")]
    EmptyResponse,

    #[error("Gateway closed")]
    Closed,
}

impl GatewayError {
    /// True when the failure was rate-limit exhaustion
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GatewayError::RateLimited { .. })
    }
}

/// Backoff schedule for rate-limited calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: f64,
    pub unit: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: config.backoff_base,
            unit: Duration::from_millis(config.backoff_unit_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay before the next try after the `attempt`-th (0-based) rate limit,
    /// without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.base.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.unit.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay with uniform jitter in `[0, jitter)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

/// Rate-limit aware front door for all generation calls
pub struct GenerationGateway {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
    permits: Semaphore,
}

impl GenerationGateway {
    pub fn new(client: Arc<dyn LlmClient>, config: &GatewayConfig) -> Self {
        debug!(?config, "GenerationGateway::new: called");
        Self {
            client,
            policy: RetryPolicy::from_config(config),
            permits: Semaphore::new(config.max_concurrent.max(1)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a completion, retrying rate limits up to `max_retries` times
    ///
    /// Makes at most `max_retries + 1` provider calls.
    pub async fn generate(&self, request: CompletionRequest) -> Result<String, GatewayError> {
        debug!(max_tokens = request.max_tokens, "generate: called");
        let mut attempt: u32 = 0;

        loop {
            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| GatewayError::Closed)?;
                self.client.complete(request.clone()).await
            };

            match result {
                Ok(response) => {
                    debug!(attempt, usage = response.usage.total(), "generate: success");
                    return match response.content {
                        Some(text) if !text.trim().is_empty() => Ok(text),
                        _ => Err(GatewayError::EmptyResponse),
                    };
                }
                Err(e) if e.is_rate_limit() => {
                    if attempt >= self.policy.max_retries {
                        warn!(attempts = attempt + 1, "generate: rate limit retries exhausted");
                        return Err(GatewayError::RateLimited { attempts: attempt + 1 });
                    }
                    let delay = self.policy.delay_for(attempt);
                    info!(attempt, ?delay, "generate: rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(error = %e, "generate: non-retryable failure");
                    return Err(GatewayError::Llm(e));
                }
            }
        }
    }
}
