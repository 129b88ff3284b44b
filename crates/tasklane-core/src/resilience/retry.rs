//! Exponential backoff with optional jitter.
//!
//! The delay before retry `n` (0-based) is
//! `min(base_delay × multiplier^n, max_delay)`. With jitter enabled up to
//! 10% is added on top, so a jittered delay may slightly exceed
//! `max_delay`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::context::RequestContext;
use crate::config::RetryConfig;
use crate::error::CoreError;

/// Message fragments treated as transient no matter how patterns are
/// configured.
const TRANSIENT_MESSAGES: [&str; 2] = ["network is unreachable", "timed out"];

const MAX_JITTER: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    patterns: Vec<String>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        let patterns = config
            .retryable_patterns
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();
        Self { config, patterns }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, the
    /// attempt budget is spent, or `ctx` is done.
    ///
    /// Each attempt races against `ctx`, so a hung operation ends at the
    /// deadline. Exhaustion returns [`CoreError::RetryExhausted`] carrying
    /// the last error; non-retryable errors are returned as they are.
    pub async fn execute<T, F, Fut>(&self, ctx: &RequestContext, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if let Some(err) = ctx.error() {
                return Err(err);
            }

            let outcome = tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                result = op() => result,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                debug!(error = %err, attempt = attempt + 1, "non-retryable error");
                return Err(err);
            }

            if attempt + 1 >= max_attempts {
                warn!(error = %err, attempts = max_attempts, "retry attempts exhausted");
                return Err(CoreError::RetryExhausted {
                    attempts: max_attempts,
                    last_error: Box::new(err),
                });
            }

            let delay = self.backoff(attempt);
            warn!(
                error = %err,
                attempt = attempt + 1,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retryable error, backing off"
            );

            tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Backoff before retry `attempt` (0-based), without jitter.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::as_conversions
    )]
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let max = self.config.max_delay;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.config.base_delay.as_nanos() as f64 * self.config.multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= max.as_nanos() as f64 {
            return max;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.compute_delay(attempt);
        if !self.config.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.0..=MAX_JITTER);
        delay + delay.mul_f64(factor)
    }

    /// Retryable when the message matches a configured pattern or the
    /// error is a recognized transient kind. Resilience and context
    /// decisions are final.
    pub fn is_retryable(&self, err: &CoreError) -> bool {
        match err {
            CoreError::CircuitOpen { .. }
            | CoreError::RetryExhausted { .. }
            | CoreError::Cancelled
            | CoreError::DeadlineExceeded { .. } => false,
            CoreError::Api(api) if api.is_transient() => true,
            CoreError::Api(_) => {
                let message = err.to_string().to_lowercase();
                TRANSIENT_MESSAGES.iter().any(|m| message.contains(m))
                    || self.patterns.iter().any(|p| message.contains(p.as_str()))
            }
        }
    }
}
