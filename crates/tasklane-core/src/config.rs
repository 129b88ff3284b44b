// ── Resilience tuning ──
//
// Plain runtime types. `tasklane-config` builds these from profile files;
// this crate never reads configuration from disk.

use std::time::Duration;

/// Gate thresholds for [`CircuitBreaker`](crate::resilience::CircuitBreaker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes in HalfOpen that close it again.
    pub success_threshold: u32,
    /// How long the circuit stays Open before admitting a trial call.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Backoff policy for [`RetryExecutor`](crate::resilience::RetryExecutor).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Add up to 10% random delay on top of each backoff step.
    pub jitter: bool,
    /// Case-insensitive substrings that mark an error message retryable.
    pub retryable_patterns: Vec<String>,
}

/// Message fragments of upstream conditions worth another attempt.
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "temporarily unavailable",
    "too many requests",
    "http 429",
    "http 502",
    "http 503",
    "http 504",
];

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
            retryable_patterns: DEFAULT_RETRYABLE_PATTERNS
                .iter()
                .map(|p| (*p).to_owned())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceConfig {
    /// When `false`, calls go straight to the transport.
    pub enabled: bool,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    /// Budget for one public call, retries and backoff included.
    pub request_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}
