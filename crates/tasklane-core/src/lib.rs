//! Resilience engine between `tasklane-api` and its consumers.
//!
//! - **[`ResilientClient`]**: wraps any [`Transport`](tasklane_api::Transport)
//!   in a [`RetryExecutor`] around a [`CircuitBreaker`], binds a per-call
//!   timeout, and keeps [`ResilienceMetrics`].
//!
//! - **[`CircuitBreaker`]**: Closed / Open / HalfOpen gate that fails fast
//!   while the service is persistently unhealthy. The lock covers the
//!   admission decision and the outcome, never the call itself.
//!
//! - **[`RetryExecutor`]**: exponential backoff with a ceiling and optional
//!   additive jitter, classifying errors by message pattern and transient
//!   kind.
//!
//! - **[`RequestContext`]**: cancellation token plus optional deadline,
//!   observed by the retry loop between and during attempts.

pub mod client;
pub mod config;
pub mod error;
pub mod resilience;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::ResilientClient;
pub use config::{CircuitBreakerConfig, ResilienceConfig, RetryConfig};
pub use error::CoreError;
pub use resilience::{
    CircuitBreaker, CircuitMetrics, CircuitState, MetricsSnapshot, RequestContext,
    ResilienceMetrics, RetryExecutor,
};
