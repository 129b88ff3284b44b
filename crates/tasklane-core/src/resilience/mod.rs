//! Request-path resilience: circuit breaker, retry executor, cancellation
//! context, and counters.

mod circuit;
mod context;
mod metrics;
mod retry;

pub use circuit::{CircuitBreaker, CircuitMetrics, CircuitState, Permit};
pub use context::RequestContext;
pub use metrics::{MetricsSnapshot, ResilienceMetrics};
pub use retry::RetryExecutor;
