use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::CoreError;

/// Monotonic request counters for one [`ResilientClient`](crate::ResilientClient).
#[derive(Debug, Default)]
pub struct ResilienceMetrics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    circuit_trips: AtomicU64,
}

/// Immutable copy of [`ResilienceMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub circuit_breaker_trips: u64,
}

impl ResilienceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a terminal failure, classified by the error the resilience
    /// layers produced.
    pub fn record_failure(&self, err: &CoreError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        match err {
            CoreError::CircuitOpen { .. } => {
                self.circuit_trips.fetch_add(1, Ordering::Relaxed);
            }
            CoreError::RetryExhausted { .. } => {
                self.retried.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total.load(Ordering::Relaxed),
            successful_requests: self.successful.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            retried_requests: self.retried.load(Ordering::Relaxed),
            circuit_breaker_trips: self.circuit_trips.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;

    #[test]
    fn failures_are_classified() {
        let metrics = ResilienceMetrics::new();
        metrics.record_request();
        metrics.record_failure(&CoreError::CircuitOpen {
            state: CircuitState::Open,
        });
        metrics.record_request();
        metrics.record_failure(&CoreError::RetryExhausted {
            attempts: 3,
            last_error: Box::new(CoreError::Cancelled),
        });
        metrics.record_request();
        metrics.record_success();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                total_requests: 3,
                successful_requests: 1,
                failed_requests: 2,
                retried_requests: 1,
                circuit_breaker_trips: 1,
            }
        );
    }
}
