// ── Resilient client ──
//
// Retry executor around circuit breaker around transport. Every public
// call runs under its own timeout context and updates the shared counters.

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use tasklane_api::{Project, ProjectList, Task, TaskList, TaskQuery, TaskUpdate, Transport};

use crate::config::ResilienceConfig;
use crate::error::CoreError;
use crate::resilience::{
    CircuitBreaker, CircuitMetrics, CircuitState, MetricsSnapshot, RequestContext,
    ResilienceMetrics, RetryExecutor,
};

/// A [`Transport`] wrapped in retry, circuit breaking, and metrics.
///
/// Each retry attempt goes back through the breaker, so an Open circuit
/// fails every remaining attempt immediately. Errors come back as the
/// most specific cause: retry exhaustion is unwrapped to its last error
/// once it has been counted.
pub struct ResilientClient<T> {
    transport: T,
    config: ResilienceConfig,
    retry: RetryExecutor,
    breaker: ArcSwap<CircuitBreaker>,
    metrics: ArcSwap<ResilienceMetrics>,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, config: ResilienceConfig) -> Self {
        Self {
            transport,
            retry: RetryExecutor::new(config.retry.clone()),
            breaker: ArcSwap::from_pointee(CircuitBreaker::new(config.circuit_breaker.clone())),
            metrics: ArcSwap::from_pointee(ResilienceMetrics::new()),
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    // ── Operations ───────────────────────────────────────────────────

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskList, CoreError> {
        self.run("list_tasks", || self.transport.list_tasks(query))
            .await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, CoreError> {
        self.run("get_task", || self.transport.get_task(id)).await
    }

    pub async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task, CoreError> {
        self.run("update_task", || self.transport.update_task(id, update))
            .await
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), CoreError> {
        self.run("delete_task", || self.transport.delete_task(id))
            .await
    }

    pub async fn list_projects(&self) -> Result<ProjectList, CoreError> {
        self.run("list_projects", || self.transport.list_projects())
            .await
    }

    pub async fn get_project(&self, id: &str) -> Result<Project, CoreError> {
        self.run("get_project", || self.transport.get_project(id))
            .await
    }

    pub async fn health_check(&self) -> Result<(), CoreError> {
        self.run("health_check", || self.transport.health_check())
            .await
    }

    // ── Observability ────────────────────────────────────────────────

    /// `true` while the circuit is Closed.
    pub fn is_healthy(&self) -> bool {
        self.breaker.load().state() == CircuitState::Closed
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.load().state()
    }

    pub fn circuit_metrics(&self) -> CircuitMetrics {
        self.breaker.load().metrics()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.load().snapshot()
    }

    /// Replace the breaker and counters with fresh ones. Calls already in
    /// flight finish against the old instances.
    pub fn reset(&self) {
        self.breaker
            .store(Arc::new(CircuitBreaker::new(self.config.circuit_breaker.clone())));
        self.metrics.store(Arc::new(ResilienceMetrics::new()));
        debug!("resilience state reset");
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    async fn run<R, F, Fut>(&self, operation: &'static str, call: F) -> Result<R, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R, tasklane_api::Error>>,
    {
        let metrics = self.metrics.load_full();
        metrics.record_request();

        let result = if self.config.enabled {
            let ctx = RequestContext::with_timeout(self.config.request_timeout);
            let breaker = self.breaker.load_full();
            self.retry
                .execute(&ctx, || {
                    breaker.call(|| async { call().await.map_err(CoreError::from) })
                })
                .await
        } else {
            call().await.map_err(CoreError::from)
        };

        match result {
            Ok(value) => {
                metrics.record_success();
                Ok(value)
            }
            Err(err) => {
                metrics.record_failure(&err);
                warn!(operation, error = %err, "request failed");
                Err(err.into_root())
            }
        }
    }
}
