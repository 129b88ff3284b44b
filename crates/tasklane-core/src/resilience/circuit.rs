//! Three-state circuit breaker.
//!
//! ```text
//!   Closed ──(failures ≥ failure_threshold)──▶ Open
//!     ▲                                         │
//!     │                                  timeout elapsed,
//!     │                                  next call admitted
//!     │                                         ▼
//!     └──(successes ≥ success_threshold)── HalfOpen
//!                                               │
//!                       any failure ──▶ Open ◀──┘
//! ```
//!
//! A call is split into three steps so the lock is never held while the
//! operation runs:
//!
//! 1. **decide**: under the lock, reject or admit and hand out a [`Permit`]
//!    stamped with the current state generation
//! 2. **execute**: run the operation unlocked
//! 3. **record**: under the lock, apply the outcome only if the generation
//!    still matches
//!
//! Every transition bumps the generation, so outcomes of calls admitted
//! before a transition update timestamps but never drive the state machine.
//!
//! A call dropped between decide and record, such as one abandoned at its
//! deadline, is recorded as a failure.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::CoreError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of the breaker for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Admission ticket returned by [`CircuitBreaker::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an admitted call must be recorded"]
pub struct Permit {
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { retry_at: Instant },
    HalfOpen,
}

impl Phase {
    fn state(self) -> CircuitState {
        match self {
            Self::Closed => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    phase: Phase,
    failure_count: u32,
    success_count: u32,
    generation: u64,
    last_failure: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                phase: Phase::Closed,
                failure_count: 0,
                success_count: 0,
                generation: 0,
                last_failure: None,
                last_attempt: None,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker.
    ///
    /// Returns [`CoreError::CircuitOpen`] without invoking `op` while the
    /// circuit is Open and its timeout has not elapsed.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let in_flight = InFlight {
            breaker: self,
            permit: Some(self.decide()?),
        };
        let result = op().await;
        in_flight.finish(result.is_ok());
        result
    }

    /// Admit or reject one call. Moves Open to HalfOpen once the timeout
    /// has elapsed.
    pub fn decide(&self) -> Result<Permit, CoreError> {
        let mut st = self.lock();
        st.last_attempt = Some(Utc::now());

        match st.phase {
            Phase::Closed | Phase::HalfOpen => {}
            Phase::Open { retry_at } if Instant::now() < retry_at => {
                return Err(CoreError::CircuitOpen {
                    state: CircuitState::Open,
                });
            }
            Phase::Open { .. } => {
                st.phase = Phase::HalfOpen;
                st.success_count = 0;
                st.generation += 1;
                info!("circuit breaker half-open, admitting trial call");
            }
        }

        Ok(Permit {
            generation: st.generation,
        })
    }

    /// Apply the outcome of an admitted call.
    pub fn record(&self, permit: Permit, success: bool) {
        let mut st = self.lock();
        if !success {
            st.last_failure = Some(Utc::now());
        }

        if permit.generation != st.generation {
            debug!(
                permit = permit.generation,
                current = st.generation,
                success,
                "ignoring outcome from an earlier circuit state"
            );
            return;
        }

        match (st.phase, success) {
            (Phase::Closed, true) => st.failure_count = 0,
            (Phase::Closed, false) => {
                st.failure_count += 1;
                if st.failure_count >= self.config.failure_threshold {
                    self.trip(&mut st);
                }
            }
            (Phase::HalfOpen, true) => {
                st.success_count += 1;
                if st.success_count >= self.config.success_threshold {
                    st.phase = Phase::Closed;
                    st.failure_count = 0;
                    st.success_count = 0;
                    st.generation += 1;
                    info!("circuit breaker closed, service recovered");
                }
            }
            (Phase::HalfOpen, false) => self.trip(&mut st),
            // Opening bumps the generation, so no live permit sees Open.
            (Phase::Open { .. }, _) => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().phase.state()
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let st = self.lock();
        CircuitMetrics {
            state: st.phase.state(),
            failure_count: st.failure_count,
            success_count: st.success_count,
            last_failure: st.last_failure,
            last_attempt: st.last_attempt,
        }
    }

    fn trip(&self, st: &mut BreakerState) {
        warn!(
            failures = st.failure_count,
            timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
            "circuit breaker opened"
        );
        st.phase = Phase::Open {
            retry_at: Instant::now() + self.config.timeout,
        };
        st.success_count = 0;
        st.generation += 1;
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admitted call whose outcome is still pending. Dropping it unfinished
/// records a failure.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl InFlight<'_> {
    fn finish(mut self, success: bool) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record(permit, success);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            debug!("call dropped before completing, recording failure");
            self.breaker.record(permit, false);
        }
    }
}
