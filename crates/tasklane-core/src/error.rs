// ── Core error types ──
//
// Errors surfaced by the resilience layer. Transport failures pass through
// unchanged inside `Api`; the remaining variants describe decisions the
// resilience engine made on the caller's behalf.

use std::time::Duration;

use thiserror::Error;

use crate::resilience::CircuitState;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport ────────────────────────────────────────────────────
    #[error(transparent)]
    Api(#[from] tasklane_api::Error),

    // ── Resilience decisions ─────────────────────────────────────────
    /// The circuit breaker rejected the call without running it.
    #[error("circuit breaker is {state}, request rejected")]
    CircuitOpen { state: CircuitState },

    /// Every allowed attempt failed with a retryable error.
    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<CoreError>,
    },

    // ── Context ──────────────────────────────────────────────────────
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded after {}ms", timeout.as_millis())]
    DeadlineExceeded { timeout: Duration },
}

impl CoreError {
    /// The underlying transport error, looking through retry wrappers.
    pub fn api(&self) -> Option<&tasklane_api::Error> {
        match self {
            Self::Api(e) => Some(e),
            Self::RetryExhausted { last_error, .. } => last_error.api(),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// `true` for cancellation and deadline errors.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded { .. })
    }

    /// Unwrap retry exhaustion to the most specific error it carries.
    pub fn into_root(self) -> Self {
        match self {
            Self::RetryExhausted { last_error, .. } => last_error.into_root(),
            other => other,
        }
    }
}
