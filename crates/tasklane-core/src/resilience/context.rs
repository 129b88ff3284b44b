use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

/// Cancellation and deadline scope for one logical request.
///
/// Cloning shares the same token and deadline. [`child`](Self::child)
/// derives a scope that is cancelled with its parent but can also be
/// cancelled on its own.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// A context that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().child_with_timeout(timeout)
    }

    /// Wrap an existing token, e.g. one tied to Ctrl-C.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child scope whose deadline is the earlier of the parent's and
    /// `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = (Instant::now() + timeout, timeout);
        let deadline = match self.deadline {
            Some(parent) if parent.0 <= candidate.0 => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }

    /// Time left before the deadline, `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|(at, _)| at.saturating_duration_since(Instant::now()))
    }

    /// The error this context resolves to, if it is already done.
    pub fn error(&self) -> Option<CoreError> {
        if self.token.is_cancelled() {
            return Some(CoreError::Cancelled);
        }
        match self.deadline {
            Some((at, timeout)) if Instant::now() >= at => {
                Some(CoreError::DeadlineExceeded { timeout })
            }
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> CoreError {
        match self.deadline {
            Some((at, timeout)) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => CoreError::Cancelled,
                    () = tokio::time::sleep_until(at) => CoreError::DeadlineExceeded { timeout },
                }
            }
            None => {
                self.token.cancelled().await;
                CoreError::Cancelled
            }
        }
    }
}
