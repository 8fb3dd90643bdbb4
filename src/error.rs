//! Error types for batch execution
use crate::backoff::BackoffError;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Cap the number of stored failures inside a [`RequestError`] to avoid unbounded growth.
pub const MAX_RECORDED_FAILURES: usize = 10;

/// Rejected client configuration. Raised before any request executes.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The connection gate needs at least one slot.
    #[error("connections must be >= 1 (got {0})")]
    InvalidConnections(usize),
    /// The rate window is not one of `sec`, `min`, `hour`.
    #[error("unknown resolution `{0}`; expected one of sec, min, hour")]
    InvalidResolution(String),
    /// A per-attempt timeout of zero would fail every attempt.
    #[error("attempt timeout must be non-zero")]
    ZeroTimeout,
    /// Backoff bounds are inconsistent.
    #[error(transparent)]
    Backoff(#[from] BackoffError),
    /// The configuration document could not be parsed.
    #[error("invalid client config: {0}")]
    Parse(#[from] serde_json::Error),
    /// The HTTP transport could not be constructed.
    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failure of a single attempt. Every variant is eligible for retry.
#[derive(Debug, Clone)]
pub enum AttemptError<E> {
    /// The attempt exceeded the per-attempt timeout
    Timeout { elapsed: Duration, timeout: Duration },
    /// The user function returned an error
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "attempt timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AttemptError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Timeout { .. } => None,
        }
    }
}

impl<E> AttemptError<E> {
    /// Check if this attempt ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Borrow the user function's error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Timeout { .. } => None,
        }
    }

    /// Get the user function's error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Timeout { .. } => None,
        }
    }
}

/// Terminal failure of one request, after its retries ran out.
///
/// Holds the position of the request in its batch, the number of attempts made, and the most
/// recent attempt failures (at most [`MAX_RECORDED_FAILURES`], oldest dropped first). There is
/// always at least one recorded failure.
#[derive(Debug)]
pub struct RequestError<E> {
    position: usize,
    attempts: usize,
    failures: Arc<Vec<AttemptError<E>>>,
}

impl<E> Clone for RequestError<E> {
    fn clone(&self) -> Self {
        Self { position: self.position, attempts: self.attempts, failures: self.failures.clone() }
    }
}

impl<E> RequestError<E> {
    pub(crate) fn new(position: usize, attempts: usize, failures: VecDeque<AttemptError<E>>) -> Self {
        debug_assert!(!failures.is_empty(), "terminal failure without a recorded error");
        let skip = failures.len().saturating_sub(MAX_RECORDED_FAILURES);
        let failures = failures.into_iter().skip(skip).collect();
        Self { position, attempts, failures: Arc::new(failures) }
    }

    /// Position of the failed request in its batch.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Total attempts made, initial try included.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Recorded failures, oldest first.
    pub fn failures(&self) -> &[AttemptError<E>] {
        self.failures.as_slice()
    }

    /// The failure that made this request terminal.
    pub fn last(&self) -> Option<&AttemptError<E>> {
        self.failures.last()
    }

    /// The user function's error from the final attempt, if it did not time out.
    pub fn last_inner(&self) -> Option<&E> {
        self.last().and_then(AttemptError::as_inner)
    }
}

impl<E: fmt::Display> fmt::Display for RequestError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.last() {
            Some(last) => write!(
                f,
                "request {} failed after {} attempts; last error: {}",
                self.position, self.attempts, last
            ),
            None => write!(f, "request {} failed after {} attempts", self.position, self.attempts),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RequestError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures.last().map(|e| e as &dyn std::error::Error)
    }
}
