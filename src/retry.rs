//! Retry policy for request attempts.
//!
//! Semantics:
//! - `max_retries` counts extra attempts after the first; a request is tried at most
//!   `max_retries + 1` times.
//! - Every failed attempt is eligible for retry. Classification of "failure" belongs to the user
//!   function: an `Err` is a failure, an `Ok` is a success.
//! - The delay before retry `n` (1-based) is `backoff.delay(n)` with jitter applied.
//! - The policy only decides; the dispatcher re-enters the rate and connection gates for every
//!   retry, so retries never bypass either limit.
//!
//! ```rust
//! use std::time::Duration;
//! use ratehttp::{Backoff, RetryPolicy, Verdict};
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .backoff(Backoff::exponential(Duration::from_millis(100)))
//!     .build();
//!
//! let first: Result<(), &str> = Err("nope");
//! assert!(matches!(
//!     policy.verdict(0, first),
//!     Verdict::Retry { delay, .. } if delay == Duration::from_millis(100)
//! ));
//! assert!(matches!(policy.verdict(2, Err::<(), _>("nope")), Verdict::Exhausted(_)));
//! ```

use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;

/// What to do after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T, E> {
    /// The attempt succeeded; record the value.
    Success(T),
    /// The attempt failed and another one is allowed after `delay`.
    Retry { error: E, delay: Duration },
    /// The attempt failed and no retries are left; `E` is terminal.
    Exhausted(E),
}

/// Retry policy combining a retry budget, backoff, jitter, and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::new().build()
    }
}

impl RetryPolicy {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// A single attempt, no retries.
    pub fn never() -> Self {
        RetryPolicyBuilder::new().max_retries(0).build()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Upper bound on attempts per request, initial try included.
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Decide what follows attempt `attempt` (0-based) given its result.
    pub fn verdict<T, E>(&self, attempt: usize, result: Result<T, E>) -> Verdict<T, E> {
        match result {
            Ok(value) => Verdict::Success(value),
            Err(error) if attempt < self.max_retries => {
                Verdict::Retry { error, delay: self.delay_before(attempt + 1) }
            }
            Err(error) => Verdict::Exhausted(error),
        }
    }

    /// Jittered delay before attempt `attempt` (1 = first retry).
    pub fn delay_before(&self, attempt: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }

    /// Wait out a retry delay using the configured sleeper.
    pub async fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    /// Three retries, one second apart, no jitter, sleeping on tokio.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Extra attempts after the first.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub(crate) fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
