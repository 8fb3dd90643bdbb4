//! Delay strategies between retry attempts.
//!
//! Attempt semantics: attempt index `0` is the initial call (no delay); the first retry asks for
//! `delay(1)`. Computations that would overflow saturate to [`MAX_BACKOFF`].
//!
//! ```rust
//! use std::time::Duration;
//! use ratehttp::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay(8), Duration::from_secs(1));
//! ```

use rand::Rng;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    MaxNotSupported,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Strategy {
    None,
    Constant(Duration),
    Linear { base: Duration, max: Option<Duration> },
    Exponential { base: Duration, max: Option<Duration> },
}

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    strategy: Strategy,
}

impl Backoff {
    /// Retry immediately.
    pub fn none() -> Self {
        Self { strategy: Strategy::None }
    }

    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { strategy: Strategy::Constant(delay) }
    }

    /// `base * attempt`.
    pub fn linear(base: Duration) -> Self {
        Self { strategy: Strategy::Linear { base, max: None } }
    }

    /// `base * 2^(attempt - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self { strategy: Strategy::Exponential { base, max: None } }
    }

    /// Cap a linear or exponential backoff.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.strategy {
            Strategy::Linear { base, max: cap } | Strategy::Exponential { base, max: cap } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *cap = Some(max);
                Ok(self)
            }
            Strategy::None | Strategy::Constant(_) => Err(BackoffError::MaxNotSupported),
        }
    }

    /// Delay before attempt `attempt` (0 = initial call, always zero).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match &self.strategy {
            Strategy::None => Duration::ZERO,
            Strategy::Constant(delay) => *delay,
            Strategy::Linear { base, max } => {
                let factor = attempt.min(u32::MAX as usize) as u32;
                let linear = base.checked_mul(factor).unwrap_or(MAX_BACKOFF);
                max.map_or(linear, |m| linear.min(m))
            }
            Strategy::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let exp = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                max.map_or(exp, |m| exp.min(m))
            }
        };
        raw.min(MAX_BACKOFF)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::constant(Duration::from_secs(1))
    }
}

/// Randomization applied on top of a backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Use the backoff delay as is
    #[default]
    None,
    /// Uniform in `[0, delay]`
    Full,
    /// Uniform in `[delay / 2, delay]`
    Equal,
}

impl Jitter {
    /// Apply jitter using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            _ if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}
