//! Rate gate: at most `R` admissions per window `W`.
//!
//! - [`Resolution`]: the window length (`sec`, `min`, `hour`).
//! - [`Decision`]: the result of a non-blocking admission check.
//! - [`RateGate`]: the shared gate every attempt passes before it may start.
//!
//! Accounting is a sliding-window log (see [`window`]): there is no fixed-window boundary where
//! `2R` requests could slip through back to back. Time comes from `tokio::time::Instant`, so
//! tests can drive the gate on a paused clock.

use crate::error::ConfigError;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub mod window;
pub use window::SlidingWindow;

/// Length of the window a rate is measured over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    /// Per second
    #[default]
    Second,
    /// Per minute
    Minute,
    /// Per hour
    Hour,
}

impl Resolution {
    /// Window length `W`.
    pub fn window(&self) -> Duration {
        match self {
            Resolution::Second => Duration::from_secs(1),
            Resolution::Minute => Duration::from_secs(60),
            Resolution::Hour => Duration::from_secs(60 * 60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Second => "sec",
            Resolution::Minute => "min",
            Resolution::Hour => "hour",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sec" | "second" | "s" => Ok(Resolution::Second),
            "min" | "minute" | "m" => Ok(Resolution::Minute),
            "hour" | "h" => Ok(Resolution::Hour),
            _ => Err(ConfigError::InvalidResolution(s.to_string())),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.as_str().to_string()
    }
}

/// The decision returned by [`RateGate::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted.
    Allowed {
        /// Admissions left in the current window; `u32::MAX` when unlimited.
        remaining: u32,
    },
    /// Not admitted yet.
    Denied {
        /// Time until the oldest admission leaves the window.
        wait: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Admission gate limiting how many attempts may start per window.
///
/// One gate is shared by every request of every batch a client runs; the window state is never
/// reset between batches. An unlimited gate admits immediately.
#[derive(Debug)]
pub struct RateGate {
    window: Option<Mutex<SlidingWindow>>,
    resolution: Resolution,
}

impl RateGate {
    /// Gate admitting `rate` per `resolution` window; `None` means unlimited.
    pub fn new(rate: Option<NonZeroU32>, resolution: Resolution) -> Self {
        Self {
            window: rate.map(|rate| Mutex::new(SlidingWindow::new(rate, resolution.window()))),
            resolution,
        }
    }

    /// Gate that never blocks.
    pub fn unlimited() -> Self {
        Self::new(None, Resolution::Second)
    }

    /// Configured rate, if any.
    pub fn rate(&self) -> Option<NonZeroU32> {
        self.window.as_ref().map(|w| w.lock().unwrap_or_else(PoisonError::into_inner).rate())
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Admit now if the window has room, recording the admission.
    pub fn try_acquire(&self) -> Decision {
        match &self.window {
            None => Decision::Allowed { remaining: u32::MAX },
            Some(window) => {
                window.lock().unwrap_or_else(PoisonError::into_inner).try_admit(Instant::now())
            }
        }
    }

    /// Wait until admitted. Never fails.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Decision::Allowed { remaining } => {
                    tracing::trace!(remaining, "rate gate: admitted");
                    return;
                }
                Decision::Denied { wait } => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "rate gate: saturated");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
