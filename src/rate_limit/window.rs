//! Sliding-window admission log backing [`RateGate`](super::RateGate).

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::Instant;

use crate::rate_limit::Decision;

/// Sliding-window log of admission instants.
///
/// Keeps the instants of admissions still inside the trailing window. An admission at `now` is
/// granted when fewer than `rate` of them remain after expiring everything at least `window` old,
/// so any half-open interval of length `window` holds at most `rate` admissions.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    rate: NonZeroU32,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(rate: NonZeroU32, window: Duration) -> Self {
        Self { rate, window, admitted: VecDeque::with_capacity(rate.get() as usize) }
    }

    pub fn rate(&self) -> NonZeroU32 {
        self.rate
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admissions currently inside the window ending at `now`.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.admitted.len()
    }

    /// Admit at `now` if there is room, recording the admission.
    pub fn try_admit(&mut self, now: Instant) -> Decision {
        self.expire(now);
        let limit = self.rate.get() as usize;
        if self.admitted.len() < limit {
            self.admitted.push_back(now);
            return Decision::Allowed { remaining: (limit - self.admitted.len()) as u32 };
        }
        // full: the front is younger than `window`, so the wait is non-zero
        let oldest = self.admitted.front().copied().unwrap_or(now);
        Decision::Denied { wait: (oldest + self.window).saturating_duration_since(now) }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}
