//! Per-attempt timeout

use crate::error::{AttemptError, ConfigError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Bounds how long a single attempt may run. An expired attempt is a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeout {
    duration: Duration,
}

impl AttemptTimeout {
    pub fn new(duration: Duration) -> Result<Self, ConfigError> {
        if duration.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self { duration })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Drive `attempt` to completion or until the timeout expires.
    pub async fn run<T, E, Fut>(&self, attempt: Fut) -> Result<T, AttemptError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.duration, attempt).await {
            Ok(result) => result.map_err(AttemptError::Inner),
            Err(_) => Err(AttemptError::Timeout { elapsed: start.elapsed(), timeout: self.duration }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_is_rejected() {
        assert!(matches!(AttemptTimeout::new(Duration::ZERO), Err(ConfigError::ZeroTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn completes_before_timeout() {
        let timeout = AttemptTimeout::new(Duration::from_millis(100)).unwrap();
        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, std::io::Error>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_with_durations() {
        let timeout = AttemptTimeout::new(Duration::from_millis(50)).unwrap();
        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), std::io::Error>(())
            })
            .await;
        match result {
            Err(AttemptError::Timeout { elapsed, timeout }) => {
                assert_eq!(timeout, Duration::from_millis(50));
                assert!(elapsed >= timeout);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn user_errors_pass_through_as_inner() {
        let timeout = AttemptTimeout::new(Duration::from_secs(1)).unwrap();
        let result = timeout.run(async { Err::<(), _>("refused") }).await;
        assert_eq!(result.unwrap_err().into_inner(), Some("refused"));
    }
}
