//! Client configuration.
//!
//! ```rust
//! use ratehttp::{ClientConfig, Resolution};
//!
//! let config = ClientConfig::from_json(r#"{"rate": 100, "resolution": "min", "verifyTls": false}"#)
//!     .unwrap();
//! assert_eq!(config.resolution, Resolution::Minute);
//! assert_eq!(config.connections, 5);
//! assert!(!config.verify_tls);
//! ```

use crate::error::ConfigError;
use crate::rate_limit::Resolution;
use crate::timeout::AttemptTimeout;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

pub const DEFAULT_CONNECTIONS: usize = 5;
pub const DEFAULT_RETRIES: usize = 3;
/// Delay between retries when there is no rate to derive it from.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Settings for a [`Client`](crate::Client). Every field has a default; an empty JSON object is a
/// valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Admissions per window. `None` or `0` disables rate limiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
    pub resolution: Resolution,
    /// Requests allowed in flight at once.
    pub connections: usize,
    /// Extra attempts after the first.
    pub retries: usize,
    #[serde(alias = "verifyTls")]
    pub verify_tls: bool,
    /// Per-attempt timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Constant delay between retries in milliseconds. Derived from the rate when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rate: None,
            resolution: Resolution::default(),
            connections: DEFAULT_CONNECTIONS,
            retries: DEFAULT_RETRIES,
            verify_tls: true,
            timeout_ms: None,
            retry_delay_ms: None,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connections == 0 {
            return Err(ConfigError::InvalidConnections(self.connections));
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        self.rate.and_then(NonZeroU32::new)
    }

    pub fn attempt_timeout(&self) -> Result<Option<AttemptTimeout>, ConfigError> {
        self.timeout_ms.map(|ms| AttemptTimeout::new(Duration::from_millis(ms))).transpose()
    }

    /// Delay between retries: `retry_delay_ms` if set, otherwise long enough for every connection
    /// slot to turn over twice at the configured rate (`W / R * connections * 2`), otherwise one
    /// second.
    pub fn retry_delay(&self) -> Duration {
        if let Some(ms) = self.retry_delay_ms {
            return Duration::from_millis(ms);
        }
        match self.rate_limit() {
            Some(rate) => {
                let turns = u32::try_from(self.connections.saturating_mul(2)).unwrap_or(u32::MAX);
                (self.resolution.window() / rate.get()).saturating_mul(turns)
            }
            None => DEFAULT_RETRY_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ClientConfig::from_json("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.rate_limit(), None);
        assert_eq!(config.resolution, Resolution::Second);
        assert!(config.verify_tls);
    }

    #[test]
    fn zero_rate_means_unlimited() {
        let config = ClientConfig { rate: Some(0), ..Default::default() };
        assert_eq!(config.rate_limit(), None);
    }

    #[test]
    fn zero_connections_rejected() {
        let err = ClientConfig::from_json(r#"{"connections": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConnections(0)));
    }

    #[test]
    fn unknown_resolution_rejected() {
        let err = ClientConfig::from_json(r#"{"resolution": "week"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("week"));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(ClientConfig::from_json(r#"{"conections": 2}"#).is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = ClientConfig::from_json(r#"{"timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));
    }

    #[test]
    fn snake_case_and_camel_case_tls_flag() {
        assert!(!ClientConfig::from_json(r#"{"verify_tls": false}"#).unwrap().verify_tls);
        assert!(!ClientConfig::from_json(r#"{"verifyTls": false}"#).unwrap().verify_tls);
    }

    #[test]
    fn retry_delay_derivation() {
        let unlimited = ClientConfig::default();
        assert_eq!(unlimited.retry_delay(), Duration::from_secs(1));

        // 1s / 10 * 5 connections * 2
        let limited = ClientConfig { rate: Some(10), ..Default::default() };
        assert_eq!(limited.retry_delay(), Duration::from_secs(1));

        let per_minute = ClientConfig {
            rate: Some(60),
            resolution: Resolution::Minute,
            connections: 2,
            ..Default::default()
        };
        assert_eq!(per_minute.retry_delay(), Duration::from_secs(4));

        let explicit = ClientConfig { rate: Some(10), retry_delay_ms: Some(250), ..Default::default() };
        assert_eq!(explicit.retry_delay(), Duration::from_millis(250));
    }

    #[test]
    fn serializes_without_unset_options() {
        let value = serde_json::to_value(ClientConfig::default()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "resolution": "sec",
                "connections": 5,
                "retries": 3,
                "verify_tls": true
            })
        );
    }
}
