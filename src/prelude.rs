//! Convenient re-exports for common ratehttp types.
pub use crate::{
    backoff::{Backoff, Jitter},
    client::{Client, ClientBuilder},
    config::ClientConfig,
    error::{AttemptError, ConfigError, RequestError},
    rate_limit::Resolution,
    session::{HttpRequest, Session},
    Outcome,
};
