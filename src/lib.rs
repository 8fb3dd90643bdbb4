#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # ratehttp
//!
//! Batch HTTP execution for async Rust: every request of a batch runs concurrently, bounded by a
//! rate gate and a connection gate, retried on failure, and returned in input order.
//!
//! ## Features
//!
//! - **Rate gate**: at most `R` request starts per second, minute or hour (sliding window)
//! - **Connection gate**: at most `C` requests in flight, FIFO, released on every exit path
//! - **Retries** with constant, linear or exponential backoff and optional jitter
//! - **Ordered results**: one outcome per input position, whatever the completion order
//! - **Tower middleware** sharing a client's gates with any service
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ratehttp::{Client, HttpRequest, Resolution};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .rate(50)
//!         .resolution(Resolution::Second)
//!         .connections(10)
//!         .retries(3)
//!         .build()?;
//!
//!     let requests = (1..=100).map(|page| {
//!         HttpRequest::get("https://api.example.com/items").with_param("page", page.to_string())
//!     });
//!
//!     let outcomes = client
//!         .execute(requests, |session, request| async move {
//!             session.fetch_json::<serde_json::Value>(&request).await
//!         })
//!         .await;
//!
//!     for (page, outcome) in outcomes.iter().enumerate() {
//!         if let Err(e) = outcome {
//!             eprintln!("page {} failed: {}", page + 1, e);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod collector;
pub mod config;
pub mod connections;
pub mod dispatcher;
pub mod error;
pub mod layer;
pub mod prelude;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod sleeper;
pub mod timeout;

// Re-exports
pub use backoff::{Backoff, BackoffError, Jitter, MAX_BACKOFF};
pub use client::{Client, ClientBuilder};
pub use collector::ResultCollector;
pub use config::ClientConfig;
pub use connections::{ConnectionGate, ConnectionPermit};
pub use dispatcher::{Dispatcher, Request, Settled};
pub use error::{AttemptError, ConfigError, RequestError};
pub use layer::{GateLayer, GateService};
pub use rate_limit::{Decision, RateGate, Resolution};
pub use retry::{RetryPolicy, RetryPolicyBuilder, Verdict};
pub use session::{HttpRequest, Session};
pub use sleeper::{InstantSleeper, RecordingSleeper, Sleeper, TokioSleeper};
pub use timeout::AttemptTimeout;

/// Final result for one request position.
pub type Outcome<T, E> = Result<T, RequestError<E>>;
