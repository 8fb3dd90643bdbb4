//! Batch execution entry point.
//!
//! A [`Client`] owns one rate gate and one connection gate for its whole lifetime. Every batch it
//! runs, and every call made through its [`GateLayer`], draws from the same budget: the rate
//! window is never reset between batches. Separate clients never interfere with each other.

use crate::backoff::{Backoff, Jitter};
use crate::collector::ResultCollector;
use crate::config::ClientConfig;
use crate::connections::ConnectionGate;
use crate::dispatcher::{Dispatcher, Settled};
use crate::error::{ConfigError, RequestError};
use crate::layer::GateLayer;
use crate::rate_limit::{RateGate, Resolution};
use crate::retry::RetryPolicy;
use crate::session::Session;
use crate::sleeper::Sleeper;
use crate::Outcome;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::Instrument;

/// Runs batches of requests under a rate limit, a connection limit, and a retry policy.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    dispatcher: Dispatcher<Session>,
}

impl Client {
    /// Client built from `config` with the default backoff and transport.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        ClientBuilder::from_config(config).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        self.dispatcher.session()
    }

    pub fn rate_gate(&self) -> &Arc<RateGate> {
        self.dispatcher.rate_gate()
    }

    pub fn connection_gate(&self) -> &ConnectionGate {
        self.dispatcher.connection_gate()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.dispatcher.retry_policy()
    }

    /// Tower layer drawing from this client's gates.
    pub fn layer(&self) -> GateLayer {
        GateLayer::new(self.rate_gate().clone(), self.connection_gate().clone())
    }

    /// Run `func` once per request (plus retries) and return one outcome per input position.
    ///
    /// `func` gets a [`Session`] and a clone of the payload on every attempt. An `Err` is a
    /// failed attempt; once retries run out it becomes that position's [`RequestError`]. A
    /// failure never cancels other requests.
    ///
    /// Must be awaited inside a tokio runtime. A panic inside `func` is re-raised here.
    pub async fn execute<I, P, T, E, F, Fut>(&self, requests: I, func: F) -> Vec<Outcome<T, E>>
    where
        I: IntoIterator<Item = P>,
        P: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Session, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let requests: Vec<P> = requests.into_iter().collect();
        let total = requests.len();
        let span = tracing::info_span!("execute", total);
        async move {
            let started = Instant::now();
            let collector = Arc::new(ResultCollector::new(total));
            let mut tasks = self.dispatcher.dispatch(requests, Arc::new(func), &collector);

            let mut completed = 0usize;
            let mut failed = 0usize;
            while let Some(joined) = tasks.join_next().await {
                let settled = settle(joined);
                completed += 1;
                if !settled.succeeded {
                    failed += 1;
                }
                tracing::debug!(completed, total, position = settled.position, "request settled");
            }

            let outcomes = collector.await_all().await;
            tracing::info!(
                total,
                failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "batch complete"
            );
            outcomes
        }
        .instrument(span)
        .await
    }

    /// Like [`execute`](Self::execute), but stops at the first request that fails for good.
    ///
    /// Remaining requests are cancelled; in-flight attempts are dropped and their connection
    /// slots released. Admissions they already took from the rate window stay counted.
    pub async fn try_execute<I, P, T, E, F, Fut>(
        &self,
        requests: I,
        func: F,
    ) -> Result<Vec<T>, RequestError<E>>
    where
        I: IntoIterator<Item = P>,
        P: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Session, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let requests: Vec<P> = requests.into_iter().collect();
        let total = requests.len();
        let span = tracing::info_span!("try_execute", total);
        async move {
            let collector = Arc::new(ResultCollector::new(total));
            let mut tasks = self.dispatcher.dispatch(requests, Arc::new(func), &collector);

            while let Some(joined) = tasks.join_next().await {
                let settled = settle(joined);
                if settled.succeeded {
                    continue;
                }
                tracing::warn!(
                    position = settled.position,
                    cancelled = tasks.len(),
                    "aborting batch after terminal failure"
                );
                tasks.shutdown().await;
                match collector.take(settled.position) {
                    Some(Err(error)) => return Err(error),
                    _ => unreachable!("failed request {} left no error", settled.position),
                }
            }

            collector.await_all().await.into_iter().collect()
        }
        .instrument(span)
        .await
    }

    /// Blocking form of [`execute`](Self::execute) for synchronous callers.
    ///
    /// Builds a multi-threaded runtime for the duration of the batch. Panics if called from
    /// within an async context.
    pub fn execute_blocking<I, P, T, E, F, Fut>(
        &self,
        requests: I,
        func: F,
    ) -> std::io::Result<Vec<Outcome<T, E>>>
    where
        I: IntoIterator<Item = P>,
        P: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Session, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        Ok(runtime.block_on(self.execute(requests, func)))
    }
}

/// Unwrap a finished request task. A panic is re-raised. A cancelled task never recorded its
/// outcome, so the batch can no longer be completed.
fn settle(joined: Result<Settled, JoinError>) -> Settled {
    match joined {
        Ok(settled) => settled,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => {
            tracing::warn!(error = %err, "request task cancelled before recording its outcome");
            panic!("request task cancelled before recording its outcome: {}", err)
        }
    }
}

fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Builder for [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    backoff: Option<Backoff>,
    max_backoff: Option<Duration>,
    jitter: Jitter,
    sleeper: Option<Arc<dyn Sleeper>>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config, ..Default::default() }
    }

    /// Admissions per window. `0` disables rate limiting.
    pub fn rate(mut self, rate: u32) -> Self {
        self.config.rate = Some(rate);
        self
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.config.resolution = resolution;
        self
    }

    pub fn connections(mut self, connections: usize) -> Self {
        self.config.connections = connections;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.config.retries = retries;
        self
    }

    /// Ignored when a transport is supplied with [`http_client`](Self::http_client).
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.config.verify_tls = verify;
        self
    }

    /// Per-attempt timeout, rounded up to whole milliseconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = Some(ceil_millis(timeout));
        self
    }

    /// Constant delay between retries, rounded up to whole milliseconds. Overridden by
    /// [`backoff`](Self::backoff).
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay_ms = Some(ceil_millis(delay));
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Cap the backoff delay. Only linear and exponential backoff accept a cap; anything else is
    /// rejected by [`build`](Self::build).
    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = Some(max);
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Use an already configured transport instead of building one.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<Client, ConfigError> {
        let config = self.config;
        config.validate()?;
        let connections = ConnectionGate::new(config.connections)?;
        let rate = Arc::new(RateGate::new(config.rate_limit(), config.resolution));
        let timeout = config.attempt_timeout()?;
        let session = match self.http {
            Some(http) => Session::from_client(http),
            None => Session::new(config.verify_tls, None)?,
        };

        let mut backoff = self.backoff.unwrap_or_else(|| Backoff::constant(config.retry_delay()));
        if let Some(max) = self.max_backoff {
            backoff = backoff.with_max(max)?;
        }
        let mut retry = RetryPolicy::builder()
            .max_retries(config.retries)
            .backoff(backoff)
            .with_jitter(self.jitter);
        if let Some(sleeper) = self.sleeper {
            retry = retry.with_shared_sleeper(sleeper);
        }

        tracing::debug!(
            rate = ?config.rate_limit(),
            resolution = %config.resolution,
            connections = config.connections,
            retries = config.retries,
            verify_tls = config.verify_tls,
            "client configured"
        );

        let dispatcher =
            Dispatcher::new(session, rate, connections, retry.build()).with_timeout(timeout);
        Ok(Client { config, dispatcher })
    }
}
