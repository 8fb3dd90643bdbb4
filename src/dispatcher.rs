//! Per-request admission, execution, and retry.
//!
//! Every request of a batch becomes its own tokio task. A task walks an explicit state machine:
//!
//! ```text
//! Attempting(n) ──ok──────────────▶ Succeeded
//!      │ ──err, retries left──▶ Retrying(n, delay) ──▶ Attempting(n + 1)
//!      └──err, budget spent───▶ Failed
//! ```
//!
//! Each attempt takes a connection slot, then waits for the rate gate while holding it, then calls
//! the user function, so the rate admission and the start of the call are the same instant. The
//! connection permit is dropped as soon as the call finishes, whatever its result, so a request waiting out
//! its backoff holds no slot. Tasks are spawned all at once; the gates alone bound how many run.

use crate::collector::ResultCollector;
use crate::connections::ConnectionGate;
use crate::error::{AttemptError, RequestError, MAX_RECORDED_FAILURES};
use crate::rate_limit::RateGate;
use crate::retry::{RetryPolicy, Verdict};
use crate::timeout::AttemptTimeout;
use crate::Outcome;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::Instrument;

/// A caller payload and its fixed position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<P> {
    position: usize,
    payload: P,
}

impl<P> Request<P> {
    pub fn new(position: usize, payload: P) -> Self {
        Self { position, payload }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

/// How a request task ended. Its outcome is already in the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    pub position: usize,
    pub succeeded: bool,
}

enum State<T> {
    Attempting(usize),
    Retrying { attempt: usize, delay: Duration },
    Succeeded(T),
    Failed { attempts: usize },
}

/// Runs requests through the gates and the retry policy.
///
/// Cloning is cheap; clones share the gates.
#[derive(Debug, Clone)]
pub struct Dispatcher<S> {
    session: S,
    rate: Arc<RateGate>,
    connections: ConnectionGate,
    retry: RetryPolicy,
    timeout: Option<AttemptTimeout>,
}

impl<S> Dispatcher<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(
        session: S,
        rate: Arc<RateGate>,
        connections: ConnectionGate,
        retry: RetryPolicy,
    ) -> Self {
        Self { session, rate, connections, retry, timeout: None }
    }

    /// Bound each attempt; an expired attempt counts as a retryable failure.
    pub fn with_timeout(mut self, timeout: Option<AttemptTimeout>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn rate_gate(&self) -> &Arc<RateGate> {
        &self.rate
    }

    pub fn connection_gate(&self) -> &ConnectionGate {
        &self.connections
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Spawn one task per request. Each task records its outcome in `collector` at the request's
    /// position before it settles.
    pub fn dispatch<I, P, T, E, F, Fut>(
        &self,
        requests: I,
        func: Arc<F>,
        collector: &Arc<ResultCollector<T, E>>,
    ) -> JoinSet<Settled>
    where
        I: IntoIterator<Item = P>,
        P: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(S, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for (position, payload) in requests.into_iter().enumerate() {
            let dispatcher = self.clone();
            let func = func.clone();
            let collector = collector.clone();
            let span = tracing::debug_span!("request", position);
            tasks.spawn(
                async move {
                    let outcome = dispatcher.run(Request::new(position, payload), &*func).await;
                    let succeeded = outcome.is_ok();
                    collector.record(position, outcome);
                    Settled { position, succeeded }
                }
                .instrument(span),
            );
        }
        tasks
    }

    /// Drive one request to its terminal outcome.
    pub async fn run<P, T, E, F, Fut>(&self, request: Request<P>, func: &F) -> Outcome<T, E>
    where
        P: Clone,
        E: std::error::Error,
        F: Fn(S, P) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut failures = VecDeque::new();
        let mut state = State::Attempting(0);
        loop {
            state = match state {
                State::Attempting(attempt) => {
                    let result = self.attempt(func, request.payload()).await;
                    match self.retry.verdict(attempt, result) {
                        Verdict::Success(value) => State::Succeeded(value),
                        Verdict::Retry { error, delay } => {
                            tracing::debug!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "attempt failed; retrying"
                            );
                            remember(&mut failures, error);
                            State::Retrying { attempt, delay }
                        }
                        Verdict::Exhausted(error) => {
                            tracing::warn!(
                                position = request.position(),
                                attempts = attempt + 1,
                                error = %error,
                                "request failed"
                            );
                            remember(&mut failures, error);
                            State::Failed { attempts: attempt + 1 }
                        }
                    }
                }
                State::Retrying { attempt, delay } => {
                    self.retry.pause(delay).await;
                    State::Attempting(attempt + 1)
                }
                State::Succeeded(value) => return Ok(value),
                State::Failed { attempts } => {
                    return Err(RequestError::new(request.position(), attempts, failures))
                }
            };
        }
    }

    async fn attempt<P, T, E, F, Fut>(&self, func: &F, payload: &P) -> Result<T, AttemptError<E>>
    where
        P: Clone,
        F: Fn(S, P) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _permit = self.connections.acquire().await;
        self.rate.acquire().await;
        let call = func(self.session.clone(), payload.clone());
        match &self.timeout {
            Some(timeout) => timeout.run(call).await,
            None => call.await.map_err(AttemptError::Inner),
        }
    }
}

fn remember<E>(failures: &mut VecDeque<AttemptError<E>>, error: AttemptError<E>) {
    if failures.len() == MAX_RECORDED_FAILURES {
        failures.pop_front();
    }
    failures.push_back(error);
}
