//! Tower middleware that puts any service behind a client's gates.
//!
//! Calls made through a [`GateService`] count against the same rate window and connection slots
//! as the client's own batches, so ad-hoc calls and batch traffic share one budget.

use crate::connections::ConnectionGate;
use crate::rate_limit::RateGate;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Wraps services in a [`GateService`].
#[derive(Clone, Debug)]
pub struct GateLayer {
    rate: Arc<RateGate>,
    connections: ConnectionGate,
}

impl GateLayer {
    pub fn new(rate: Arc<RateGate>, connections: ConnectionGate) -> Self {
        Self { rate, connections }
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GateService { inner: service, rate: self.rate.clone(), connections: self.connections.clone() }
    }
}

/// Holds a connection slot for the duration of each call and passes the rate gate once the slot
/// is held.
#[derive(Clone, Debug)]
pub struct GateService<S> {
    inner: S,
    rate: Arc<RateGate>,
    connections: ConnectionGate,
}

impl<S, Req> Service<Req> for GateService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // the driven clone must be the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let rate = self.rate.clone();
        let connections = self.connections.clone();

        Box::pin(async move {
            let _permit = connections.acquire().await;
            rate.acquire().await;
            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::Resolution;
    use std::convert::Infallible;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::{service_fn, ServiceExt};

    #[tokio::test(start_paused = true)]
    async fn calls_share_the_rate_window() {
        let rate = Arc::new(RateGate::new(NonZeroU32::new(2), Resolution::Second));
        let layer = GateLayer::new(rate, ConnectionGate::new(4).unwrap());
        let svc = layer.layer(service_fn(|n: u32| async move { Ok::<_, Infallible>(n + 1) }));

        let start = tokio::time::Instant::now();
        for n in 0..4 {
            assert_eq!(svc.clone().oneshot(n).await.unwrap(), n + 1);
        }
        // third and fourth calls wait for the first window to slide
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_slot_held_for_the_call() {
        let connections = ConnectionGate::new(1).unwrap();
        let layer = GateLayer::new(Arc::new(RateGate::unlimited()), connections.clone());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let svc = layer.layer(service_fn({
            let active = active.clone();
            let peak = peak.clone();
            move |_: ()| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(())
                }
            }
        }));

        let calls = (0..3).map(|_| svc.clone().oneshot(()));
        futures::future::join_all(calls).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(connections.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_queued_behind_a_slow_call_still_respect_the_rate() {
        let rate = Arc::new(RateGate::new(NonZeroU32::new(1), Resolution::Second));
        let layer = GateLayer::new(rate, ConnectionGate::new(1).unwrap());
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let svc = layer.layer(service_fn({
            let starts = starts.clone();
            move |n: u32| {
                starts.lock().unwrap().push(tokio::time::Instant::now());
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok::<_, Infallible>(n)
                }
            }
        }));

        let calls = (0..4).map(|n| svc.clone().oneshot(n));
        futures::future::join_all(calls).await;

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1), "starts: {:?}", starts);
        }
    }
}
