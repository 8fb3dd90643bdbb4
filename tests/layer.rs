mod common;

use common::test_helpers::TestError;
use ratehttp::{Client, Session};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;
use tower::{service_fn, Layer, ServiceExt};

#[tokio::test(start_paused = true)]
async fn layered_service_shares_the_client_window() {
    let client = Client::builder().rate(3).build().unwrap();
    let svc = client.layer().layer(service_fn(|n: u32| async move { Ok::<_, Infallible>(n) }));

    let begin = Instant::now();
    for n in 0..3 {
        svc.clone().oneshot(n).await.unwrap();
    }
    assert!(begin.elapsed() < Duration::from_millis(1));

    // the window is already full, so the batch waits for it to slide
    let outcomes =
        client.execute(vec![()], |_: Session, _: ()| async { Ok::<_, TestError>(()) }).await;
    assert!(outcomes[0].is_ok());
    assert!(begin.elapsed() >= Duration::from_secs(1));
}
