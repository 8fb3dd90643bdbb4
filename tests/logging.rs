mod common;

use common::test_helpers::{capture_logs, TestError};
use ratehttp::{Client, InstantSleeper, Session};

#[tokio::test]
async fn batch_emits_retry_failure_and_summary_events() {
    let logs = capture_logs();
    let client = Client::builder().retries(1).sleeper(InstantSleeper).build().unwrap();

    let outcomes = client
        .execute(0..3u32, |_: Session, n: u32| async move {
            if n == 2 {
                Err(TestError("gateway timeout".into()))
            } else {
                Ok(n)
            }
        })
        .await;
    assert!(outcomes[2].is_err());

    let output = logs.contents();
    assert!(output.contains("attempt failed; retrying"), "{}", output);
    assert!(output.contains("request failed"), "{}", output);
    assert!(output.contains("gateway timeout"), "{}", output);
    assert!(output.contains("request settled"), "{}", output);
    assert!(output.contains("batch complete"), "{}", output);
    assert!(output.contains("failed=1"), "{}", output);
}
