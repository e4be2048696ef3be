//! Tests for `src/drift.rs`.

use std::time::Duration;

use ifguard::drift::DriftPoller;
use tokio::time::Instant;

#[test]
fn starts_disabled_and_toggles() {
    let mut poller = DriftPoller::new(Duration::from_secs(10));
    assert!(!poller.is_enabled());
    assert_eq!(poller.period(), Duration::from_secs(10));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("should build runtime");
    rt.block_on(async {
        poller.set_enabled(true);
        assert!(poller.is_enabled());
        poller.set_enabled(false);
        assert!(!poller.is_enabled());
    });
}

#[tokio::test(start_paused = true)]
async fn disabled_poller_never_ticks() {
    let mut poller = DriftPoller::new(Duration::from_secs(10));
    let result = tokio::time::timeout(Duration::from_secs(60), poller.tick()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn first_tick_comes_after_one_period() {
    let mut poller = DriftPoller::new(Duration::from_secs(10));
    let start = Instant::now();
    poller.set_enabled(true);

    poller.tick().await;
    let first = start.elapsed();
    assert!(first >= Duration::from_secs(10));
    assert!(first < Duration::from_secs(11));

    poller.tick().await;
    assert!(start.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn re_enabling_restarts_the_period() {
    let mut poller = DriftPoller::new(Duration::from_secs(10));
    poller.set_enabled(true);
    tokio::time::sleep(Duration::from_secs(8)).await;

    poller.set_enabled(false);
    poller.set_enabled(true);
    let start = Instant::now();
    poller.tick().await;
    assert!(start.elapsed() >= Duration::from_secs(10));
}
