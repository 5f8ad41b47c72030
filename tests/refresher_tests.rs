mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockApi;
use scanwatch::api::DashboardApi;
use scanwatch::error::Operation;
use scanwatch::feed::{Feed, FeedKind, ResultsMode};
use scanwatch::refresher::{FeedPhase, FeedRefresher, FeedRegistry, RefreshOutcome};
use tokio::time::{sleep, timeout};

const PERIOD: Duration = Duration::from_secs(30);

fn setup() -> (Arc<MockApi>, Arc<dyn DashboardApi>) {
    let mock = Arc::new(MockApi::seeded());
    let api: Arc<dyn DashboardApi> = mock.clone();
    (mock, api)
}

#[tokio::test(start_paused = true)]
async fn overlapping_triggers_issue_one_request() {
    let (mock, api) = setup();
    mock.set_delay(Duration::from_millis(200));
    let r = FeedRefresher::new(api, Feed::Results(ResultsMode::Open), PERIOD);

    assert!(r.trigger_now().await);
    sleep(Duration::from_millis(10)).await;
    assert!(!r.trigger_now().await, "second trigger must be dropped");
    assert_eq!(r.phase().await, FeedPhase::Fetching);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(mock.calls(Operation::OpenResults), 1);
    assert_eq!(r.phase().await, FeedPhase::Idle);
    let st = r.state().await;
    assert_eq!(st.requests, 1);
    assert_eq!(st.snapshot.map(|s| s.len()), Some(3));
}

#[tokio::test(start_paused = true)]
async fn refresh_during_fetch_is_skipped() {
    let (mock, api) = setup();
    mock.set_delay(Duration::from_millis(200));
    let r = FeedRefresher::new(api, Feed::Changes, PERIOD);

    let (a, b) = tokio::join!(r.refresh(), async {
        sleep(Duration::from_millis(10)).await;
        r.refresh().await
    });
    assert_eq!(a, RefreshOutcome::Applied);
    assert_eq!(b, RefreshOutcome::Skipped);
    assert_eq!(mock.calls(Operation::ChangeHistory), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_keeps_last_snapshot_and_recovers() {
    let (mock, api) = setup();
    let r = FeedRefresher::new(api, Feed::Results(ResultsMode::All), PERIOD);
    assert_eq!(r.refresh().await, RefreshOutcome::Applied);

    mock.set_failing(true);
    assert_eq!(r.refresh().await, RefreshOutcome::Failed);
    let st = r.state().await;
    assert_eq!(st.phase, FeedPhase::Error);
    assert_eq!(st.snapshot.map(|s| s.len()), Some(4));
    assert!(st.last_error.unwrap_or_default().contains("connection refused"));

    // Error is not terminal.
    mock.set_failing(false);
    assert_eq!(r.refresh().await, RefreshOutcome::Applied);
    let st = r.state().await;
    assert_eq!(st.phase, FeedPhase::Idle);
    assert!(st.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn switch_clears_snapshot_and_discards_in_flight_result() {
    let (mock, api) = setup();
    mock.set_delay(Duration::from_millis(200));
    let mut r = FeedRefresher::new(api, Feed::Results(ResultsMode::Open), PERIOD);

    assert!(r.trigger_now().await);
    sleep(Duration::from_millis(50)).await;
    assert!(r.switch(Feed::Results(ResultsMode::All)).await);
    assert!(r.snapshot().await.is_none());
    assert_eq!(r.feed(), Feed::Results(ResultsMode::All));

    sleep(Duration::from_millis(500)).await;
    // The open-ports response landed after the switch and was dropped.
    assert_eq!(mock.calls(Operation::OpenResults), 1);
    assert_eq!(mock.calls(Operation::LatestResults), 1);
    let snap = r.snapshot().await.expect("snapshot for the new identity");
    assert_eq!(snap.len(), 4);
    assert_eq!(r.phase().await, FeedPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn switching_to_same_feed_is_a_no_op() {
    let (mock, api) = setup();
    let mut r = FeedRefresher::new(api, Feed::Changes, PERIOD);
    r.refresh().await;
    assert!(!r.switch(Feed::Changes).await);
    assert!(r.snapshot().await.is_some());
    assert_eq!(mock.calls(Operation::ChangeHistory), 1);
}

#[tokio::test(start_paused = true)]
async fn timer_polls_at_fixed_period_until_stopped() {
    let (mock, api) = setup();
    let mut r = FeedRefresher::new(api, Feed::Changes, PERIOD);
    r.start();
    assert!(r.is_running());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(mock.calls(Operation::ChangeHistory), 1, "first tick is immediate");
    sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.calls(Operation::ChangeHistory), 2);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.calls(Operation::ChangeHistory), 4);

    r.stop();
    assert!(!r.is_running());
    sleep(Duration::from_secs(120)).await;
    assert_eq!(mock.calls(Operation::ChangeHistory), 4);
}

#[tokio::test(start_paused = true)]
async fn failing_feed_keeps_polling() {
    let (mock, api) = setup();
    mock.set_failing(true);
    let mut r = FeedRefresher::new(api, Feed::Targets, PERIOD);
    r.start();
    sleep(Duration::from_secs(61)).await;
    assert_eq!(mock.calls(Operation::ListTargets), 3);
    assert_eq!(r.phase().await, FeedPhase::Error);
    r.stop();
}

#[tokio::test(start_paused = true)]
async fn invalidate_during_fetch_queues_one_follow_up() {
    let (mock, api) = setup();
    mock.set_delay(Duration::from_millis(200));
    let r = FeedRefresher::new(api, Feed::Targets, PERIOD);

    assert!(r.trigger_now().await);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(r.invalidate().await, RefreshOutcome::Queued);
    assert_eq!(r.invalidate().await, RefreshOutcome::Queued);
    assert!(r.state().await.stale);

    sleep(Duration::from_millis(600)).await;
    assert_eq!(mock.calls(Operation::ListTargets), 2);
    let st = r.state().await;
    assert!(!st.stale);
    assert_eq!(st.phase, FeedPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn invalidate_when_idle_fetches_inline() {
    let (mock, api) = setup();
    let r = FeedRefresher::new(api, Feed::Targets, PERIOD);
    r.refresh().await;
    assert_eq!(r.invalidate().await, RefreshOutcome::Applied);
    assert_eq!(mock.calls(Operation::ListTargets), 2);
    assert!(!r.state().await.stale);
}

#[tokio::test(start_paused = true)]
async fn close_discards_in_flight_result() {
    let (mock, api) = setup();
    mock.set_delay(Duration::from_millis(200));
    let mut r = FeedRefresher::new(api, Feed::Changes, PERIOD);
    r.trigger_now().await;
    r.close();
    sleep(Duration::from_millis(400)).await;
    assert_eq!(mock.calls(Operation::ChangeHistory), 1);
    assert!(r.snapshot().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn abandoned_refresh_still_lands_and_polling_continues() {
    let (mock, api) = setup();
    mock.set_delay(Duration::from_millis(200));
    let mut r = FeedRefresher::new(api, Feed::Changes, PERIOD);

    assert!(timeout(Duration::from_millis(50), r.refresh()).await.is_err());
    sleep(Duration::from_millis(300)).await;
    assert_eq!(r.phase().await, FeedPhase::Idle);
    assert_eq!(r.snapshot().await.map(|s| s.len()), Some(3));

    r.start();
    sleep(Duration::from_secs(95)).await;
    // One abandoned refresh plus ticks at 0s, 30s, 60s and 90s.
    assert_eq!(mock.calls(Operation::ChangeHistory), 5);
    r.stop();
}

#[tokio::test(start_paused = true)]
async fn abandoned_invalidate_does_not_block_later_triggers() {
    let (mock, api) = setup();
    mock.set_delay(Duration::from_millis(200));
    let r = FeedRefresher::new(api, Feed::Targets, PERIOD);

    assert!(timeout(Duration::from_millis(50), r.invalidate()).await.is_err());
    sleep(Duration::from_millis(300)).await;
    assert!(!r.state().await.stale);
    assert!(r.trigger_now().await);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(mock.calls(Operation::ListTargets), 2);
}

#[tokio::test(start_paused = true)]
async fn closed_refresher_can_be_restarted_mid_fetch() {
    let (mock, api) = setup();
    mock.set_delay(Duration::from_millis(200));
    let mut r = FeedRefresher::new(api, Feed::Changes, PERIOD);
    assert!(r.trigger_now().await);
    sleep(Duration::from_millis(50)).await;
    r.close();

    r.start();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(mock.calls(Operation::ChangeHistory), 2);
    assert_eq!(r.phase().await, FeedPhase::Idle);
    assert_eq!(r.snapshot().await.map(|s| s.len()), Some(3));
    r.stop();
}

#[tokio::test(start_paused = true)]
async fn close_without_restart_settles_to_idle() {
    let (_mock, api) = setup();
    let mut r = FeedRefresher::new(api, Feed::Changes, PERIOD);
    r.trigger_now().await;
    r.close();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(r.phase().await, FeedPhase::Idle);
    assert!(r.snapshot().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn reopening_a_kind_adopts_the_new_period() {
    let (_mock, api) = setup();
    let mut reg = FeedRegistry::new(api);
    reg.open(Feed::Changes, PERIOD).await;
    let r = reg.open(Feed::Changes, Duration::from_secs(10)).await;
    assert_eq!(r.period(), Duration::from_secs(10));

    let r = reg
        .open(Feed::Results(ResultsMode::Open), PERIOD)
        .await;
    assert_eq!(r.period(), PERIOD);
    let r = reg
        .open(Feed::Results(ResultsMode::All), Duration::from_secs(5))
        .await;
    assert_eq!(r.period(), Duration::from_secs(5));
    assert_eq!(r.feed(), Feed::Results(ResultsMode::All));
}

#[tokio::test(start_paused = true)]
async fn set_period_restarts_a_running_timer() {
    let (mock, api) = setup();
    let mut r = FeedRefresher::new(api, Feed::Changes, PERIOD);
    r.start();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(mock.calls(Operation::ChangeHistory), 1);

    assert!(r.set_period(Duration::from_secs(5)));
    assert!(!r.set_period(Duration::from_secs(5)));
    assert!(r.is_running());
    // Restart ticks at once, then every 5s: 1s, 6s, 11s.
    sleep(Duration::from_secs(11)).await;
    assert_eq!(mock.calls(Operation::ChangeHistory), 4);
    r.stop();
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_snapshot_changes() {
    let (_mock, api) = setup();
    let r = FeedRefresher::new(api, Feed::Changes, PERIOD);
    let mut rx = r.subscribe();
    assert!(!rx.has_changed().unwrap());
    r.refresh().await;
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn registry_keeps_one_refresher_per_kind() {
    let (mock, api) = setup();
    let mut reg = FeedRegistry::new(api);
    reg.open(Feed::Results(ResultsMode::Open), PERIOD).await;
    reg.open(Feed::Changes, PERIOD).await;
    let r = reg.open(Feed::Results(ResultsMode::All), PERIOD).await;
    assert_eq!(r.feed(), Feed::Results(ResultsMode::All));
    assert_eq!(reg.kinds(), vec![FeedKind::Results, FeedKind::Changes]);

    sleep(Duration::from_millis(10)).await;
    // Re-opening with a new sub-mode switched and fetched once.
    assert_eq!(mock.calls(Operation::LatestResults), 1);
    assert_eq!(mock.calls(Operation::OpenResults), 0);

    assert!(reg.close(FeedKind::Changes));
    assert!(!reg.close(FeedKind::Changes));
    assert_eq!(reg.kinds(), vec![FeedKind::Results]);
    reg.close_all();
    assert!(reg.kinds().is_empty());
}
