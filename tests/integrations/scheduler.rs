//! The scheduler running inside the full service against fake collaborators.

use alarmwatch::core::ChannelKind;
use alarmwatch::notification::test_utils::RecordingChannel;
use alarmwatch::source::test_utils::{ScriptedAlarmSource, StaticRepository};
use std::sync::Arc;
use std::time::Duration;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{app::TestAppBuilder, attack_batch, create_test_app};

const TICK: Duration = Duration::from_secs(10);

/// Sleeps past the given number of scheduler ticks.
async fn wait_ticks(n: u32) {
    tokio::time::sleep(TICK * n + Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn test_apps_with_new_events_are_dispatched_each_tick() {
    let repository = Arc::new(StaticRepository::new(vec![
        create_test_app("shop", false, false, true),
        create_test_app("blog", false, false, true),
    ]));
    let source = Arc::new(ScriptedAlarmSource::new().with_batch("shop", attack_batch(3, 2)));
    let webhook = RecordingChannel::new(ChannelKind::Webhook);

    let test_app = TestAppBuilder::new()
        .with_repository(repository.clone())
        .with_source(source.clone())
        .with_channel(Arc::new(webhook.clone()))
        .with_watermark(0)
        .start()
        .await
        .unwrap();

    wait_ticks(1).await;
    let calls = webhook.calls();
    assert_eq!(calls.len(), 1, "only the app with events is dispatched");
    assert_eq!(calls[0].0, "shop");
    assert_eq!(calls[0].1.batch.total, 3);
    assert_eq!(calls[0].1.batch.records.len(), 2);

    // The scripted source keeps answering with the same batch, so the next
    // tick dispatches again with a fresh window.
    wait_ticks(1).await;
    assert_eq!(webhook.call_count(), 2);

    test_app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_windows_are_contiguous_and_increasing() {
    let repository = Arc::new(StaticRepository::new(vec![create_test_app("shop", true, false, false)]));
    let source = Arc::new(ScriptedAlarmSource::new());

    let test_app = TestAppBuilder::new()
        .with_repository(repository.clone())
        .with_source(source.clone())
        .with_watermark(0)
        .start()
        .await
        .unwrap();

    wait_ticks(3).await;
    test_app.shutdown(Duration::from_secs(5)).await.unwrap();

    let windows: Vec<_> = source.queries().into_iter().map(|(_, window)| window).collect();
    assert_eq!(windows.len(), 3);
    assert_eq!(windows[0].from_ms, 0);
    for pair in windows.windows(2) {
        assert_eq!(pair[1].from_ms, pair[0].until_ms, "no gap and no overlap");
    }
    for window in &windows {
        assert!(window.until_ms > window.from_ms);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_listing_does_not_advance_the_watermark() {
    let repository = Arc::new(StaticRepository::new(vec![create_test_app("shop", true, false, false)]));
    repository.set_failing(true);
    let source = Arc::new(ScriptedAlarmSource::new());

    let test_app = TestAppBuilder::new()
        .with_repository(repository.clone())
        .with_source(source.clone())
        .with_watermark(42)
        .start()
        .await
        .unwrap();

    wait_ticks(2).await;
    assert_eq!(repository.list_calls(), 2);
    assert!(source.queries().is_empty());

    repository.set_failing(false);
    wait_ticks(1).await;
    let queries = source.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].1.from_ms, 42, "the skipped range is scanned once listing recovers");

    test_app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repository_changes_apply_on_next_tick() {
    let repository = Arc::new(StaticRepository::new(vec![create_test_app("shop", false, false, true)]));
    let source = Arc::new(
        ScriptedAlarmSource::new()
            .with_batch("shop", attack_batch(1, 1))
            .with_batch("blog", attack_batch(1, 1)),
    );
    let webhook = RecordingChannel::new(ChannelKind::Webhook);

    let test_app = TestAppBuilder::new()
        .with_repository(repository.clone())
        .with_source(source.clone())
        .with_channel(Arc::new(webhook.clone()))
        .start()
        .await
        .unwrap();

    wait_ticks(1).await;
    repository.set_apps(vec![create_test_app("blog", false, false, true)]);
    wait_ticks(1).await;

    let apps: Vec<_> = webhook.calls().into_iter().map(|(id, _)| id).collect();
    assert_eq!(apps, vec!["shop".to_string(), "blog".to_string()]);

    test_app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_source_failure_for_one_app_does_not_stop_others() {
    let repository = Arc::new(StaticRepository::new(vec![
        create_test_app("broken", false, false, true),
        create_test_app("shop", false, false, true),
    ]));
    let source = Arc::new(
        ScriptedAlarmSource::new()
            .with_batch("shop", attack_batch(5, 2))
            .fail_for("broken"),
    );
    let webhook = RecordingChannel::new(ChannelKind::Webhook);

    let test_app = TestAppBuilder::new()
        .with_repository(repository)
        .with_source(source.clone())
        .with_channel(Arc::new(webhook.clone()))
        .start()
        .await
        .unwrap();

    wait_ticks(1).await;
    assert_eq!(source.queries().len(), 2);
    let calls = webhook.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "shop");

    test_app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_tick_does_not_stop_the_scheduler() {
    let repository = Arc::new(StaticRepository::new(vec![create_test_app("shop", false, false, true)]));
    let source = Arc::new(
        ScriptedAlarmSource::new()
            .with_batch("shop", attack_batch(1, 1))
            .panic_for("shop"),
    );
    let webhook = RecordingChannel::new(ChannelKind::Webhook);

    let test_app = TestAppBuilder::new()
        .with_repository(repository)
        .with_source(source.clone())
        .with_channel(Arc::new(webhook.clone()))
        .start()
        .await
        .unwrap();

    wait_ticks(1).await;
    assert_eq!(webhook.call_count(), 0);

    source.clear_panics();
    wait_ticks(1).await;
    assert_eq!(webhook.call_count(), 1);

    test_app.shutdown(Duration::from_secs(5)).await.unwrap();
}
