//! Graceful shutdown of the running service.

use alarmwatch::core::{AlarmBatch, ChannelKind};
use alarmwatch::notification::test_utils::RecordingChannel;
use alarmwatch::source::test_utils::StaticRepository;
use alarmwatch::source::{AlarmSource, SourceError, TimeWindow};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{app::TestAppBuilder, attack_batch, create_test_app};

/// A source whose queries block until released.
struct GatedSource {
    started: Notify,
    release: Notify,
    queries: AtomicUsize,
}

impl GatedSource {
    fn new() -> Self {
        Self {
            started: Notify::new(),
            release: Notify::new(),
            queries: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AlarmSource for GatedSource {
    async fn query_attack_events(
        &self,
        _app_id: &str,
        _window: TimeWindow,
        _page: u32,
        _page_size: u32,
    ) -> Result<AlarmBatch, SourceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(attack_batch(1, 1))
    }
}

#[tokio::test]
async fn test_idle_service_shuts_down_promptly() {
    let test_app = TestAppBuilder::new()
        .with_repository(Arc::new(StaticRepository::new(vec![])))
        .start()
        .await
        .unwrap();

    let result = test_app.shutdown(Duration::from_secs(5)).await;
    assert!(result.is_ok(), "service should stop cleanly: {result:?}");
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_tick_finishes_before_exit() {
    let repository = Arc::new(StaticRepository::new(vec![create_test_app("shop", false, false, true)]));
    let source = Arc::new(GatedSource::new());
    let webhook = RecordingChannel::new(ChannelKind::Webhook);

    let test_app = TestAppBuilder::new()
        .with_repository(repository)
        .with_source(source.clone())
        .with_channel(Arc::new(webhook.clone()))
        .start()
        .await
        .unwrap();

    // Wait until the first tick is blocked inside the source query.
    source.started.notified().await;

    test_app.shutdown_tx.send(true).unwrap();
    let handle = test_app.app_handle.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished(), "shutdown waits for the in-flight tick");

    source.release.notify_one();
    handle.await.unwrap().unwrap();

    assert_eq!(source.queries.load(Ordering::SeqCst), 1);
    assert_eq!(webhook.call_count(), 1, "the in-flight tick still dispatched");
}
