//! The periodic alarm scan.
//!
//! `AlarmScheduler` owns the watermark: the exclusive upper bound, in epoch
//! milliseconds, of the time range already scanned. Each tick queries every
//! application for events in `[watermark, now + 1)`, dispatches the ones
//! that found something, then moves the watermark to `now + 1`. Only the
//! scheduler task reads or writes it.

use crate::config::AlarmConfig;
use crate::core::{AlarmBatch, Application};
use crate::internal_metrics::Metrics;
use crate::notification::dispatcher::AlarmDispatcher;
use crate::source::{AlarmSource, ApplicationRepository, TimeWindow};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace, warn};

/// What happened to one application during a tick.
#[derive(Debug)]
enum AppOutcome {
    Quiet,
    Dispatched { failed_channels: usize },
    SourceFailed,
}

/// A summary of one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The range that was scanned.
    pub window: Option<TimeWindow>,
    pub applications: usize,
    pub dispatched: usize,
    pub source_failures: usize,
    pub channel_failures: usize,
    /// The listing failed and the tick was skipped.
    pub skipped: bool,
}

pub struct AlarmScheduler {
    repository: Arc<dyn ApplicationRepository>,
    source: Arc<dyn AlarmSource>,
    dispatcher: Arc<AlarmDispatcher>,
    metrics: Metrics,
    interval: Duration,
    page_size: u32,
    concurrency: usize,
    expiry_check_enabled: bool,
    watermark_ms: i64,
}

impl AlarmScheduler {
    /// Creates a scheduler whose watermark starts at the current time.
    pub fn new(
        config: &AlarmConfig,
        repository: Arc<dyn ApplicationRepository>,
        source: Arc<dyn AlarmSource>,
        dispatcher: Arc<AlarmDispatcher>,
        metrics: Metrics,
    ) -> Self {
        Self {
            repository,
            source,
            dispatcher,
            metrics,
            interval: config.check_interval(),
            page_size: u32::try_from(config.page_size).unwrap_or(u32::MAX).max(1),
            concurrency: config.dispatch_concurrency.max(1),
            expiry_check_enabled: config.expiry_check_enabled,
            watermark_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Replaces the starting watermark.
    pub fn with_watermark(mut self, watermark_ms: i64) -> Self {
        self.watermark_ms = watermark_ms;
        self
    }

    pub fn watermark(&self) -> i64 {
        self.watermark_ms
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs ticks on the configured interval until the shutdown signal
    /// changes. A tick in progress is always finished first.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            watermark = self.watermark_ms,
            "Alarm scheduler started"
        );
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Alarm scheduler received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_tick(Utc::now().timestamp_millis()).await;
                    if self.expiry_check_enabled {
                        self.check_expiring_agents().await;
                    }
                }
            }
        }
        info!(watermark = self.watermark_ms, "Alarm scheduler stopped.");
    }

    /// Runs one tick, containing any panic raised inside it.
    ///
    /// A panicking tick leaves the watermark where it was, so the same range
    /// is scanned again on the next tick.
    pub async fn run_tick(&mut self, now_ms: i64) -> Option<TickReport> {
        let started = Instant::now();
        match AssertUnwindSafe(self.tick(now_ms)).catch_unwind().await {
            Ok(report) => {
                if !report.skipped {
                    self.metrics.alarm_ticks_total.increment(1);
                    self.metrics
                        .alarm_tick_duration_seconds
                        .record(started.elapsed().as_secs_f64());
                }
                Some(report)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| panic.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                error!(reason, watermark = self.watermark_ms, "Failed to handle alarm tick");
                None
            }
        }
    }

    /// Scans `[watermark, now_ms + 1)` for every application.
    ///
    /// When the clock is behind the watermark the window shrinks to the
    /// single millisecond at the watermark, so the watermark still moves
    /// forward by at least one.
    #[instrument(skip(self), fields(watermark = self.watermark_ms))]
    pub async fn tick(&mut self, now_ms: i64) -> TickReport {
        let apps = match self.repository.list_applications().await {
            Ok(apps) => apps,
            Err(e) => {
                self.metrics.alarm_source_failures_total.increment(1);
                error!(error = %e, "Failed to get apps for the alarm, skipping tick");
                return TickReport {
                    skipped: true,
                    ..Default::default()
                };
            }
        };

        if now_ms < self.watermark_ms {
            warn!(now_ms, watermark = self.watermark_ms, "Clock is behind the watermark");
        }
        let until = (now_ms + 1).max(self.watermark_ms + 1);
        let window = TimeWindow::new(self.watermark_ms, until);
        let apps = unique_by_id(apps);

        let mut report = TickReport {
            window: Some(window),
            applications: apps.len(),
            ..Default::default()
        };

        let outcomes: Vec<AppOutcome> = {
            let this = &*self;
            stream::iter(apps)
                .map(|app| async move { this.process_application(&app, window).await })
                .buffer_unordered(this.concurrency)
                .collect()
                .await
        };

        for outcome in outcomes {
            match outcome {
                AppOutcome::Quiet => {}
                AppOutcome::Dispatched { failed_channels } => {
                    report.dispatched += 1;
                    report.channel_failures += failed_channels;
                }
                AppOutcome::SourceFailed => report.source_failures += 1,
            }
        }

        self.watermark_ms = until;
        debug!(
            applications = report.applications,
            dispatched = report.dispatched,
            source_failures = report.source_failures,
            watermark = self.watermark_ms,
            "Alarm tick finished"
        );
        report
    }

    async fn process_application(&self, app: &Application, window: TimeWindow) -> AppOutcome {
        let batch: AlarmBatch = match self
            .source
            .query_attack_events(&app.id, window, 1, self.page_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                self.metrics.alarm_source_failures_total.increment(1);
                error!(app_id = %app.id, app_name = %app.name, error = %e, "Failed to get alarm from the event source");
                return AppOutcome::SourceFailed;
            }
        };

        if batch.is_empty() {
            trace!(app_id = %app.id, "No new attack events");
            return AppOutcome::Quiet;
        }

        self.metrics.alarm_events_found_total.increment(batch.total as u64);
        info!(app_id = %app.id, app_name = %app.name, total = batch.total, "Found new attack events");
        let report = self.dispatcher.dispatch(app, batch, false).await;
        AppOutcome::Dispatched {
            failed_channels: report.failures().count(),
        }
    }

    /// Hook for flagging agents whose heartbeat has gone stale. Nothing is
    /// checked yet.
    pub async fn check_expiring_agents(&self) {
        trace!("Expiring agent check has nothing to do");
    }
}

/// Drops later duplicates so no application is dispatched twice in a tick.
fn unique_by_id(apps: Vec<Application>) -> Vec<Application> {
    let mut seen = HashSet::new();
    apps.into_iter()
        .filter(|app| {
            let first = seen.insert(app.id.clone());
            if !first {
                warn!(app_id = %app.id, "Duplicate application id, ignoring repeat");
            }
            first
        })
        .collect()
}
