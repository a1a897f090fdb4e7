//! Wiring of the service, decoupled from the entry point.

use crate::{
    config::Config,
    core::AlarmBatch,
    internal_metrics::{Metrics, MetricsBuilder},
    notification::{
        dispatcher::{AlarmDispatcher, DispatchReport},
        AlarmChannel,
    },
    scheduler::AlarmScheduler,
    source::{
        file_repo::FileApplicationRepository, search::SearchAlarmSource, AlarmSource,
        ApplicationRepository,
    },
    task_manager::TaskManager,
};
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, Barrier};
use tracing::{info, instrument, warn};

/// A handle to the running service.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: Option<SocketAddr>,
    startup_barrier: Option<Arc<Barrier>>,
}

impl App {
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Waits for the shutdown signal, then for every task to finish.
    pub async fn run(self) -> Result<()> {
        if let Some(barrier) = &self.startup_barrier {
            barrier.wait().await;
        }

        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        // A dropped sender also means shutdown.
        shutdown_rx.changed().await.ok();
        info!("Shutdown signal received. Waiting for tasks to complete...");

        let panicked = self.task_manager.shutdown().await;
        if !panicked.is_empty() {
            return Err(anyhow!("tasks failed during shutdown: {:?}", panicked));
        }
        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the service.
///
/// Collaborators can be replaced before `build` so tests run the real
/// scheduler against fakes.
pub struct AppBuilder {
    config: Config,
    repository_override: Option<Arc<dyn ApplicationRepository>>,
    source_override: Option<Arc<dyn AlarmSource>>,
    channels_override: Option<Vec<Arc<dyn AlarmChannel>>>,
    metrics_override: Option<Metrics>,
    initial_watermark: Option<i64>,
    startup_barrier: Option<Arc<Barrier>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            repository_override: None,
            source_override: None,
            channels_override: None,
            metrics_override: None,
            initial_watermark: None,
            startup_barrier: None,
        }
    }

    pub fn repository_override(mut self, repository: Arc<dyn ApplicationRepository>) -> Self {
        self.repository_override = Some(repository);
        self
    }

    pub fn source_override(mut self, source: Arc<dyn AlarmSource>) -> Self {
        self.source_override = Some(source);
        self
    }

    /// Replaces the mail, chat bot and webhook channels.
    pub fn channels_override(mut self, channels: Vec<Arc<dyn AlarmChannel>>) -> Self {
        self.channels_override = Some(channels);
        self
    }

    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Starts the scheduler's watermark at `watermark_ms` instead of now.
    pub fn initial_watermark(mut self, watermark_ms: i64) -> Self {
        self.initial_watermark = Some(watermark_ms);
        self
    }

    pub fn startup_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.startup_barrier = Some(barrier);
        self
    }

    /// Builds every component and spawns the scheduler.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx.clone());

        // 1. Metrics
        let (metrics, metrics_server) = match self.metrics_override {
            Some(metrics) => (metrics, None),
            None => MetricsBuilder::new(config.metrics.clone()).build(shutdown_rx),
        };
        let metrics_addr = metrics_server.map(|(server, addr)| {
            task_manager.spawn("MetricsServer", server.run());
            info!(%addr, "Metrics server listening");
            addr
        });

        // 2. Collaborators
        let repository = match self.repository_override {
            Some(repository) => repository,
            None => default_repository(&config),
        };
        let source = match self.source_override {
            Some(source) => source,
            None => Arc::new(
                SearchAlarmSource::new(&config.source, config.channels.http_timeout())
                    .context("Failed to build the search backend client")?,
            ),
        };

        // 3. Dispatcher
        let dispatcher = Arc::new(match self.channels_override {
            Some(channels) => AlarmDispatcher::new(channels, metrics.clone()),
            None => AlarmDispatcher::from_config(&config, metrics.clone())?,
        });

        // 4. Scheduler
        let mut scheduler = AlarmScheduler::new(&config.alarm, repository, source, dispatcher, metrics);
        if let Some(watermark) = self.initial_watermark {
            scheduler = scheduler.with_watermark(watermark);
        }
        let interval = scheduler.interval();
        task_manager.spawn("AlarmScheduler", scheduler.run(task_manager.get_shutdown_rx()));

        info!(
            interval_secs = interval.as_secs(),
            panel = %config.alarm.panel_base(),
            "AlarmWatch initialized. Watching for attack events..."
        );

        Ok(App {
            task_manager,
            metrics_addr,
            startup_barrier: self.startup_barrier,
        })
    }
}

/// The repository configured under `[source]`.
pub fn default_repository(config: &Config) -> Arc<dyn ApplicationRepository> {
    Arc::new(FileApplicationRepository::new(
        config.source.applications_file.clone(),
    ))
}

/// Pushes the canned test alarm through every enabled channel of one
/// application and returns the per-channel outcomes.
#[instrument(skip(repository, dispatcher))]
pub async fn send_test_alarm(
    repository: &dyn ApplicationRepository,
    dispatcher: &AlarmDispatcher,
    app_id: &str,
) -> Result<DispatchReport> {
    let app = repository
        .find_application(app_id)
        .await?
        .ok_or_else(|| anyhow!("application {} does not exist", app_id))?;
    if !app.any_channel_enabled() {
        warn!(app_id, app_name = %app.name, "Application has no alarm channel enabled");
    }
    Ok(dispatcher.dispatch(&app, AlarmBatch::default(), true).await)
}
