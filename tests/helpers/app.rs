#![allow(dead_code)]
//! Test helpers for running the full service.

use alarmwatch::{
    app::AppBuilder,
    config::Config,
    internal_metrics::Metrics,
    notification::AlarmChannel,
    source::{AlarmSource, ApplicationRepository},
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::timeout};

/// A running instance of the service.
pub struct TestApp {
    pub shutdown_tx: watch::Sender<bool>,
    pub app_handle: Option<JoinHandle<Result<()>>>,
    metrics_addr: Option<SocketAddr>,
}

impl TestApp {
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Signals shutdown and waits for the service to stop.
    pub async fn shutdown(self, timeout_duration: Duration) -> Result<()> {
        self.shutdown_tx.send(true)?;
        match self.app_handle {
            Some(handle) => match timeout(timeout_duration, handle).await {
                Ok(joined) => joined?,
                Err(_) => Err(anyhow::anyhow!("App failed to shut down within the timeout")),
            },
            None => Ok(()),
        }
    }
}

/// Builds a `TestApp` around fake collaborators.
pub struct TestAppBuilder {
    pub config: Config,
    repository: Option<Arc<dyn ApplicationRepository>>,
    source: Option<Arc<dyn AlarmSource>>,
    channels: Vec<Arc<dyn AlarmChannel>>,
    watermark: Option<i64>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.alarm.panel_server_url = "https://panel.example.com".to_string();
        config.alarm.check_interval_seconds = 10;
        Self {
            config,
            repository: None,
            source: None,
            channels: Vec::new(),
            watermark: None,
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn ApplicationRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn AlarmSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn AlarmChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_watermark(mut self, watermark_ms: i64) -> Self {
        self.watermark = Some(watermark_ms);
        self
    }

    /// Builds the service and returns it with the future that runs it.
    pub async fn build(self) -> Result<(TestApp, BoxFuture<'static, Result<()>>)> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut builder = AppBuilder::new(self.config)
            .channels_override(self.channels)
            .metrics_override(Metrics::disabled());
        if let Some(repository) = self.repository {
            builder = builder.repository_override(repository);
        }
        if let Some(source) = self.source {
            builder = builder.source_override(source);
        }
        if let Some(watermark) = self.watermark {
            builder = builder.initial_watermark(watermark);
        }

        let app = builder.build(shutdown_rx).await?;
        let test_app = TestApp {
            shutdown_tx,
            app_handle: None,
            metrics_addr: app.metrics_addr(),
        };
        Ok((test_app, Box::pin(app.run())))
    }

    /// Builds the service and spawns it.
    pub async fn start(self) -> Result<TestApp> {
        let (mut test_app, app_future) = self.build().await?;
        test_app.app_handle = Some(tokio::spawn(app_future));
        Ok(test_app)
    }
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
