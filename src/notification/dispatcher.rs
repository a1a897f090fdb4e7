//! Fan-out of one alarm to every channel an application has switched on.

use crate::config::Config;
use crate::core::{Alarm, AlarmBatch, Application, ChannelKind};
use crate::formatting::AlarmRenderer;
use crate::internal_metrics::Metrics;
use crate::notification::chatbot::ChatBotChannel;
use crate::notification::error::ChannelError;
use crate::notification::mail::{MailChannel, MailSettings};
use crate::notification::webhook::WebhookChannel;
use crate::notification::AlarmChannel;
use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// The outcome of one dispatch pass: one entry per channel that was attempted.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<(ChannelKind, Result<(), ChannelError>)>,
}

impl DispatchReport {
    /// Returns `true` when no channel was attempted.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, result)| result.is_ok())
    }

    pub fn attempted(&self) -> Vec<ChannelKind> {
        self.outcomes.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (ChannelKind, &ChannelError)> {
        self.outcomes
            .iter()
            .filter_map(|(kind, result)| result.as_ref().err().map(|e| (*kind, e)))
    }

    /// Collapses the report into the first channel failure, if any.
    pub fn into_result(self) -> Result<(), ChannelError> {
        self.outcomes
            .into_iter()
            .find_map(|(_, result)| result.err())
            .map_or(Ok(()), Err)
    }
}

/// Delivers alarms through a fixed set of channels.
pub struct AlarmDispatcher {
    channels: Vec<Arc<dyn AlarmChannel>>,
    metrics: Metrics,
}

impl AlarmDispatcher {
    pub fn new(channels: Vec<Arc<dyn AlarmChannel>>, metrics: Metrics) -> Self {
        Self { channels, metrics }
    }

    /// Builds the mail, chat bot and webhook channels from configuration.
    pub fn from_config(config: &Config, metrics: Metrics) -> Result<Self> {
        let panel_base = config.alarm.panel_base();
        let renderer = match &config.channels.mail_template_path {
            Some(path) => AlarmRenderer::from_template_file(panel_base, path),
            None => AlarmRenderer::new(panel_base),
        }
        .context("Failed to prepare the alarm renderer")?;
        let renderer = Arc::new(renderer);

        let channels = &config.channels;
        let mail = MailChannel::new(renderer.clone(), MailSettings::from(channels));
        let chatbot = ChatBotChannel::new(
            &channels.chatbot_base_url,
            channels.http_timeout(),
            renderer.clone(),
        )
        .context("Failed to build the chat bot HTTP client")?;
        let webhook = WebhookChannel::new(channels.http_timeout(), renderer)
            .context("Failed to build the webhook HTTP client")?;

        Ok(Self::new(
            vec![Arc::new(mail), Arc::new(chatbot), Arc::new(webhook)],
            metrics,
        ))
    }

    /// Pushes the batch to every enabled channel of `app`.
    ///
    /// When `is_test` is set the batch is ignored and the canned test record
    /// is sent instead. Channels run concurrently and a failing channel never
    /// keeps the others from being attempted.
    #[instrument(skip_all, fields(app_id = %app.id, is_test = is_test))]
    pub async fn dispatch(&self, app: &Application, batch: AlarmBatch, is_test: bool) -> DispatchReport {
        let alarm = if is_test {
            Alarm::test()
        } else {
            Alarm::scheduled(batch)
        };

        let enabled: Vec<_> = self
            .channels
            .iter()
            .filter(|channel| channel.is_enabled(app))
            .collect();
        if enabled.is_empty() {
            debug!(app_name = %app.name, "No alarm channel enabled, nothing to dispatch");
            return DispatchReport::default();
        }

        let pushes = enabled.into_iter().map(|channel| {
            let alarm = &alarm;
            async move {
                let kind = channel.kind();
                let started = Instant::now();
                let result = channel.push(app, alarm).await;
                let outcome = match &result {
                    Ok(()) => "success",
                    Err(e) => e.kind(),
                };
                self.metrics.record_delivery(kind, outcome, started.elapsed());
                (kind, result)
            }
        });
        let report = DispatchReport {
            outcomes: join_all(pushes).await,
        };

        for (kind, e) in report.failures() {
            error!(app_name = %app.name, channel = %kind, error = %e, "Alarm delivery failed");
        }
        info!(
            app_name = %app.name,
            attempted = report.outcomes.len(),
            failed = report.failures().count(),
            "Alarm dispatch finished"
        );
        report
    }
}
