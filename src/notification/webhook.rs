//! A client for posting alarms to user-supplied webhook URLs.

use crate::core::{Alarm, Application, ChannelKind};
use crate::formatting::AlarmRenderer;
use crate::notification::error::ChannelError;
use crate::notification::AlarmChannel;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// The webhook alarm channel.
pub struct WebhookChannel {
    client: reqwest::Client,
    renderer: Arc<AlarmRenderer>,
}

impl WebhookChannel {
    pub fn new(timeout: Duration, renderer: Arc<AlarmRenderer>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, renderer })
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<(), ChannelError> {
        let failed = |reason: String| ChannelError::WebhookDeliveryFailed {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| failed(format!("with error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!(
                "with status code: {}, body: {}",
                status.as_u16(),
                text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AlarmChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn is_enabled(&self, app: &Application) -> bool {
        app.http_alarm_conf.enable
    }

    /// Posts the payload to each configured URL in order. Delivery stops at
    /// the first URL that fails; the remaining URLs are not attempted.
    #[instrument(skip_all, fields(app_id = %app.id, channel = "webhook"))]
    async fn push(&self, app: &Application, alarm: &Alarm) -> Result<(), ChannelError> {
        let conf = &app.http_alarm_conf;
        if !conf.is_usable() {
            error!(app_name = %app.name, "Failed to push webhook alarm: no receiver address");
            return Err(ChannelError::ConfigInvalid(
                "at least one webhook url is required".to_string(),
            ));
        }

        let body = serde_json::to_value(self.renderer.webhook_payload(app, alarm))
            .map_err(|e| ChannelError::Render(e.to_string()))?;

        for url in &conf.recv_addr {
            if let Err(e) = self.post(url, &body).await {
                error!(app_name = %app.name, %url, error = %e, "Failed to push webhook alarm");
                return Err(e);
            }
            debug!(%url, "Webhook accepted alarm");
        }

        info!(app_name = %app.name, urls = conf.recv_addr.len(), "Succeeded in pushing webhook alarm");
        Ok(())
    }
}
