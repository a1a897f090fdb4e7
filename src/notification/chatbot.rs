//! A client for pushing alarms to the enterprise chat bot gateway.
//!
//! Delivery takes two requests: an access token is exchanged for the corp
//! id and secret, then the message is posted with that token.

use crate::core::{Alarm, Application, ChannelKind, ChatBotChannelConfig};
use crate::formatting::AlarmRenderer;
use crate::notification::error::ChannelError;
use crate::notification::AlarmChannel;
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// The gateway's reply envelope, shared by both endpoints.
#[derive(Debug, Deserialize, Default)]
struct GatewayResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct TextContent<'a> {
    content: &'a str,
}

/// The JSON body of a send request.
#[derive(Debug, Serialize, PartialEq)]
struct SendRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    touser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    toparty: Option<String>,
    agentid: &'a str,
    msgtype: &'static str,
    text: TextContent<'a>,
}

impl<'a> SendRequest<'a> {
    fn new(conf: &'a ChatBotChannelConfig, content: &'a str) -> Self {
        let join = |list: &[String]| (!list.is_empty()).then(|| list.join("|"));
        Self {
            touser: join(&conf.recv_user),
            toparty: join(&conf.recv_party),
            agentid: &conf.agent_id,
            msgtype: "text",
            text: TextContent { content },
        }
    }
}

/// The chat bot alarm channel.
pub struct ChatBotChannel {
    client: reqwest::Client,
    base_url: String,
    renderer: Arc<AlarmRenderer>,
}

impl ChatBotChannel {
    /// Creates a channel talking to the gateway at `base_url`.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        renderer: Arc<AlarmRenderer>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            renderer,
        })
    }

    /// Exchanges the corp credentials for an access token.
    async fn fetch_token(&self, conf: &ChatBotChannelConfig) -> Result<String, ChannelError> {
        let failed = |reason: String| ChannelError::TokenExchangeFailed {
            corp_id: conf.corp_id.clone(),
            reason,
        };

        let response = self
            .client
            .get(format!("{}/gettoken", self.base_url))
            .query(&[("corpid", &conf.corp_id), ("corpsecret", &conf.corp_secret)])
            .send()
            .await
            .map_err(|e| failed(format!("with error: {}", e)))?;

        let body = check_response(response)
            .await
            .map_err(failed)?;
        Ok(body.access_token)
    }

    async fn send_text(
        &self,
        conf: &ChatBotChannelConfig,
        token: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        let failed = |reason: String| ChannelError::SendFailed {
            corp_id: conf.corp_id.clone(),
            reason,
        };

        let response = self
            .client
            .post(format!("{}/message/send", self.base_url))
            .query(&[("access_token", token)])
            .json(&SendRequest::new(conf, content))
            .send()
            .await
            .map_err(|e| failed(format!("with error: {}", e)))?;

        check_response(response).await.map_err(failed)?;
        Ok(())
    }
}

/// Applies the gateway's success rule: HTTP 200 and `errcode == 0`.
async fn check_response(response: reqwest::Response) -> Result<GatewayResponse, String> {
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(format!("with status code: {}", status.as_u16()));
    }
    let body: GatewayResponse = response
        .json()
        .await
        .map_err(|e| format!("with error: {}", e))?;
    if body.errcode != 0 {
        return Err(format!("with errmsg: {}", body.errmsg));
    }
    Ok(body)
}

#[async_trait]
impl AlarmChannel for ChatBotChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::ChatBot
    }

    fn is_enabled(&self, app: &Application) -> bool {
        app.ding_alarm_conf.enable
    }

    #[instrument(skip_all, fields(app_id = %app.id, channel = "chatbot"))]
    async fn push(&self, app: &Application, alarm: &Alarm) -> Result<(), ChannelError> {
        let conf = &app.ding_alarm_conf;
        if !conf.is_usable() {
            error!(app_name = %app.name, "Failed to send chat bot alarm: invalid chat bot alarm conf");
            return Err(ChannelError::ConfigInvalid(
                "corp id, corp secret, agent id and at least one recipient are required".to_string(),
            ));
        }

        let result = async {
            let token = self.fetch_token(conf).await?;
            debug!(corp_id = %conf.corp_id, "Obtained chat bot access token");
            let content = self.renderer.render_chatbot_text(app, alarm, &Local::now());
            self.send_text(conf, &token, &content).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(app_name = %app.name, corp_id = %conf.corp_id, "Succeeded in pushing chat bot alarm");
                Ok(())
            }
            Err(e) => {
                error!(app_name = %app.name, error = %e, "Failed to push chat bot alarm");
                Err(e)
            }
        }
    }
}
