//! Core domain types for AlarmWatch
//!
//! This module defines the application record with its three alarm channel
//! blocks, the batch of attack events that one notification is built from,
//! and the canned record used for administrator test alarms.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

/// An attack event as returned by the search backend. The record is opaque
/// apart from its timestamp field.
pub type EventRecord = Map<String, Value>;

/// A monitored application and its alarm channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Application {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email_alarm_conf: MailChannelConfig,
    #[serde(default)]
    pub ding_alarm_conf: ChatBotChannelConfig,
    #[serde(default)]
    pub http_alarm_conf: WebhookChannelConfig,
}

impl Application {
    /// Returns `true` if at least one alarm channel is switched on.
    pub fn any_channel_enabled(&self) -> bool {
        self.email_alarm_conf.enable || self.ding_alarm_conf.enable || self.http_alarm_conf.enable
    }
}

/// Mail channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MailChannelConfig {
    #[serde(default)]
    pub enable: bool,
    /// Mail server address in `host:port` form.
    #[serde(default)]
    pub server_addr: String,
    #[serde(default)]
    pub username: String,
    /// An empty password means the session is not authenticated.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub recv_addr: Vec<String>,
    /// Connect with TLS directly instead of upgrading via STARTTLS.
    #[serde(default)]
    pub tls_enable: bool,
}

impl MailChannelConfig {
    pub fn is_usable(&self) -> bool {
        !self.server_addr.is_empty() && !self.recv_addr.is_empty()
    }
}

/// Enterprise chat bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatBotChannelConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub corp_id: String,
    #[serde(default)]
    pub corp_secret: String,
    #[serde(default)]
    pub recv_user: Vec<String>,
    #[serde(default)]
    pub recv_party: Vec<String>,
}

impl ChatBotChannelConfig {
    /// All three identifiers are set and there is at least one recipient.
    pub fn is_usable(&self) -> bool {
        !self.corp_id.is_empty()
            && !self.corp_secret.is_empty()
            && !self.agent_id.is_empty()
            && !(self.recv_user.is_empty() && self.recv_party.is_empty())
    }
}

/// Generic outbound webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WebhookChannelConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub recv_addr: Vec<String>,
}

impl WebhookChannelConfig {
    pub fn is_usable(&self) -> bool {
        !self.recv_addr.is_empty()
    }
}

/// The three notification channels an application can configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Mail,
    ChatBot,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Mail => "mail",
            ChannelKind::ChatBot => "chatbot",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The total number of matching attack events in a window plus a bounded,
/// ordered sample of them.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AlarmBatch {
    pub total: i64,
    pub records: Vec<EventRecord>,
}

impl AlarmBatch {
    pub fn new(total: i64, records: Vec<EventRecord>) -> Self {
        Self { total, records }
    }

    /// The number of events that were counted but not included in the sample.
    pub fn elided(&self) -> i64 {
        (self.total - self.records.len() as i64).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total <= 0
    }

    /// The canned single-record batch used for test alarms.
    pub fn test_sample() -> Self {
        let records = vec![test_alarm_record().clone()];
        Self {
            total: records.len() as i64,
            records,
        }
    }
}

/// One alarm as handed to a channel: the batch to report and whether it is
/// an administrator test.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub batch: AlarmBatch,
    pub is_test: bool,
}

impl Alarm {
    pub fn scheduled(batch: AlarmBatch) -> Self {
        Self {
            batch,
            is_test: false,
        }
    }

    pub fn test() -> Self {
        Self {
            batch: AlarmBatch::test_sample(),
            is_test: true,
        }
    }
}

/// The canned attack event. Its `event_time` is fixed the first time it is
/// requested so repeated test alarms render identically.
pub fn test_alarm_record() -> &'static EventRecord {
    static RECORD: OnceLock<EventRecord> = OnceLock::new();
    RECORD.get_or_init(|| {
        let mut record = Map::new();
        record.insert(
            "event_time".into(),
            Value::from(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        record.insert("attack_source".into(), Value::from("220.181.57.191"));
        record.insert("target".into(), Value::from("localhost"));
        record.insert("attack_type".into(), Value::from("sql"));
        record.insert("intercept_state".into(), Value::from("block"));
        record
    })
}
