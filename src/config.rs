//! Configuration management for AlarmWatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to load configuration from an `alarmwatch.toml` file and merge it
//! with environment variables and command-line arguments.

use crate::cli::Cli;
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// The shortest interval the scheduler may run at.
pub const MIN_CHECK_INTERVAL_SECONDS: u64 = 10;

const DEFAULT_CONFIG_FILE: &str = "alarmwatch.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoreConfig {
    /// The logging level for the application.
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Configuration for the alarm scheduler.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlarmConfig {
    /// Seconds between two scans of the attack-event backend.
    pub check_interval_seconds: u64,
    /// Base URL of the management panel, used for dashboard deep links.
    pub panel_server_url: String,
    /// Maximum number of sample events included in one notification.
    pub page_size: usize,
    /// Number of applications processed concurrently within one tick.
    pub dispatch_concurrency: usize,
    /// Run the expiring-agent check after each alarm tick.
    pub expiry_check_enabled: bool,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 120,
            panel_server_url: String::new(),
            page_size: 10,
            dispatch_concurrency: 4,
            expiry_check_enabled: true,
        }
    }
}

impl AlarmConfig {
    /// The tick period, clamped to the minimum interval.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds.max(MIN_CHECK_INTERVAL_SECONDS))
    }

    /// The panel URL without a trailing slash.
    pub fn panel_base(&self) -> &str {
        self.panel_server_url.trim_end_matches('/')
    }
}

/// Configuration shared by the notification channels.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChannelsConfig {
    /// Connect and read timeout for the chat bot and webhook channels.
    pub http_timeout_seconds: u64,
    /// Timeout for establishing the mail server connection.
    pub mail_dial_timeout_seconds: u64,
    /// Timeout for one complete mail session after the connection is up.
    pub mail_session_timeout_seconds: u64,
    /// Base URL of the chat bot gateway.
    pub chatbot_base_url: String,
    /// Whether to accept invalid TLS certificates from mail servers (for testing).
    pub mail_accept_invalid_certs: bool,
    /// Optional Handlebars template overriding the built-in mail digest.
    pub mail_template_path: Option<PathBuf>,
    /// Identity sent in the EHLO/HELO greeting.
    pub hello_name: String,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            http_timeout_seconds: 10,
            mail_dial_timeout_seconds: 30,
            mail_session_timeout_seconds: 30,
            chatbot_base_url: "https://oapi.dingtalk.com".to_string(),
            mail_accept_invalid_certs: false,
            mail_template_path: None,
            hello_name: "localhost".to_string(),
        }
    }
}

impl ChannelsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn mail_dial_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_dial_timeout_seconds)
    }

    pub fn mail_session_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_session_timeout_seconds)
    }
}

/// Configuration for the application list and the attack-event backend.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// YAML file holding the monitored applications.
    pub applications_file: PathBuf,
    /// Base URL of the attack-event search backend.
    pub search_url: String,
    /// Per-application index names are `<index_prefix>-<app id>`.
    pub index_prefix: String,
    /// The event field holding the attack timestamp.
    pub timestamp_field: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            applications_file: PathBuf::from("applications.yml"),
            search_url: "http://127.0.0.1:9200".to_string(),
            index_prefix: "real-openrasp-attack-alarm".to_string(),
            timestamp_field: "event_time".to_string(),
        }
    }
}

/// Configuration for the Prometheus metrics endpoint.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

impl Config {
    /// Loads the configuration by layering defaults, the TOML file,
    /// `ALARMWATCH_` environment variables and command-line arguments.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_file = cli
            .config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            // e.g. ALARMWATCH_ALARM__CHECK_INTERVAL_SECONDS=30
            .merge(Env::prefixed("ALARMWATCH_").split("__"))
            .merge(cli.clone())
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.alarm.check_interval_seconds == 0 {
            bail!("alarm.check_interval_seconds must be greater than 0");
        }
        if self.alarm.panel_server_url.trim().is_empty() {
            bail!("alarm.panel_server_url can not be empty");
        }
        if self.alarm.page_size == 0 {
            bail!("alarm.page_size must be greater than 0");
        }
        Ok(())
    }

    /// Describes the values that are adjusted at runtime.
    ///
    /// Loading happens before logging is set up, so the caller logs these
    /// once its subscriber is installed.
    pub fn adjustments(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.alarm.check_interval_seconds < MIN_CHECK_INTERVAL_SECONDS {
            notes.push(format!(
                "alarm.check_interval_seconds is {}, less than {}, it will be set to {}",
                self.alarm.check_interval_seconds, MIN_CHECK_INTERVAL_SECONDS, MIN_CHECK_INTERVAL_SECONDS
            ));
        }
        if self.alarm.dispatch_concurrency == 0 {
            notes.push("alarm.dispatch_concurrency is 0, it will be set to 1".to_string());
        }
        notes
    }

    /// Logs every entry of [`Config::adjustments`] as a warning.
    pub fn warn_adjustments(&self) {
        for note in self.adjustments() {
            warn!("{}", note);
        }
    }
}
