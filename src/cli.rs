//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the `alarmwatch.toml` file and environment variables.

use clap::{Parser, Subcommand};
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Periodically scans attack events per application and pushes alarms to
/// mail, chat bot and webhook channels.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Seconds between alarm checks (values below 10 are raised to 10).
    #[arg(long, value_name = "SECONDS")]
    pub check_interval: Option<u64>,

    /// Base URL of the management panel used in alarm links.
    #[arg(long, value_name = "URL")]
    pub panel_url: Option<String>,

    /// YAML file holding the monitored applications.
    #[arg(long, value_name = "FILE")]
    pub applications_file: Option<PathBuf>,

    /// The logging level (e.g. "info", "debug").
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Send a canned test alarm through every enabled channel of one application.
    TestAlarm {
        /// The application identifier.
        #[arg(long, value_name = "ID")]
        app: String,
    },
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut alarm = Dict::new();
        if let Some(interval) = self.check_interval {
            alarm.insert("check_interval_seconds".into(), Value::from(interval));
        }
        if let Some(url) = &self.panel_url {
            alarm.insert("panel_server_url".into(), Value::from(url.clone()));
        }

        let mut source = Dict::new();
        if let Some(path) = &self.applications_file {
            source.insert(
                "applications_file".into(),
                Value::from(path.to_string_lossy().into_owned()),
            );
        }

        let mut core = Dict::new();
        if let Some(level) = &self.log_level {
            core.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut dict = Dict::new();
        for (key, section) in [("alarm", alarm), ("source", source), ("core", core)] {
            if !section.is_empty() {
                dict.insert(key.into(), Value::from(section));
            }
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
