//! AlarmWatch - attack alarm notifier
//!
//! Scans the attack events recorded for each monitored application on a
//! fixed interval and pushes alarms to mail, chat bot and webhook channels.

use alarmwatch::{
    app::{self, App},
    cli::{Cli, Command},
    config::Config,
    internal_metrics::Metrics,
    notification::dispatcher::AlarmDispatcher,
};
use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.core.log_level);
    config.warn_adjustments();

    let result = match &cli.command {
        Some(Command::TestAlarm { app }) => run_test_alarm(&config, app).await,
        None => run_service(config).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "AlarmWatch failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_service(config: Config) -> Result<bool> {
    info!("AlarmWatch starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.core.log_level);
    info!("Check Interval: {}s", config.alarm.check_interval().as_secs());
    info!("Panel URL: {}", config.alarm.panel_base());
    info!("Applications File: {}", config.source.applications_file.display());
    info!("Search Backend: {}", config.source.search_url);
    info!("Dispatch Concurrency: {}", config.alarm.dispatch_concurrency);
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            config.metrics.listen_address.to_string()
        } else {
            "Disabled".to_string()
        }
    );
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down."),
        }
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("AlarmWatch stopped.");
    Ok(true)
}

/// Sends a test alarm and prints one line per attempted channel.
async fn run_test_alarm(config: &Config, app_id: &str) -> Result<bool> {
    let repository = app::default_repository(config);
    let dispatcher = AlarmDispatcher::from_config(config, Metrics::disabled())?;
    let report = app::send_test_alarm(repository.as_ref(), &dispatcher, app_id).await?;

    if report.is_empty() {
        println!("application {app_id} has no alarm channel enabled");
        return Ok(true);
    }
    for (kind, result) in &report.outcomes {
        match result {
            Ok(()) => println!("{kind}: ok"),
            Err(e) => println!("{kind}: failed: {e}"),
        }
    }
    Ok(report.is_success())
}
