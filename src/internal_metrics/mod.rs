//! # Internal Metrics Module
//!
//! Collection and exposure of the alarm pipeline's own metrics.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: Installs the Prometheus recorder and prepares the
//!   `/metrics` server when metrics are enabled.
//!
//! - **`Metrics`**: A cloneable handle with high-level methods for the
//!   scheduler and dispatcher to record ticks, source failures and deliveries.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum` server exposing
//!   the `/metrics` endpoint.

use crate::config::MetricsConfig;
use crate::core::ChannelKind;
use crate::internal_metrics::server::MetricsServer;
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

/// The public API for the metrics system.
#[derive(Clone)]
pub struct Metrics {
    pub alarm_ticks_total: Counter,
    pub alarm_tick_duration_seconds: Histogram,
    pub alarm_source_failures_total: Counter,
    pub alarm_events_found_total: Counter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Metrics {
    /// Registers descriptions for every metric with the global recorder and
    /// returns handles to the unlabeled ones.
    pub fn new() -> Self {
        metrics::describe_counter!("alarm_ticks_total", Unit::Count, "Total number of scheduler ticks that ran to completion.");
        metrics::describe_histogram!("alarm_tick_duration_seconds", Unit::Seconds, "Time taken by one scheduler tick, including every dispatch it triggered.");
        metrics::describe_counter!("alarm_source_failures_total", Unit::Count, "Total number of failed application listings or attack event queries.");
        metrics::describe_counter!("alarm_events_found_total", Unit::Count, "Total number of attack events counted across all windows.");
        metrics::describe_counter!("alarm_deliveries_total", Unit::Count, "Total number of channel deliveries, labeled by channel and outcome.");
        metrics::describe_histogram!("alarm_delivery_duration_seconds", Unit::Seconds, "Time taken by one channel delivery, labeled by channel.");

        Self {
            alarm_ticks_total: metrics::counter!("alarm_ticks_total"),
            alarm_tick_duration_seconds: metrics::histogram!("alarm_tick_duration_seconds"),
            alarm_source_failures_total: metrics::counter!("alarm_source_failures_total"),
            alarm_events_found_total: metrics::counter!("alarm_events_found_total"),
        }
    }

    /// Creates a `Metrics` instance that performs no operations.
    pub fn disabled() -> Self {
        Self {
            alarm_ticks_total: Counter::noop(),
            alarm_tick_duration_seconds: Histogram::noop(),
            alarm_source_failures_total: Counter::noop(),
            alarm_events_found_total: Counter::noop(),
        }
    }

    /// Records the outcome and latency of one channel delivery.
    pub fn record_delivery(&self, channel: ChannelKind, outcome: &'static str, elapsed: Duration) {
        metrics::counter!("alarm_deliveries_total", "channel" => channel.as_str(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!("alarm_delivery_duration_seconds", "channel" => channel.as_str())
            .record(elapsed.as_secs_f64());
    }
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and returns a `Metrics` handle plus
    /// the server to spawn.
    ///
    /// Any failure while setting up is logged and degrades to a disabled
    /// `Metrics` handle with no server.
    pub fn build(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if !self.config.enabled {
            return (Metrics::disabled(), None);
        }

        let builder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        ) {
            Ok(builder) => builder,
            Err(e) => {
                error!(error = %e, "Failed to configure histogram buckets");
                return (Metrics::disabled(), None);
            }
        };
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        let (listener, addr) = match bind_listener(&self.config.listen_address) {
            Ok(pair) => pair,
            Err(e) => {
                error!(address = %self.config.listen_address, error = %e, "Failed to bind metrics server");
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!(error = %e, "Failed to install Prometheus recorder");
            return (Metrics::disabled(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, shutdown_rx);
        (metrics, Some((server, addr)))
    }
}

fn bind_listener(address: &SocketAddr) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = std::net::TcpListener::bind(address)?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    Ok((TcpListener::from_std(listener)?, addr))
}

pub mod server;
