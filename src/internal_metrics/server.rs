//! # Metrics Server
//!
//! An `axum` server exposing the Prometheus recorder's state on `/metrics`.
//! It stops serving when the shutdown signal flips.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

pub struct MetricsServer {
    listener: TcpListener,
    prom_handle: PrometheusHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    pub fn new(
        listener: TcpListener,
        prom_handle: PrometheusHandle,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            prom_handle,
            shutdown_rx,
        }
    }

    /// Returns a future that serves scrapes until shutdown.
    pub fn run(self) -> impl Future<Output = ()> {
        let Self {
            listener,
            prom_handle,
            mut shutdown_rx,
        } = self;
        let app = Router::new().route("/metrics", get(move || async move { prom_handle.render() }));

        async move {
            let shutdown = async move {
                // Either a value change or the sender going away ends serving.
                let _ = shutdown_rx.changed().await;
                trace!("Metrics server received shutdown signal.");
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "Metrics server error");
            }
            trace!("Metrics server task finished.");
        }
    }
}
