//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus registry and scrape exporter for SEMS."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! One prometheus registry is shared by the daemon and the healing core. This crate
//! owns that registry type, the `/metrics` scrape endpoint, and the daemon's own
//! process metrics.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::core::Collector;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
    TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use prometheus;

/// Scrape path served by [`spawn_exporter`].
pub const METRICS_PATH: &str = "/metrics";

/// Registry handle passed to every component that records metrics.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Register `collector` and hand back a clone for recording.
pub fn register<C>(registry: &Registry, collector: C) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .context("failed to register metric collector")?;
    Ok(collector)
}

/// Serve `registry` on `addr` until [`MetricsExporter::shutdown`] is called.
/// Binding happens before returning so `addr` may use port 0.
pub fn spawn_exporter(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsExporter> {
    let listener = bind(addr)?;
    let bound = listener
        .local_addr()
        .context("failed to resolve metrics listener address")?;
    let app = Router::new()
        .route(METRICS_PATH, get(scrape))
        .with_state(registry);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics exporter stopped with an error")
    });
    info!(address = %bound, path = METRICS_PATH, "metrics exporter listening");

    Ok(MetricsExporter {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task,
    })
}

fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    listener
        .set_nonblocking(true)
        .context("failed to make metrics listener non-blocking")?;
    TcpListener::from_std(listener).context("failed to register metrics listener with tokio")
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    match encode(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT))],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Render every family in the prometheus text exposition format.
pub fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("failed to encode metric families")?;
    String::from_utf8(buffer).context("encoded metrics are not valid UTF-8")
}

/// Running scrape endpoint.
#[derive(Debug)]
pub struct MetricsExporter {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsExporter {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .context("metrics exporter task panicked or was cancelled")?
    }
}

/// Process-level metrics for `semsd`.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "semsd_starts_total",
                "Times the SEMS daemon has initialised",
            ))?,
        )?;
        let config_load_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "semsd_config_load_seconds",
                    "Time spent loading and validating configuration",
                )
                .buckets(prometheus::exponential_buckets(0.001, 2.0, 16)?),
            )?,
        )?;
        let build_info = register(
            &registry,
            GaugeVec::new(
                Opts::new("semsd_build_info", "Version and profile of the running daemon"),
                &["version", "profile"],
            )?,
        )?;
        Ok(Self {
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

impl std::fmt::Debug for DaemonMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonMetrics")
            .field("starts_total", &self.starts_total.get())
            .finish_non_exhaustive()
    }
}
