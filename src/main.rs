//! Service supervisor daemon.
//!
//! # Service Tree
//!
//! ```text
//!                 supervisor (group)
//!        ┌────────────┼─────────────┐
//!        ▼            ▼             ▼
//!     logger        httpc         httpd
//!        │       (reqwest pool)  (axum: /healthz, /stats)
//!        ▼
//!   sink-<host>...
//!   (one per network log output)
//! ```
//!
//! # Signals
//!
//! - SIGINT cancels the root token: every node is closed right away
//! - SIGTERM runs a graceful shutdown, bounded by `shutdown.grace_period`
//!
//! Statistics of the whole tree are collected every
//! `http_server.monitor_interval`, served on `/stats` and, with
//! `--metrics`, exported to Prometheus.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use service_supervisor::config::{load_config, SupervisorConfig};
use service_supervisor::http::{HttpClient, HttpServer};
use service_supervisor::lifecycle::signals::{wait_for_signal, Signal};
use service_supervisor::lifecycle::{self, Service, ServiceError, ServiceGroup};
use service_supervisor::observability::{metrics, LoggerService, SinkRegistry};

const ROOT: &str = "supervisor";

type Snapshot = HashMap<String, f64>;

#[derive(Debug, Parser)]
#[command(name = "supervisor", version, about = "Runs a tree of long-lived services")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    metrics: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SupervisorConfig::default(),
    };

    // Install logging before any node span exists.
    let registry = SinkRegistry::with_client_config(config.http_client.clone());
    let logger = Arc::new(LoggerService::build(&config.logging, &registry)?);
    logger.install();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "supervisor starting");
    tracing::info!(
        addr = %config.http_server.addr,
        outputs = ?config.logging.outputs,
        monitor_interval = %config.http_server.monitor_interval,
        "Configuration loaded"
    );

    if let Some(addr) = cli.metrics {
        metrics::init_metrics(addr);
    }

    let (stats_tx, stats_rx) = watch::channel(Snapshot::new());

    let httpc = Arc::new(HttpClient::new(config.http_client.clone()));
    let httpd = Arc::new(HttpServer::new(config.http_server.clone()).with_router(router(stats_rx)));

    let root = Arc::new(ServiceGroup::new(ROOT));
    root.append_service(logger.name(), Some(logger.clone()));
    root.append_service(httpc.name(), Some(httpc.clone()));
    root.append_service(httpd.name(), Some(httpd.clone()));
    let root: Arc<dyn Service> = root;

    let token = CancellationToken::new();
    if let Err(e) = lifecycle::do_open(Arc::clone(&root), token.clone(), Span::current()).await {
        report(&e);
        return Err(e.into());
    }

    let monitor = tokio::spawn(monitor(
        Arc::clone(&root),
        stats_tx,
        config.http_server.monitor_interval.as_std(),
    ));

    match wait_for_signal().await? {
        Signal::Interrupt => {
            tracing::info!("Interrupt received, closing");
            token.cancel();
        }
        Signal::Terminate => {
            tracing::info!("Terminate received, shutting down gracefully");
            let grace = config.shutdown.grace_period.as_std();
            let shutdown = tokio::spawn(lifecycle::do_shutdown(Arc::clone(&root)));
            match tokio::time::timeout(grace, shutdown).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Shutdown task failed"),
                Err(_) => {
                    tracing::error!(grace_period = %config.shutdown.grace_period, "Graceful shutdown timed out");
                    return Err("graceful shutdown timed out".into());
                }
            }
        }
    }

    root.closed().wait().await;
    root.base().join_watcher().await;
    let _ = monitor.await;

    if let Some(e) = root.last_error() {
        report(&e);
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log one line per failing node.
fn report(err: &ServiceError) {
    for failure in err.failures() {
        tracing::error!(
            phase = ?failure.phase,
            path = %failure.path.join("."),
            error = %failure.error,
            "Service failed"
        );
    }
}

fn router(stats: watch::Receiver<Snapshot>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/stats", get(stats_handler))
        .with_state(stats)
}

async fn stats_handler(State(stats): State<watch::Receiver<Snapshot>>) -> Json<Snapshot> {
    Json(stats.borrow().clone())
}

/// Collect and publish statistics until the tree is closed.
async fn monitor(root: Arc<dyn Service>, tx: watch::Sender<Snapshot>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    let closed = root.closed();

    loop {
        tokio::select! {
            _ = closed.clone().wait() => break,
            _ = ticker.tick() => {
                let snapshot = lifecycle::collect_statistics(root.as_ref());
                metrics::publish(&snapshot);
                tx.send_replace(snapshot);
            }
        }
    }
}
