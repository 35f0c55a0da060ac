//! HTTP listener as a tree node.
//!
//! # Responsibilities
//! - Bind the listener on open (bind errors are open failures)
//! - Wire up middleware (tracing, timeout, request ID, request counting)
//! - Stop hard on close, drain in-flight requests on shutdown

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::config::HttpServerConfig;
use crate::lifecycle::{BaseService, BoxError, Service};
use crate::observability::Statistics;

pub const NAME: &str = "httpd";

/// HTTP server node, named `httpd`.
pub struct HttpServer {
    base: BaseService,
    config: HttpServerConfig,
    router: Router,
    local_addr: OnceLock<SocketAddr>,
    graceful: CancellationToken,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    stats: Statistics,
}

impl HttpServer {
    /// Create a server with an empty router.
    pub fn new(config: HttpServerConfig) -> Self {
        Self {
            base: BaseService::new(),
            config,
            router: Router::new(),
            local_addr: OnceLock::new(),
            graceful: CancellationToken::new(),
            task: Mutex::new(None),
            stats: Statistics::new(["requests", "errors"]),
        }
    }

    /// Set the handlers served once the node is open.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// The bound address, once open. Useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Build the router with all middleware layers.
    #[allow(deprecated)]
    fn build_app(&self) -> Router {
        self.router
            .clone()
            .layer(middleware::from_fn_with_state(self.stats.clone(), count_requests))
            .layer(TimeoutLayer::new(self.config.request_timeout.as_std()))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    fn take_task(&self) -> Option<JoinHandle<std::io::Result<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

async fn count_requests(State(stats): State<Statistics>, request: Request, next: Next) -> Response {
    stats.incr("requests", 1.0);
    let response = next.run(request).await;
    if response.status().is_server_error() {
        stats.incr("errors", 1.0);
    }
    response
}

#[async_trait]
impl Service for HttpServer {
    fn name(&self) -> &str {
        NAME
    }

    fn base(&self) -> &BaseService {
        &self.base
    }

    async fn open(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);

        let app = self.build_app();
        let graceful = self.graceful.clone();
        let task = tokio::spawn(
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { graceful.cancelled().await })
                    .await
            }
            .instrument(self.span()),
        );
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        tracing::info!(
            address = %addr,
            request_timeout = %self.config.request_timeout,
            "Listening for connections"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        let Some(task) = self.take_task() else {
            return Ok(());
        };
        task.abort();
        match task.await {
            Ok(Err(e)) => Err(e.into()),
            // Aborted, or it had already finished cleanly.
            _ => Ok(()),
        }
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        let Some(task) = self.take_task() else {
            return Ok(());
        };
        self.graceful.cancel();
        task.await??;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn statistics(&self) -> Option<HashMap<String, f64>> {
        Some(self.stats.export())
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("addr", &self.config.addr)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Duration;
    use axum::http::StatusCode;
    use axum::routing::get;

    fn test_config() -> HttpServerConfig {
        HttpServerConfig {
            addr: "127.0.0.1:0".to_string(),
            request_timeout: Duration::from_millis(200),
            ..HttpServerConfig::default()
        }
    }

    fn test_client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap()
    }

    fn test_router() -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    "late"
                }),
            )
    }

    #[tokio::test]
    async fn test_serves_until_closed() {
        let server = HttpServer::new(test_config()).with_router(test_router());
        assert!(server.local_addr().is_none());

        server.open().await.unwrap();
        let addr = server.local_addr().unwrap();

        let resp = test_client()
            .get(format!("http://{}/ping", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(resp.text().await.unwrap(), "pong");

        server.close().await.unwrap();
        assert!(test_client()
            .get(format!("http://{}/ping", addr))
            .send()
            .await
            .is_err());

        let stats = server.statistics().unwrap();
        assert_eq!(stats["requests"], 1.0);
        assert_eq!(stats["errors"], 0.0);

        // Second close is a no-op.
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let server = HttpServer::new(test_config()).with_router(test_router());
        server.open().await.unwrap();
        let addr = server.local_addr().unwrap();

        let resp = test_client()
            .get(format!("http://{}/slow", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_fails_open() {
        let first = HttpServer::new(test_config());
        first.open().await.unwrap();
        let taken = first.local_addr().unwrap();

        let second = HttpServer::new(HttpServerConfig {
            addr: taken.to_string(),
            ..test_config()
        });
        assert!(second.open().await.is_err());

        first.shutdown().await.unwrap();
    }
}
