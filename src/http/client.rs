//! Outbound HTTP client as a tree node.
//!
//! # Responsibilities
//! - Build the connection pool from [`HttpClientConfig`] on open
//! - Count requests and transport failures
//! - Refuse requests once closed
//!
//! # Design Decisions
//! - `reqwest::Client` is cheap to clone; callers get a clone and the node
//!   keeps the original until close
//! - Close and shutdown both drop the pool; reqwest has no drain step

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::{Client, IntoUrl, Method, Request, RequestBuilder, Response};

use crate::config::HttpClientConfig;
use crate::lifecycle::{BaseService, BoxError, Service};
use crate::observability::Statistics;

pub const NAME: &str = "httpc";

/// Errors returned by [`HttpClient`].
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("http client is not open")]
    NotOpen,
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// Build a `reqwest::Client` from configuration.
pub fn build_client(config: &HttpClientConfig) -> reqwest::Result<Client> {
    let mut builder = Client::builder();

    if let Some(timeout) = config.timeout.non_zero() {
        builder = builder.timeout(timeout);
    }
    if let Some(timeout) = config.connect_timeout.non_zero() {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(idle) = config.idle_conn_timeout.non_zero() {
        builder = builder.pool_idle_timeout(idle);
    }

    // No idle connections means every request dials a fresh one.
    builder = if config.disable_keep_alives {
        builder.pool_max_idle_per_host(0)
    } else {
        builder.pool_max_idle_per_host(config.max_idle_conns_per_host)
    };

    if config.disable_compression {
        builder = builder.no_gzip();
    }
    if !config.proxy_from_env {
        builder = builder.no_proxy();
    }

    builder.build()
}

/// HTTP client node, named `httpc`.
#[derive(Debug)]
pub struct HttpClient {
    base: BaseService,
    config: HttpClientConfig,
    client: RwLock<Option<Client>>,
    stats: Statistics,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Self {
        Self {
            base: BaseService::new(),
            config,
            client: RwLock::new(None),
            stats: Statistics::new(["requests", "failures"]),
        }
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// The live client, if the node is open.
    pub fn client(&self) -> Result<Client, HttpClientError> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(HttpClientError::NotOpen)
    }

    /// Start building a request. Send it with [`HttpClient::execute`] so it
    /// is counted.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> Result<RequestBuilder, HttpClientError> {
        Ok(self.client()?.request(method, url))
    }

    pub async fn get<U: IntoUrl>(&self, url: U) -> Result<Response, HttpClientError> {
        let request = self.request(Method::GET, url)?.build()?;
        self.execute(request).await
    }

    /// Send `request`, counting it and any transport failure.
    pub async fn execute(&self, request: Request) -> Result<Response, HttpClientError> {
        let client = self.client()?;
        self.stats.incr("requests", 1.0);

        match client.execute(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.stats.incr("failures", 1.0);
                tracing::debug!(parent: &self.span(), error = %e, "Request failed");
                Err(e.into())
            }
        }
    }

    fn release(&self) {
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[async_trait]
impl Service for HttpClient {
    fn name(&self) -> &str {
        NAME
    }

    fn base(&self) -> &BaseService {
        &self.base
    }

    async fn open(&self) -> Result<(), BoxError> {
        let client = build_client(&self.config)?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);

        tracing::debug!(
            timeout = %self.config.timeout,
            max_idle_conns_per_host = self.config.max_idle_conns_per_host,
            keep_alive = !self.config.disable_keep_alives,
            "Client ready"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.release();
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        self.release();
        Ok(())
    }

    fn statistics(&self) -> Option<HashMap<String, f64>> {
        Some(self.stats.export())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_fail_until_open() {
        let httpc = HttpClient::new(HttpClientConfig::default());
        assert!(matches!(httpc.client(), Err(HttpClientError::NotOpen)));
        assert!(matches!(
            httpc.get("http://127.0.0.1:1/").await,
            Err(HttpClientError::NotOpen)
        ));

        httpc.open().await.unwrap();
        assert!(httpc.client().is_ok());

        httpc.close().await.unwrap();
        assert!(matches!(httpc.client(), Err(HttpClientError::NotOpen)));

        // Refused requests are not counted.
        assert_eq!(httpc.statistics().unwrap()["requests"], 0.0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_counted() {
        let mut config = HttpClientConfig::default();
        config.proxy_from_env = false;
        config.connect_timeout = crate::config::Duration::from_millis(200);
        let httpc = HttpClient::new(config);
        httpc.open().await.unwrap();

        // Port 1 is reserved; nothing listens there.
        assert!(httpc.get("http://127.0.0.1:1/").await.is_err());

        let stats = httpc.statistics().unwrap();
        assert_eq!(stats["requests"], 1.0);
        assert_eq!(stats["failures"], 1.0);
    }

    #[test]
    fn test_build_client_variants() {
        let mut config = HttpClientConfig::default();
        assert!(build_client(&config).is_ok());

        config.disable_keep_alives = true;
        config.disable_compression = true;
        config.idle_conn_timeout = crate::config::Duration::from_secs(30);
        assert!(build_client(&config).is_ok());
    }
}
