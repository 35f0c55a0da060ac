//! Configuration schema definitions.
//!
//! This module defines the configuration of every service the daemon plugs
//! into its tree. All types derive Serde traits for deserialization from
//! config files, and every field has a default.

use serde::{Deserialize, Serialize};

use crate::config::duration::Duration;

/// Root configuration for the supervisor daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Logging backend and sinks.
    pub logging: LogConfig,

    /// Outbound HTTP client.
    pub http_client: HttpClientConfig,

    /// HTTP listener.
    pub http_server: HttpServerConfig,

    /// Shutdown settings.
    pub shutdown: ShutdownConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive (e.g., "info" or "service_supervisor=debug").
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    /// Line format.
    pub format: LogFormat,

    /// Where log lines go: "stdout", "stderr" or a sink URL such as
    /// "http://collector:9000/logs".
    pub outputs: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::default(),
            outputs: vec!["stdout".to_string()],
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Total request timeout.
    pub timeout: Duration,

    /// Connect timeout (0 = none).
    pub connect_timeout: Duration,

    /// Disable connection reuse.
    pub disable_keep_alives: bool,

    /// Do not ask servers for compressed bodies.
    pub disable_compression: bool,

    /// Idle connections kept per host.
    pub max_idle_conns_per_host: usize,

    /// How long an idle connection is kept (0 = client default).
    pub idle_conn_timeout: Duration,

    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub proxy_from_env: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::ZERO,
            disable_keep_alives: false,
            disable_compression: false,
            max_idle_conns_per_host: 2,
            idle_conn_timeout: Duration::ZERO,
            proxy_from_env: true,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub addr: String,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// How often runtime statistics are collected and published.
    pub monitor_interval: Duration,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(1),
            monitor_interval: Duration::from_secs(10),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on a graceful shutdown before the daemon gives up on it.
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
        }
    }
}
