//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that every log output names something a sink can be built for
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SupervisorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;
use url::Url;

use crate::config::schema::SupervisorConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g., "http_server.addr").
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &SupervisorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Logging
    let logging = &config.logging;
    if let Err(e) = EnvFilter::try_new(&logging.level) {
        errors.push(ValidationError::new(
            "logging.level",
            format!("invalid filter {:?}: {}", logging.level, e),
        ));
    }
    if logging.outputs.is_empty() {
        errors.push(ValidationError::new("logging.outputs", "at least one output is required"));
    }
    for (i, output) in logging.outputs.iter().enumerate() {
        let field = format!("logging.outputs[{}]", i);
        if output.is_empty() {
            errors.push(ValidationError::new(&field, "output is empty"));
        } else if output.contains(':') && Url::parse(output).is_err() {
            errors.push(ValidationError::new(&field, format!("invalid sink URL {:?}", output)));
        }
    }

    // HTTP client
    if config.http_client.timeout.is_zero() {
        errors.push(ValidationError::new("http_client.timeout", "must be greater than zero"));
    }

    // HTTP server
    let server = &config.http_server;
    if server.addr.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "http_server.addr",
            format!("invalid socket address {:?}", server.addr),
        ));
    }
    if server.request_timeout.is_zero() {
        errors.push(ValidationError::new("http_server.request_timeout", "must be greater than zero"));
    }
    if server.monitor_interval.is_zero() {
        errors.push(ValidationError::new("http_server.monitor_interval", "must be greater than zero"));
    }

    // Shutdown
    if config.shutdown.grace_period.is_zero() {
        errors.push(ValidationError::new("shutdown.grace_period", "must be greater than zero"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
