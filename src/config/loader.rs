//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::SupervisorConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<SupervisorConfig, ConfigError> {
    let config: SupervisorConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<SupervisorConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[logging]
level = "info"
format = "json"
outputs = ["stderr", "http://127.0.0.1:9000/logs"]

[http_client]
timeout = "2s"
disable_keep_alives = true
max_idle_conns_per_host = 8

[http_server]
addr = "0.0.0.0:9090"
request_timeout = "500ms"
monitor_interval = "1m"

[shutdown]
grace_period = "45s"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.outputs.len(), 2);
        assert_eq!(config.http_client.timeout.as_std(), Duration::from_secs(2));
        assert!(config.http_client.disable_keep_alives);
        assert!(!config.http_client.disable_compression);
        assert_eq!(config.http_client.max_idle_conns_per_host, 8);
        assert_eq!(config.http_server.addr, "0.0.0.0:9090");
        assert_eq!(config.http_server.request_timeout.as_std(), Duration::from_millis(500));
        assert_eq!(config.http_server.monitor_interval.as_std(), Duration::from_secs(60));
        assert_eq!(config.shutdown.grace_period.as_std(), Duration::from_secs(45));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.logging.outputs, vec!["stdout".to_string()]);
        assert_eq!(config.http_client.timeout.as_std(), Duration::from_secs(5));
        assert_eq!(config.http_client.max_idle_conns_per_host, 2);
        assert_eq!(config.http_server.request_timeout.as_std(), Duration::from_secs(1));
        assert_eq!(config.http_server.monitor_interval.as_std(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("[http_server]\nrequest_timeout = \"fast\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_error() {
        let err = parse_config("[http_server]\naddr = \"nowhere\"\n").unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "http_server.addr");
            }
            other => panic!("expected validation error, got {}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
