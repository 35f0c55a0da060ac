//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SupervisorConfig (validated, immutable)
//!     → each section handed to the service it configures
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Durations are written as strings ("1.5s", "2m") via [`duration::Duration`]
//! - Validation separates syntactic (serde) from semantic checks

pub mod duration;
pub mod loader;
pub mod schema;
pub mod validation;

pub use duration::Duration;
pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    HttpClientConfig, HttpServerConfig, LogConfig, LogFormat, ShutdownConfig, SupervisorConfig,
};
