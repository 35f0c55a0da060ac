//! Hierarchical service lifecycle supervisor.
//!
//! Long-lived components (HTTP listener, HTTP client pool, logging backend,
//! log sinks) are nodes of a tree. The [`lifecycle`] module opens the tree
//! children-first, closes it on cancellation with a concurrent fan-out, and
//! shuts it down gracefully on request, aggregating failures from every
//! node into one error.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::SupervisorConfig;
pub use http::{HttpClient, HttpServer};
pub use lifecycle::{
    collect_statistics, do_close, do_open, do_shutdown, BaseService, BoxError, Service,
    ServiceError, ServiceGroup,
};
pub use observability::{LoggerService, SinkRegistry, Statistics};
