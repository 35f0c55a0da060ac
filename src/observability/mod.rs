//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every node of the tree produces:
//!     → log events on its `service` span → logging.rs (fmt layers per output)
//!         → stdout / stderr
//!         → sink.rs (HttpSink child nodes → POST to a collector)
//!     → counters in statistics.rs
//!         → collect_statistics (whole tree, keyed by node path)
//!         → metrics.rs (Prometheus gauges)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap (atomic increments)
//! - Log outputs are pluggable by scheme through an explicit registry
//! - Network sinks are ordinary tree nodes with their own lifecycle

pub mod logging;
pub mod metrics;
pub mod sink;
pub mod statistics;

pub use logging::{LoggerService, Sink, SinkError, SinkRegistry};
pub use sink::{HttpSink, HttpSinkHandle};
pub use statistics::Statistics;
