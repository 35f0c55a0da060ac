//! Service lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Build (before open):
//!     node.append_service(name, child) → tree of Arc<dyn Service>
//!
//! Open (orchestrator.rs):
//!     do_open(root, token, span)
//!     → children open first → node.open() → watcher armed per node
//!
//! Teardown (orchestrator.rs):
//!     token cancelled / do_close → child scopes cancelled → fan-in → closed fires
//!     do_shutdown → children shut down in turn → closed fires
//!
//! Signals (signals.rs):
//!     SIGINT → cancel root token (forced close)
//!     SIGTERM → do_shutdown(root) (graceful)
//! ```
//!
//! # Design Decisions
//! - Parents own children; there are no back-pointers
//! - A node's children are stopped only by the node itself, via its own scope
//! - Teardown runs at most once per node; later calls report success
//! - The registry is frozen once the node starts opening

mod base;
mod error;
mod orchestrator;
mod service;
mod signal;
pub mod signals;

pub use base::BaseService;
pub use error::{BoxError, ErrorList, Failure, Phase, ServiceError, ServiceResult};
pub use orchestrator::{collect_statistics, do_close, do_open, do_shutdown};
pub use service::{Service, ServiceGroup};
pub use signal::{Closed, ClosedSignal};
