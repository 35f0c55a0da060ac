//! HTTP collaborators of the service tree.
//!
//! # Data Flow
//! ```text
//! inbound:  TCP connection
//!     → server.rs (Axum, middleware: request ID, trace, timeout, counting)
//!     → handlers supplied by the caller via HttpServer::with_router
//!
//! outbound: caller
//!     → client.rs (reqwest pool, request/failure counting)
//!     → remote endpoint
//! ```

pub mod client;
pub mod server;

pub use client::{build_client, HttpClient, HttpClientError};
pub use server::HttpServer;
