//! The contract every node of a service tree implements.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use super::base::BaseService;
use super::error::{BoxError, ServiceError};
use super::signal::Closed;

/// A node in a service tree.
///
/// Implementations provide their name, their embedded [`BaseService`] and the
/// three node-local lifecycle verbs. Everything else has a default that goes
/// through the base. The verbs never touch children; [`do_open`],
/// [`do_close`] and [`do_shutdown`] walk the tree.
///
/// [`do_open`]: super::do_open
/// [`do_close`]: super::do_close
/// [`do_shutdown`]: super::do_shutdown
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Stable, non-empty identity used in logs and error wrapping.
    fn name(&self) -> &str;

    fn base(&self) -> &BaseService;

    /// Start this node's own resources.
    async fn open(&self) -> Result<(), BoxError>;

    /// Release this node's own resources immediately.
    async fn close(&self) -> Result<(), BoxError>;

    /// Release this node's own resources after draining in-flight work.
    async fn shutdown(&self) -> Result<(), BoxError>;

    /// Point-in-time counters, if the node keeps any.
    fn statistics(&self) -> Option<HashMap<String, f64>> {
        None
    }

    fn with_logger(&self, parent: &Span) {
        self.base().with_logger(parent, self.name());
    }

    fn with_context(&self, token: CancellationToken) {
        self.base().with_context(token);
    }

    fn context(&self) -> Option<CancellationToken> {
        self.base().context()
    }

    fn span(&self) -> Span {
        self.base().span()
    }

    fn closed(&self) -> Closed {
        self.base().closed()
    }

    fn children(&self) -> Vec<Arc<dyn Service>> {
        self.base().children()
    }

    fn child(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.base().child(name)
    }

    fn append_service(&self, name: &str, svc: Option<Arc<dyn Service>>) -> bool {
        self.base().append_service(name, svc)
    }

    fn append_error(&self, err: ServiceError) {
        self.base().append_error(err);
    }

    fn last_error(&self) -> Option<ServiceError> {
        self.base().last_error()
    }
}

/// A node with no resources of its own, used to group children.
#[derive(Debug)]
pub struct ServiceGroup {
    base: BaseService,
    name: String,
}

impl ServiceGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: BaseService::new(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Service for ServiceGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &BaseService {
        &self.base
    }

    async fn open(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
