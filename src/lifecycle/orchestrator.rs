//! Tree walks: open, close, shutdown.
//!
//! # Ordering
//! ```text
//! do_open(node):
//!     child scope → freeze → attach span + token
//!     → open children (concurrently) → node.open() → arm watcher
//!     (stops short once a teardown has claimed the node)
//!
//! do_close(node):                      do_shutdown(node):
//!     cancel child scope (fan-out)         do_shutdown(child) for each child, in turn
//!     → wait each child closed (fan-in)    → cancel child scope, join watchers
//!     → node.close()                       → node.shutdown()
//!     → record error → fire closed         → record error → fire closed
//! ```
//!
//! A node is torn down by exactly one path. Its watcher, explicit
//! `do_close`/`do_shutdown` calls and the parent's cascade all race for the
//! same gate; the losers wait for the closed signal and report success.
//! A teardown that wins the gate while `do_open` is still running waits for
//! the open to settle before closing anything.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::base::BaseService;
use super::error::{ErrorList, ServiceError, ServiceResult};
use super::service::Service;

/// Open `node` and its whole subtree.
///
/// Children open first, all of them, even if some fail. The node's own
/// `open` runs only when every child opened. On success a watcher is armed
/// that closes the node once `token` is cancelled; the call does not wait
/// for it.
///
/// On failure the subtree is rolled back: children that did open are closed
/// and the node's closed signal fires. The node's own `close` is not called.
///
/// A teardown that starts while the node is opening wins. The open stops
/// short, returns [`ServiceError::Closed`] and leaves the closing to the
/// teardown, which waits for the open to settle first.
pub fn do_open(
    node: Arc<dyn Service>,
    token: CancellationToken,
    parent: Span,
) -> BoxFuture<'static, ServiceResult<()>> {
    async move {
        let name = node.name().to_string();
        let base = node.base();

        if base.is_closed() || base.is_tearing_down() {
            return Err(ServiceError::Closed { service: name });
        }
        let scope = base.child_scope();
        if !base.freeze() {
            return Err(ServiceError::AlreadyOpened { service: name });
        }
        let _settled = OpenSettled(base);
        if base.is_tearing_down() {
            return Err(ServiceError::Closed { service: name });
        }

        node.with_logger(&parent);
        node.with_context(token.clone());

        let span = node.span();
        tracing::info!(parent: &span, "Opening");

        let children = node.children();
        let results = join_all(
            children
                .iter()
                .map(|child| do_open(Arc::clone(child), scope.clone(), span.clone())),
        )
        .await;
        let failures: ErrorList = results.into_iter().filter_map(Result::err).collect();

        if !failures.is_empty() {
            let err = ServiceError::ChildrenOpen {
                service: name.clone(),
                source: failures,
            };
            tracing::error!(parent: &span, error = %err, "Open failed, rolling back");
            rollback(&node).await;
            return Err(err);
        }

        if base.is_tearing_down() {
            tracing::info!(parent: &span, "Closed while opening children, open skipped");
            return Err(ServiceError::Closed { service: name });
        }

        if let Err(e) = node.open().instrument(span.clone()).await {
            let err = ServiceError::open(&name, e);
            tracing::error!(parent: &span, error = %err, "Open failed, rolling back");
            rollback(&node).await;
            return Err(err);
        }

        // The teardown waiting on us closes what was just opened.
        if base.is_tearing_down() {
            tracing::info!(parent: &span, "Closed while opening");
            return Err(ServiceError::Closed { service: name });
        }

        let watcher = tokio::spawn(watch(Arc::clone(&node), token).instrument(span.clone()));
        base.set_watcher(watcher);

        tracing::info!(parent: &span, "Opened");
        Ok(())
    }
    .boxed()
}

/// Fires the open-settled signal on drop, so a waiting teardown is released
/// even when the open future is dropped midway.
struct OpenSettled<'a>(&'a BaseService);

impl Drop for OpenSettled<'_> {
    fn drop(&mut self) {
        self.0.settle_open();
    }
}

/// Close `node` and its whole subtree, children concurrently.
///
/// Returns success straight away if the node is already closed or being
/// torn down by another caller (after waiting for that to finish).
pub fn do_close(node: Arc<dyn Service>) -> BoxFuture<'static, ServiceResult<()>> {
    async move {
        let name = node.name().to_string();
        let base = node.base();

        if base.is_closed() {
            return Ok(());
        }
        if !base.begin_teardown() {
            node.closed().wait().await;
            return Ok(());
        }

        let span = node.span();
        tracing::info!(parent: &span, "Closing");

        base.cancel_children();
        if base.is_frozen() {
            base.open_settled().await;
        }
        let children = node.children();
        wait_children_close(&children).await;

        let mut errors = ErrorList::new();
        if let Some(err) = children_last_error(&children) {
            errors.push(ServiceError::ChildrenClose {
                service: name.clone(),
                source: err,
            });
        }
        if let Err(e) = node.close().instrument(span.clone()).await {
            errors.push(ServiceError::close(&name, e));
        }

        let result = settle(node.as_ref(), errors);
        tracing::info!(parent: &span, "Closed");
        result
    }
    .boxed()
}

/// Gracefully shut down `node` and its whole subtree.
///
/// Children are shut down one after another through their own `shutdown`,
/// then the node itself. Errors are tagged with the shutdown phase.
pub fn do_shutdown(node: Arc<dyn Service>) -> BoxFuture<'static, ServiceResult<()>> {
    async move {
        let name = node.name().to_string();
        let base = node.base();

        if base.is_closed() {
            return Ok(());
        }
        if !base.begin_teardown() {
            node.closed().wait().await;
            return Ok(());
        }

        let span = node.span();
        tracing::info!(parent: &span, "Shutting down");

        if base.is_frozen() {
            base.open_settled().await;
        }

        let children = node.children();
        let mut failures = ErrorList::new();
        for child in &children {
            if let Err(err) = do_shutdown(Arc::clone(child)).await {
                failures.push(err);
            }
        }

        // Children are closed by now; release their watchers.
        base.cancel_children();
        for child in &children {
            child.base().join_watcher().await;
        }

        let mut errors = ErrorList::new();
        if !failures.is_empty() {
            errors.push(ServiceError::ChildrenShutdown {
                service: name.clone(),
                source: failures,
            });
        }
        if let Err(e) = node.shutdown().instrument(span.clone()).await {
            errors.push(ServiceError::shutdown(&name, e));
        }

        let result = settle(node.as_ref(), errors);
        tracing::info!(parent: &span, "Shutdown");
        result
    }
    .boxed()
}

/// Counters of every node in the tree, keyed `<path>.<counter>`. The path
/// starts with the root's name, followed by the names each child was
/// registered under.
pub fn collect_statistics(root: &dyn Service) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    collect_into(root, root.name().to_string(), &mut out);
    out
}

fn collect_into(node: &dyn Service, path: String, out: &mut HashMap<String, f64>) {
    if let Some(stats) = node.statistics() {
        for (key, value) in stats {
            out.insert(format!("{}.{}", path, key), value);
        }
    }
    for (name, child) in node.base().named_children() {
        collect_into(child.as_ref(), format!("{}.{}", path, name), out);
    }
}

/// Watcher armed by `do_open`: closes the node once its inbound token is
/// cancelled, or exits quietly if the node gets closed some other way.
async fn watch(node: Arc<dyn Service>, token: CancellationToken) {
    let closed = node.closed();
    tokio::select! {
        _ = token.cancelled() => {
            tracing::debug!("Received cancel, start close");
            // do_close records its own error on the node.
            let _ = do_close(node).await;
        }
        _ = closed.wait() => {}
    }
}

/// Wait for every child to close, then join their watchers.
///
/// The child scope has already been cancelled, so armed children are all
/// tearing down in parallel; the order of waiting does not matter. A child
/// still opening is waited for first. Children that were never opened have
/// no watcher and are closed directly.
async fn wait_children_close(children: &[Arc<dyn Service>]) {
    for child in children {
        let base = child.base();
        if base.is_frozen() {
            base.open_settled().await;
        }
        if base.is_armed() {
            child.closed().wait().await;
        } else {
            let _ = do_close(Arc::clone(child)).await;
        }
    }
    for child in children {
        child.base().join_watcher().await;
    }
}

fn children_last_error(children: &[Arc<dyn Service>]) -> Option<ErrorList> {
    let errors: ErrorList = children.iter().filter_map(|c| c.last_error()).collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors)
    }
}

/// Tear down the children of a node whose open failed, then mark it closed.
async fn rollback(node: &Arc<dyn Service>) {
    let base = node.base();
    if !base.begin_teardown() {
        return;
    }

    base.cancel_children();
    let children = node.children();
    wait_children_close(&children).await;

    let mut errors = ErrorList::new();
    if let Some(err) = children_last_error(&children) {
        errors.push(ServiceError::ChildrenClose {
            service: node.name().to_string(),
            source: err,
        });
    }
    let _ = settle(node.as_ref(), errors);
}

/// Record the teardown outcome, then fire the closed signal. The order
/// matters: anyone woken by the signal must find the error already recorded.
fn settle(node: &dyn Service, errors: ErrorList) -> ServiceResult<()> {
    let result = match errors.into_error() {
        Some(err) => {
            tracing::error!(parent: &node.span(), error = %err, "Teardown failed");
            node.append_error(err.clone());
            Err(err)
        }
        None => Ok(()),
    };
    node.base().fire_closed();
    result
}
