//! Shared bookkeeping embedded in every node.
//!
//! A node implementation owns a [`BaseService`] and hands it out through
//! [`Service::base`]; the provided methods of [`Service`] and the
//! orchestration functions do the rest. Nothing here runs lifecycle logic of
//! its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use super::error::{ErrorList, ServiceError};
use super::service::Service;
use super::signal::{Closed, ClosedSignal};

/// Bookkeeping for one node of a service tree.
#[derive(Default)]
pub struct BaseService {
    /// Logger handle, attached when the node is opened.
    span: OnceLock<Span>,
    /// Token handed down by the parent.
    context: OnceLock<CancellationToken>,
    /// Scope this node cancels to stop its children.
    child_scope: OnceLock<CancellationToken>,
    /// Registered children, keyed by the name they were attached under.
    children: RwLock<Vec<(String, Arc<dyn Service>)>>,
    closed: ClosedSignal,
    /// Fires when `do_open` is done with the node, whatever the outcome.
    open_settled: ClosedSignal,
    /// Set by the one path allowed to run teardown.
    teardown: AtomicBool,
    /// Set once `do_open` starts. The registry is frozen from then on.
    frozen: AtomicBool,
    /// Set while the node is owned by a parent.
    attached: AtomicBool,
    error: Mutex<ErrorList>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl BaseService {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Collaborators ---

    /// Attach the logger handle: a `service` span nested under `parent`.
    ///
    /// Only the first call has an effect.
    pub fn with_logger(&self, parent: &Span, name: &str) {
        let _ = self
            .span
            .set(tracing::info_span!(parent: parent, "service", name = %name));
    }

    pub fn span(&self) -> Span {
        self.span.get().cloned().unwrap_or_else(Span::none)
    }

    /// Attach the inbound cancellation token. Only the first call has an
    /// effect.
    pub fn with_context(&self, token: CancellationToken) {
        let _ = self.context.set(token);
    }

    pub fn context(&self) -> Option<CancellationToken> {
        self.context.get().cloned()
    }

    /// Scope handed to the children as their inbound token. Created on first
    /// use.
    pub(crate) fn child_scope(&self) -> CancellationToken {
        self.child_scope.get_or_init(CancellationToken::new).clone()
    }

    /// Wake every child watcher.
    pub(crate) fn cancel_children(&self) {
        self.child_scope().cancel();
    }

    // --- Signals ---

    pub fn closed(&self) -> Closed {
        self.closed.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    pub(crate) fn fire_closed(&self) -> bool {
        self.closed.fire()
    }

    pub(crate) fn settle_open(&self) {
        self.open_settled.fire();
    }

    /// Wait until a `do_open` that froze this node has finished.
    pub(crate) async fn open_settled(&self) {
        self.open_settled.subscribe().wait().await;
    }

    /// Claim the right to tear this node down. Exactly one caller wins.
    ///
    /// The teardown and frozen flags use `SeqCst`: a `do_open` that freezes
    /// the node and then checks for teardown, and a teardown that claims the
    /// gate and then checks for freezing, must never both miss each other.
    pub(crate) fn begin_teardown(&self) -> bool {
        self.teardown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether some caller has claimed teardown.
    pub fn is_tearing_down(&self) -> bool {
        self.teardown.load(Ordering::SeqCst)
    }

    /// Freeze the registry. Returns `false` if it was already frozen.
    pub(crate) fn freeze(&self) -> bool {
        !self.frozen.swap(true, Ordering::SeqCst)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    fn attach(&self) -> bool {
        self.attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    // --- Children ---

    pub fn children(&self) -> Vec<Arc<dyn Service>> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, child)| Arc::clone(child))
            .collect()
    }

    /// Children with the names they were registered under.
    pub fn named_children(&self) -> Vec<(String, Arc<dyn Service>)> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, child)| (name.clone(), Arc::clone(child)))
            .collect()
    }

    pub fn child(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, child)| Arc::clone(child))
    }

    pub fn children_len(&self) -> usize {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Register `svc` as a child under `name`.
    ///
    /// An empty name or a missing node leaves the registry untouched. So do
    /// attaching after the node was opened and attaching a node that already
    /// has a parent. A name that is already taken is replaced.
    pub fn append_service(&self, name: &str, svc: Option<Arc<dyn Service>>) -> bool {
        let Some(svc) = svc else {
            return false;
        };
        if name.is_empty() {
            return false;
        }

        if self.is_frozen() {
            tracing::warn!(parent: &self.span(), child = %name, "Registry is frozen, child not attached");
            return false;
        }

        if !svc.base().attach() {
            tracing::warn!(parent: &self.span(), child = %name, "Service already has a parent, child not attached");
            return false;
        }

        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        match children.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => {
                slot.1.base().detach();
                slot.1 = svc;
            }
            None => children.push((name.to_string(), svc)),
        }
        true
    }

    // --- Errors ---

    /// Record an error. Recorded errors are never removed.
    pub fn append_error(&self, err: ServiceError) {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
    }

    /// Everything recorded so far, combined into one error.
    pub fn last_error(&self) -> Option<ServiceError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .into_error()
    }

    // --- Watcher ---

    pub(crate) fn set_watcher(&self, handle: JoinHandle<()>) {
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Whether a watcher was ever armed for this node.
    pub(crate) fn is_armed(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
            || self.is_closed()
    }

    /// Wait for the node's watcher task to finish.
    ///
    /// The watcher exits once the node is closed, so call this after
    /// [`Closed::wait`]. Later calls return immediately.
    pub async fn join_watcher(&self) {
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(parent: &self.span(), error = %e, "Watcher task failed");
            }
        }
    }
}

impl std::fmt::Debug for BaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseService")
            .field("children", &self.children_len())
            .field("frozen", &self.is_frozen())
            .field("closed", &self.is_closed())
            .finish()
    }
}
