//! Shared utilities for the integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use tokio::net::TcpListener;

use service_supervisor::lifecycle::{BaseService, BoxError, Service};

/// Ordered record of lifecycle calls across a whole tree.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

#[allow(dead_code)]
pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Position of `entry` in the journal.
#[allow(dead_code)]
pub fn position(journal: &Journal, entry: &str) -> usize {
    entries(journal)
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{:?} not in journal {:?}", entry, entries(journal)))
}

/// A node that records every lifecycle call and can be told to be slow or
/// to fail.
#[derive(Debug)]
pub struct Probe {
    base: BaseService,
    name: String,
    journal: Journal,
    open_delay: Duration,
    close_delay: Duration,
    shutdown_delay: Duration,
    fail_open: bool,
    fail_close: bool,
    fail_shutdown: bool,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

#[allow(dead_code)]
impl Probe {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            base: BaseService::new(),
            name: name.to_string(),
            journal: journal.clone(),
            open_delay: Duration::ZERO,
            close_delay: Duration::ZERO,
            shutdown_delay: Duration::ZERO,
            fail_open: false,
            fail_close: false,
            fail_shutdown: false,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn record(&self, verb: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", verb, self.name));
    }
}

#[async_trait]
impl Service for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &BaseService {
        &self.base
    }

    async fn open(&self) -> Result<(), BoxError> {
        tokio::time::sleep(self.open_delay).await;
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.record("open");
        if self.fail_open {
            return Err(format!("{} refused to open", self.name).into());
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        tokio::time::sleep(self.close_delay).await;
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.record("close");
        if self.fail_close {
            return Err(format!("{} refused to close", self.name).into());
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        tokio::time::sleep(self.shutdown_delay).await;
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.record("shutdown");
        if self.fail_shutdown {
            return Err(format!("{} refused to shut down", self.name).into());
        }
        Ok(())
    }

    fn statistics(&self) -> Option<HashMap<String, f64>> {
        let mut stats = HashMap::new();
        stats.insert("opens".to_string(), self.opens() as f64);
        stats.insert("closes".to_string(), self.closes() as f64);
        Some(stats)
    }
}

/// Attach `children` to `parent` under their own names.
#[allow(dead_code)]
pub fn attach(parent: &Arc<dyn Service>, children: &[Arc<dyn Service>]) {
    for child in children {
        assert!(parent.append_service(child.name(), Some(Arc::clone(child))));
    }
}

/// Records received by [`start_log_collector`].
#[allow(dead_code)]
pub type Received = Arc<Mutex<Vec<String>>>;

/// Start an HTTP log collector: `POST /logs` stores the body and answers
/// 204, `POST /broken` answers 500.
#[allow(dead_code)]
pub async fn start_log_collector(addr: SocketAddr) -> Received {
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    async fn accept(State(received): State<Received>, body: Bytes) -> StatusCode {
        received
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&body).into_owned());
        StatusCode::NO_CONTENT
    }

    let app = Router::new()
        .route("/logs", post(accept))
        .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .with_state(received.clone());

    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    received
}

/// A reqwest client that ignores proxy settings and never reuses
/// connections.
#[allow(dead_code)]
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}
