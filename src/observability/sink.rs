//! Network log sink: ships formatted log records to an HTTP endpoint.
//!
//! # Data Flow
//! ```text
//! fmt layer → HttpSinkHandle::make_writer → SinkWriter (one record)
//!     → unbounded channel
//!     → forwarder task → POST <url> (one request per record)
//! ```
//!
//! # Design Decisions
//! - Writers never block: a record is queued when its writer is dropped
//! - The sink logs nothing itself; outcomes only show up in its statistics
//! - Close aborts the forwarder; shutdown stops intake and drains the queue
//! - A sink torn down without ever opening discards its queue and stops intake

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;

use crate::config::HttpClientConfig;
use crate::http::build_client;
use crate::lifecycle::{BaseService, BoxError, Service};
use crate::observability::Statistics;

/// Log sink node that POSTs every record to `url`. Named `sink-<host>`.
pub struct HttpSink {
    base: BaseService,
    name: String,
    url: Url,
    client: Client,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    drain: CancellationToken,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    stats: Statistics,
}

impl HttpSink {
    pub fn new(url: Url, config: &HttpClientConfig) -> reqwest::Result<Self> {
        let client = build_client(config)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let name = format!("sink-{}", url.host_str().unwrap_or("unknown"));

        Ok(Self {
            base: BaseService::new(),
            name,
            url,
            client,
            tx,
            rx: Mutex::new(Some(rx)),
            drain: CancellationToken::new(),
            forwarder: Mutex::new(None),
            stats: Statistics::new(["records", "sent", "failures", "dropped"]),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// A writer factory for a fmt layer. Records written before the node
    /// opens wait in the queue.
    pub fn handle(&self) -> HttpSinkHandle {
        HttpSinkHandle {
            tx: self.tx.clone(),
            stats: self.stats.clone(),
        }
    }

    fn take_forwarder(&self) -> Option<JoinHandle<()>> {
        self.forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stop intake of a sink that never started. Queued records count as
    /// dropped, and so does everything written afterwards.
    fn discard_queue(&self) {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut rx) = rx {
            rx.close();
            while rx.try_recv().is_ok() {
                self.stats.incr("dropped", 1.0);
            }
        }
    }
}

#[async_trait]
impl Service for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &BaseService {
        &self.base
    }

    async fn open(&self) -> Result<(), BoxError> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or("sink already started")?;

        let task = tokio::spawn(forward(
            rx,
            self.client.clone(),
            self.url.clone(),
            self.stats.clone(),
            self.drain.clone(),
        ));
        *self.forwarder.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.discard_queue();
        if let Some(task) = self.take_forwarder() {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        self.discard_queue();
        if let Some(task) = self.take_forwarder() {
            self.drain.cancel();
            task.await?;
        }
        Ok(())
    }

    fn statistics(&self) -> Option<HashMap<String, f64>> {
        Some(self.stats.export())
    }
}

impl std::fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSink")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .finish()
    }
}

async fn forward(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    client: Client,
    url: Url,
    stats: Statistics,
    drain: CancellationToken,
) {
    let mut draining = false;
    loop {
        tokio::select! {
            biased;
            _ = drain.cancelled(), if !draining => {
                // Refuse new records; recv keeps yielding the queued ones.
                draining = true;
                rx.close();
            }
            record = rx.recv() => match record {
                Some(body) => deliver(&client, &url, &stats, body).await,
                None => break,
            },
        }
    }
}

async fn deliver(client: &Client, url: &Url, stats: &Statistics, body: Vec<u8>) {
    let result = client
        .post(url.clone())
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body)
        .send()
        .await;

    match result {
        Ok(resp) if resp.status() == StatusCode::OK || resp.status() == StatusCode::NO_CONTENT => {
            stats.incr("sent", 1.0);
        }
        _ => stats.incr("failures", 1.0),
    }
}

/// [`MakeWriter`] feeding an [`HttpSink`].
#[derive(Debug, Clone)]
pub struct HttpSinkHandle {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    stats: Statistics,
}

impl<'a> MakeWriter<'a> for HttpSinkHandle {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            buf: Vec::new(),
            handle: self.clone(),
        }
    }
}

/// Buffers one record and queues it when dropped.
#[derive(Debug)]
pub struct SinkWriter {
    buf: Vec<u8>,
    handle: HttpSinkHandle,
}

impl io::Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let record = std::mem::take(&mut self.buf);
        if self.handle.tx.send(record).is_ok() {
            self.handle.stats.incr("records", 1.0);
        } else {
            self.handle.stats.incr("dropped", 1.0);
        }
    }
}
