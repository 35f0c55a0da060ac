//! Structured logging.
//!
//! # Responsibilities
//! - Build the `tracing` dispatch from [`LogConfig`]
//! - Resolve every configured output through an explicit [`SinkRegistry`]
//! - Run network sinks as children of the logger node
//!
//! # Design Decisions
//! - One fmt layer per output, all sharing a single env filter
//! - `RUST_LOG` wins over the configured level
//! - Sinks are registered on a registry value, not through globals, so the
//!   set of schemes is fixed by whoever builds the logger
//! - Layers feeding a network sink drop events from the HTTP stack itself,
//!   otherwise every shipped record would log another record

use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Dispatch;
use tracing_subscriber::{
    filter::filter_fn,
    fmt::{self, writer::BoxMakeWriter, MakeWriter},
    layer::{Layered, SubscriberExt},
    EnvFilter, Layer, Registry,
};
use url::Url;

use crate::config::{HttpClientConfig, LogConfig, LogFormat};
use crate::lifecycle::{BaseService, BoxError, Service};
use crate::observability::sink::HttpSink;

pub const NAME: &str = "logger";

/// Targets whose events never reach a network sink.
const TRANSPORT_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "tower"];

type Filtered = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

/// Errors building a logger.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink scheme {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("no sink registered for scheme {scheme:?} (output {output:?})")]
    UnknownScheme { scheme: String, output: String },
    #[error("invalid sink URL {output:?}: {reason}")]
    InvalidUrl { output: String, reason: String },
    #[error("invalid log filter {0:?}")]
    Filter(String),
    #[error("build sink client: {0}")]
    Client(#[from] reqwest::Error),
}

/// What a factory returns for one output.
pub struct Sink {
    writer: BoxMakeWriter,
    ansi: bool,
    remote: bool,
    service: Option<Arc<dyn Service>>,
}

impl Sink {
    pub fn new<W>(writer: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        Self {
            writer: BoxMakeWriter::new(writer),
            ansi: false,
            remote: false,
            service: None,
        }
    }

    /// A sink backed by a node that ships records over the network. The
    /// node becomes a child of the logger.
    pub fn remote<W>(writer: W, service: Arc<dyn Service>) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        Self {
            remote: true,
            service: Some(service),
            ..Self::new(writer)
        }
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

type SinkFactory = Arc<dyn Fn(&str) -> Result<Sink, SinkError> + Send + Sync>;

/// Scheme → sink factory.
///
/// An output with no `:` is its own scheme (`"stdout"`); anything else is
/// parsed as a URL and dispatched on the URL scheme.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    factories: HashMap<String, SinkFactory>,
}

impl SinkRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `stdout`, `stderr`, `http` and `https`, the latter two using a
    /// default client configuration.
    pub fn with_defaults() -> Self {
        Self::with_client_config(HttpClientConfig::default())
    }

    /// Like [`SinkRegistry::with_defaults`], with network sinks using
    /// `client` for their connections.
    pub fn with_client_config(client: HttpClientConfig) -> Self {
        let mut registry = Self::new();
        // Registering into an empty registry cannot collide.
        let _ = registry.register("stdout", |_: &str| {
            Ok(Sink::new(std::io::stdout).with_ansi(std::io::stdout().is_terminal()))
        });
        let _ = registry.register("stderr", |_: &str| {
            Ok(Sink::new(std::io::stderr).with_ansi(std::io::stderr().is_terminal()))
        });
        for scheme in ["http", "https"] {
            let client = client.clone();
            let _ = registry.register(scheme, move |output: &str| {
                let url = Url::parse(output).map_err(|e| SinkError::InvalidUrl {
                    output: output.to_string(),
                    reason: e.to_string(),
                })?;
                let sink = Arc::new(HttpSink::new(url, &client)?);
                Ok(Sink::remote(sink.handle(), sink))
            });
        }
        registry
    }

    pub fn register<F>(&mut self, scheme: &str, factory: F) -> Result<(), SinkError>
    where
        F: Fn(&str) -> Result<Sink, SinkError> + Send + Sync + 'static,
    {
        let scheme = scheme.to_ascii_lowercase();
        if self.factories.contains_key(&scheme) {
            return Err(SinkError::AlreadyRegistered(scheme));
        }
        self.factories.insert(scheme, Arc::new(factory));
        Ok(())
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_ascii_lowercase())
    }

    fn build(&self, output: &str) -> Result<Sink, SinkError> {
        let scheme = match output.split_once(':') {
            Some((scheme, _)) => scheme.to_ascii_lowercase(),
            None => output.to_ascii_lowercase(),
        };
        let factory = self
            .factories
            .get(&scheme)
            .ok_or_else(|| SinkError::UnknownScheme {
                scheme: scheme.clone(),
                output: output.to_string(),
            })?;
        factory(output)
    }
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<_> = self.factories.keys().collect();
        schemes.sort();
        f.debug_struct("SinkRegistry").field("schemes", &schemes).finish()
    }
}

/// The logging backend as a tree node, named `logger`.
pub struct LoggerService {
    base: BaseService,
    dispatch: Dispatch,
    installed: AtomicBool,
}

impl LoggerService {
    /// Build the dispatch for `config`, resolving outputs via `registry`.
    ///
    /// Nothing is installed yet; see [`LoggerService::install`].
    pub fn build(config: &LogConfig, registry: &SinkRegistry) -> Result<Self, SinkError> {
        let base = BaseService::new();
        let mut layers: Vec<BoxedLayer> = Vec::with_capacity(config.outputs.len());

        for output in &config.outputs {
            let sink = registry.build(output)?;
            layers.push(fmt_layer(config.format, sink.writer, sink.ansi, sink.remote));

            if let Some(service) = sink.service {
                let name = unique_child_name(&base, service.name());
                base.append_service(&name, Some(service));
            }
        }

        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level)
                .map_err(|e| SinkError::Filter(format!("{}: {}", config.level, e)))?,
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layers);

        Ok(Self {
            base,
            dispatch: Dispatch::new(subscriber),
            installed: AtomicBool::new(false),
        })
    }

    /// The dispatch, for scoped use with `tracing::dispatcher::with_default`.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Install the dispatch as the process-wide default.
    ///
    /// Returns `false` when another subscriber got there first; that one
    /// stays in place. Repeated calls are no-ops.
    pub fn install(&self) -> bool {
        if self.installed.load(Ordering::Acquire) {
            return true;
        }
        match tracing::dispatcher::set_global_default(self.dispatch.clone()) {
            Ok(()) => {
                self.installed.store(true, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool, remote: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    let layer: BoxedLayer = match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    };

    if remote {
        layer
            .with_filter(filter_fn(|meta| {
                !TRANSPORT_TARGETS
                    .iter()
                    .any(|target| meta.target().starts_with(target))
            }))
            .boxed()
    } else {
        layer
    }
}

fn unique_child_name(base: &BaseService, name: &str) -> String {
    if base.child(name).is_none() {
        return name.to_string();
    }
    (2..)
        .map(|i| format!("{}-{}", name, i))
        .find(|candidate| base.child(candidate).is_none())
        .unwrap_or_else(|| name.to_string())
}

#[async_trait]
impl Service for LoggerService {
    fn name(&self) -> &str {
        NAME
    }

    fn base(&self) -> &BaseService {
        &self.base
    }

    async fn open(&self) -> Result<(), BoxError> {
        if self.install() {
            tracing::debug!("Log dispatch installed");
        } else {
            tracing::warn!("A global subscriber is already installed, keeping it");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl std::fmt::Debug for LoggerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerService")
            .field("sinks", &self.base.children_len())
            .field("installed", &self.installed.load(Ordering::Acquire))
            .finish()
    }
}
