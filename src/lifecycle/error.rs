//! Lifecycle error types.
//!
//! Every orchestration failure is wrapped with the name of the node it
//! happened on, so the error returned for the root of a tree spells out the
//! path down to the node that actually failed:
//!
//! ```text
//! open children of app: open children of logger: open sink:http://...: connection refused
//! ```
//!
//! Failures from siblings are never dropped; they are collected into an
//! [`ErrorList`] and wrapped as a whole.

use std::fmt;
use std::sync::Arc;

/// Error type returned by a node's own `open`, `close` and `shutdown`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for orchestration calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Lifecycle phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    Close,
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Open => write!(f, "open"),
            Phase::Close => write!(f, "close"),
            Phase::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Errors produced while walking a service tree.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The node's own `open` failed.
    #[error("open {service}: {source}")]
    Open {
        service: String,
        source: Box<ServiceError>,
    },

    /// One or more children of the node failed to open.
    #[error("open children of {service}: {source}")]
    ChildrenOpen { service: String, source: ErrorList },

    /// The node's own `close` failed.
    #[error("close {service}: {source}")]
    Close {
        service: String,
        source: Box<ServiceError>,
    },

    /// One or more children of the node failed to close.
    #[error("close children of {service}: {source}")]
    ChildrenClose { service: String, source: ErrorList },

    /// The node's own `shutdown` failed.
    #[error("shutdown {service}: {source}")]
    Shutdown {
        service: String,
        source: Box<ServiceError>,
    },

    /// One or more children of the node failed to shut down.
    #[error("shutdown children of {service}: {source}")]
    ChildrenShutdown { service: String, source: ErrorList },

    /// The node went through `do_open` before. There is no reopen.
    #[error("{service} was already opened")]
    AlreadyOpened { service: String },

    /// The node was closed, or its teardown began, before it could open.
    #[error("{service} is closed")]
    Closed { service: String },

    /// Several unrelated failures on the same node.
    #[error(transparent)]
    Combined(ErrorList),

    /// A failure reported by a node implementation.
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl ServiceError {
    /// Wrap an error returned by a node implementation.
    pub fn failed(err: BoxError) -> Self {
        ServiceError::Failed(Arc::from(err))
    }

    pub(crate) fn open(service: &str, err: BoxError) -> Self {
        ServiceError::Open {
            service: service.to_string(),
            source: Box::new(Self::failed(err)),
        }
    }

    pub(crate) fn close(service: &str, err: BoxError) -> Self {
        ServiceError::Close {
            service: service.to_string(),
            source: Box::new(Self::failed(err)),
        }
    }

    pub(crate) fn shutdown(service: &str, err: BoxError) -> Self {
        ServiceError::Shutdown {
            service: service.to_string(),
            source: Box::new(Self::failed(err)),
        }
    }

    /// Phase this error was tagged with at its outermost layer, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ServiceError::Open { .. }
            | ServiceError::ChildrenOpen { .. }
            | ServiceError::AlreadyOpened { .. }
            | ServiceError::Closed { .. } => Some(Phase::Open),
            ServiceError::Close { .. } | ServiceError::ChildrenClose { .. } => Some(Phase::Close),
            ServiceError::Shutdown { .. } | ServiceError::ChildrenShutdown { .. } => {
                Some(Phase::Shutdown)
            }
            ServiceError::Combined(_) | ServiceError::Failed(_) => None,
        }
    }

    /// Flatten the error tree into one record per failing node.
    ///
    /// Each record carries the names from the outermost node down to the
    /// node whose implementation reported the failure.
    pub fn failures(&self) -> Vec<Failure<'_>> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        collect(self, None, &mut path, &mut out);
        out
    }
}

fn collect<'a>(
    err: &'a ServiceError,
    phase: Option<Phase>,
    path: &mut Vec<&'a str>,
    out: &mut Vec<Failure<'a>>,
) {
    match err {
        ServiceError::Open { service, source }
        | ServiceError::Close { service, source }
        | ServiceError::Shutdown { service, source } => {
            path.push(service);
            collect(source, err.phase(), path, out);
            path.pop();
        }
        ServiceError::ChildrenOpen { service, source }
        | ServiceError::ChildrenClose { service, source }
        | ServiceError::ChildrenShutdown { service, source } => {
            path.push(service);
            for child in source.iter() {
                collect(child, err.phase(), path, out);
            }
            path.pop();
        }
        ServiceError::AlreadyOpened { service } | ServiceError::Closed { service } => {
            path.push(service);
            out.push(Failure {
                phase: Some(Phase::Open),
                path: path.clone(),
                error: err,
            });
            path.pop();
        }
        ServiceError::Combined(list) => {
            for inner in list.iter() {
                collect(inner, phase, path, out);
            }
        }
        ServiceError::Failed(_) => out.push(Failure {
            phase,
            path: path.clone(),
            error: err,
        }),
    }
}

/// One failing node found by [`ServiceError::failures`].
#[derive(Debug, Clone)]
pub struct Failure<'a> {
    /// Phase the failure happened in; `None` for errors appended by hand.
    pub phase: Option<Phase>,
    /// Node names from the outermost wrapper down to the failing node.
    pub path: Vec<&'a str>,
    /// The innermost error.
    pub error: &'a ServiceError,
}

impl Failure<'_> {
    /// Name of the node that failed.
    pub fn service(&self) -> Option<&str> {
        self.path.last().copied()
    }
}

/// An append-only collection of errors that displays as one.
#[derive(Debug, Clone, Default)]
pub struct ErrorList {
    errors: Vec<ServiceError>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error. Nested [`ServiceError::Combined`] values are
    /// flattened.
    pub fn push(&mut self, err: ServiceError) {
        match err {
            ServiceError::Combined(list) => self.errors.extend(list.errors),
            other => self.errors.push(other),
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServiceError> {
        self.errors.iter()
    }

    /// Collapse into a single error: `None` when empty, the error itself when
    /// there is exactly one, [`ServiceError::Combined`] otherwise.
    pub fn into_error(mut self) -> Option<ServiceError> {
        match self.errors.len() {
            0 => None,
            1 => self.errors.pop(),
            _ => Some(ServiceError::Combined(self)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

impl Extend<ServiceError> for ErrorList {
    fn extend<I: IntoIterator<Item = ServiceError>>(&mut self, iter: I) {
        for err in iter {
            self.push(err);
        }
    }
}

impl FromIterator<ServiceError> for ErrorList {
    fn from_iter<I: IntoIterator<Item = ServiceError>>(iter: I) -> Self {
        let mut list = ErrorList::new();
        list.extend(iter);
        list
    }
}

impl IntoIterator for ErrorList {
    type Item = ServiceError;
    type IntoIter = std::vec::IntoIter<ServiceError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boom(msg: &str) -> BoxError {
        msg.to_string().into()
    }

    #[test]
    fn test_error_list_collapses() {
        assert!(ErrorList::new().into_error().is_none());

        let single: ErrorList = vec![ServiceError::open("a", boom("x"))].into_iter().collect();
        assert!(matches!(single.into_error(), Some(ServiceError::Open { .. })));

        let many: ErrorList = vec![
            ServiceError::open("a", boom("x")),
            ServiceError::open("b", boom("y")),
        ]
        .into_iter()
        .collect();
        let err = many.into_error().unwrap();
        assert_eq!(err.to_string(), "open a: x; open b: y");
    }

    #[test]
    fn test_push_flattens_combined() {
        let inner: ErrorList = vec![
            ServiceError::close("a", boom("x")),
            ServiceError::close("b", boom("y")),
        ]
        .into_iter()
        .collect();

        let mut list = ErrorList::new();
        list.push(ServiceError::Combined(inner));
        list.push(ServiceError::close("c", boom("z")));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_failures_report_path_and_phase() {
        let err = ServiceError::ChildrenOpen {
            service: "root".into(),
            source: vec![
                ServiceError::ChildrenOpen {
                    service: "mid".into(),
                    source: vec![ServiceError::open("leaf", boom("refused"))]
                        .into_iter()
                        .collect(),
                },
                ServiceError::AlreadyOpened {
                    service: "other".into(),
                },
            ]
            .into_iter()
            .collect(),
        };

        let failures = err.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].path, vec!["root", "mid", "leaf"]);
        assert_eq!(failures[0].phase, Some(Phase::Open));
        assert_eq!(failures[0].service(), Some("leaf"));
        assert_eq!(failures[0].error.to_string(), "refused");
        assert_eq!(failures[1].path, vec!["root", "other"]);
    }

    #[test]
    fn test_failures_keep_phase_through_combined() {
        let err = ServiceError::Combined(
            vec![
                ServiceError::ChildrenClose {
                    service: "root".into(),
                    source: vec![ServiceError::close("a", boom("x"))].into_iter().collect(),
                },
                ServiceError::shutdown("root", boom("y")),
            ]
            .into_iter()
            .collect(),
        );

        let phases: Vec<_> = err.failures().iter().map(|f| f.phase).collect();
        assert_eq!(phases, vec![Some(Phase::Close), Some(Phase::Shutdown)]);
    }

    #[test]
    fn test_source_chain_is_preserved() {
        use std::error::Error;

        let err = ServiceError::open("leaf", boom("refused"));
        let source = err.source().expect("open failure has a source");
        assert_eq!(source.to_string(), "refused");
    }
}
