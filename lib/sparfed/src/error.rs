use oxrdf::NamedNode;
use spargebra::term::TriplePattern;
use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// An error returned by a call to a federation backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The call did not complete in time
    #[error("The call to {backend} timed out after {timeout:?}")]
    Timeout { backend: NamedNode, timeout: Duration },
    /// The backend could not be reached or answered with a protocol-level failure
    #[error("The backend {backend} is unavailable: {message}")]
    Unavailable { backend: NamedNode, message: String },
    /// The backend does not implement the requested operation
    #[error("The backend {0} does not support this operation")]
    Unsupported(NamedNode),
    /// The backend answered with something that could not be interpreted
    #[error("The backend {backend} returned an invalid answer: {message}")]
    InvalidResponse { backend: NamedNode, message: String },
    #[error("{0}")]
    Other(#[source] Box<dyn Error + Send + Sync>),
}

impl BackendError {
    /// Returns `true` for failures after which the backend must not be called again during the current run.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

/// An error raised by a [`StatsStore`](crate::StatsStore).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StatsError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Error from a store implementation backed by another system
    #[error("{0}")]
    Storage(#[source] Box<dyn Error + Send + Sync>),
}

/// An error raised when the registry content is not consistent.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("The backend {0} is not registered")]
    UnknownBackend(NamedNode),
    #[error("The registry is inconsistent about backend {backend}: {message}")]
    Inconsistent { backend: NamedNode, message: String },
}

/// An error raised while ordering a basic graph pattern.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OptimizationError {
    /// Variables are not allowed in predicate position
    #[error("Variables in predicate position are not supported: {0}")]
    PredicateVariable(TriplePattern),
    /// No backend serves the predicate, its equivalent properties or its inverse
    #[error("No backend is able to resolve the predicate {0}")]
    UnresolvablePredicate(NamedNode),
    /// No resolvable order exists for the remaining patterns
    #[error("{remaining} triple patterns cannot be ordered such that each of them has at most one unbound variable")]
    UnresolvableQuery { remaining: usize },
    #[error(transparent)]
    Statistics(#[from] StatsError),
}

impl OptimizationError {
    /// Returns `true` if the error is about the query itself and should not be hidden by a fallback ordering.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PredicateVariable(_)
                | Self::UnresolvablePredicate(_)
                | Self::UnresolvableQuery { .. }
        )
    }
}

/// An error raised by the [`ResolutionEngine`](crate::ResolutionEngine).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ResolutionError {
    /// The query is invalid for this system
    #[error(transparent)]
    Optimization(OptimizationError),
    /// The query is valid but cannot be answered
    #[error("The query cannot be resolved: {0}")]
    Unresolvable(#[source] OptimizationError),
    #[error(transparent)]
    Inconsistency(#[from] RegistryError),
    /// A source graph of the query could not be loaded
    #[error("Unable to load the source graph {graph}")]
    SourceLoading {
        graph: NamedNode,
        #[source]
        error: BackendError,
    },
    /// Only queries whose pattern is made of basic graph patterns are supported
    #[error("The query pattern contains no basic graph pattern")]
    NoBasicGraphPattern,
}

impl From<OptimizationError> for ResolutionError {
    #[inline]
    fn from(error: OptimizationError) -> Self {
        match error {
            OptimizationError::UnresolvableQuery { .. }
            | OptimizationError::UnresolvablePredicate(_) => Self::Unresolvable(error),
            _ => Self::Optimization(error),
        }
    }
}

/// An error raised while sampling predicate statistics.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SamplingError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// An error raised while reading a federation description.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Invalid IRI {iri}: {error}")]
    InvalidIri {
        iri: String,
        #[source]
        error: oxrdf::IriParseError,
    },
    /// A backend data file could not be parsed
    #[error("Unable to parse {}", path.display())]
    Data {
        path: PathBuf,
        #[source]
        error: Box<dyn Error + Send + Sync>,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
