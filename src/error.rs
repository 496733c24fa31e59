//! Crate-level error type
//!
//! Every public operation that can fail returns [`QueryResult`]. Errors from
//! the submodules convert with `?`; each variant has a stable code so that
//! callers can branch without matching on message text.

use thiserror::Error;

use crate::cancellation::Cancelled;
use crate::continuation::ContinuationError;
use crate::producer::FetchFailure;
use crate::routing::RoutingError;

/// Result type for query coordination
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors surfaced by the coordinator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// A range fetch failed and could not be handled locally
    #[error("Upstream fetch failed: {0}")]
    Upstream(#[from] FetchFailure),

    /// The caller's continuation could not be resumed
    #[error("{0}")]
    Continuation(#[from] ContinuationError),

    /// Topology could not be read or did not make sense
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// The query-plan provider failed
    #[error("Query plan unavailable: {0}")]
    Plan(String),

    /// The query needs a capability this coordinator does not have
    #[error("Unsupported query: {0}")]
    Unsupported(String),

    /// Caller-supplied options are invalid
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation's cancellation token fired
    #[error("Query cancelled")]
    Cancelled,

    /// A coordinator invariant did not hold
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Stable code for the error
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Upstream(f) if f.is_partition_gone() => "XQ_UPSTREAM_PARTITION_GONE",
            QueryError::Upstream(FetchFailure::Throttled { .. }) => "XQ_UPSTREAM_THROTTLED",
            QueryError::Upstream(_) => "XQ_UPSTREAM_FAILED",
            QueryError::Continuation(e) => e.code().code(),
            QueryError::Routing(_) => "XQ_ROUTING_FAILED",
            QueryError::Plan(_) => "XQ_PLAN_UNAVAILABLE",
            QueryError::Unsupported(_) => "XQ_UNSUPPORTED_QUERY",
            QueryError::InvalidArgument(_) => "XQ_INVALID_ARGUMENT",
            QueryError::Cancelled => "XQ_CANCELLED",
            QueryError::Internal(_) => "XQ_INTERNAL",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}

impl From<Cancelled> for QueryError {
    fn from(_: Cancelled) -> Self {
        QueryError::Cancelled
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Internal(format!("serialization: {}", err))
    }
}
