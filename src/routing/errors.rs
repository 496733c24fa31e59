//! Routing errors

use thiserror::Error;

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Errors raised while building ranges or asking for topology
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// `min >= max`
    #[error("Empty feed range [{min},{max})")]
    EmptyRange { min: String, max: String },

    /// Bound is not an upper-case hex string
    #[error("Invalid range bound: {0}")]
    InvalidBound(String),

    /// Two ranges that must be disjoint share keys
    #[error("Ranges overlap: {left} and {right}")]
    Overlapping { left: String, right: String },

    /// Replacement ranges do not cover the range they replace
    #[error("Ranges do not tile {expected}: {detail}")]
    NotTiled { expected: String, detail: String },

    /// Collection is not known to the router
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Routing map could not be read
    #[error("Routing map unavailable: {0}")]
    Unavailable(String),
}
