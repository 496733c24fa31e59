//! Continuation error types
//!
//! Error codes:
//! - XQ_CONTINUATION_MALFORMED (REJECT)
//! - XQ_CONTINUATION_UNRECONCILABLE (REJECT)
//! - XQ_CONTINUATION_VERSION_UNSUPPORTED (REJECT)
//! - XQ_CONTINUATION_STRATEGY_MISMATCH (REJECT)
//!
//! None of these are retried. A token that cannot be resumed exactly is
//! refused rather than approximated.

use std::fmt;

/// Severity levels for continuation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Caller-supplied token rejected
    Reject,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
        }
    }
}

/// Continuation error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationErrorCode {
    /// Token does not parse or violates its own format
    Malformed,
    /// Token ranges cannot be mapped onto the current topology
    Unreconcilable,
    /// Token was produced by a newer pipeline version
    VersionUnsupported,
    /// Token strategy does not fit the query shape
    StrategyMismatch,
}

impl ContinuationErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            ContinuationErrorCode::Malformed => "XQ_CONTINUATION_MALFORMED",
            ContinuationErrorCode::Unreconcilable => "XQ_CONTINUATION_UNRECONCILABLE",
            ContinuationErrorCode::VersionUnsupported => "XQ_CONTINUATION_VERSION_UNSUPPORTED",
            ContinuationErrorCode::StrategyMismatch => "XQ_CONTINUATION_STRATEGY_MISMATCH",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Reject
    }
}

impl fmt::Display for ContinuationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Continuation error with context
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationError {
    code: ContinuationErrorCode,
    message: String,
}

impl ContinuationError {
    /// Token does not parse or is structurally invalid
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            code: ContinuationErrorCode::Malformed,
            message: reason.into(),
        }
    }

    /// Token range has a partial overlap with the current topology
    pub fn unreconcilable(reason: impl Into<String>) -> Self {
        Self {
            code: ContinuationErrorCode::Unreconcilable,
            message: reason.into(),
        }
    }

    /// Token version is newer than this pipeline understands
    pub fn version_unsupported(found: u32, supported: u32) -> Self {
        Self {
            code: ContinuationErrorCode::VersionUnsupported,
            message: format!(
                "continuation version {} is newer than supported version {}",
                found, supported
            ),
        }
    }

    /// Token was produced by a different strategy than the query requires
    pub fn strategy_mismatch(token: &str, expected: &str) -> Self {
        Self {
            code: ContinuationErrorCode::StrategyMismatch,
            message: format!(
                "continuation produced by '{}' cannot resume a '{}' query",
                token, expected
            ),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> ContinuationErrorCode {
        self.code
    }

    /// Returns the message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the severity
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for ContinuationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)
    }
}

impl std::error::Error for ContinuationError {}

/// Result type for continuation operations
pub type ContinuationResult<T> = Result<T, ContinuationError>;
