//! Continuation tokens and their reconciliation with the current topology
//!
//! # Principles
//!
//! 1. Tokens are self-describing: version, producing strategy, body
//! 2. A token from a newer pipeline is refused, never reinterpreted
//! 3. Resolution is a pure function of (current ranges, tokens)
//! 4. Partial overlaps are errors; the resolver never guesses
//!
//! # Usage
//!
//! ```ignore
//! use crossquery::continuation::{resolve, PipelineContinuation};
//!
//! let continuation = PipelineContinuation::parse(raw)?;
//! let mapping = resolve(&current_ranges, &continuation.parallel_tokens()?)?;
//! for (range, token) in mapping.target.iter().chain(mapping.right.iter()) {
//!     // start a producer on `range` from `token`
//! }
//! ```

mod errors;
mod resolver;
mod token;

pub use errors::{ContinuationError, ContinuationErrorCode, ContinuationResult, Severity};
pub use resolver::{resolve, PartitionMapping};
pub use token::{
    DirectProgress, DistinctState, OrderByContinuationToken, OrderByItem, ParallelContinuationToken,
    PipelineContinuation, RangeScoped, StrategyTag, PIPELINE_CONTINUATION_VERSION,
};
