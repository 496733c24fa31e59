//! crossquery - client-side cross-partition query coordination
//!
//! Runs one logical query over a collection whose key space is split into
//! ranges. Each range is read by a producer; producers are grouped into
//! split-aware trees; trees are merged by a pipeline stage chosen from the
//! query's shape. Pages carry a continuation that survives splits and
//! merges of the ranges between calls.
//!
//! The backend is reached through three collaborators: [`producer::PageFetcher`],
//! [`routing::RangeRouter`] and [`query::QueryPlanProvider`].
//! [`container::InMemoryContainer`] implements all three.

pub mod cancellation;
pub mod cli;
pub mod config;
pub mod container;
pub mod continuation;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod producer;
pub mod query;
pub mod routing;

pub use error::{QueryError, QueryResult};
