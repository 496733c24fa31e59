//! Query shape
//!
//! The coordinator never parses query text. It needs to know whether a
//! query orders, aggregates, groups, deduplicates or pages, and gets that
//! from a [`QueryPlanProvider`].

mod aggregate;
mod info;
pub mod ordering;
mod provider;
mod spec;

pub use aggregate::{AggregateOperator, Aggregator};
pub use info::{DistinctType, OrderByColumn, QueryInfo, SortOrder};
pub use ordering::{compare_keys, compare_rids, compare_values};
pub use provider::QueryPlanProvider;
pub use spec::{QueryParameter, QuerySpec};
