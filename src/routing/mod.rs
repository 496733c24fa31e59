//! Partition routing
//!
//! A collection's key space is tiled by [`FeedRange`]s. Splits replace one
//! range with several and merges replace several with one; nothing is
//! mutated in place, so a range is identified by its bounds alone.
//!
//! This module owns:
//! - the interval type and its set operations
//! - effective-partition-key hashing for logical partition keys
//! - the [`RangeRouter`] collaborator used after a partition-gone signal

pub mod epk;
mod errors;
mod feed_range;
mod router;

pub use epk::effective_partition_key;
pub use errors::{RoutingError, RoutingResult};
pub use feed_range::{is_contiguous, sort_disjoint, FeedRange, MAX_EPK, MIN_EPK};
pub use router::RangeRouter;
