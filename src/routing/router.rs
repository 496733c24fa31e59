//! Range routing collaborator

use futures_util::future::BoxFuture;

use super::errors::RoutingResult;
use super::feed_range::FeedRange;

/// Answers topology questions for a collection
///
/// Routing-map refresh is the implementor's concern; callers only ask for
/// the ranges that currently exist.
pub trait RangeRouter: Send + Sync {
    /// All current ranges of the collection, sorted by minimum
    fn all_ranges<'a>(
        &'a self,
        collection_id: &'a str,
    ) -> BoxFuture<'a, RoutingResult<Vec<FeedRange>>>;

    /// Current ranges overlapping `range`, sorted by minimum
    ///
    /// Called after a fetch against `range` reported that it is gone.
    fn overlapping_ranges<'a>(
        &'a self,
        collection_id: &'a str,
        range: &'a FeedRange,
    ) -> BoxFuture<'a, RoutingResult<Vec<FeedRange>>>;
}
