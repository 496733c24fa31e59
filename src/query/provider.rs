//! Query-plan collaborator

use futures_util::future::BoxFuture;

use crate::error::QueryResult;

use super::info::QueryInfo;
use super::spec::QuerySpec;

/// Produces the parsed shape of a query
///
/// Parsing and plan compilation happen behind this seam; the coordinator
/// takes the answer as given.
pub trait QueryPlanProvider: Send + Sync {
    fn query_info<'a>(
        &'a self,
        collection_id: &'a str,
        query: &'a QuerySpec,
    ) -> BoxFuture<'a, QueryResult<QueryInfo>>;
}
