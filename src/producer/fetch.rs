//! Page-fetch collaborator

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::query::QuerySpec;
use crate::routing::FeedRange;

use super::page::FetchedPage;

/// Why a range fetch failed
///
/// Failures are cached on the producer and replayed verbatim, so the type
/// is cheap to clone and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// The range no longer exists; it was split or merged away
    #[error("Partition range {range} is gone")]
    PartitionGone { range: String },

    /// Request rate too large
    #[error("Throttled, retry after {retry_after_ms} ms")]
    Throttled { retry_after_ms: u64 },

    #[error("Status {status}: {message}")]
    Other { status: u16, message: String },
}

impl FetchFailure {
    pub fn is_partition_gone(&self) -> bool {
        matches!(self, FetchFailure::PartitionGone { .. })
    }

    /// HTTP-style status code
    pub fn status_code(&self) -> u16 {
        match self {
            FetchFailure::PartitionGone { .. } => 410,
            FetchFailure::Throttled { .. } => 429,
            FetchFailure::Other { status, .. } => *status,
        }
    }
}

/// Outcome of one fetch, shareable between joined callers
pub type FetchResult = Result<Arc<FetchedPage>, FetchFailure>;

/// One page request against one range
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub query: Arc<QuerySpec>,
    pub range: FeedRange,
    pub continuation: Option<String>,
    pub page_size: usize,
    pub partition_key: Option<Value>,
    /// Run as direct single-range execution
    pub direct: bool,
}

/// Fetches one page of one range
///
/// The returned future owns everything it needs so that several callers
/// can await it after the issuing call has returned.
pub trait PageFetcher: Send + Sync {
    fn fetch_page(&self, request: FetchRequest) -> BoxFuture<'static, FetchResult>;
}
