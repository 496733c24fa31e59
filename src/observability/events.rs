//! Observable query events

use std::fmt;

/// Events emitted while coordinating a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Pipeline construction
    /// A strategy was chosen for a query
    PipelineSelected,
    /// Direct execution signalled that the query needs a distributed plan
    DirectFallback,
    /// The distributed pipeline could not be built after a fallback
    DirectFallbackFailed,
    /// An inbound continuation was mapped onto the current topology
    ContinuationResolved,

    // Producers
    /// A page was fetched and buffered
    PageFetched,
    /// A fetch failed and the failure became sticky
    FetchFailed,
    /// A range reported gone and was replaced by its children
    PartitionSplit,

    // Stages
    /// A branch failure was reported to the caller
    BranchFailed,
    /// A stage delivered its last page
    StageDrained,
    /// Aggregate partials could not be folded
    AggregateFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::PipelineSelected => "QUERY_PIPELINE_SELECTED",
            Event::DirectFallback => "QUERY_DIRECT_FALLBACK",
            Event::DirectFallbackFailed => "QUERY_DIRECT_FALLBACK_FAILED",
            Event::ContinuationResolved => "QUERY_CONTINUATION_RESOLVED",
            Event::PageFetched => "QUERY_PAGE_FETCHED",
            Event::FetchFailed => "QUERY_FETCH_FAILED",
            Event::PartitionSplit => "QUERY_PARTITION_SPLIT",
            Event::BranchFailed => "QUERY_BRANCH_FAILED",
            Event::StageDrained => "QUERY_STAGE_DRAINED",
            Event::AggregateFailed => "QUERY_AGGREGATE_FAILED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> super::Severity {
        use super::Severity;
        match self {
            Event::PageFetched => Severity::Trace,
            Event::FetchFailed | Event::DirectFallback => Severity::Warn,
            Event::DirectFallbackFailed | Event::BranchFailed | Event::AggregateFailed => {
                Severity::Error
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
