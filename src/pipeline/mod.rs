//! Query pipelines
//!
//! A pipeline is a stack of [`QueryStage`]s built by the
//! [`PipelineStageSelector`]. The innermost stage reads ranges through
//! producer trees; outer stages fold aggregates and apply DISTINCT, OFFSET
//! and TOP / LIMIT.
//!
//! # Strategies
//!
//! | Strategy    | Trees            | Merge                     |
//! |-------------|------------------|---------------------------|
//! | direct      | one, no plan     | none; may fall back once  |
//! | passthrough | per target range | concatenation             |
//! | parallel    | per range        | range order               |
//! | order_by    | per range        | k-way merge on the keys   |
//!
//! # Usage
//!
//! ```ignore
//! let mut pipeline = QueryPipeline::create(context).await?;
//! let cancel = CancellationToken::new();
//! while let Some(page) = pipeline.next_page(&cancel).await {
//!     let page = page?;
//!     // hand page.documents and page.continuation_token()? to the caller
//! }
//! ```

mod aggregate;
mod direct;
mod distinct;
mod order_by;
mod parallel;
mod selector;
mod skip;
mod stage;
mod take;

pub use aggregate::AggregateStage;
pub use direct::DirectStage;
pub use distinct::{document_hash, DistinctStage};
pub use order_by::{order_by_page_size, resume_entries, OrderByEntry, OrderByStage};
pub use parallel::{FanOutSettings, ParallelStage};
pub use selector::{decide, use_direct, PipelineContext, PipelineStageSelector};
pub use skip::SkipStage;
pub use stage::{QueryPage, QueryStage, StageState};
pub use take::TakeStage;

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::error::QueryResult;
use crate::observability::{Logger, QueryMetrics, QueryMetricsSnapshot, QueryTrace};

/// A built pipeline plus the state shared by its stages
pub struct QueryPipeline {
    stage: Box<dyn QueryStage>,
    metrics: Arc<QueryMetrics>,
    trace: QueryTrace,
}

impl QueryPipeline {
    /// Build the pipeline for `context`, resuming from its options'
    /// continuation when one is set
    pub async fn create(context: PipelineContext) -> QueryResult<Self> {
        Logger::set_threshold(context.options.log_severity()?);
        let stage = PipelineStageSelector::build(&context).await?;
        Ok(Self {
            stage,
            metrics: context.metrics.clone(),
            trace: QueryTrace::new(context.query.text.clone()),
        })
    }

    /// Next page, or `None` once the query is drained
    pub async fn next_page(&mut self, cancel: &CancellationToken) -> Option<QueryResult<QueryPage>> {
        if !self.stage.advance(&self.trace, cancel).await {
            return None;
        }
        let page = self.stage.take_current()?;
        if let Ok(page) = &page {
            self.metrics.record_page_delivered(page.documents.len());
        }
        Some(page)
    }

    pub fn state(&self) -> StageState {
        self.stage.state()
    }

    pub fn metrics(&self) -> QueryMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn trace(&self) -> &QueryTrace {
        &self.trace
    }
}
