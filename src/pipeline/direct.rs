//! Direct single-range execution
//!
//! The query is sent to the one range that owns the partition key (or the
//! only range there is) without asking for a query plan. Any response may
//! say "requires distribution": the first one of a fresh query, the first
//! one after a resume, or one from a split child of the direct range. The
//! stage then builds the distributed pipeline once, starting from the last
//! page it delivered, and delegates to it for the rest of the query.

use futures_util::future::BoxFuture;

use crate::cancellation::CancellationToken;
use crate::continuation::PipelineContinuation;
use crate::error::QueryResult;
use crate::observability::{log_event_with_fields, Event, QueryTrace};

use super::parallel::ParallelStage;
use super::selector::{PipelineContext, PipelineStageSelector};
use super::stage::{QueryPage, QueryStage, StageState};

pub struct DirectStage {
    inner: ParallelStage,
    context: PipelineContext,
    /// Continuation of the last delivered page, or the inbound token
    resume_point: Option<PipelineContinuation>,
    fallback: Option<Box<dyn QueryStage>>,
    current: Option<QueryResult<QueryPage>>,
    state: StageState,
}

impl DirectStage {
    pub fn new(
        inner: ParallelStage,
        context: PipelineContext,
        resumed_from: Option<PipelineContinuation>,
    ) -> Self {
        Self {
            inner,
            context,
            resume_point: resumed_from,
            fallback: None,
            current: None,
            state: StageState::NotStarted,
        }
    }

    pub fn has_fallen_back(&self) -> bool {
        self.fallback.is_some()
    }

    async fn advance_fallback(&mut self, trace: &QueryTrace, cancel: &CancellationToken) -> bool {
        let Some(fallback) = self.fallback.as_mut() else {
            return false;
        };
        let more = fallback.advance(trace, cancel).await;
        self.current = fallback.take_current();
        self.state = fallback.state();
        more
    }

    async fn advance_inner(&mut self, trace: &QueryTrace, cancel: &CancellationToken) -> bool {
        if self.fallback.is_some() {
            return self.advance_fallback(trace, cancel).await;
        }
        if self.state == StageState::Done {
            self.current = None;
            return false;
        }

        let more = self.inner.advance(trace, cancel).await;
        let delivered = matches!(self.inner.current(), Some(Ok(_)));
        if more && delivered && self.inner.requires_distribution() {
            self.inner.take_current();
            self.context.metrics.record_direct_fallback();
            let resumed = if self.resume_point.is_some() { "true" } else { "false" };
            log_event_with_fields(
                Event::DirectFallback,
                &[("collection", &*self.context.collection_id), ("resumed", resumed)],
            );

            let built =
                PipelineStageSelector::build_fallback(&self.context, self.resume_point.as_ref()).await;
            match built {
                Ok(stage) => {
                    self.fallback = Some(stage);
                    return self.advance_fallback(trace, cancel).await;
                }
                Err(err) => {
                    log_event_with_fields(
                        Event::DirectFallbackFailed,
                        &[("code", err.code()), ("error", err.to_string().as_str())],
                    );
                    self.state = StageState::Done;
                    self.current = Some(Err(err));
                    return true;
                }
            }
        }

        self.current = self.inner.take_current();
        if let Some(Ok(page)) = &self.current {
            self.resume_point = page.continuation.clone();
        }
        self.state = self.inner.state();
        more
    }
}

impl QueryStage for DirectStage {
    fn advance<'a>(
        &'a mut self,
        trace: &'a QueryTrace,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, bool> {
        Box::pin(self.advance_inner(trace, cancel))
    }

    fn current(&self) -> Option<&QueryResult<QueryPage>> {
        self.current.as_ref()
    }

    fn take_current(&mut self) -> Option<QueryResult<QueryPage>> {
        self.current.take()
    }

    fn state(&self) -> StageState {
        self.state
    }
}
