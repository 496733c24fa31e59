//! OFFSET

use futures_util::future::BoxFuture;

use crate::cancellation::CancellationToken;
use crate::error::QueryResult;
use crate::observability::QueryTrace;

use super::stage::{QueryPage, QueryStage, StageState};

/// Drops the first `remaining` documents
pub struct SkipStage {
    inner: Box<dyn QueryStage>,
    remaining: u64,
    current: Option<QueryResult<QueryPage>>,
    state: StageState,
}

impl SkipStage {
    pub fn new(inner: Box<dyn QueryStage>, remaining: u64) -> Self {
        Self {
            inner,
            remaining,
            current: None,
            state: StageState::NotStarted,
        }
    }

    async fn advance_inner(&mut self, trace: &QueryTrace, cancel: &CancellationToken) -> bool {
        if self.state == StageState::Done {
            self.current = None;
            return false;
        }
        self.state = StageState::Draining;

        if !self.inner.advance(trace, cancel).await {
            self.state = StageState::Done;
            self.current = None;
            return false;
        }

        self.current = match self.inner.take_current() {
            Some(Ok(mut page)) => {
                let skip = usize::try_from(self.remaining)
                    .unwrap_or(usize::MAX)
                    .min(page.documents.len());
                page.documents.drain(..skip);
                self.remaining -= skip as u64;
                if let Some(continuation) = page.continuation.as_mut() {
                    continuation.skip = (self.remaining > 0).then_some(self.remaining);
                }
                Some(Ok(page))
            }
            other => other,
        };
        true
    }
}

impl QueryStage for SkipStage {
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
