//! TOP / LIMIT

use futures_util::future::BoxFuture;

use crate::cancellation::CancellationToken;
use crate::error::QueryResult;
use crate::observability::QueryTrace;

use super::stage::{QueryPage, QueryStage, StageState};

/// Passes through at most `remaining` documents
pub struct TakeStage {
    inner: Box<dyn QueryStage>,
    remaining: u64,
    current: Option<QueryResult<QueryPage>>,
    state: StageState,
}

impl TakeStage {
    pub fn new(inner: Box<dyn QueryStage>, remaining: u64) -> Self {
        Self {
            inner,
            remaining,
            current: None,
            state: StageState::NotStarted,
        }
    }

    async fn advance_inner(&mut self, trace: &QueryTrace, cancel: &CancellationToken) -> bool {
        if self.state == StageState::Done || self.remaining == 0 {
            self.state = StageState::Done;
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
                let limit = usize::try_from(self.remaining).unwrap_or(usize::MAX);
                page.documents.truncate(limit);
                self.remaining -= page.documents.len() as u64;
                if self.remaining == 0 {
                    page.continuation = None;
                } else if let Some(continuation) = page.continuation.as_mut() {
                    continuation.take = Some(self.remaining);
                }
                Some(Ok(page))
            }
            other => other,
        };
        true
    }
}

impl QueryStage for TakeStage {
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
