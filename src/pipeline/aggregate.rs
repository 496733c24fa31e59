//! SELECT VALUE aggregates
//!
//! Every range answers with one partial; the stage drains the whole
//! distributed source, folds the partials and emits a single page holding
//! the final value (or nothing when it is undefined). That page carries no
//! continuation, so an aggregate query is never resumed mid-way.

use futures_util::future::BoxFuture;

use crate::cancellation::CancellationToken;
use crate::error::{QueryError, QueryResult};
use crate::observability::{log_event_with_fields, Event, QueryTrace};
use crate::producer::PageCharges;
use crate::query::{AggregateOperator, Aggregator};

use super::stage::{QueryPage, QueryStage, StageState};

pub struct AggregateStage {
    inner: Box<dyn QueryStage>,
    aggregator: Aggregator,
    charges: PageCharges,
    current: Option<QueryResult<QueryPage>>,
    state: StageState,
}

impl AggregateStage {
    pub fn new(inner: Box<dyn QueryStage>, operator: AggregateOperator) -> Self {
        Self {
            inner,
            aggregator: Aggregator::new(operator),
            charges: PageCharges::default(),
            current: None,
            state: StageState::NotStarted,
        }
    }

    fn fold(&mut self, page: QueryPage) -> QueryResult<()> {
        self.charges.request_charge += page.request_charge;
        self.charges.diagnostics.extend(page.diagnostics);
        for partial in &page.documents {
            if !self.aggregator.add_partial(partial) {
                return Err(QueryError::Internal(format!(
                    "{:?} partial has an unexpected shape: {}",
                    self.aggregator.operator(),
                    partial
                )));
            }
        }
        Ok(())
    }

    async fn advance_inner(&mut self, trace: &QueryTrace, cancel: &CancellationToken) -> bool {
        if self.state == StageState::Done {
            self.current = None;
            return false;
        }
        self.state = StageState::Draining;

        while self.inner.advance(trace, cancel).await {
            let folded = match self.inner.take_current() {
                Some(Ok(page)) => self.fold(page),
                Some(Err(QueryError::Cancelled)) => {
                    self.current = Some(Err(QueryError::Cancelled));
                    return true;
                }
                Some(Err(err)) => Err(err),
                None => Ok(()),
            };
            if let Err(err) = folded {
                log_event_with_fields(Event::AggregateFailed, &[("code", err.code())]);
                self.state = StageState::Done;
                self.current = Some(Err(err));
                return true;
            }
        }

        let documents = self.aggregator.result().into_iter().collect();
        let charges = std::mem::take(&mut self.charges);
        self.state = StageState::Done;
        self.current = Some(Ok(QueryPage::new(documents, charges, None)));
        true
    }
}

impl QueryStage for AggregateStage {
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
