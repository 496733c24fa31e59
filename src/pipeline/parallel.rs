//! Unordered fan-out
//!
//! Drains trees in range order, one backend page per `advance`, while the
//! trees to the right prefetch concurrently. Range order is what makes the
//! continuation stable: every range left of the first one in the token is
//! known to be finished.
//!
//! The same stage serves pass-through and direct execution, which differ
//! only in the number of trees and the tag written into continuations.

use futures_util::future::{join, join_all, BoxFuture};

use crate::cancellation::CancellationToken;
use crate::continuation::{
    DirectProgress, ParallelContinuationToken, PipelineContinuation, StrategyTag,
};
use crate::error::{QueryError, QueryResult};
use crate::observability::{log_event_with_fields, Event, QueryTrace};
use crate::producer::{ItemProducerTree, PageCharges};

use super::stage::{QueryPage, QueryStage, StageState};

/// Prefetch limits shared by the fan-out stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutSettings {
    pub max_concurrency: usize,
    pub max_buffered_item_count: usize,
}

pub struct ParallelStage {
    tag: StrategyTag,
    trees: Vec<ItemProducerTree>,
    settings: FanOutSettings,
    current: Option<QueryResult<QueryPage>>,
    state: StageState,
    requires_distribution: bool,
    progress: Option<DirectProgress>,
}

impl ParallelStage {
    /// `trees` must be sorted by range
    pub fn new(tag: StrategyTag, trees: Vec<ItemProducerTree>, settings: FanOutSettings) -> Self {
        Self {
            tag,
            trees,
            settings,
            current: None,
            state: StageState::NotStarted,
            requires_distribution: false,
            progress: None,
        }
    }

    /// Track delivered positions and write them into continuations
    pub fn with_direct_progress(mut self, progress: DirectProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn tag(&self) -> StrategyTag {
        self.tag
    }

    /// Whether the last delivered page asked for a distributed plan
    pub fn requires_distribution(&self) -> bool {
        self.requires_distribution
    }

    fn take_charges(&mut self) -> PageCharges {
        let mut charges = PageCharges::default();
        for tree in &mut self.trees {
            charges.absorb(tree.take_charges());
        }
        charges
    }

    fn continuation(&self) -> QueryResult<Option<PipelineContinuation>> {
        let mut tokens: Vec<ParallelContinuationToken> = self
            .trees
            .iter()
            .flat_map(ItemProducerTree::leaf_states)
            .filter(|state| state.has_more_results)
            .map(|state| ParallelContinuationToken::new(state.range, state.resume.token))
            .collect();

        let source = match (self.tag, tokens.len()) {
            (_, 0) => return Ok(None),
            (StrategyTag::Parallel, _) => serde_json::to_value(&tokens)?,
            (_, 1) => serde_json::to_value(tokens.remove(0))?,
            _ => serde_json::to_value(&tokens)?,
        };
        let mut continuation = PipelineContinuation::new(self.tag, source);
        continuation.direct = self.progress.clone();
        Ok(Some(continuation))
    }

    async fn advance_inner(&mut self, trace: &QueryTrace, cancel: &CancellationToken) -> bool {
        if self.state == StageState::Done {
            self.current = None;
            return false;
        }
        self.state = StageState::Draining;
        let mut span = trace.span(&format!("{}.advance", self.tag.as_str()));

        loop {
            let Some(index) = self.trees.iter().position(ItemProducerTree::has_more_results) else {
                self.state = StageState::Done;
                self.current = None;
                span.field("drained", true);
                log_event_with_fields(Event::StageDrained, &[("strategy", self.tag.as_str())]);
                return false;
            };

            let buffered: usize = self.trees.iter().map(ItemProducerTree::buffered_item_count).sum();
            let may_prefetch = buffered < self.settings.max_buffered_item_count;
            let prefetch_width = self.settings.max_concurrency.saturating_sub(1);

            let (_, rest) = self.trees.split_at_mut(index);
            let Some((target, others)) = rest.split_first_mut() else {
                return false;
            };
            let prefetches: Vec<_> = if may_prefetch {
                others
                    .iter()
                    .filter(|tree| tree.has_more_results())
                    .take(prefetch_width)
                    .map(|tree| tree.prefetch(cancel))
                    .collect()
            } else {
                Vec::new()
            };
            let (result, _) = join(target.next_page(cancel), join_all(prefetches)).await;

            match result {
                Ok(Some(page)) => {
                    if page.items.is_empty() && !page.requires_distribution {
                        continue;
                    }
                    self.requires_distribution = page.requires_distribution;
                    span.field("range", &page.range);
                    span.field("documents", page.items.len());
                    if let Some(progress) = self.progress.as_mut() {
                        for item in &page.items {
                            progress.record(&item.order_by_items, &item.rid);
                        }
                    }
                    let documents = page.items.into_iter().map(|item| item.payload).collect();
                    let charges = self.take_charges();
                    self.current = Some(
                        self.continuation()
                            .map(|continuation| QueryPage::new(documents, charges, continuation)),
                    );
                    return true;
                }
                Ok(None) => continue,
                Err(QueryError::Cancelled) => {
                    self.current = Some(Err(QueryError::Cancelled));
                    return true;
                }
                Err(err) => {
                    let failed = self.trees.remove(index);
                    log_event_with_fields(
                        Event::BranchFailed,
                        &[("range", failed.range().to_string().as_str()), ("code", err.code())],
                    );
                    self.current = Some(Err(err));
                    return true;
                }
            }
        }
    }
}

impl QueryStage for ParallelStage {
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
