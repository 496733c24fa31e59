//! Globally ordered fan-out
//!
//! Every tree is primed so that each has a head item, then pages are built
//! by repeatedly taking the smallest head. Heads compare by order-by keys,
//! then rid, then range; that is the same order each range's backend
//! returns, so the merge is a total order over `(keys, rid)` whatever the
//! topology.
//!
//! The continuation records the last emitted `(keys, rid)` and how many
//! items with exactly that position were emitted. Resumed ranges drop every
//! item up to that position, which is exact across splits and merges.

use futures_util::future::{join_all, BoxFuture};
use serde_json::Value;

use crate::cancellation::CancellationToken;
use crate::continuation::{
    resolve, OrderByContinuationToken, OrderByItem, ParallelContinuationToken,
    PipelineContinuation, StrategyTag,
};
use crate::error::{QueryError, QueryResult};
use crate::observability::{log_event_with_fields, Event, QueryTrace};
use crate::producer::{ItemProducerTree, LeafState, OrderByResume, PageCharges, QueryItem};
use crate::query::SortOrder;
use crate::routing::FeedRange;

use super::stage::{QueryPage, QueryStage, StageState};

/// Position of the last item handed to the caller
#[derive(Debug, Clone, PartialEq)]
struct LastEmitted {
    range: FeedRange,
    values: Vec<Value>,
    rid: String,
    /// Items emitted with exactly these values and rid
    count: usize,
}

/// Starting point of one range on resume
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByEntry {
    pub range: FeedRange,
    pub token: Option<String>,
    pub resume: Option<OrderByResume>,
}

/// Map an order-by continuation onto the current ranges
pub fn resume_entries(
    ranges: &[FeedRange],
    continuation: &PipelineContinuation,
    sort_orders: &[SortOrder],
) -> QueryResult<Vec<OrderByEntry>> {
    let tokens = continuation.order_by_tokens(sort_orders.len())?;
    let mapping = resolve(ranges, &tokens)?;
    let active = &tokens[0];
    let resume = OrderByResume {
        values: active.order_by_values(),
        rid: active.rid.clone(),
        skip: active.skip_count,
        sort_orders: sort_orders.to_vec(),
    };
    Ok(mapping
        .entries()
        .map(|(range, token)| OrderByEntry {
            range: range.clone(),
            token: token.as_ref().and_then(|t| t.composite_token.token.clone()),
            resume: Some(resume.clone()),
        })
        .collect())
}

/// Backend page size for ordered fan-out
///
/// With a TOP, each range is asked for a few times its fair share but
/// never more than the TOP itself.
pub fn order_by_page_size(max_item_count: usize, top: Option<u64>, range_count: usize) -> usize {
    match top {
        Some(top) => {
            let top = usize::try_from(top).unwrap_or(usize::MAX);
            let ranges = range_count.max(1);
            let share = (top + ranges - 1) / ranges;
            share.saturating_mul(5).min(top).max(1)
        }
        None => max_item_count,
    }
}

pub struct OrderByStage {
    trees: Vec<ItemProducerTree>,
    page_size: usize,
    last_emitted: Option<LastEmitted>,
    resumed_from: Option<PipelineContinuation>,
    current: Option<QueryResult<QueryPage>>,
    state: StageState,
}

impl OrderByStage {
    pub fn new(
        trees: Vec<ItemProducerTree>,
        page_size: usize,
        resumed_from: Option<PipelineContinuation>,
    ) -> Self {
        Self {
            trees,
            page_size,
            last_emitted: None,
            resumed_from,
            current: None,
            state: StageState::NotStarted,
        }
    }

    fn head_index(&self) -> Option<usize> {
        self.trees
            .iter()
            .enumerate()
            .filter(|(_, tree)| tree.current().is_some())
            .min_by(|(_, a), (_, b)| a.compare_heads(b))
            .map(|(index, _)| index)
    }

    /// Drop the first failed tree and return its failure
    fn take_branch_failure(&mut self) -> Option<QueryError> {
        let index = self.trees.iter().position(|tree| tree.failure().is_some())?;
        let mut failed = self.trees.remove(index);
        let err = failed.take_failure()?;
        log_event_with_fields(
            Event::BranchFailed,
            &[("range", failed.range().to_string().as_str()), ("code", err.code())],
        );
        Some(err)
    }

    fn record_emitted(&mut self, range: FeedRange, item: &QueryItem) {
        let count = match &self.last_emitted {
            Some(last) if last.rid == item.rid && last.values == item.order_by_items => last.count + 1,
            _ => 1,
        };
        self.last_emitted = Some(LastEmitted {
            range,
            values: item.order_by_items.clone(),
            rid: item.rid.clone(),
            count,
        });
    }

    fn take_charges(&mut self) -> PageCharges {
        let mut charges = PageCharges::default();
        for tree in &mut self.trees {
            charges.absorb(tree.take_charges());
        }
        charges
    }

    fn continuation(&self) -> QueryResult<Option<PipelineContinuation>> {
        if !self.trees.iter().any(ItemProducerTree::has_more_results) {
            return Ok(None);
        }
        let Some(last) = &self.last_emitted else {
            return Ok(self.resumed_from.clone());
        };

        let states: Vec<LeafState> = self
            .trees
            .iter()
            .flat_map(ItemProducerTree::leaf_states)
            .collect();
        let items: Vec<OrderByItem> = last
            .values
            .iter()
            .map(|v| OrderByItem { item: v.clone() })
            .collect();
        let token = |range: &FeedRange, backend: Option<String>| OrderByContinuationToken {
            composite_token: ParallelContinuationToken::new(range.clone(), backend),
            order_by_items: items.clone(),
            rid: last.rid.clone(),
            skip_count: last.count,
            filter: None,
        };

        // The range that emitted last goes first; if it has since split,
        // its first live child stands in for it.
        let target = states.iter().position(|s| s.range == last.range).or_else(|| {
            states
                .iter()
                .position(|s| s.has_more_results && s.range.overlaps(&last.range))
        });

        let mut tokens = Vec::with_capacity(states.len() + 1);
        match target {
            Some(i) => tokens.push(token(&states[i].range, states[i].resume.token.clone())),
            None => tokens.push(token(&last.range, None)),
        }
        for (i, state) in states.iter().enumerate() {
            if Some(i) != target && state.has_more_results {
                tokens.push(token(&state.range, state.resume.token.clone()));
            }
        }

        let source = serde_json::to_value(&tokens)?;
        Ok(Some(PipelineContinuation::new(StrategyTag::OrderBy, source)))
    }

    async fn advance_inner(&mut self, trace: &QueryTrace, cancel: &CancellationToken) -> bool {
        if self.state == StageState::Done {
            self.current = None;
            return false;
        }
        self.state = StageState::Draining;
        let mut span = trace.span("order_by.advance");

        loop {
            if let Some(err) = self.take_branch_failure() {
                self.current = Some(Err(err));
                return true;
            }

            let primed = join_all(self.trees.iter_mut().map(|tree| tree.prime(cancel))).await;
            if primed.iter().any(Result::is_err) {
                self.current = Some(Err(QueryError::Cancelled));
                return true;
            }
            if let Some(err) = self.take_branch_failure() {
                self.current = Some(Err(err));
                return true;
            }

            let mut documents = Vec::new();
            let mut cancelled = false;
            while documents.len() < self.page_size {
                let Some(index) = self.head_index() else {
                    break;
                };
                let Some((range, item)) = self.trees[index]
                    .current_producer()
                    .and_then(|p| p.current().map(|item| (p.range().clone(), item.clone())))
                else {
                    break;
                };
                self.record_emitted(range, &item);
                documents.push(item.payload);

                let tree = &mut self.trees[index];
                if tree.move_next(cancel).await.is_err() {
                    cancelled = true;
                    break;
                }
                if tree.failure().is_some() {
                    break;
                }
            }

            if documents.is_empty() {
                if cancelled {
                    self.current = Some(Err(QueryError::Cancelled));
                    return true;
                }
                if !self.trees.iter().any(ItemProducerTree::has_more_results) {
                    self.state = StageState::Done;
                    self.current = None;
                    span.field("drained", true);
                    log_event_with_fields(Event::StageDrained, &[("strategy", "order_by")]);
                    return false;
                }
                // A branch failed before anything was merged.
                continue;
            }

            span.field("documents", documents.len());
            let charges = self.take_charges();
            self.current = Some(
                self.continuation()
                    .map(|continuation| QueryPage::new(documents, charges, continuation)),
            );
            return true;
        }
    }
}

impl QueryStage for OrderByStage {
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
