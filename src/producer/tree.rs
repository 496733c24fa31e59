//! Split-aware composition of producers
//!
//! An [`ItemProducerTree`] starts as a single leaf for one range. When a
//! leaf's fetch reports that its range is gone, the leaf is turned into an
//! inner node whose children are fresh leaves for the ranges that replaced
//! it. Nodes live in an arena and refer to their children by index; ranges
//! only ever subdivide, so nothing points back up.
//!
//! Children inherit the parent's backend cursor and item filter. The cursor
//! points just past the last page the parent buffered, and the parent only
//! observes the failure after it has consumed every earlier page, so the
//! children neither skip nor repeat anything.

use std::cmp::Ordering;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::cancellation::{CancellationToken, Cancelled};
use crate::error::{QueryError, QueryResult};
use crate::observability::{Event, ObservationScope};
use crate::routing::{FeedRange, RangeRouter, RoutingError};

use super::comparer::ProducerComparer;
use super::filter::ItemFilter;
use super::item_producer::{ItemProducer, PageMove, ProducerContext, ResumePoint};
use super::page::{PageCharges, QueryItem};

type NodeId = usize;

struct Node {
    range: FeedRange,
    kind: NodeKind,
}

enum NodeKind {
    Leaf(ItemProducer),
    Split(Vec<NodeId>),
}

/// Resume state of one leaf, used to build continuations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafState {
    pub range: FeedRange,
    pub resume: ResumePoint,
    pub has_more_results: bool,
}

/// One drained page of a leaf
#[derive(Debug, Clone)]
pub struct TreePage {
    pub range: FeedRange,
    pub items: Vec<QueryItem>,
    pub requires_distribution: bool,
}

enum LeafOutcome {
    Ready,
    Split,
}

pub struct ItemProducerTree {
    nodes: Vec<Node>,
    comparer: Arc<dyn ProducerComparer>,
    router: Arc<dyn RangeRouter>,
    collection_id: Arc<str>,
    context: ProducerContext,
    failure: Option<QueryError>,
    retired: PageCharges,
}

impl ItemProducerTree {
    pub fn new(
        range: FeedRange,
        token: Option<String>,
        filter: ItemFilter,
        comparer: Arc<dyn ProducerComparer>,
        router: Arc<dyn RangeRouter>,
        collection_id: Arc<str>,
        context: ProducerContext,
    ) -> Self {
        let producer = ItemProducer::new(range.clone(), token, filter, context.clone());
        Self {
            nodes: vec![Node {
                range,
                kind: NodeKind::Leaf(producer),
            }],
            comparer,
            router,
            collection_id,
            context,
            failure: None,
            retired: PageCharges::default(),
        }
    }

    /// Range of the root node
    pub fn range(&self) -> &FeedRange {
        &self.nodes[0].range
    }

    fn leaf_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            match &self.nodes[id].kind {
                NodeKind::Leaf(_) => ids.push(id),
                NodeKind::Split(children) => stack.extend(children.iter().rev()),
            }
        }
        ids
    }

    fn leaves(&self) -> impl Iterator<Item = &ItemProducer> {
        self.leaf_ids().into_iter().filter_map(move |id| self.leaf(id))
    }

    fn leaf(&self, id: NodeId) -> Option<&ItemProducer> {
        match &self.nodes[id].kind {
            NodeKind::Leaf(producer) => Some(producer),
            NodeKind::Split(_) => None,
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> Option<&mut ItemProducer> {
        match &mut self.nodes[id].kind {
            NodeKind::Leaf(producer) => Some(producer),
            NodeKind::Split(_) => None,
        }
    }

    pub fn has_more_results(&self) -> bool {
        self.failure.is_some() || self.leaves().any(ItemProducer::has_more_results)
    }

    pub fn buffered_item_count(&self) -> usize {
        self.leaves().map(ItemProducer::buffered_item_count).sum()
    }

    /// Leaf whose head item comes first
    pub fn current_producer(&self) -> Option<&ItemProducer> {
        self.leaves()
            .filter(|p| p.current().is_some())
            .min_by(|a, b| self.comparer.compare(a, b))
    }

    pub fn current(&self) -> Option<&QueryItem> {
        self.current_producer()?.current()
    }

    pub fn current_range(&self) -> Option<&FeedRange> {
        self.current_producer().map(ItemProducer::range)
    }

    /// Order two trees by their head producers
    pub fn compare_heads(&self, other: &ItemProducerTree) -> Ordering {
        match (self.current_producer(), other.current_producer()) {
            (Some(a), Some(b)) => self.comparer.compare(a, b),
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (None, None) => self.range().cmp(other.range()),
        }
    }

    pub fn failure(&self) -> Option<&QueryError> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<QueryError> {
        self.failure.take()
    }

    /// Per-leaf resume state in range order
    pub fn leaf_states(&self) -> Vec<LeafState> {
        self.leaves()
            .map(|p| LeafState {
                range: p.range().clone(),
                resume: p.resume_continuation(),
                has_more_results: p.has_more_results(),
            })
            .collect()
    }

    /// Charges of everything consumed since the last call, including
    /// leaves replaced by splits
    pub fn take_charges(&mut self) -> PageCharges {
        let mut charges = std::mem::take(&mut self.retired);
        for id in self.leaf_ids() {
            if let Some(producer) = self.leaf_mut(id) {
                charges.absorb(producer.take_charges());
            }
        }
        charges
    }

    /// Make sure every leaf either has a current item or is done
    ///
    /// Splits are handled here; other failures are recorded on the tree
    /// and reported through [`failure`](Self::failure).
    pub async fn prime(&mut self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            let mut split = false;
            for id in self.leaf_ids() {
                if let LeafOutcome::Split = self.prime_leaf(id, cancel).await? {
                    split = true;
                }
            }
            if !split {
                return Ok(());
            }
        }
    }

    async fn prime_leaf(
        &mut self,
        id: NodeId,
        cancel: &CancellationToken,
    ) -> Result<LeafOutcome, Cancelled> {
        loop {
            let Some(producer) = self.leaf_mut(id) else {
                return Ok(LeafOutcome::Ready);
            };
            if producer.current().is_some() || producer.try_move_next_document_within_page() {
                return Ok(LeafOutcome::Ready);
            }
            match producer.try_move_next_page(cancel).await? {
                PageMove::Moved => continue,
                PageMove::Exhausted => return Ok(LeafOutcome::Ready),
                PageMove::Failed(failure) if failure.is_partition_gone() => {
                    return match self.split(id, cancel).await {
                        Ok(()) => Ok(LeafOutcome::Split),
                        Err(QueryError::Cancelled) => Err(Cancelled),
                        Err(err) => {
                            self.record_failure(err);
                            Ok(LeafOutcome::Ready)
                        }
                    };
                }
                PageMove::Failed(failure) => {
                    self.record_failure(QueryError::Upstream(failure));
                    return Ok(LeafOutcome::Ready);
                }
            }
        }
    }

    fn record_failure(&mut self, err: QueryError) {
        // The first failure is the one reported.
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    /// Consume the head item and refill
    pub async fn move_next(&mut self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let head = self
            .leaf_ids()
            .into_iter()
            .filter(|id| self.leaf(*id).map_or(false, |p| p.current().is_some()))
            .min_by(|a, b| match (self.leaf(*a), self.leaf(*b)) {
                (Some(x), Some(y)) => self.comparer.compare(x, y),
                _ => Ordering::Equal,
            });
        if let Some(producer) = head.and_then(|id| self.leaf_mut(id)) {
            producer.try_move_next_document_within_page();
        }
        self.prime(cancel).await
    }

    /// Drain the next page of the first leaf, in range order, with results
    ///
    /// A recorded failure is returned first; each failure is returned once.
    pub async fn next_page(&mut self, cancel: &CancellationToken) -> QueryResult<Option<TreePage>> {
        loop {
            if let Some(err) = self.failure.take() {
                return Err(err);
            }
            let Some(id) = self
                .leaf_ids()
                .into_iter()
                .find(|id| self.leaf(*id).map_or(false, ItemProducer::has_more_results))
            else {
                return Ok(None);
            };
            let Some(producer) = self.leaf_mut(id) else {
                return Ok(None);
            };

            if producer.has_current_items() {
                return Ok(Some(TreePage {
                    range: producer.range().clone(),
                    items: producer.drain_current_page(),
                    requires_distribution: producer.requires_distribution(),
                }));
            }

            match producer.try_move_next_page(cancel).await? {
                PageMove::Moved => {
                    return Ok(Some(TreePage {
                        range: producer.range().clone(),
                        items: producer.drain_current_page(),
                        requires_distribution: producer.requires_distribution(),
                    }));
                }
                PageMove::Exhausted => continue,
                PageMove::Failed(failure) if failure.is_partition_gone() => {
                    self.split(id, cancel).await?;
                }
                PageMove::Failed(failure) => return Err(QueryError::Upstream(failure)),
            }
        }
    }

    /// Fetch ahead on every leaf that has nothing buffered
    ///
    /// Errors are not returned; they are buffered on the producer and
    /// surface when consumption reaches them.
    pub async fn prefetch(&self, cancel: &CancellationToken) {
        let fetches = self
            .leaves()
            .filter(|p| p.buffered_item_count() == 0 && p.has_more_backend_results())
            .map(|p| p.buffer_more_if_empty(cancel));
        let _ = join_all(fetches).await;
    }

    /// Replace leaf `id` with leaves for the ranges that replaced its range
    async fn split(&mut self, id: NodeId, cancel: &CancellationToken) -> QueryResult<()> {
        let (range, token, filter) = match self.leaf(id) {
            Some(producer) => (
                producer.range().clone(),
                producer.backend_continuation(),
                producer.filter(),
            ),
            None => return Err(QueryError::Internal("split target is not a leaf".into())),
        };

        let range_text = range.to_string();
        let scope = ObservationScope::with_fields(Event::PartitionSplit.as_str(), &[("range", range_text.as_str())]);

        let overlapping = match cancel
            .guard(self.router.overlapping_ranges(&self.collection_id, &range))
            .await
        {
            Ok(Ok(ranges)) => ranges,
            Ok(Err(err)) => {
                scope.fail(&err.to_string());
                return Err(err.into());
            }
            Err(Cancelled) => {
                scope.fail("cancelled");
                return Err(QueryError::Cancelled);
            }
        };

        let children = match tile_children(&range, &overlapping) {
            Ok(children) => children,
            Err(err) => {
                scope.fail(&err.to_string());
                return Err(err.into());
            }
        };

        if let Some(producer) = self.leaf_mut(id) {
            let charges = producer.take_charges();
            self.retired.absorb(charges);
        }

        let mut child_ids = Vec::with_capacity(children.len());
        for child in &children {
            let producer = ItemProducer::new(
                child.clone(),
                token.clone(),
                filter.for_range(child),
                self.context.clone(),
            );
            child_ids.push(self.nodes.len());
            self.nodes.push(Node {
                range: child.clone(),
                kind: NodeKind::Leaf(producer),
            });
        }
        self.nodes[id].kind = NodeKind::Split(child_ids);
        self.context.metrics.record_split();

        scope.complete_with_fields(&[("children", children.len().to_string().as_str())]);
        Ok(())
    }
}

/// Clip router ranges to `dead` and check that they replace it exactly
fn tile_children(dead: &FeedRange, overlapping: &[FeedRange]) -> Result<Vec<FeedRange>, RoutingError> {
    let mut children: Vec<FeedRange> = overlapping
        .iter()
        .filter_map(|r| r.intersection(dead))
        .collect();
    children.sort();
    children.dedup();

    let tiled = FeedRange::span_of(&children).map_or(false, |span| &span == dead);
    if !tiled {
        return Err(RoutingError::NotTiled {
            expected: dead.to_string(),
            detail: format!("router returned {} overlapping ranges", overlapping.len()),
        });
    }
    if children.len() == 1 {
        return Err(RoutingError::NotTiled {
            expected: dead.to_string(),
            detail: "router reports the range unchanged".into(),
        });
    }
    Ok(children)
}
