//! In-memory partitioned container
//!
//! Documents live in one list; a physical range serves every document whose
//! effective key it contains. Continuation tokens are positions in the
//! sorted result stream (`{"keys": [...], "rid": "..."}`), so a token
//! issued before a split or merge stays valid on the ranges that replace
//! the one it was issued for.
//!
//! A request is served by the physical range that contains the requested
//! range. That range may be wider than the request after a merge; the
//! whole physical range is returned and the producer's filter trims it.
//!
//! Aggregate queries are answered with one partial per request, computed
//! over the requested range only.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{QueryError, QueryResult};
use crate::producer::{FetchFailure, FetchRequest, FetchResult, FetchedPage, PageFetcher, QueryItem};
use crate::query::{
    compare_keys, compare_rids, AggregateOperator, Aggregator, QueryInfo, QueryPlanProvider,
    QuerySpec,
};
use crate::routing::{
    effective_partition_key, sort_disjoint, FeedRange, RangeRouter, RoutingError, RoutingResult,
};

/// Charge of a request that returned nothing
const BASE_CHARGE: f64 = 1.0;
/// Additional charge per returned item
const ITEM_CHARGE: f64 = 0.1;

/// A stored document
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub rid: String,
    pub epk: String,
    pub partition_key: Value,
    pub body: Value,
}

/// Position in a range's sorted result stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Position {
    keys: Vec<Value>,
    rid: String,
}

struct PendingFailure {
    /// Only requests overlapping this range fail; `None` matches any
    range: Option<FeedRange>,
    failure: FetchFailure,
}

#[derive(Default)]
struct State {
    ranges: Vec<FeedRange>,
    documents: Vec<StoredDocument>,
    queries: HashMap<String, QueryInfo>,
    /// Expression each aggregate query folds, by query text
    aggregate_inputs: HashMap<String, String>,
    direct_rejects: HashSet<String>,
    failures: VecDeque<PendingFailure>,
    next_rid: u64,
    max_latency_ms: u64,
}

struct Inner {
    id: String,
    state: Mutex<State>,
    /// `true` while fetches are held
    gate: watch::Sender<bool>,
    fetch_count: AtomicU64,
    direct_fetch_count: AtomicU64,
}

/// Container with splittable and mergeable ranges
///
/// Cloning shares the container.
#[derive(Clone)]
pub struct InMemoryContainer {
    inner: Arc<Inner>,
}

fn check_tiling(ranges: &[FeedRange]) -> RoutingResult<Vec<FeedRange>> {
    let sorted = sort_disjoint(ranges)?;
    let full = FeedRange::full();
    let covers = sorted.first().map(|r| r.min_inclusive()) == Some(full.min_inclusive())
        && sorted.last().map(|r| r.max_exclusive()) == Some(full.max_exclusive())
        && sorted.windows(2).all(|w| w[0].max_exclusive() == w[1].min_inclusive());
    if !covers {
        return Err(RoutingError::NotTiled {
            expected: full.to_string(),
            detail: format!("{} ranges with gaps", sorted.len()),
        });
    }
    Ok(sorted)
}

impl InMemoryContainer {
    /// Create a container over `ranges`, which must tile the key space
    pub fn new(id: impl Into<String>, ranges: Vec<FeedRange>) -> QueryResult<Self> {
        let ranges = check_tiling(&ranges)?;
        let (gate, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                id: id.into(),
                state: Mutex::new(State {
                    ranges,
                    ..Default::default()
                }),
                gate,
                fetch_count: AtomicU64::new(0),
                direct_fetch_count: AtomicU64::new(0),
            }),
        })
    }

    /// Create a container whose ranges split the key space at `boundaries`
    pub fn from_boundaries(id: impl Into<String>, boundaries: &[&str]) -> QueryResult<Self> {
        let full = FeedRange::full();
        let mut bounds = vec![full.min_inclusive()];
        bounds.extend(boundaries.iter().copied());
        bounds.push(full.max_exclusive());
        let ranges = bounds
            .windows(2)
            .map(|w| FeedRange::new(w[0], w[1]))
            .collect::<RoutingResult<Vec<_>>>()?;
        Self::new(id, ranges)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    fn state(&self) -> QueryResult<MutexGuard<'_, State>> {
        self.inner
            .state
            .lock()
            .map_err(|_| QueryError::Internal("container state poisoned".into()))
    }

    /// Current physical ranges, sorted
    pub fn ranges(&self) -> QueryResult<Vec<FeedRange>> {
        Ok(self.state()?.ranges.clone())
    }

    /// Store a document; returns its rid
    pub fn insert(&self, partition_key: Value, body: Value) -> QueryResult<String> {
        let mut state = self.state()?;
        state.next_rid += 1;
        let rid = format!("{:08X}", state.next_rid);
        state.documents.push(StoredDocument {
            rid: rid.clone(),
            epk: effective_partition_key(&partition_key),
            partition_key,
            body,
        });
        Ok(rid)
    }

    pub fn document_count(&self) -> QueryResult<usize> {
        Ok(self.state()?.documents.len())
    }

    /// Replace `range` with `[min, at)` and `[at, max)`
    pub fn split(&self, range: &FeedRange, at: &str) -> QueryResult<(FeedRange, FeedRange)> {
        let mut state = self.state()?;
        let index = state
            .ranges
            .iter()
            .position(|r| r == range)
            .ok_or_else(|| QueryError::InvalidArgument(format!("{} is not a current range", range)))?;
        let left = FeedRange::new(range.min_inclusive(), at)?;
        let right = FeedRange::new(at, range.max_exclusive())?;
        state.ranges.splice(index..=index, [left.clone(), right.clone()]);
        Ok((left, right))
    }

    /// Replace two adjacent ranges with their union
    pub fn merge(&self, left: &FeedRange, right: &FeedRange) -> QueryResult<FeedRange> {
        let mut state = self.state()?;
        let index = state
            .ranges
            .iter()
            .position(|r| r == left)
            .ok_or_else(|| QueryError::InvalidArgument(format!("{} is not a current range", left)))?;
        if state.ranges.get(index + 1) != Some(right) {
            return Err(QueryError::InvalidArgument(format!(
                "{} and {} are not adjacent current ranges",
                left, right
            )));
        }
        let merged = FeedRange::new(left.min_inclusive(), right.max_exclusive())?;
        state.ranges.splice(index..=index + 1, [merged.clone()]);
        Ok(merged)
    }

    /// Query shape returned by the plan provider for `text`
    ///
    /// A rewritten query is registered under its own text as well, so that
    /// fetches carrying it still evaluate the same ORDER BY.
    pub fn register_query(&self, text: impl Into<String>, info: QueryInfo) -> QueryResult<()> {
        let mut state = self.state()?;
        if let Some(rewritten) = &info.rewritten_query {
            state.queries.insert(rewritten.clone(), info.clone());
        }
        state.queries.insert(text.into(), info);
        Ok(())
    }

    /// Expression the aggregate of `text` folds, e.g. `c.n`
    ///
    /// Without one every document contributes, which is what `COUNT(1)`
    /// needs. Register the query first so its rewritten text is covered.
    pub fn register_aggregate(
        &self,
        text: impl Into<String>,
        expression: impl Into<String>,
    ) -> QueryResult<()> {
        let mut state = self.state()?;
        let text = text.into();
        let expression = expression.into();
        if let Some(rewritten) = state.queries.get(&text).and_then(|i| i.rewritten_query.clone()) {
            state.aggregate_inputs.insert(rewritten, expression.clone());
        }
        state.aggregate_inputs.insert(text, expression);
        Ok(())
    }

    /// Answer direct execution of `text` with "requires distribution"
    pub fn reject_direct(&self, text: impl Into<String>) -> QueryResult<()> {
        self.state()?.direct_rejects.insert(text.into());
        Ok(())
    }

    /// Fail the next fetch, whatever its range
    pub fn fail_next(&self, failure: FetchFailure) -> QueryResult<()> {
        self.state()?.failures.push_back(PendingFailure {
            range: None,
            failure,
        });
        Ok(())
    }

    /// Fail the next fetch that overlaps `range`
    pub fn fail_next_on(&self, range: FeedRange, failure: FetchFailure) -> QueryResult<()> {
        self.state()?.failures.push_back(PendingFailure {
            range: Some(range),
            failure,
        });
        Ok(())
    }

    /// Delay each fetch by a random amount up to `max_ms`
    pub fn set_max_latency(&self, max_ms: u64) -> QueryResult<()> {
        self.state()?.max_latency_ms = max_ms;
        Ok(())
    }

    /// Park every fetch issued from now on until `release_fetches`
    pub fn hold_fetches(&self) {
        self.inner.gate.send_replace(true);
    }

    pub fn release_fetches(&self) {
        self.inner.gate.send_replace(false);
    }

    /// Fetches received so far
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetch_count.load(AtomicOrdering::SeqCst)
    }

    /// Fetches received in direct-execution mode so far
    pub fn direct_fetch_count(&self) -> u64 {
        self.inner.direct_fetch_count.load(AtomicOrdering::SeqCst)
    }

    /// Every document the query would return, in result order
    ///
    /// For an aggregate query, the final value if it is defined.
    pub fn expected_documents(&self, text: &str, partition_key: Option<&Value>) -> QueryResult<Vec<Value>> {
        let state = self.state()?;
        let info = state.queries.get(text).cloned().unwrap_or_default();
        if let Some(operator) = info.aggregate_operator() {
            let aggregator = aggregate(&state, text, operator, &FeedRange::full(), partition_key);
            return Ok(aggregator.result().into_iter().collect());
        }
        let items = sorted_items(&state.documents, &info, &FeedRange::full(), partition_key);
        Ok(items.into_iter().map(|item| item.payload).collect())
    }
}

/// Value of a `c.a.b` style expression; `None` when the path is missing
fn field_value<'a>(body: &'a Value, expression: &str) -> Option<&'a Value> {
    let path = expression.split('.').skip(1).collect::<Vec<_>>().join("/");
    body.pointer(&format!("/{}", path))
}

fn order_by_value(body: &Value, expression: &str) -> Value {
    field_value(body, expression).cloned().unwrap_or(Value::Null)
}

/// Fold the documents of `range` holding `partition_key`
fn aggregate(
    state: &State,
    text: &str,
    operator: AggregateOperator,
    range: &FeedRange,
    partition_key: Option<&Value>,
) -> Aggregator {
    let expression = state.aggregate_inputs.get(text);
    let mut aggregator = Aggregator::new(operator);
    for document in state
        .documents
        .iter()
        .filter(|d| range.contains_key(&d.epk))
        .filter(|d| partition_key.map_or(true, |pk| &d.partition_key == pk))
    {
        let value = match expression {
            Some(expression) => field_value(&document.body, expression),
            None => Some(&document.body),
        };
        aggregator.add_value(value);
    }
    aggregator
}

fn sorted_items(
    documents: &[StoredDocument],
    info: &QueryInfo,
    range: &FeedRange,
    partition_key: Option<&Value>,
) -> Vec<QueryItem> {
    let orders = info.sort_orders();
    let mut items: Vec<QueryItem> = documents
        .iter()
        .filter(|d| range.contains_key(&d.epk))
        .filter(|d| partition_key.map_or(true, |pk| &d.partition_key == pk))
        .map(|d| QueryItem {
            rid: d.rid.clone(),
            epk: Some(d.epk.clone()),
            order_by_items: info
                .order_by
                .iter()
                .map(|c| order_by_value(&d.body, &c.expression))
                .collect(),
            payload: d.body.clone(),
        })
        .collect();
    items.sort_by(|a, b| {
        compare_keys(&a.order_by_items, &b.order_by_items, &orders)
            .then_with(|| compare_rids(&a.rid, &b.rid, &orders))
    });
    items
}

/// Whether direct execution of this request must be refused
fn requires_distribution(state: &State, info: &QueryInfo, request: &FetchRequest) -> bool {
    let needs_client_stage = info.has_aggregates()
        || info.has_group_by()
        || info.has_distinct()
        || info.top.is_some()
        || info.offset.is_some()
        || info.limit.is_some();
    let unkeyed = request.partition_key.is_none();
    state.direct_rejects.contains(&request.query.text)
        || needs_client_stage
        || (unkeyed && info.has_order_by())
        || (unkeyed && state.ranges.len() > 1)
}

impl Inner {
    fn serve(&self, request: &FetchRequest) -> FetchResult {
        let mut state = self
            .state
            .lock()
            .map_err(|_| FetchFailure::Other {
                status: 500,
                message: "container state poisoned".into(),
            })?;

        let injected = state.failures.iter().position(|f| {
            f.range.as_ref().map_or(true, |r| r.overlaps(&request.range))
        });
        if let Some(failure) = injected.and_then(|i| state.failures.remove(i)) {
            return Err(failure.failure);
        }

        let Some(physical) = state.ranges.iter().find(|r| r.contains(&request.range)).cloned() else {
            return Err(FetchFailure::PartitionGone {
                range: request.range.to_string(),
            });
        };

        let info = state.queries.get(&request.query.text).cloned().unwrap_or_default();
        if request.direct && requires_distribution(&state, &info, request) {
            let mut page = FetchedPage::new(Vec::new(), None, BASE_CHARGE);
            page.requires_distribution = true;
            return Ok(Arc::new(page));
        }

        if let Some(operator) = info.aggregate_operator() {
            let aggregator = aggregate(
                &state,
                &request.query.text,
                operator,
                &request.range,
                request.partition_key.as_ref(),
            );
            let partial = QueryItem {
                rid: format!("partial:{}", request.range),
                epk: None,
                order_by_items: Vec::new(),
                payload: aggregator.partial(),
            };
            return Ok(Arc::new(FetchedPage::new(
                vec![partial],
                None,
                BASE_CHARGE + ITEM_CHARGE,
            )));
        }

        let mut items = sorted_items(
            &state.documents,
            &info,
            &physical,
            request.partition_key.as_ref(),
        );

        if let Some(token) = &request.continuation {
            let position: Position = serde_json::from_str(token).map_err(|e| FetchFailure::Other {
                status: 400,
                message: format!("bad continuation: {}", e),
            })?;
            let orders = info.sort_orders();
            items.retain(|item| {
                compare_keys(&item.order_by_items, &position.keys, &orders)
                    .then_with(|| compare_rids(&item.rid, &position.rid, &orders))
                    == Ordering::Greater
            });
        }

        let page_size = request.page_size.max(1);
        let more = items.len() > page_size;
        items.truncate(page_size);
        let continuation = match items.last() {
            Some(last) if more => Some(
                serde_json::to_string(&Position {
                    keys: last.order_by_items.clone(),
                    rid: last.rid.clone(),
                })
                .map_err(|e| FetchFailure::Other {
                    status: 500,
                    message: e.to_string(),
                })?,
            ),
            _ => None,
        };

        let charge = BASE_CHARGE + ITEM_CHARGE * items.len() as f64;
        Ok(Arc::new(FetchedPage::new(items, continuation, charge)))
    }
}

impl PageFetcher for InMemoryContainer {
    fn fetch_page(&self, request: FetchRequest) -> BoxFuture<'static, FetchResult> {
        self.inner.fetch_count.fetch_add(1, AtomicOrdering::SeqCst);
        if request.direct {
            self.inner.direct_fetch_count.fetch_add(1, AtomicOrdering::SeqCst);
        }
        let max_latency = self.state().map(|s| s.max_latency_ms).unwrap_or(0);
        let delay = if max_latency > 0 {
            rand::thread_rng().gen_range(0..=max_latency)
        } else {
            0
        };
        let inner = self.inner.clone();

        Box::pin(async move {
            let mut gate = inner.gate.subscribe();
            // The sender lives in `inner`, which this future owns.
            let _ = gate.wait_for(|held| !*held).await;
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            inner.serve(&request)
        })
    }
}

impl RangeRouter for InMemoryContainer {
    fn all_ranges<'a>(
        &'a self,
        collection_id: &'a str,
    ) -> BoxFuture<'a, RoutingResult<Vec<FeedRange>>> {
        Box::pin(async move {
            if collection_id != self.inner.id {
                return Err(RoutingError::UnknownCollection(collection_id.to_string()));
            }
            self.inner
                .state
                .lock()
                .map(|s| s.ranges.clone())
                .map_err(|_| RoutingError::Unavailable("container state poisoned".into()))
        })
    }

    fn overlapping_ranges<'a>(
        &'a self,
        collection_id: &'a str,
        range: &'a FeedRange,
    ) -> BoxFuture<'a, RoutingResult<Vec<FeedRange>>> {
        Box::pin(async move {
            let ranges = self.all_ranges(collection_id).await?;
            Ok(ranges.into_iter().filter(|r| r.overlaps(range)).collect())
        })
    }
}

impl QueryPlanProvider for InMemoryContainer {
    fn query_info<'a>(
        &'a self,
        _collection_id: &'a str,
        query: &'a QuerySpec,
    ) -> BoxFuture<'a, QueryResult<QueryInfo>> {
        Box::pin(async move {
            let state = self.state()?;
            Ok(state.queries.get(&query.text).cloned().unwrap_or_default())
        })
    }
}
