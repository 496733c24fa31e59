//! Strategy selection and stage composition
//!
//! # Decision order
//!
//! 1. A direct token, or direct execution being possible, builds the direct
//!    stage without consulting the query plan
//! 2. An inbound token's strategy must agree with the query shape
//! 3. Pass-through when forced or when one range serves the whole query
//! 4. Order-by fan-out for ordered queries
//! 5. Parallel fan-out otherwise
//!
//! GROUP BY and multi-aggregate select lists are refused. A single `SELECT
//! VALUE` aggregate, DISTINCT, OFFSET and TOP / LIMIT are layered on the
//! distributed stages.

use std::sync::Arc;

use crate::config::QueryOptions;
use crate::continuation::{
    resolve, ContinuationError, OrderByContinuationToken, ParallelContinuationToken,
    PipelineContinuation, StrategyTag,
};
use crate::error::{QueryError, QueryResult};
use crate::observability::{log_event_with_fields, Event, ObservationScope, QueryMetrics};
use crate::producer::{
    DeterministicComparer, ItemFilter, ItemProducerTree, OrderByComparer, PageFetcher,
    ProducerComparer, ProducerContext,
};
use crate::query::{DistinctType, QueryInfo, QueryPlanProvider, QuerySpec};
use crate::routing::{effective_partition_key, FeedRange, RangeRouter, RoutingError};

use super::aggregate::AggregateStage;
use super::direct::DirectStage;
use super::distinct::DistinctStage;
use super::order_by::{order_by_page_size, resume_entries, OrderByStage};
use super::parallel::{FanOutSettings, ParallelStage};
use super::skip::SkipStage;
use super::stage::QueryStage;
use super::take::TakeStage;

/// Everything needed to build (and rebuild) a pipeline for one query
#[derive(Clone)]
pub struct PipelineContext {
    pub collection_id: Arc<str>,
    pub query: Arc<QuerySpec>,
    pub options: QueryOptions,
    pub fetcher: Arc<dyn PageFetcher>,
    pub router: Arc<dyn RangeRouter>,
    pub plan: Arc<dyn QueryPlanProvider>,
    pub metrics: Arc<QueryMetrics>,
}

impl PipelineContext {
    pub fn new(
        collection_id: impl Into<Arc<str>>,
        query: QuerySpec,
        options: QueryOptions,
        fetcher: Arc<dyn PageFetcher>,
        router: Arc<dyn RangeRouter>,
        plan: Arc<dyn QueryPlanProvider>,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            query: Arc::new(query),
            options,
            fetcher,
            router,
            plan,
            metrics: Arc::new(QueryMetrics::new()),
        }
    }

    fn fan_out_settings(&self) -> FanOutSettings {
        FanOutSettings {
            max_concurrency: self.options.max_concurrency,
            max_buffered_item_count: self.options.max_buffered_item_count,
        }
    }
}

/// Whether to start with direct single-range execution
pub fn use_direct(options: &QueryOptions, token: Option<StrategyTag>, range_count: usize) -> bool {
    match token {
        Some(StrategyTag::Direct) => true,
        Some(_) => false,
        None => {
            options.enable_direct_execution
                && (options.partition_key.is_some() || range_count == 1)
        }
    }
}

/// Pick the distributed strategy for a query shape
///
/// `target_ranges` is the number of ranges the query has to read.
pub fn decide(
    info: &QueryInfo,
    target_ranges: usize,
    token: Option<StrategyTag>,
    force_passthrough: bool,
    partition_key_supplied: bool,
) -> QueryResult<StrategyTag> {
    match token {
        Some(StrategyTag::OrderBy) if !info.has_order_by() => {
            return Err(ContinuationError::strategy_mismatch("order_by", "unordered").into());
        }
        Some(StrategyTag::Parallel) if info.has_order_by() => {
            return Err(ContinuationError::strategy_mismatch("parallel", "order_by").into());
        }
        // Aggregate pages never carry a continuation.
        Some(tag @ (StrategyTag::Passthrough | StrategyTag::OrderBy | StrategyTag::Parallel))
            if info.has_aggregates() =>
        {
            return Err(ContinuationError::strategy_mismatch(tag.as_str(), "aggregate").into());
        }
        // A query keeps its strategy across resumes, whatever the topology
        // or options say now.
        Some(tag @ (StrategyTag::Passthrough | StrategyTag::OrderBy | StrategyTag::Parallel)) => {
            return Ok(tag)
        }
        Some(StrategyTag::Direct) | None => {}
    }

    if info.has_group_by() {
        return Err(QueryError::Unsupported("GROUP BY across partitions".into()));
    }
    if info.has_aggregates() && info.aggregate_operator().is_none() {
        return Err(QueryError::Unsupported(format!(
            "aggregates over a select list across partitions: {}",
            info.aggregates.join(", ")
        )));
    }

    // Splitting a single range would interleave an unkeyed ORDER BY.
    let single_range = target_ranges == 1
        && info.is_server_streaming()
        && (partition_key_supplied || !info.has_order_by());
    if force_passthrough || single_range {
        return Ok(StrategyTag::Passthrough);
    }
    if info.has_order_by() {
        Ok(StrategyTag::OrderBy)
    } else {
        Ok(StrategyTag::Parallel)
    }
}

/// Range owning the logical partition key
fn range_for_key(ranges: &[FeedRange], partition_key: &serde_json::Value) -> QueryResult<FeedRange> {
    let epk = effective_partition_key(partition_key);
    ranges
        .iter()
        .find(|r| r.contains_key(&epk))
        .cloned()
        .ok_or_else(|| {
            QueryError::Routing(RoutingError::NotTiled {
                expected: FeedRange::full().to_string(),
                detail: format!("no range holds key {}", epk),
            })
        })
}

/// Tokens of a direct or pass-through continuation
fn range_tokens(continuation: &PipelineContinuation) -> QueryResult<Vec<ParallelContinuationToken>> {
    if continuation.source.is_array() {
        Ok(continuation.parallel_tokens()?)
    } else {
        Ok(vec![continuation.single_token()?])
    }
}

/// Builds trees that share one producer context
struct TreeBuilder {
    router: Arc<dyn RangeRouter>,
    collection_id: Arc<str>,
    context: ProducerContext,
    comparer: Arc<dyn ProducerComparer>,
}

impl TreeBuilder {
    fn new(
        ctx: &PipelineContext,
        query: Arc<QuerySpec>,
        page_size: usize,
        direct: bool,
        comparer: Arc<dyn ProducerComparer>,
    ) -> Self {
        Self {
            router: ctx.router.clone(),
            collection_id: ctx.collection_id.clone(),
            context: ProducerContext {
                fetcher: ctx.fetcher.clone(),
                query,
                partition_key: ctx.options.partition_key.clone(),
                page_size,
                metrics: ctx.metrics.clone(),
                direct,
            },
            comparer,
        }
    }

    fn tree(&self, range: FeedRange, token: Option<String>, filter: ItemFilter) -> ItemProducerTree {
        ItemProducerTree::new(
            range,
            token,
            filter,
            self.comparer.clone(),
            self.router.clone(),
            self.collection_id.clone(),
            self.context.clone(),
        )
    }

    fn fresh(&self, range: FeedRange) -> ItemProducerTree {
        let filter = ItemFilter::new(range.clone());
        self.tree(range, None, filter)
    }

    fn from_tokens(&self, tokens: Vec<ParallelContinuationToken>) -> Vec<ItemProducerTree> {
        let mut trees: Vec<ItemProducerTree> = tokens
            .into_iter()
            .map(|t| {
                let filter = ItemFilter::new(t.range.clone());
                self.tree(t.range, t.token, filter)
            })
            .collect();
        trees.sort_by(|a, b| a.range().cmp(b.range()));
        trees
    }
}

fn log_selected(ctx: &PipelineContext, strategy: StrategyTag, trees: usize, resumed: bool) {
    let trees = trees.to_string();
    log_event_with_fields(
        Event::PipelineSelected,
        &[
            ("collection", &*ctx.collection_id),
            ("strategy", strategy.as_str()),
            ("trees", trees.as_str()),
            ("resumed", if resumed { "true" } else { "false" }),
        ],
    );
}

/// Builds the stage stack for a query
pub struct PipelineStageSelector;

impl PipelineStageSelector {
    /// Build the pipeline for the options' inbound continuation, if any
    pub async fn build(ctx: &PipelineContext) -> QueryResult<Box<dyn QueryStage>> {
        ctx.options.validate()?;
        let continuation = ctx
            .options
            .continuation
            .as_deref()
            .map(PipelineContinuation::parse)
            .transpose()?;

        let scope = ObservationScope::with_fields(
            "QUERY_PIPELINE_BUILD",
            &[("collection", &*ctx.collection_id)],
        );
        let built = Self::build_inner(ctx, continuation.as_ref()).await;
        match &built {
            Ok(_) => scope.complete(),
            Err(err) => scope.fail(err.code()),
        }
        built
    }

    async fn build_inner(
        ctx: &PipelineContext,
        continuation: Option<&PipelineContinuation>,
    ) -> QueryResult<Box<dyn QueryStage>> {
        let ranges = ctx.router.all_ranges(&ctx.collection_id).await?;
        let tag = continuation.map(|c| c.strategy);
        if use_direct(&ctx.options, tag, ranges.len()) {
            Self::build_direct(ctx, &ranges, continuation)
        } else {
            Self::distributed(ctx, ranges, continuation).await
        }
    }

    fn build_direct(
        ctx: &PipelineContext,
        ranges: &[FeedRange],
        continuation: Option<&PipelineContinuation>,
    ) -> QueryResult<Box<dyn QueryStage>> {
        let builder = TreeBuilder::new(
            ctx,
            ctx.query.clone(),
            ctx.options.max_item_count,
            true,
            Arc::new(DeterministicComparer),
        );
        let trees = match continuation {
            Some(c) => builder.from_tokens(range_tokens(c)?),
            None => {
                let range = match (&ctx.options.partition_key, ranges) {
                    (Some(pk), _) => range_for_key(ranges, pk)?,
                    (None, [only]) => only.clone(),
                    (None, _) => {
                        return Err(QueryError::Internal(
                            "direct execution needs a partition key or a single range".into(),
                        ))
                    }
                };
                vec![builder.fresh(range)]
            }
        };

        log_selected(ctx, StrategyTag::Direct, trees.len(), continuation.is_some());
        let progress = continuation.and_then(|c| c.direct.clone()).unwrap_or_default();
        let inner = ParallelStage::new(StrategyTag::Direct, trees, ctx.fan_out_settings())
            .with_direct_progress(progress);
        Ok(Box::new(DirectStage::new(inner, ctx.clone(), continuation.cloned())))
    }

    /// Build the distributed pipeline a direct stage falls back to
    ///
    /// `resume_point` is the direct continuation of the last delivered page;
    /// without one the query starts over.
    pub async fn build_fallback(
        ctx: &PipelineContext,
        resume_point: Option<&PipelineContinuation>,
    ) -> QueryResult<Box<dyn QueryStage>> {
        let ranges = ctx.router.all_ranges(&ctx.collection_id).await?;
        let Some(direct) = resume_point else {
            return Self::distributed(ctx, ranges, None).await;
        };
        let info = ctx
            .plan
            .query_info(&ctx.collection_id, &ctx.query)
            .await?;
        let strategy = Self::decide_for(ctx, &info, ranges.len(), None)?;
        let continuation = fallback_continuation(direct, strategy, &info)?;
        Self::assemble(ctx, ranges, &info, strategy, Some(&continuation))
    }

    fn decide_for(
        ctx: &PipelineContext,
        info: &QueryInfo,
        range_count: usize,
        token: Option<StrategyTag>,
    ) -> QueryResult<StrategyTag> {
        let partition_key_supplied = ctx.options.partition_key.is_some();
        let target_ranges = if partition_key_supplied { 1 } else { range_count };
        decide(
            info,
            target_ranges,
            token,
            ctx.options.force_passthrough,
            partition_key_supplied,
        )
    }

    async fn distributed(
        ctx: &PipelineContext,
        ranges: Vec<FeedRange>,
        continuation: Option<&PipelineContinuation>,
    ) -> QueryResult<Box<dyn QueryStage>> {
        let info = ctx
            .plan
            .query_info(&ctx.collection_id, &ctx.query)
            .await?;
        let strategy = Self::decide_for(ctx, &info, ranges.len(), continuation.map(|c| c.strategy))?;
        Self::assemble(ctx, ranges, &info, strategy, continuation)
    }

    fn assemble(
        ctx: &PipelineContext,
        ranges: Vec<FeedRange>,
        info: &QueryInfo,
        strategy: StrategyTag,
        continuation: Option<&PipelineContinuation>,
    ) -> QueryResult<Box<dyn QueryStage>> {
        let query = match &info.rewritten_query {
            Some(text) => Arc::new(QuerySpec {
                text: text.clone(),
                parameters: ctx.query.parameters.clone(),
            }),
            None => ctx.query.clone(),
        };
        let page_size = ctx.options.max_item_count;

        let source: Box<dyn QueryStage> = match strategy {
            StrategyTag::OrderBy => {
                let sort_orders = info.sort_orders();
                let comparer = Arc::new(OrderByComparer::new(sort_orders.clone()));
                let backend_page_size =
                    order_by_page_size(page_size, info.effective_top(), ranges.len());
                let builder = TreeBuilder::new(ctx, query, backend_page_size, false, comparer);

                let trees: Vec<ItemProducerTree> = match continuation {
                    Some(c) => {
                        let entries = resume_entries(&ranges, c, &sort_orders)?;
                        log_resolved(ctx, strategy, entries.len());
                        entries
                            .into_iter()
                            .map(|e| {
                                let mut filter = ItemFilter::new(e.range.clone());
                                if let Some(resume) = e.resume {
                                    filter = filter.with_resume(resume);
                                }
                                builder.tree(e.range, e.token, filter)
                            })
                            .collect()
                    }
                    None => ranges.iter().cloned().map(|r| builder.fresh(r)).collect(),
                };
                log_selected(ctx, strategy, trees.len(), continuation.is_some());
                let resumed_from =
                    continuation.map(|c| PipelineContinuation::new(c.strategy, c.source.clone()));
                Box::new(OrderByStage::new(trees, page_size, resumed_from))
            }
            StrategyTag::Parallel => {
                let builder =
                    TreeBuilder::new(ctx, query, page_size, false, Arc::new(DeterministicComparer));
                let trees: Vec<ItemProducerTree> = match continuation {
                    Some(c) => {
                        let tokens = range_tokens(c)?;
                        let mapping = resolve(&ranges, &tokens)?;
                        log_resolved(ctx, strategy, mapping.len());
                        // Ranges left of the active token without one of
                        // their own were already drained.
                        let active_min = tokens[0].range.min_inclusive().to_string();
                        mapping
                            .entries()
                            .filter(|(range, token)| {
                                token.is_some() || range.min_inclusive() >= active_min.as_str()
                            })
                            .map(|(range, token)| {
                                let cursor = token.as_ref().and_then(|t| t.token.clone());
                                builder.tree(range.clone(), cursor, ItemFilter::new(range.clone()))
                            })
                            .collect()
                    }
                    None => ranges.iter().cloned().map(|r| builder.fresh(r)).collect(),
                };
                log_selected(ctx, strategy, trees.len(), continuation.is_some());
                Box::new(ParallelStage::new(strategy, trees, ctx.fan_out_settings()))
            }
            StrategyTag::Passthrough | StrategyTag::Direct => {
                let builder =
                    TreeBuilder::new(ctx, query, page_size, false, Arc::new(DeterministicComparer));
                let trees = match (continuation, &ctx.options.partition_key) {
                    (Some(c), _) => builder.from_tokens(range_tokens(c)?),
                    (None, Some(pk)) => vec![builder.fresh(range_for_key(&ranges, pk)?)],
                    (None, None) => ranges.iter().cloned().map(|r| builder.fresh(r)).collect(),
                };
                log_selected(ctx, StrategyTag::Passthrough, trees.len(), continuation.is_some());
                Box::new(ParallelStage::new(
                    StrategyTag::Passthrough,
                    trees,
                    ctx.fan_out_settings(),
                ))
            }
        };

        Ok(wrap_outer(source, info, continuation))
    }
}

/// Restate a direct resume point for the distributed strategy
///
/// The direct tokens carry position cursors, so they resume the same
/// ranges under parallel or pass-through. Ordered strategies seek every
/// range past the last delivered `(keys, rid)` instead.
fn fallback_continuation(
    direct: &PipelineContinuation,
    strategy: StrategyTag,
    info: &QueryInfo,
) -> QueryResult<PipelineContinuation> {
    let tokens = range_tokens(direct)?;
    let progress = direct.direct.clone().unwrap_or_default();
    let source = match strategy {
        StrategyTag::OrderBy => {
            let rid = progress.rid.clone().ok_or_else(|| {
                ContinuationError::malformed("direct continuation records no delivered position")
            })?;
            let tokens: Vec<OrderByContinuationToken> = tokens
                .into_iter()
                .map(|token| OrderByContinuationToken {
                    composite_token: token,
                    order_by_items: progress.order_by_items.clone(),
                    rid: rid.clone(),
                    skip_count: progress.skip_count,
                    filter: None,
                })
                .collect();
            serde_json::to_value(&tokens)?
        }
        StrategyTag::Parallel | StrategyTag::Passthrough | StrategyTag::Direct => {
            serde_json::to_value(&tokens)?
        }
    };

    let mut continuation = PipelineContinuation::new(strategy, source);
    continuation.take = info
        .top
        .or(info.limit)
        .map(|limit| limit.saturating_sub(progress.emitted));
    Ok(continuation)
}

fn log_resolved(ctx: &PipelineContext, strategy: StrategyTag, entries: usize) {
    let entries = entries.to_string();
    log_event_with_fields(
        Event::ContinuationResolved,
        &[
            ("collection", &*ctx.collection_id),
            ("strategy", strategy.as_str()),
            ("entries", entries.as_str()),
        ],
    );
}

/// Layer the aggregate fold, DISTINCT, OFFSET and TOP / LIMIT, innermost first
fn wrap_outer(
    source: Box<dyn QueryStage>,
    info: &QueryInfo,
    continuation: Option<&PipelineContinuation>,
) -> Box<dyn QueryStage> {
    let mut stage = source;
    if let Some(operator) = info.aggregate_operator() {
        stage = Box::new(AggregateStage::new(stage, operator));
    }
    if info.has_distinct() {
        stage = Box::new(DistinctStage::new(
            stage,
            info.distinct == DistinctType::Ordered,
            continuation.and_then(|c| c.distinct.clone()),
        ));
    }
    if let Some(offset) = info.offset {
        let remaining = match continuation {
            Some(c) => c.skip.unwrap_or(0),
            None => offset,
        };
        stage = Box::new(SkipStage::new(stage, remaining));
    }
    if let Some(limit) = info.top.or(info.limit) {
        let remaining = continuation.and_then(|c| c.take).unwrap_or(limit);
        stage = Box::new(TakeStage::new(stage, remaining));
    }
    stage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::{ContinuationErrorCode, DirectProgress};
    use crate::query::{OrderByColumn, SortOrder};
    use serde_json::json;

    fn ordered() -> QueryInfo {
        QueryInfo {
            order_by: vec![OrderByColumn::new("c.n", SortOrder::Ascending)],
            ..Default::default()
        }
    }

    #[test]
    fn test_use_direct() {
        let options = QueryOptions::default();
        assert!(use_direct(&options, None, 1));
        assert!(!use_direct(&options, None, 4));
        assert!(use_direct(&options.clone().with_partition_key(json!("a")), None, 4));
        assert!(!use_direct(&options.clone().with_direct_execution(false), None, 1));
        assert!(!use_direct(&options, Some(StrategyTag::Parallel), 1));

        let disabled = options.with_direct_execution(false);
        assert!(use_direct(&disabled, Some(StrategyTag::Direct), 4));
    }

    #[test]
    fn test_decide_by_shape() {
        let plain = QueryInfo::default();
        assert_eq!(decide(&plain, 4, None, false, false).unwrap(), StrategyTag::Parallel);
        assert_eq!(decide(&plain, 1, None, false, false).unwrap(), StrategyTag::Passthrough);
        assert_eq!(decide(&plain, 4, None, true, false).unwrap(), StrategyTag::Passthrough);
        assert_eq!(decide(&ordered(), 4, None, false, false).unwrap(), StrategyTag::OrderBy);
        assert_eq!(decide(&ordered(), 1, None, false, false).unwrap(), StrategyTag::OrderBy);
        assert_eq!(decide(&ordered(), 1, None, false, true).unwrap(), StrategyTag::Passthrough);
    }

    #[test]
    fn test_decide_rejects_grouping_and_select_lists() {
        let grouped = QueryInfo {
            aggregates: vec!["COUNT".into()],
            group_by: vec!["c.kind".into()],
            ..Default::default()
        };
        assert!(matches!(
            decide(&grouped, 3, None, false, false),
            Err(QueryError::Unsupported(_))
        ));
        assert!(matches!(
            decide(&grouped, 1, None, true, true),
            Err(QueryError::Unsupported(_))
        ));

        let select_list = QueryInfo {
            aggregates: vec!["MIN".into(), "MAX".into()],
            ..Default::default()
        };
        assert!(matches!(
            decide(&select_list, 3, None, false, false),
            Err(QueryError::Unsupported(_))
        ));
    }

    #[test]
    fn test_decide_fans_out_value_aggregates() {
        let count = QueryInfo {
            aggregates: vec!["COUNT".into()],
            ..Default::default()
        };
        assert_eq!(decide(&count, 3, None, false, false).unwrap(), StrategyTag::Parallel);
        assert_eq!(decide(&count, 1, None, false, true).unwrap(), StrategyTag::Parallel);
        assert_eq!(decide(&count, 3, None, true, false).unwrap(), StrategyTag::Passthrough);

        let err = decide(&count, 3, Some(StrategyTag::Parallel), false, false).unwrap_err();
        match err {
            QueryError::Continuation(e) => assert_eq!(e.code(), ContinuationErrorCode::StrategyMismatch),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decide_strategy_mismatch() {
        let err = decide(&QueryInfo::default(), 4, Some(StrategyTag::OrderBy), false, false).unwrap_err();
        match err {
            QueryError::Continuation(e) => assert_eq!(e.code(), ContinuationErrorCode::StrategyMismatch),
            other => panic!("unexpected {other:?}"),
        }
        assert!(decide(&ordered(), 4, Some(StrategyTag::Parallel), false, false).is_err());
        assert_eq!(
            decide(&ordered(), 4, Some(StrategyTag::Passthrough), false, false).unwrap(),
            StrategyTag::Passthrough
        );
    }

    #[test]
    fn test_decide_keeps_token_strategy() {
        let plain = QueryInfo::default();
        assert_eq!(
            decide(&plain, 1, Some(StrategyTag::Parallel), false, false).unwrap(),
            StrategyTag::Parallel
        );
        assert_eq!(
            decide(&plain, 4, Some(StrategyTag::Parallel), true, false).unwrap(),
            StrategyTag::Parallel
        );
        assert_eq!(
            decide(&ordered(), 1, Some(StrategyTag::OrderBy), true, true).unwrap(),
            StrategyTag::OrderBy
        );
    }

    fn direct_resume_point(progress: DirectProgress) -> PipelineContinuation {
        let token = ParallelContinuationToken::new(FeedRange::full(), Some("cursor".into()));
        let mut continuation =
            PipelineContinuation::new(StrategyTag::Direct, serde_json::to_value(token).unwrap());
        continuation.direct = Some(progress);
        continuation
    }

    #[test]
    fn test_fallback_continuation_keeps_cursors() {
        let progress = DirectProgress {
            emitted: 12,
            ..Default::default()
        };
        let info = QueryInfo {
            top: Some(30),
            ..Default::default()
        };
        let c = fallback_continuation(&direct_resume_point(progress), StrategyTag::Parallel, &info)
            .unwrap();
        assert_eq!(c.strategy, StrategyTag::Parallel);
        let tokens = c.parallel_tokens().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token.as_deref(), Some("cursor"));
        assert_eq!(c.take, Some(18));
        assert!(c.direct.is_none());
    }

    #[test]
    fn test_fallback_continuation_seeds_order_by_seek() {
        let mut progress = DirectProgress::default();
        progress.record(&[json!(4)], "r1");
        progress.record(&[json!(5)], "r2");
        let c = fallback_continuation(&direct_resume_point(progress), StrategyTag::OrderBy, &ordered())
            .unwrap();
        let tokens = c.order_by_tokens(1).unwrap();
        assert_eq!(tokens[0].rid, "r2");
        assert_eq!(tokens[0].order_by_values(), vec![json!(5)]);
        assert_eq!(tokens[0].skip_count, 1);
        assert_eq!(tokens[0].composite_token.token.as_deref(), Some("cursor"));
        assert_eq!(c.take, None);
    }

    #[test]
    fn test_fallback_continuation_needs_position_for_order_by() {
        let err = fallback_continuation(
            &direct_resume_point(DirectProgress::default()),
            StrategyTag::OrderBy,
            &ordered(),
        )
        .unwrap_err();
        match err {
            QueryError::Continuation(e) => assert_eq!(e.code(), ContinuationErrorCode::Malformed),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_range_for_key() {
        let ranges = vec![
            FeedRange::new("", "80").unwrap(),
            FeedRange::new("80", "FF").unwrap(),
        ];
        let pk = json!("tenant-7");
        let range = range_for_key(&ranges, &pk).unwrap();
        assert!(range.contains_key(&effective_partition_key(&pk)));
    }
}
