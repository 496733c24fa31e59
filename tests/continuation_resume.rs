//! Continuation Resume Tests
//!
//! Every page is read by a fresh pipeline built from the previous page's
//! continuation, with the topology changing between pages. The
//! concatenated result must equal an uninterrupted read: nothing lost,
//! nothing repeated, and for ordered queries nothing out of place.
//!
//! Test Categories:
//! 1. Parallel resume
//! 2. Order-by resume
//! 3. Outer stages (TOP / OFFSET / DISTINCT)
//! 4. Direct resume
//! 5. Strategy stability
//! 6. Rejected continuations

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crossquery::cancellation::CancellationToken;
use crossquery::config::QueryOptions;
use crossquery::container::InMemoryContainer;
use crossquery::continuation::{
    ContinuationErrorCode, PipelineContinuation, StrategyTag, PIPELINE_CONTINUATION_VERSION,
};
use crossquery::error::QueryError;
use crossquery::pipeline::QueryPipeline;
use crossquery::query::{DistinctType, OrderByColumn, QueryInfo, QuerySpec, SortOrder};
use crossquery::routing::FeedRange;

const SELECT_ALL: &str = "SELECT * FROM c";
const BY_N: &str = "SELECT * FROM c ORDER BY c.n";
const BY_N_DESC: &str = "SELECT * FROM c ORDER BY c.n DESC";
const MAX_PAGES: usize = 1000;

fn r(min: &str, max: &str) -> FeedRange {
    FeedRange::new(min, max).unwrap()
}

fn ordered(order: SortOrder) -> QueryInfo {
    QueryInfo {
        order_by: vec![OrderByColumn::new("c.n", order)],
        ..Default::default()
    }
}

fn container() -> InMemoryContainer {
    seeded(&["40", "80", "C0"])
}

fn seeded(boundaries: &[&str]) -> InMemoryContainer {
    let container = InMemoryContainer::from_boundaries("events", boundaries).unwrap();
    container.register_query(BY_N, ordered(SortOrder::Ascending)).unwrap();
    container.register_query(BY_N_DESC, ordered(SortOrder::Descending)).unwrap();
    for i in 0..160u64 {
        container
            .insert(json!(format!("device-{}", i % 40)), json!({"id": i, "n": i % 9}))
            .unwrap();
    }
    container
}

/// Topology change applied after the page with the given index
type Reshape = fn(usize, &InMemoryContainer);

fn unchanged(_: usize, _: &InMemoryContainer) {}

/// Split early, merge later, split again
fn churn(page: usize, container: &InMemoryContainer) {
    match page {
        1 => {
            container.split(&r("40", "80"), "60").unwrap();
        }
        3 => {
            container.merge(&r("80", "C0"), &r("C0", "FF")).unwrap();
        }
        5 => {
            container.merge(&r("40", "60"), &r("60", "80")).unwrap();
        }
        7 => {
            container.split(&r("", "40"), "20").unwrap();
        }
        _ => {}
    }
}

fn token_of(options: QueryOptions, token: Option<String>) -> QueryOptions {
    options.with_continuation(token)
}

/// Read one page per pipeline, resuming each time from the last token
async fn resume_each_page(
    container: &InMemoryContainer,
    text: &str,
    options: QueryOptions,
    reshape: Reshape,
) -> (Vec<Value>, Vec<StrategyTag>) {
    let mut token: Option<String> = None;
    let mut documents = Vec::new();
    let mut strategies = Vec::new();
    let cancel = CancellationToken::new();

    for page_index in 0..MAX_PAGES {
        let context = container.pipeline_context(
            QuerySpec::new(text),
            token_of(options.clone(), token.take()),
        );
        let mut pipeline = QueryPipeline::create(context).await.unwrap();
        let Some(page) = pipeline.next_page(&cancel).await else {
            break;
        };
        let page = page.unwrap();
        documents.extend(page.documents.iter().cloned());
        if let Some(c) = &page.continuation {
            strategies.push(c.strategy);
        }
        token = page.continuation_token().unwrap();
        if token.is_none() {
            break;
        }
        reshape(page_index, container);
    }
    (documents, strategies)
}

fn paged(n: usize) -> QueryOptions {
    QueryOptions::default().with_max_item_count(n)
}

fn assert_same_set(documents: &[Value], expected: &[Value]) {
    let read: Vec<u64> = documents.iter().map(|d| d["id"].as_u64().unwrap()).collect();
    let unique: BTreeSet<u64> = read.iter().copied().collect();
    assert_eq!(unique.len(), read.len(), "duplicates in {:?}", read);
    let wanted: BTreeSet<u64> = expected.iter().map(|d| d["id"].as_u64().unwrap()).collect();
    assert_eq!(unique, wanted);
}

// =============================================================================
// PARALLEL RESUME
// =============================================================================

/// Test: resuming after every page reads each document once.
#[tokio::test]
async fn test_parallel_resume_each_page() {
    let container = container();
    let (documents, strategies) = resume_each_page(&container, SELECT_ALL, paged(7), unchanged).await;

    assert_same_set(&documents, &container.expected_documents(SELECT_ALL, None).unwrap());
    assert!(strategies.iter().all(|s| *s == StrategyTag::Parallel));
}

/// Test: splits and merges between pages do not lose or repeat documents.
#[tokio::test]
async fn test_parallel_resume_across_splits_and_merges() {
    let container = container();
    let (documents, _) = resume_each_page(&container, SELECT_ALL, paged(6), churn).await;
    assert_same_set(&documents, &container.expected_documents(SELECT_ALL, None).unwrap());
}

/// Test: a finished range merged into an unfinished one is not read again.
#[tokio::test]
async fn test_parallel_resume_after_drained_range_merges() {
    let container = container();

    // Large pages finish the first range on the first page.
    fn merge_first_two(page: usize, container: &InMemoryContainer) {
        if page == 0 {
            container.merge(&r("", "40"), &r("40", "80")).unwrap();
        }
    }
    let (documents, _) = resume_each_page(&container, SELECT_ALL, paged(500), merge_first_two).await;
    assert_same_set(&documents, &container.expected_documents(SELECT_ALL, None).unwrap());
}

// =============================================================================
// ORDER-BY RESUME
// =============================================================================

/// Test: ordered resume reproduces the global order, ties included.
#[tokio::test]
async fn test_order_by_resume_each_page() {
    let container = container();
    for text in [BY_N, BY_N_DESC] {
        let (documents, strategies) = resume_each_page(&container, text, paged(5), unchanged).await;
        assert_eq!(documents, container.expected_documents(text, None).unwrap(), "{}", text);
        assert!(strategies.iter().all(|s| *s == StrategyTag::OrderBy));
    }
}

/// Test: ordered resume stays exact while ranges split and merge.
#[tokio::test]
async fn test_order_by_resume_across_splits_and_merges() {
    let container = container();
    let (documents, _) = resume_each_page(&container, BY_N, paged(8), churn).await;
    assert_eq!(documents, container.expected_documents(BY_N, None).unwrap());
}

/// Test: resuming in the middle of a run of equal keys neither skips nor repeats.
#[tokio::test]
async fn test_order_by_resume_inside_ties() {
    let container = InMemoryContainer::from_boundaries("ties", &["80"]).unwrap();
    container.register_query(BY_N, ordered(SortOrder::Ascending)).unwrap();
    for i in 0..60u64 {
        container
            .insert(json!(format!("k-{}", i)), json!({"id": i, "n": i % 2}))
            .unwrap();
    }
    for page_size in [1, 3, 29] {
        let (documents, _) = resume_each_page(&container, BY_N, paged(page_size), unchanged).await;
        assert_eq!(documents, container.expected_documents(BY_N, None).unwrap());
    }
}

// =============================================================================
// OUTER STAGES
// =============================================================================

/// Test: TOP is honoured across resumes.
#[tokio::test]
async fn test_top_resume() {
    let container = container();
    let text = "SELECT TOP 33 * FROM c ORDER BY c.n";
    container
        .register_query(text, QueryInfo { top: Some(33), ..ordered(SortOrder::Ascending) })
        .unwrap();

    let (documents, _) = resume_each_page(&container, text, paged(5), churn).await;
    let expected = container.expected_documents(text, None).unwrap();
    assert_eq!(documents, expected[..33].to_vec());
}

/// Test: OFFSET is applied once, even when it spans several pages.
#[tokio::test]
async fn test_offset_limit_resume() {
    let container = container();
    let text = "SELECT * FROM c ORDER BY c.n OFFSET 12 LIMIT 30";
    container
        .register_query(
            text,
            QueryInfo {
                offset: Some(12),
                limit: Some(30),
                ..ordered(SortOrder::Ascending)
            },
        )
        .unwrap();

    let (documents, _) = resume_each_page(&container, text, paged(4), unchanged).await;
    let expected = container.expected_documents(text, None).unwrap();
    assert_eq!(documents, expected[12..42].to_vec());
}

/// Test: DISTINCT remembers what earlier pages returned.
#[tokio::test]
async fn test_distinct_resume() {
    let container = InMemoryContainer::from_boundaries("distinct", &["80"]).unwrap();
    for i in 0..50u64 {
        container
            .insert(json!(format!("k-{}", i)), json!({"n": i % 7}))
            .unwrap();
    }
    let text = "SELECT DISTINCT VALUE c FROM c";
    container
        .register_query(
            text,
            QueryInfo {
                distinct: DistinctType::Unordered,
                ..Default::default()
            },
        )
        .unwrap();

    let (documents, _) = resume_each_page(&container, text, paged(2), unchanged).await;
    let values: Vec<u64> = documents.iter().map(|d| d["n"].as_u64().unwrap()).collect();
    let unique: BTreeSet<u64> = values.iter().copied().collect();
    assert_eq!(values.len(), unique.len(), "repeated values {:?}", values);
    assert_eq!(unique, (0..7).collect::<BTreeSet<u64>>());
}

// =============================================================================
// DIRECT RESUME
// =============================================================================

/// Test: a direct token resumes direct execution on the key's range.
#[tokio::test]
async fn test_direct_resume() {
    let container = container();
    let pk = json!("device-11");
    let options = paged(1).with_partition_key(pk.clone());
    let (documents, strategies) = resume_each_page(&container, SELECT_ALL, options, unchanged).await;

    assert_eq!(documents, container.expected_documents(SELECT_ALL, Some(&pk)).unwrap());
    assert!(!strategies.is_empty());
    assert!(strategies.iter().all(|s| *s == StrategyTag::Direct));
    assert_eq!(container.direct_fetch_count(), container.fetch_count());
}

/// Test: a direct token survives a split of the key's range.
#[tokio::test]
async fn test_direct_resume_across_split() {
    let container = container();
    let pk = json!("device-3");
    fn split_everything(page: usize, container: &InMemoryContainer) {
        if page == 0 {
            for (range, at) in [(r("", "40"), "20"), (r("40", "80"), "60"), (r("80", "C0"), "A0"), (r("C0", "FF"), "E0")] {
                container.split(&range, at).unwrap();
            }
        }
    }
    let options = paged(1).with_partition_key(pk.clone());
    let (documents, _) = resume_each_page(&container, SELECT_ALL, options, split_everything).await;
    assert_eq!(documents, container.expected_documents(SELECT_ALL, Some(&pk)).unwrap());
}

/// Test: an unkeyed direct token resumed after its range split falls back once and reads the rest.
#[tokio::test]
async fn test_unkeyed_direct_resume_after_split() {
    let container = seeded(&[]);
    let expected = container.expected_documents(SELECT_ALL, None).unwrap();
    let cancel = CancellationToken::new();

    let context = container.pipeline_context(QuerySpec::new(SELECT_ALL), paged(10));
    let mut pipeline = QueryPipeline::create(context).await.unwrap();
    let first = pipeline.next_page(&cancel).await.unwrap().unwrap();
    assert_eq!(first.continuation.as_ref().unwrap().strategy, StrategyTag::Direct);
    let token = first.continuation_token().unwrap();
    let mut documents = first.documents;

    container.split(&FeedRange::full(), "80").unwrap();
    let context = container.pipeline_context(QuerySpec::new(SELECT_ALL), paged(10).with_continuation(token));
    let mut resumed = QueryPipeline::create(context).await.unwrap();
    let mut strategies = Vec::new();
    while let Some(page) = resumed.next_page(&cancel).await {
        let page = page.unwrap();
        if let Some(c) = &page.continuation {
            strategies.push(c.strategy);
        }
        documents.extend(page.documents);
    }

    assert_eq!(documents.len(), expected.len());
    assert_same_set(&documents, &expected);
    assert_eq!(resumed.metrics().direct_fallbacks, 1);
    assert!(strategies.iter().all(|s| *s == StrategyTag::Parallel));
}

/// Test: a resumed ordered direct query seeks past the last delivered position after falling back.
#[tokio::test]
async fn test_keyed_ordered_direct_resume_after_rejection() {
    let container = container();
    let pk = json!("device-7");
    let expected = container.expected_documents(BY_N, Some(&pk)).unwrap();
    let cancel = CancellationToken::new();

    let options = paged(1).with_partition_key(pk.clone());
    let context = container.pipeline_context(QuerySpec::new(BY_N), options.clone());
    let mut pipeline = QueryPipeline::create(context).await.unwrap();
    let first = pipeline.next_page(&cancel).await.unwrap().unwrap();
    let progress = first.continuation.as_ref().and_then(|c| c.direct.clone()).unwrap();
    assert_eq!(progress.emitted, 1);
    assert!(progress.rid.is_some());
    let token = first.continuation_token().unwrap();
    let mut documents = first.documents;

    // The backend now refuses to serve this query directly.
    container.reject_direct(BY_N).unwrap();
    let context = container.pipeline_context(QuerySpec::new(BY_N), options.with_continuation(token));
    let mut resumed = QueryPipeline::create(context).await.unwrap();
    while let Some(page) = resumed.next_page(&cancel).await {
        documents.extend(page.unwrap().documents);
    }

    assert_eq!(documents, expected);
    assert_eq!(resumed.metrics().direct_fallbacks, 1);
}

// =============================================================================
// STRATEGY STABILITY
// =============================================================================

/// Test: a parallel token keeps its strategy after a merge leaves a single range.
#[tokio::test]
async fn test_parallel_resume_after_merge_to_one_range() {
    let container = seeded(&["80"]);
    let expected = container.expected_documents(SELECT_ALL, None).unwrap();
    fn merge_all(page: usize, container: &InMemoryContainer) {
        if page == 0 {
            container.merge(&r("", "80"), &r("80", "FF")).unwrap();
        }
    }

    let (documents, strategies) = resume_each_page(&container, SELECT_ALL, paged(6), merge_all).await;
    assert_same_set(&documents, &expected);
    assert!(strategies.len() > 2);
    assert!(strategies.iter().all(|s| *s == StrategyTag::Parallel), "{:?}", strategies);
}

/// Test: forcing pass-through on resume does not change an ordered query's strategy.
#[tokio::test]
async fn test_order_by_resume_ignores_forced_passthrough() {
    let container = container();
    let cancel = CancellationToken::new();
    let context = container.pipeline_context(QuerySpec::new(BY_N), paged(7));
    let mut pipeline = QueryPipeline::create(context).await.unwrap();
    let first = pipeline.next_page(&cancel).await.unwrap().unwrap();
    let token = first.continuation_token().unwrap();
    let mut documents = first.documents;

    let options = paged(7).with_force_passthrough(true).with_continuation(token);
    let context = container.pipeline_context(QuerySpec::new(BY_N), options);
    let mut resumed = QueryPipeline::create(context).await.unwrap();
    while let Some(page) = resumed.next_page(&cancel).await {
        let page = page.unwrap();
        if let Some(c) = &page.continuation {
            assert_eq!(c.strategy, StrategyTag::OrderBy);
        }
        documents.extend(page.documents);
    }
    assert_eq!(documents, container.expected_documents(BY_N, None).unwrap());
}

// =============================================================================
// REJECTED CONTINUATIONS
// =============================================================================

async fn create_error(container: &InMemoryContainer, text: &str, token: String) -> QueryError {
    let context = container.pipeline_context(QuerySpec::new(text), paged(5).with_continuation(Some(token)));
    match QueryPipeline::create(context).await {
        Ok(_) => panic!("continuation was accepted"),
        Err(err) => err,
    }
}

fn continuation_code(err: QueryError) -> ContinuationErrorCode {
    match err {
        QueryError::Continuation(e) => e.code(),
        other => panic!("expected a continuation error, got {other:?}"),
    }
}

/// Test: garbage is reported as malformed.
#[tokio::test]
async fn test_malformed_token() {
    let container = container();
    for raw in ["not json", "{}", r#"{"version": 1, "strategy": "parallel", "source": []}"#] {
        let err = create_error(&container, SELECT_ALL, raw.to_string()).await;
        assert_eq!(continuation_code(err), ContinuationErrorCode::Malformed, "{}", raw);
    }
}

/// Test: a token from a newer pipeline is refused as such.
#[tokio::test]
async fn test_newer_version_refused() {
    let container = container();
    let raw = json!({
        "version": PIPELINE_CONTINUATION_VERSION + 1,
        "strategy": "parallel",
        "source": [],
    })
    .to_string();
    let err = create_error(&container, SELECT_ALL, raw).await;
    assert_eq!(continuation_code(err), ContinuationErrorCode::VersionUnsupported);
}

/// Test: an ordered token cannot resume an unordered query.
#[tokio::test]
async fn test_strategy_mismatch() {
    let container = container();
    let context = container.pipeline_context(QuerySpec::new(BY_N), paged(5));
    let mut pipeline = QueryPipeline::create(context).await.unwrap();
    let page = pipeline.next_page(&CancellationToken::new()).await.unwrap().unwrap();
    let token = page.continuation_token().unwrap().unwrap();

    let err = create_error(&container, SELECT_ALL, token).await;
    assert_eq!(continuation_code(err), ContinuationErrorCode::StrategyMismatch);
}

/// Test: a token range cut in two by the current topology is not guessed at.
#[tokio::test]
async fn test_partial_overlap_is_unreconcilable() {
    let container = container();
    let context = container.pipeline_context(QuerySpec::new(SELECT_ALL), paged(3));
    let mut pipeline = QueryPipeline::create(context).await.unwrap();
    let page = pipeline.next_page(&CancellationToken::new()).await.unwrap().unwrap();
    let token = page.continuation_token().unwrap().unwrap();
    let parsed = PipelineContinuation::parse(&token).unwrap();
    let tokens = parsed.parallel_tokens().unwrap();
    assert!(tokens.iter().any(|t| t.range == r("40", "80")));

    // [40,80) now straddles [40,60) and [60,C0).
    container.split(&r("40", "80"), "60").unwrap();
    container.merge(&r("60", "80"), &r("80", "C0")).unwrap();

    let err = create_error(&container, SELECT_ALL, token).await;
    assert_eq!(continuation_code(err), ContinuationErrorCode::Unreconcilable);
}
