//! Continuation Resolver Scenario Tests
//!
//! Maps continuation tokens onto topologies that changed after the tokens
//! were issued. Range bounds are hex strings; "" and "FF" are the ends of
//! the key space.
//!
//! Test Categories:
//! 1. Unchanged topology
//! 2. Merges
//! 3. Splits
//! 4. Multiple tokens
//! 5. Unreconcilable input

use crossquery::continuation::{
    resolve, ContinuationErrorCode, ParallelContinuationToken, PartitionMapping,
};
use crossquery::routing::FeedRange;

fn r(min: &str, max: &str) -> FeedRange {
    FeedRange::new(min, max).unwrap()
}

fn tok(min: &str, max: &str, value: &str) -> ParallelContinuationToken {
    ParallelContinuationToken::new(r(min, max), Some(value.to_string()))
}

fn span_of(map: &std::collections::BTreeMap<FeedRange, Option<ParallelContinuationToken>>) -> Option<FeedRange> {
    let keys: Vec<FeedRange> = map.keys().cloned().collect();
    FeedRange::span_of(&keys)
}

/// Every current key must be covered exactly once across the three maps
fn assert_tiles(mapping: &PartitionMapping<ParallelContinuationToken>, min: &str, max: &str) {
    let ranges: Vec<FeedRange> = mapping.entries().map(|(range, _)| range.clone()).collect();
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].max_exclusive(), pair[1].min_inclusive(), "gap or overlap in {:?}", ranges);
    }
    assert_eq!(ranges.first().unwrap().min_inclusive(), min);
    assert_eq!(ranges.last().unwrap().max_exclusive(), max);
}

// =============================================================================
// UNCHANGED TOPOLOGY
// =============================================================================

/// Test: the active token resumes its own range; ranges to its right start fresh.
#[test]
fn test_token_on_first_range() {
    let ranges = [r("", "AA"), r("AA", "BB"), r("BB", "FF")];
    let t = tok("", "AA", "c1");
    let mapping = resolve(&ranges, &[t.clone()]).unwrap();

    assert!(mapping.left.is_empty());
    assert_eq!(mapping.target.len(), 1);
    assert_eq!(mapping.target.get(&r("", "AA")), Some(&Some(t)));
    assert_eq!(span_of(&mapping.right), Some(r("AA", "FF")));
    assert!(mapping.right.values().all(Option::is_none));
    assert_tiles(&mapping, "", "FF");
}

// =============================================================================
// MERGES
// =============================================================================

/// Test: a token for half of a merged range resumes that half; the other half starts fresh.
#[test]
fn test_merge_resumes_inside_combined_range() {
    let ranges = [r("", "BB")];
    let t = tok("", "AA", "c1");
    let mapping = resolve(&ranges, &[t.clone()]).unwrap();

    assert!(mapping.left.is_empty());
    assert!(mapping.right.is_empty());
    assert_eq!(mapping.target_span(), Some(r("", "BB")));
    assert_eq!(mapping.target.get(&r("", "AA")), Some(&Some(t)));
    assert_eq!(mapping.target.get(&r("AA", "BB")), Some(&None));
}

// =============================================================================
// SPLITS
// =============================================================================

/// Test: a token for a range that split is kept whole across its children.
#[test]
fn test_split_keeps_token_over_children() {
    let ranges = [r("AA", "CC"), r("CC", "EE"), r("EE", "FF")];
    let t = tok("AA", "EE", "c1");
    let mapping = resolve(&ranges, &[t.clone()]).unwrap();

    assert_eq!(mapping.target.len(), 1);
    assert_eq!(mapping.target.get(&r("AA", "EE")), Some(&Some(t)));
    assert_eq!(mapping.right.get(&r("EE", "FF")), Some(&None));
    assert_tiles(&mapping, "AA", "FF");
}

// =============================================================================
// MULTIPLE TOKENS
// =============================================================================

/// Test: several tokens inside one merged range are all carried; the rest is fresh.
#[test]
fn test_multiple_tokens_in_one_range() {
    let ranges = [r("AA", "FF")];
    let tokens = [tok("AA", "CC", "t1"), tok("CC", "EE", "t2")];
    let mapping = resolve(&ranges, &tokens).unwrap();

    assert_eq!(mapping.target.get(&r("AA", "CC")), Some(&Some(tokens[0].clone())));
    assert_eq!(mapping.target.get(&r("CC", "EE")), Some(&Some(tokens[1].clone())));
    assert_eq!(mapping.target.get(&r("EE", "FF")), Some(&None));
    assert_eq!(mapping.len(), 3);
}

/// Test: tokens on both sides of the active one land left and right of it.
#[test]
fn test_tokens_around_active_point() {
    let ranges = [r("", "40"), r("40", "80"), r("80", "C0"), r("C0", "FF")];
    let tokens = [tok("40", "80", "active"), tok("", "40", "left"), tok("C0", "FF", "right")];
    let mapping = resolve(&ranges, &tokens).unwrap();

    assert_eq!(mapping.left.get(&r("", "40")), Some(&Some(tokens[1].clone())));
    assert_eq!(mapping.target.get(&r("40", "80")), Some(&Some(tokens[0].clone())));
    assert_eq!(mapping.right.get(&r("80", "C0")), Some(&None));
    assert_eq!(mapping.right.get(&r("C0", "FF")), Some(&Some(tokens[2].clone())));
    assert_tiles(&mapping, "", "FF");
}

// =============================================================================
// UNRECONCILABLE INPUT
// =============================================================================

/// Test: a token straddling a range boundary is refused, never guessed at.
#[test]
fn test_partial_overlap_is_refused() {
    let ranges = [r("", "80"), r("80", "FF")];
    let err = resolve(&ranges, &[tok("40", "C0", "c1")]).unwrap_err();
    assert_eq!(err.code(), ContinuationErrorCode::Unreconcilable);
}

/// Test: resolution is a pure function of its inputs.
#[test]
fn test_resolution_is_deterministic() {
    let ranges = [r("", "40"), r("40", "80"), r("80", "FF")];
    let tokens = [tok("", "80", "a")];
    let first = resolve(&ranges, &tokens).unwrap();
    for _ in 0..10 {
        assert_eq!(resolve(&ranges, &tokens).unwrap(), first);
    }
}
