//! Continuation token wire formats
//!
//! The caller only ever sees one opaque string: a [`PipelineContinuation`]
//! serialized as JSON. Its `source` body depends on the strategy that
//! produced it; outer stages add their own small state next to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routing::FeedRange;

use super::errors::{ContinuationError, ContinuationResult};

/// Highest pipeline continuation version this crate reads and writes
pub const PIPELINE_CONTINUATION_VERSION: u32 = 1;

/// A value that was issued for one specific range
pub trait RangeScoped {
    /// Range in effect when the value was issued
    fn range(&self) -> &FeedRange;
}

/// Backend cursor tagged with the range it was issued for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelContinuationToken {
    pub range: FeedRange,
    pub token: Option<String>,
}

impl ParallelContinuationToken {
    pub fn new(range: FeedRange, token: Option<String>) -> Self {
        Self { range, token }
    }
}

impl RangeScoped for ParallelContinuationToken {
    fn range(&self) -> &FeedRange {
        &self.range
    }
}

/// One order-by key value as carried in tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    #[serde(default)]
    pub item: Value,
}

/// Per-range token for globally ordered queries
///
/// Besides the backend cursor it records where the merge left off: the
/// order-by values and rid of the last emitted item, and how many items
/// with that same rid were already emitted from the page `composite_token`
/// points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByContinuationToken {
    pub composite_token: ParallelContinuationToken,
    pub order_by_items: Vec<OrderByItem>,
    pub rid: String,
    pub skip_count: usize,
    /// Residual filter expression; carried but never applied, since resume
    /// seeks by `(order_by_items, rid, skip_count)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl OrderByContinuationToken {
    /// The raw order-by values
    pub fn order_by_values(&self) -> Vec<Value> {
        self.order_by_items.iter().map(|i| i.item.clone()).collect()
    }
}

impl RangeScoped for OrderByContinuationToken {
    fn range(&self) -> &FeedRange {
        &self.composite_token.range
    }
}

/// Which stage produced a continuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    Direct,
    Passthrough,
    Parallel,
    OrderBy,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Direct => "direct",
            StrategyTag::Passthrough => "passthrough",
            StrategyTag::Parallel => "parallel",
            StrategyTag::OrderBy => "order_by",
        }
    }
}

/// Distinct stage state
///
/// Ordered distinct only needs the last emitted hash; unordered distinct
/// carries every hash seen so far.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DistinctState {
    pub ordered: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

/// How far direct execution got, for a distributed fallback to pick up
///
/// `rid` is set once a document has been delivered; `order_by_items` and
/// `skip_count` describe the last delivered position the same way an
/// order-by token does.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectProgress {
    pub emitted: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by_items: Vec<OrderByItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default)]
    pub skip_count: usize,
}

impl DirectProgress {
    /// Record one delivered document
    pub fn record(&mut self, order_by_items: &[Value], rid: &str) {
        let same = self.rid.as_deref() == Some(rid)
            && self.order_by_items.len() == order_by_items.len()
            && self
                .order_by_items
                .iter()
                .zip(order_by_items)
                .all(|(seen, value)| &seen.item == value);
        self.skip_count = if same { self.skip_count + 1 } else { 1 };
        if !same {
            self.order_by_items = order_by_items
                .iter()
                .map(|v| OrderByItem { item: v.clone() })
                .collect();
            self.rid = Some(rid.to_string());
        }
        self.emitted += 1;
    }
}

/// Versioned, self-describing continuation for a whole pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContinuation {
    pub version: u32,
    pub strategy: StrategyTag,
    pub source: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct: Option<DistinctState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<DirectProgress>,
}

impl PipelineContinuation {
    /// Wrap a strategy body at the current version
    pub fn new(strategy: StrategyTag, source: Value) -> Self {
        Self {
            version: PIPELINE_CONTINUATION_VERSION,
            strategy,
            source,
            skip: None,
            take: None,
            distinct: None,
            direct: None,
        }
    }

    /// Parse a caller-supplied token
    ///
    /// The version is checked before the body so that a token from a newer
    /// pipeline is reported as such rather than as malformed.
    pub fn parse(raw: &str) -> ContinuationResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ContinuationError::malformed(format!("not JSON: {}", e)))?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| ContinuationError::malformed("missing numeric 'version'"))?;
        if version > u64::from(PIPELINE_CONTINUATION_VERSION) {
            return Err(ContinuationError::version_unsupported(
                u32::try_from(version).unwrap_or(u32::MAX),
                PIPELINE_CONTINUATION_VERSION,
            ));
        }
        serde_json::from_value(value).map_err(|e| ContinuationError::malformed(e.to_string()))
    }

    /// Serialize to the opaque string handed to the caller
    pub fn encode(&self) -> ContinuationResult<String> {
        serde_json::to_string(self).map_err(|e| ContinuationError::malformed(e.to_string()))
    }

    /// Body of a direct or pass-through token
    pub fn single_token(&self) -> ContinuationResult<ParallelContinuationToken> {
        serde_json::from_value(self.source.clone()).map_err(|e| {
            ContinuationError::malformed(format!(
                "{} continuation must be a {{range, token}} object: {}",
                self.strategy.as_str(),
                e
            ))
        })
    }

    /// Body of a parallel token
    pub fn parallel_tokens(&self) -> ContinuationResult<Vec<ParallelContinuationToken>> {
        let tokens: Vec<ParallelContinuationToken> = serde_json::from_value(self.source.clone())
            .map_err(|e| {
                ContinuationError::malformed(format!(
                    "parallel continuation must be an array: {}",
                    e
                ))
            })?;
        if tokens.is_empty() {
            return Err(ContinuationError::malformed(
                "parallel continuation cannot be empty",
            ));
        }
        Ok(tokens)
    }

    /// Body of an order-by token, checked against the query's column count
    pub fn order_by_tokens(&self, columns: usize) -> ContinuationResult<Vec<OrderByContinuationToken>> {
        let tokens: Vec<OrderByContinuationToken> = serde_json::from_value(self.source.clone())
            .map_err(|e| {
                ContinuationError::malformed(format!(
                    "order by continuation must be an array: {}",
                    e
                ))
            })?;
        if tokens.is_empty() {
            return Err(ContinuationError::malformed(
                "order by continuation cannot be empty",
            ));
        }
        if let Some(bad) = tokens.iter().find(|t| t.order_by_items.len() != columns) {
            return Err(ContinuationError::malformed(format!(
                "order by item count {} does not match column count {}",
                bad.order_by_items.len(),
                columns
            )));
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::ContinuationErrorCode;
    use serde_json::json;

    fn range(min: &str, max: &str) -> FeedRange {
        FeedRange::new(min, max).unwrap()
    }

    #[test]
    fn test_parallel_round_trip() {
        let tokens = vec![
            ParallelContinuationToken::new(range("", "AA"), Some("t1".into())),
            ParallelContinuationToken::new(range("AA", "FF"), None),
        ];
        let pc = PipelineContinuation::new(StrategyTag::Parallel, serde_json::to_value(&tokens).unwrap());
        let raw = pc.encode().unwrap();
        let parsed = PipelineContinuation::parse(&raw).unwrap();
        assert_eq!(parsed.strategy, StrategyTag::Parallel);
        assert_eq!(parsed.parallel_tokens().unwrap(), tokens);
    }

    #[test]
    fn test_direct_progress_counts_repeated_positions() {
        let mut progress = DirectProgress::default();
        progress.record(&[json!(1)], "a");
        progress.record(&[json!(2)], "b");
        progress.record(&[json!(2)], "b");
        assert_eq!(progress.emitted, 3);
        assert_eq!(progress.rid.as_deref(), Some("b"));
        assert_eq!(progress.skip_count, 2);

        progress.record(&[json!(2)], "c");
        assert_eq!(progress.skip_count, 1);
        assert_eq!(progress.order_by_items, vec![OrderByItem { item: json!(2) }]);
    }

    #[test]
    fn test_direct_progress_is_optional_on_the_wire() {
        let raw = json!({"version": 1, "strategy": "direct", "source": {"range": {"min": "", "max": "FF", "isMinInclusive": true, "isMaxInclusive": false}, "token": null}}).to_string();
        let parsed = PipelineContinuation::parse(&raw).unwrap();
        assert!(parsed.direct.is_none());

        let mut with_progress = parsed.clone();
        with_progress.direct = Some(DirectProgress {
            emitted: 3,
            ..Default::default()
        });
        let round = PipelineContinuation::parse(&with_progress.encode().unwrap()).unwrap();
        assert_eq!(round.direct.map(|p| p.emitted), Some(3));
    }

    #[test]
    fn test_order_by_filter_is_omitted_when_absent() {
        let token = OrderByContinuationToken {
            composite_token: ParallelContinuationToken::new(range("", "FF"), Some("t".into())),
            order_by_items: vec![OrderByItem { item: json!(4) }],
            rid: "r1".into(),
            skip_count: 1,
            filter: None,
        };
        let json = serde_json::to_value(&token).unwrap();
        assert!(json.get("filter").is_none());

        let mut with_filter = json.clone();
        with_filter["filter"] = json!("c.n >= 4");
        let parsed: OrderByContinuationToken = serde_json::from_value(with_filter).unwrap();
        assert_eq!(parsed.filter.as_deref(), Some("c.n >= 4"));
        let parsed: OrderByContinuationToken = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_rejects_future_version() {
        let raw = json!({"version": 7, "strategy": "parallel", "source": []}).to_string();
        let err = PipelineContinuation::parse(&raw).unwrap_err();
        assert_eq!(err.code(), ContinuationErrorCode::VersionUnsupported);
    }

    #[test]
    fn test_rejects_garbage() {
        for raw in ["", "not json", "{}", "[1,2]", r#"{"version":1,"strategy":"sideways","source":null}"#] {
            let err = PipelineContinuation::parse(raw).unwrap_err();
            assert_eq!(err.code(), ContinuationErrorCode::Malformed, "input {:?}", raw);
        }
    }

    #[test]
    fn test_empty_parallel_body_is_malformed() {
        let pc = PipelineContinuation::new(StrategyTag::Parallel, json!([]));
        assert_eq!(
            pc.parallel_tokens().unwrap_err().code(),
            ContinuationErrorCode::Malformed
        );
    }

    #[test]
    fn test_order_by_column_count_checked() {
        let body = json!([{
            "compositeToken": {"range": {"min": "", "max": "FF"}, "token": "p1"},
            "orderByItems": [{"item": 3}],
            "rid": "00000007",
            "skipCount": 0
        }]);
        let pc = PipelineContinuation::new(StrategyTag::OrderBy, body);
        assert_eq!(pc.order_by_tokens(1).unwrap().len(), 1);
        assert_eq!(
            pc.order_by_tokens(2).unwrap_err().code(),
            ContinuationErrorCode::Malformed
        );
    }

    #[test]
    fn test_outer_state_omitted_when_absent() {
        let pc = PipelineContinuation::new(StrategyTag::Passthrough, json!(null));
        let raw = pc.encode().unwrap();
        assert!(!raw.contains("skip"));
        assert!(!raw.contains("distinct"));
    }
}
