//! Query shape as reported by the query-plan provider

use serde::{Deserialize, Serialize};

use super::aggregate::AggregateOperator;

/// Sort direction of one order-by column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// One ORDER BY column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByColumn {
    /// Expression the backend evaluates, e.g. `c.age`
    pub expression: String,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl OrderByColumn {
    pub fn new(expression: impl Into<String>, sort_order: SortOrder) -> Self {
        Self {
            expression: expression.into(),
            sort_order,
        }
    }
}

/// DISTINCT flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DistinctType {
    #[default]
    None,
    /// Duplicates arrive adjacent to each other
    Ordered,
    Unordered,
}

/// Parsed query metadata
///
/// Produced outside this crate; only the parts that influence how ranges
/// are read and merged are modelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInfo {
    #[serde(default)]
    pub order_by: Vec<OrderByColumn>,
    #[serde(default)]
    pub aggregates: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub distinct: DistinctType,
    #[serde(default)]
    pub top: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Query text the backend should run per range, when it differs
    #[serde(default)]
    pub rewritten_query: Option<String>,
}

impl QueryInfo {
    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
    }

    /// The operator of a `SELECT VALUE` aggregate
    ///
    /// `None` unless there is exactly one aggregate with a known operator.
    pub fn aggregate_operator(&self) -> Option<AggregateOperator> {
        match self.aggregates.as_slice() {
            [name] => AggregateOperator::parse(name),
            _ => None,
        }
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by.is_empty()
    }

    pub fn has_distinct(&self) -> bool {
        self.distinct != DistinctType::None
    }

    pub fn sort_orders(&self) -> Vec<SortOrder> {
        self.order_by.iter().map(|c| c.sort_order).collect()
    }

    /// Each range's pages can be forwarded as they arrive
    pub fn is_server_streaming(&self) -> bool {
        !self.has_aggregates() && !self.has_distinct() && !self.has_group_by()
    }

    /// Ranges can be concatenated with no client-side merge at all
    pub fn is_client_streaming(&self) -> bool {
        self.is_server_streaming()
            && !self.has_order_by()
            && self.top.is_none()
            && self.offset.is_none()
            && self.limit.is_none()
    }

    /// Effective TOP: `top`, or `offset + limit` when paging
    pub fn effective_top(&self) -> Option<u64> {
        match (self.top, self.offset, self.limit) {
            (Some(top), _, _) => Some(top),
            (None, offset, Some(limit)) => Some(offset.unwrap_or(0).saturating_add(limit)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_streaming_classification() {
        let plain = QueryInfo::default();
        assert!(plain.is_server_streaming());
        assert!(plain.is_client_streaming());

        let ordered = QueryInfo {
            order_by: vec![OrderByColumn::new("c.age", SortOrder::Ascending)],
            ..Default::default()
        };
        assert!(ordered.is_server_streaming());
        assert!(!ordered.is_client_streaming());

        let aggregate = QueryInfo {
            aggregates: vec!["Count".into()],
            ..Default::default()
        };
        assert!(!aggregate.is_server_streaming());
    }

    #[test]
    fn test_effective_top() {
        let info = QueryInfo {
            offset: Some(5),
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(info.effective_top(), Some(15));
        assert_eq!(QueryInfo::default().effective_top(), None);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let info: QueryInfo = serde_json::from_value(json!({
            "orderBy": [{"expression": "c.name", "sortOrder": "Descending"}],
            "top": 3
        }))
        .unwrap();
        assert_eq!(info.sort_orders(), vec![SortOrder::Descending]);
        assert_eq!(info.top, Some(3));
        assert_eq!(info.distinct, DistinctType::None);
    }
}
