//! Client-side item filter
//!
//! Applied to every page a producer buffers:
//! - the effective-key filter drops items whose key lies outside the
//!   producer's range, so split children never emit each other's rows
//! - the resume filter drops order-by items that were already emitted
//!   before the continuation was taken; it switches itself off at the first
//!   item that passes

use std::cmp::Ordering;

use serde_json::Value;

use crate::query::{compare_keys, compare_rids, SortOrder};
use crate::routing::FeedRange;

use super::page::QueryItem;

/// Position of the last emitted order-by item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByResume {
    pub values: Vec<Value>,
    pub rid: String,
    /// Items equal to `(values, rid)` still to drop
    pub skip: usize,
    pub sort_orders: Vec<SortOrder>,
}

impl OrderByResume {
    /// Whether `item` was emitted before the continuation was taken
    fn already_emitted(&mut self, item: &QueryItem) -> bool {
        match compare_keys(&item.order_by_items, &self.values, &self.sort_orders) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => match compare_rids(&item.rid, &self.rid, &self.sort_orders) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal if self.skip > 0 => {
                    self.skip -= 1;
                    true
                }
                Ordering::Equal => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFilter {
    epk_range: FeedRange,
    resume: Option<OrderByResume>,
}

impl ItemFilter {
    pub fn new(epk_range: FeedRange) -> Self {
        Self {
            epk_range,
            resume: None,
        }
    }

    pub fn with_resume(mut self, resume: OrderByResume) -> Self {
        self.resume = Some(resume);
        self
    }

    pub fn epk_range(&self) -> &FeedRange {
        &self.epk_range
    }

    pub fn is_resuming(&self) -> bool {
        self.resume.is_some()
    }

    /// Same resume position, narrowed to a child range
    pub fn for_range(&self, range: &FeedRange) -> Self {
        Self {
            epk_range: range.clone(),
            resume: self.resume.clone(),
        }
    }

    /// Filter a page in place; returns how many items were dropped
    pub fn apply(&mut self, items: &mut Vec<QueryItem>) -> usize {
        let before = items.len();
        let range = &self.epk_range;
        items.retain(|item| item.epk.as_deref().map_or(true, |epk| range.contains_key(epk)));

        if let Some(resume) = self.resume.as_mut() {
            let emitted = items
                .iter()
                .take_while(|item| resume.already_emitted(item))
                .count();
            items.drain(..emitted);
            if !items.is_empty() {
                self.resume = None;
            }
        }
        before - items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(rid: &str, epk: &str, key: i64) -> QueryItem {
        QueryItem {
            rid: rid.into(),
            epk: Some(epk.into()),
            order_by_items: vec![json!(key)],
            payload: json!({"id": rid}),
        }
    }

    fn rids(items: &[QueryItem]) -> Vec<&str> {
        items.iter().map(|i| i.rid.as_str()).collect()
    }

    #[test]
    fn test_epk_filter() {
        let mut filter = ItemFilter::new(FeedRange::new("40", "80").unwrap());
        let mut items = vec![item("1", "10", 0), item("2", "55", 0), item("3", "80", 0)];
        assert_eq!(filter.apply(&mut items), 2);
        assert_eq!(rids(&items), vec!["2"]);
    }

    #[test]
    fn test_resume_seek_drops_emitted_prefix() {
        let resume = OrderByResume {
            values: vec![json!(5)],
            rid: "B".into(),
            skip: 1,
            sort_orders: vec![SortOrder::Ascending],
        };
        let mut filter = ItemFilter::new(FeedRange::full()).with_resume(resume);
        let mut items = vec![
            item("Z", "10", 4),
            item("A", "10", 5),
            item("B", "10", 5),
            item("C", "10", 5),
            item("D", "10", 6),
        ];
        assert_eq!(filter.apply(&mut items), 3);
        assert_eq!(rids(&items), vec!["C", "D"]);
        assert!(!filter.is_resuming());
    }

    #[test]
    fn test_resume_survives_fully_filtered_page() {
        let resume = OrderByResume {
            values: vec![json!(5)],
            rid: "M".into(),
            skip: 0,
            sort_orders: vec![SortOrder::Ascending],
        };
        let mut filter = ItemFilter::new(FeedRange::full()).with_resume(resume);
        let mut first = vec![item("A", "10", 1), item("B", "10", 2)];
        filter.apply(&mut first);
        assert!(first.is_empty());
        assert!(filter.is_resuming());

        let mut second = vec![item("C", "10", 5), item("M", "10", 5), item("N", "10", 5)];
        filter.apply(&mut second);
        assert_eq!(rids(&second), vec!["M", "N"]);
    }

    #[test]
    fn test_resume_descending() {
        let resume = OrderByResume {
            values: vec![json!(5)],
            rid: "B".into(),
            skip: 1,
            sort_orders: vec![SortOrder::Descending],
        };
        let mut filter = ItemFilter::new(FeedRange::full()).with_resume(resume);
        let mut items = vec![item("C", "10", 5), item("B", "10", 5), item("A", "10", 5), item("Q", "10", 3)];
        filter.apply(&mut items);
        assert_eq!(rids(&items), vec!["A", "Q"]);
    }

    #[test]
    fn test_for_range_keeps_resume() {
        let resume = OrderByResume {
            values: vec![json!(1)],
            rid: "A".into(),
            skip: 0,
            sort_orders: vec![SortOrder::Ascending],
        };
        let filter = ItemFilter::new(FeedRange::full()).with_resume(resume);
        let child = filter.for_range(&FeedRange::new("", "80").unwrap());
        assert!(child.is_resuming());
        assert_eq!(child.epk_range().max_exclusive(), "80");
    }
}
