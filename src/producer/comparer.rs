//! Producer ordering
//!
//! The tree and the fan-out stages pick the next producer to read from by
//! a [`ProducerComparer`]; `Ordering::Less` means "read first".

use std::cmp::Ordering;

use crate::query::{compare_keys, compare_rids, SortOrder};

use super::item_producer::ItemProducer;

pub trait ProducerComparer: Send + Sync {
    fn compare(&self, a: &ItemProducer, b: &ItemProducer) -> Ordering;
}

/// Range order, independent of arrival timing
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicComparer;

impl ProducerComparer for DeterministicComparer {
    fn compare(&self, a: &ItemProducer, b: &ItemProducer) -> Ordering {
        a.range().cmp(b.range())
    }
}

/// Head-item order for k-way merging
///
/// Keys first, then rid in the first column's direction, then range
/// minimum. A producer without a current item sorts first so that it is
/// refilled before anything is emitted.
#[derive(Debug, Clone)]
pub struct OrderByComparer {
    sort_orders: Vec<SortOrder>,
}

impl OrderByComparer {
    pub fn new(sort_orders: Vec<SortOrder>) -> Self {
        Self { sort_orders }
    }

    pub fn sort_orders(&self) -> &[SortOrder] {
        &self.sort_orders
    }
}

impl ProducerComparer for OrderByComparer {
    fn compare(&self, a: &ItemProducer, b: &ItemProducer) -> Ordering {
        match (a.current(), b.current()) {
            (None, None) => a.range().cmp(b.range()),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_keys(&x.order_by_items, &y.order_by_items, &self.sort_orders)
                .then_with(|| compare_rids(&x.rid, &y.rid, &self.sort_orders))
                .then_with(|| a.range().cmp(b.range())),
        }
    }
}
