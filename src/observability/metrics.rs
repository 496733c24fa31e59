//! Query metrics
//!
//! - Counters only, monotonic
//! - One registry per query, shared by every producer through an `Arc`
//! - Relaxed atomics; values are exact once the query is quiescent

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one query execution
#[derive(Debug, Default)]
pub struct QueryMetrics {
    /// Fetches sent upstream
    fetches_issued: AtomicU64,
    /// Callers that joined a fetch already in flight
    fetches_joined: AtomicU64,
    /// Fetches that failed
    fetch_failures: AtomicU64,
    /// Pages appended to producer buffers
    pages_buffered: AtomicU64,
    /// Items appended to producer buffers, after filtering
    items_buffered: AtomicU64,
    /// Items dropped by effective-key or resume filters
    items_filtered: AtomicU64,
    /// Empty pages skipped while moving to the next page
    empty_pages_skipped: AtomicU64,
    /// Ranges replaced after a partition-gone signal
    splits_handled: AtomicU64,
    /// Direct executions that switched to a distributed plan
    direct_fallbacks: AtomicU64,
    /// Pages handed to the caller
    pages_delivered: AtomicU64,
    /// Documents handed to the caller
    items_delivered: AtomicU64,
    /// Request charge, in hundredths
    request_charge_centis: AtomicU64,
}

impl QueryMetrics {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch_issued(&self) {
        self.fetches_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_joined(&self) {
        self.fetches_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a buffered page and its charge
    pub fn record_page_buffered(&self, items: usize, filtered: usize, request_charge: f64) {
        self.pages_buffered.fetch_add(1, Ordering::Relaxed);
        self.items_buffered.fetch_add(items as u64, Ordering::Relaxed);
        self.items_filtered.fetch_add(filtered as u64, Ordering::Relaxed);
        let centis = (request_charge.max(0.0) * 100.0).round() as u64;
        self.request_charge_centis.fetch_add(centis, Ordering::Relaxed);
    }

    pub fn record_empty_page_skipped(&self) {
        self.empty_pages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_split(&self) {
        self.splits_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_direct_fallback(&self) {
        self.direct_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_delivered(&self, items: usize) {
        self.pages_delivered.fetch_add(1, Ordering::Relaxed);
        self.items_delivered.fetch_add(items as u64, Ordering::Relaxed);
    }

    /// Fetches sent upstream so far
    pub fn fetches_issued(&self) -> u64 {
        self.fetches_issued.load(Ordering::Relaxed)
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> QueryMetricsSnapshot {
        QueryMetricsSnapshot {
            fetches_issued: self.fetches_issued.load(Ordering::Relaxed),
            fetches_joined: self.fetches_joined.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            pages_buffered: self.pages_buffered.load(Ordering::Relaxed),
            items_buffered: self.items_buffered.load(Ordering::Relaxed),
            items_filtered: self.items_filtered.load(Ordering::Relaxed),
            empty_pages_skipped: self.empty_pages_skipped.load(Ordering::Relaxed),
            splits_handled: self.splits_handled.load(Ordering::Relaxed),
            direct_fallbacks: self.direct_fallbacks.load(Ordering::Relaxed),
            pages_delivered: self.pages_delivered.load(Ordering::Relaxed),
            items_delivered: self.items_delivered.load(Ordering::Relaxed),
            request_charge: self.request_charge_centis.load(Ordering::Relaxed) as f64 / 100.0,
        }
    }
}

/// A point-in-time snapshot of query metrics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct QueryMetricsSnapshot {
    pub fetches_issued: u64,
    pub fetches_joined: u64,
    pub fetch_failures: u64,
    pub pages_buffered: u64,
    pub items_buffered: u64,
    pub items_filtered: u64,
    pub empty_pages_skipped: u64,
    pub splits_handled: u64,
    pub direct_fallbacks: u64,
    pub pages_delivered: u64,
    pub items_delivered: u64,
    pub request_charge: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = QueryMetrics::new().snapshot();
        assert_eq!(snapshot.fetches_issued, 0);
        assert_eq!(snapshot.splits_handled, 0);
        assert_eq!(snapshot.request_charge, 0.0);
    }

    #[test]
    fn test_page_accounting() {
        let metrics = QueryMetrics::new();
        metrics.record_fetch_issued();
        metrics.record_page_buffered(10, 2, 2.5);
        metrics.record_page_buffered(0, 0, 1.25);
        metrics.record_page_delivered(10);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fetches_issued, 1);
        assert_eq!(snapshot.pages_buffered, 2);
        assert_eq!(snapshot.items_buffered, 10);
        assert_eq!(snapshot.items_filtered, 2);
        assert_eq!(snapshot.request_charge, 3.75);
        assert_eq!(snapshot.items_delivered, 10);
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(QueryMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_fetch_joined();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().fetches_joined, 400);
    }
}
