//! Page model
//!
//! A backend page is shared between every caller that awaited the same
//! fetch, so the fetcher hands it out behind an `Arc`. Each producer copies
//! the items it keeps into its own [`BufferedPage`] after filtering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::routing::FeedRange;

/// One result row as returned by a range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryItem {
    /// Resource id, unique per document
    pub rid: String,
    /// Effective partition key of the document, when the backend reports it
    #[serde(default)]
    pub epk: Option<String>,
    /// Evaluated ORDER BY values, one per column
    #[serde(default)]
    pub order_by_items: Vec<Value>,
    pub payload: Value,
}

/// A page as returned by the page fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub items: Vec<QueryItem>,
    /// Backend cursor for the next page; `None` when the range is drained
    pub continuation: Option<String>,
    pub request_charge: f64,
    pub activity_id: Uuid,
    /// Direct execution cannot serve this query; a distributed plan is needed
    pub requires_distribution: bool,
}

impl FetchedPage {
    pub fn new(items: Vec<QueryItem>, continuation: Option<String>, request_charge: f64) -> Self {
        Self {
            items,
            continuation,
            request_charge,
            activity_id: Uuid::new_v4(),
            requires_distribution: false,
        }
    }
}

/// Per-fetch diagnostics, surfaced on the page that consumed the fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDiagnostics {
    pub range: FeedRange,
    pub activity_id: Uuid,
    pub request_charge: f64,
    /// Items returned by the backend
    pub item_count: usize,
    /// Items dropped by the producer's filter
    pub filtered_count: usize,
    pub fetched_at: DateTime<Utc>,
}

/// A filtered page held in a producer's buffer
#[derive(Debug, Clone)]
pub struct BufferedPage {
    pub items: Vec<QueryItem>,
    /// Cursor the page was fetched with
    pub source_token: Option<String>,
    /// Cursor for the page after this one
    pub next_token: Option<String>,
    pub requires_distribution: bool,
    pub diagnostics: PageDiagnostics,
}

/// Request charge and diagnostics accumulated across consumed fetches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageCharges {
    pub request_charge: f64,
    pub diagnostics: Vec<PageDiagnostics>,
}

impl PageCharges {
    pub fn record(&mut self, diagnostics: &PageDiagnostics) {
        self.request_charge += diagnostics.request_charge;
        self.diagnostics.push(diagnostics.clone());
    }

    pub fn absorb(&mut self, other: PageCharges) {
        self.request_charge += other.request_charge;
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}
