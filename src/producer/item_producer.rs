//! Per-range buffering cursor
//!
//! An [`ItemProducer`] reads one range page by page. Its fetch state lives
//! behind a mutex that is never held across an await:
//!
//! ```text
//! Idle ──buffer_more──▶ Fetching ──ok──▶ Idle      (page appended)
//!                          │
//!                          └──err──▶ Failed        (sticky)
//! ```
//!
//! The first caller of `buffer_more` installs a shared handle to the fetch;
//! every concurrent caller awaits the same handle, so a range never has two
//! fetches in flight. Whichever waiter finishes first commits the result
//! exactly once.
//!
//! Consumption is separate from fetching: `try_move_next_page` dequeues a
//! buffered page and `try_move_next_document_within_page` walks it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::cancellation::{CancellationToken, Cancelled};
use crate::error::{QueryError, QueryResult};
use crate::observability::{log_event_with_fields, Event, QueryMetrics};
use crate::query::QuerySpec;
use crate::routing::FeedRange;

use super::fetch::{FetchFailure, FetchRequest, FetchResult, PageFetcher};
use super::filter::ItemFilter;
use super::page::{BufferedPage, PageCharges, PageDiagnostics, QueryItem};

/// Everything a producer needs to issue fetches, shared by all producers
/// of one query
#[derive(Clone)]
pub struct ProducerContext {
    pub fetcher: Arc<dyn PageFetcher>,
    pub query: Arc<QuerySpec>,
    pub partition_key: Option<Value>,
    pub page_size: usize,
    pub metrics: Arc<QueryMetrics>,
    /// Issue fetches as direct single-range execution
    pub direct: bool,
}

/// Result of moving to the next buffered page
#[derive(Debug, Clone, PartialEq)]
pub enum PageMove {
    /// A new page is current; the cursor sits before its first item
    Moved,
    /// No pages remain
    Exhausted,
    /// The next buffered entry was a failure; the producer is done
    Failed(FetchFailure),
}

/// Where a consumer would have to restart this range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    /// Cursor to fetch from
    pub token: Option<String>,
    /// Items of that page already consumed
    pub consumed: usize,
}

enum Buffered {
    Page(BufferedPage),
    Failure(FetchFailure),
}

struct InFlight {
    id: u64,
    fetch: Shared<BoxFuture<'static, FetchResult>>,
    source: Option<String>,
}

struct FetchState {
    buffer: VecDeque<Buffered>,
    in_flight: Option<InFlight>,
    next_fetch_id: u64,
    failure: Option<FetchFailure>,
    backend_continuation: Option<String>,
    started: bool,
    buffered_items: usize,
    filter: ItemFilter,
}

impl FetchState {
    fn has_more_backend_results(&self) -> bool {
        self.failure.is_none() && (!self.started || self.backend_continuation.is_some())
    }
}

struct CurrentPage {
    page: BufferedPage,
    /// Index of the current item; `None` before the first move
    position: Option<usize>,
}

impl CurrentPage {
    fn remaining(&self) -> usize {
        let len = self.page.items.len();
        len - self.position.unwrap_or(0).min(len)
    }

    fn consumed(&self) -> usize {
        self.position.unwrap_or(0).min(self.page.items.len())
    }
}

/// Buffering cursor over one range
pub struct ItemProducer {
    range: FeedRange,
    context: ProducerContext,
    state: Mutex<FetchState>,
    current: Option<CurrentPage>,
    /// Cursor after the most recently dequeued page
    consumed_through: Option<String>,
    exhausted: bool,
    charges: PageCharges,
}

impl ItemProducer {
    /// Producer for `range` starting from `token` (`None` reads from the start)
    pub fn new(
        range: FeedRange,
        token: Option<String>,
        filter: ItemFilter,
        context: ProducerContext,
    ) -> Self {
        Self {
            range,
            context,
            state: Mutex::new(FetchState {
                buffer: VecDeque::new(),
                in_flight: None,
                next_fetch_id: 0,
                failure: None,
                backend_continuation: token.clone(),
                started: false,
                buffered_items: 0,
                filter,
            }),
            current: None,
            consumed_through: token,
            exhausted: false,
            charges: PageCharges::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FetchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn range(&self) -> &FeedRange {
        &self.range
    }

    /// Fetch one more page, or join the fetch already in flight
    ///
    /// A cached failure is returned again without contacting the backend.
    /// If cancelled, the producer is left as it was before the call; an
    /// in-flight fetch nobody else awaits is abandoned.
    pub async fn buffer_more(&self, cancel: &CancellationToken) -> QueryResult<()> {
        let (id, fetch) = {
            let mut state = self.lock();
            if let Some(failure) = &state.failure {
                return Err(QueryError::Upstream(failure.clone()));
            }
            match &state.in_flight {
                Some(in_flight) => {
                    self.context.metrics.record_fetch_joined();
                    (in_flight.id, in_flight.fetch.clone())
                }
                None => {
                    if !state.has_more_backend_results() {
                        return Ok(());
                    }
                    let source = state.backend_continuation.clone();
                    let request = FetchRequest {
                        query: Arc::clone(&self.context.query),
                        range: self.range.clone(),
                        continuation: source.clone(),
                        page_size: self.context.page_size,
                        partition_key: self.context.partition_key.clone(),
                        direct: self.context.direct,
                    };
                    let fetch = self.context.fetcher.fetch_page(request).shared();
                    state.next_fetch_id += 1;
                    let id = state.next_fetch_id;
                    state.in_flight = Some(InFlight {
                        id,
                        fetch: fetch.clone(),
                        source,
                    });
                    self.context.metrics.record_fetch_issued();
                    (id, fetch)
                }
            }
        };

        match cancel.guard(fetch).await {
            Ok(result) => {
                self.commit(id, &result);
                result.map(|_| ()).map_err(QueryError::Upstream)
            }
            Err(Cancelled) => {
                self.abandon(id);
                Err(QueryError::Cancelled)
            }
        }
    }

    /// `buffer_more` unless pages are already waiting
    pub async fn buffer_more_if_empty(&self, cancel: &CancellationToken) -> QueryResult<()> {
        if self.lock().buffer.is_empty() {
            self.buffer_more(cancel).await
        } else {
            Ok(())
        }
    }

    fn commit(&self, id: u64, result: &FetchResult) {
        let mut state = self.lock();
        let source = match state.in_flight.take() {
            Some(in_flight) if in_flight.id == id => in_flight.source,
            other => {
                // Already committed by another waiter.
                state.in_flight = other;
                return;
            }
        };
        state.started = true;

        let range = self.range.to_string();
        match result {
            Ok(fetched) => {
                let mut items = fetched.items.clone();
                let filtered = state.filter.apply(&mut items);
                let diagnostics = PageDiagnostics {
                    range: self.range.clone(),
                    activity_id: fetched.activity_id,
                    request_charge: fetched.request_charge,
                    item_count: fetched.items.len(),
                    filtered_count: filtered,
                    fetched_at: Utc::now(),
                };
                state.backend_continuation = fetched.continuation.clone();
                state.buffered_items += items.len();
                self.context
                    .metrics
                    .record_page_buffered(items.len(), filtered, fetched.request_charge);
                log_event_with_fields(
                    Event::PageFetched,
                    &[
                        ("range", range.as_str()),
                        ("items", items.len().to_string().as_str()),
                        ("activity_id", fetched.activity_id.to_string().as_str()),
                    ],
                );
                state.buffer.push_back(Buffered::Page(BufferedPage {
                    items,
                    source_token: source,
                    next_token: fetched.continuation.clone(),
                    requires_distribution: fetched.requires_distribution,
                    diagnostics,
                }));
            }
            Err(failure) => {
                state.failure = Some(failure.clone());
                state.buffer.push_back(Buffered::Failure(failure.clone()));
                self.context.metrics.record_fetch_failure();
                log_event_with_fields(
                    Event::FetchFailed,
                    &[("range", range.as_str()), ("failure", failure.to_string().as_str())],
                );
            }
        }
    }

    fn abandon(&self, id: u64) {
        let mut state = self.lock();
        let orphaned = matches!(
            &state.in_flight,
            Some(in_flight) if in_flight.id == id && in_flight.fetch.strong_count() == Some(1)
        );
        if orphaned {
            state.in_flight = None;
        }
    }

    /// Make the next buffered page current, fetching if none is buffered
    ///
    /// Pages left empty by filtering that still have a successor are
    /// skipped. Once a failure is dequeued the producer reports no more
    /// results.
    pub async fn try_move_next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<PageMove, Cancelled> {
        loop {
            if self.exhausted {
                return Ok(PageMove::Exhausted);
            }

            let next = {
                let mut state = self.lock();
                let next = state.buffer.pop_front();
                if let Some(Buffered::Page(page)) = &next {
                    state.buffered_items -= page.items.len();
                }
                next
            };

            let next = match next {
                Some(next) => next,
                None => {
                    if !self.has_more_backend_results() {
                        return Ok(PageMove::Exhausted);
                    }
                    let outcome = self.buffer_more(cancel).await;
                    match outcome {
                        Err(QueryError::Cancelled) => return Err(Cancelled),
                        Err(QueryError::Upstream(failure)) => {
                            let nothing_buffered = self.lock().buffer.is_empty();
                            if nothing_buffered {
                                self.exhausted = true;
                                return Ok(PageMove::Failed(failure));
                            }
                        }
                        _ => {}
                    }
                    continue;
                }
            };

            match next {
                Buffered::Failure(failure) => {
                    self.exhausted = true;
                    return Ok(PageMove::Failed(failure));
                }
                Buffered::Page(page) => {
                    self.consumed_through = page.next_token.clone();
                    self.charges.record(&page.diagnostics);
                    if page.items.is_empty() && page.next_token.is_some() {
                        self.context.metrics.record_empty_page_skipped();
                        continue;
                    }
                    self.current = Some(CurrentPage {
                        page,
                        position: None,
                    });
                    return Ok(PageMove::Moved);
                }
            }
        }
    }

    /// Advance within the current page; `false` at its end
    pub fn try_move_next_document_within_page(&mut self) -> bool {
        let Some(current) = self.current.as_mut() else {
            return false;
        };
        let len = current.page.items.len();
        let next = current.position.map_or(0, |p| (p + 1).min(len));
        current.position = Some(next);
        next < len
    }

    /// Item under the cursor
    pub fn current(&self) -> Option<&QueryItem> {
        let current = self.current.as_ref()?;
        current.page.items.get(current.position?)
    }

    /// Take every item of the current page not yet moved past
    pub fn drain_current_page(&mut self) -> Vec<QueryItem> {
        let Some(current) = self.current.as_mut() else {
            return Vec::new();
        };
        let start = current.consumed();
        let items = current.page.items.split_off(start);
        current.position = Some(current.page.items.len());
        items
    }

    /// Whether the current page has items not yet moved past
    pub fn has_current_items(&self) -> bool {
        self.current.as_ref().map_or(0, CurrentPage::remaining) > 0
    }

    /// Whether the current page asked for a distributed plan
    pub fn requires_distribution(&self) -> bool {
        self.current
            .as_ref()
            .map_or(false, |c| c.page.requires_distribution)
    }

    /// Items buffered or left in the current page
    pub fn buffered_item_count(&self) -> usize {
        let remaining = self.current.as_ref().map_or(0, CurrentPage::remaining);
        self.lock().buffered_items + remaining
    }

    pub fn has_more_backend_results(&self) -> bool {
        self.lock().has_more_backend_results()
    }

    pub fn has_more_results(&self) -> bool {
        if self.exhausted {
            return false;
        }
        if self.current.as_ref().map_or(0, CurrentPage::remaining) > 0 {
            return true;
        }
        let state = self.lock();
        !state.buffer.is_empty() || state.has_more_backend_results()
    }

    /// Backend cursor after the last fetched page
    pub fn backend_continuation(&self) -> Option<String> {
        self.lock().backend_continuation.clone()
    }

    /// Cursor from which nothing consumed so far would be re-read,
    /// counting items already consumed from that page
    pub fn resume_continuation(&self) -> ResumePoint {
        match &self.current {
            Some(current) if current.remaining() > 0 => ResumePoint {
                token: current.page.source_token.clone(),
                consumed: current.consumed(),
            },
            _ => ResumePoint {
                token: self.consumed_through.clone(),
                consumed: 0,
            },
        }
    }

    /// Current filter, including any resume position not yet passed
    pub fn filter(&self) -> ItemFilter {
        self.lock().filter.clone()
    }

    /// Charges of the pages consumed since the last call
    pub fn take_charges(&mut self) -> PageCharges {
        std::mem::take(&mut self.charges)
    }
}
