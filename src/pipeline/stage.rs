//! Stage abstraction
//!
//! A stage is driven by a single consumer:
//!
//! ```text
//! NotStarted ──advance──▶ Draining ──advance (no more pages)──▶ Done
//! ```
//!
//! Each successful `advance` leaves one page, or one failure, in
//! `current`. Failures do not end a stage by themselves; the caller decides
//! whether to keep advancing.

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::cancellation::CancellationToken;
use crate::continuation::PipelineContinuation;
use crate::error::QueryResult;
use crate::observability::QueryTrace;
use crate::producer::{PageCharges, PageDiagnostics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    NotStarted,
    Draining,
    Done,
}

/// One page handed to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub documents: Vec<Value>,
    pub request_charge: f64,
    pub diagnostics: Vec<PageDiagnostics>,
    /// State to resume after this page; `None` once the query is drained
    pub continuation: Option<PipelineContinuation>,
}

impl QueryPage {
    pub fn new(
        documents: Vec<Value>,
        charges: PageCharges,
        continuation: Option<PipelineContinuation>,
    ) -> Self {
        Self {
            documents,
            request_charge: charges.request_charge,
            diagnostics: charges.diagnostics,
            continuation,
        }
    }

    /// Opaque continuation string for the caller
    pub fn continuation_token(&self) -> QueryResult<Option<String>> {
        match &self.continuation {
            Some(continuation) => Ok(Some(continuation.encode()?)),
            None => Ok(None),
        }
    }
}

/// A composable, resumable page source
pub trait QueryStage: Send {
    /// Produce the next page or failure; `false` once drained
    fn advance<'a>(
        &'a mut self,
        trace: &'a QueryTrace,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, bool>;

    fn current(&self) -> Option<&QueryResult<QueryPage>>;

    fn take_current(&mut self) -> Option<QueryResult<QueryPage>>;

    fn state(&self) -> StageState;
}
