//! DISTINCT
//!
//! Documents are identified by a hash of their canonical JSON. Ordered
//! distinct relies on duplicates being adjacent and only remembers the last
//! hash; unordered distinct remembers every hash it has passed.

use std::collections::BTreeSet;

use futures_util::future::BoxFuture;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cancellation::CancellationToken;
use crate::continuation::DistinctState;
use crate::error::QueryResult;
use crate::observability::QueryTrace;

use super::stage::{QueryPage, QueryStage, StageState};

/// Hex of the first 16 bytes of SHA-256 over the document's JSON
pub fn document_hash(document: &Value) -> String {
    let digest = Sha256::digest(document.to_string().as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct DistinctStage {
    inner: Box<dyn QueryStage>,
    ordered: bool,
    seen: BTreeSet<String>,
    last: Option<String>,
    current: Option<QueryResult<QueryPage>>,
    state: StageState,
}

impl DistinctStage {
    pub fn new(inner: Box<dyn QueryStage>, ordered: bool, resumed: Option<DistinctState>) -> Self {
        let (seen, last) = match resumed {
            Some(state) => (state.hashes.into_iter().collect(), state.last),
            None => (BTreeSet::new(), None),
        };
        Self {
            inner,
            ordered,
            seen,
            last,
            current: None,
            state: StageState::NotStarted,
        }
    }

    fn admit(&mut self, document: &Value) -> bool {
        let hash = document_hash(document);
        if self.ordered {
            if self.last.as_deref() == Some(hash.as_str()) {
                return false;
            }
            self.last = Some(hash);
            true
        } else {
            self.seen.insert(hash)
        }
    }

    fn snapshot(&self) -> DistinctState {
        DistinctState {
            ordered: self.ordered,
            hashes: if self.ordered {
                Vec::new()
            } else {
                self.seen.iter().cloned().collect()
            },
            last: if self.ordered { self.last.clone() } else { None },
        }
    }

    async fn advance_inner(&mut self, trace: &QueryTrace, cancel: &CancellationToken) -> bool {
        if self.state == StageState::Done {
            self.current = None;
            return false;
        }
        self.state = StageState::Draining;

        if !self.inner.advance(trace, cancel).await {
            self.state = StageState::Done;
            self.current = None;
            return false;
        }

        self.current = match self.inner.take_current() {
            Some(Ok(mut page)) => {
                let documents = std::mem::take(&mut page.documents);
                page.documents = documents.into_iter().filter(|d| self.admit(d)).collect();
                let snapshot = self.snapshot();
                if let Some(continuation) = page.continuation.as_mut() {
                    continuation.distinct = Some(snapshot);
                }
                Some(Ok(page))
            }
            other => other,
        };
        true
    }
}

impl QueryStage for DistinctStage {
    fn advance<'a>(
        &'a mut self,
        trace: &'a QueryTrace,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, bool> {
        Box::pin(self.advance_inner(trace, cancel))
    }

    fn current(&self) -> Option<&QueryResult<QueryPage>> {
        self.current.as_ref()
    }

    fn take_current(&mut self) -> Option<QueryResult<QueryPage>> {
        self.current.take()
    }

    fn state(&self) -> StageState {
        self.state
    }
}
