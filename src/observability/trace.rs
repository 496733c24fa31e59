//! Per-query trace
//!
//! The trace handed to `advance` collects named, timed spans. It is
//! write-only from the pipeline's point of view and never changes control
//! flow.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::scope::Timer;

/// One timed span
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TraceSpan {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub fields: Vec<(String, String)>,
}

/// Collector of spans for one query
#[derive(Debug)]
pub struct QueryTrace {
    name: String,
    started_at: DateTime<Utc>,
    spans: Mutex<Vec<TraceSpan>>,
}

impl QueryTrace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            spans: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Open a span; it is recorded when the guard drops
    pub fn span(&self, name: &str) -> SpanGuard<'_> {
        SpanGuard {
            trace: self,
            name: name.to_string(),
            started_at: Utc::now(),
            timer: Timer::new(),
            fields: Vec::new(),
        }
    }

    /// Recorded spans, in completion order
    pub fn spans(&self) -> Vec<TraceSpan> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, span: TraceSpan) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
    }
}

impl Default for QueryTrace {
    fn default() -> Self {
        Self::new("query")
    }
}

/// Open span; records itself into the trace on drop
pub struct SpanGuard<'a> {
    trace: &'a QueryTrace,
    name: String,
    started_at: DateTime<Utc>,
    timer: Timer,
    fields: Vec<(String, String)>,
}

impl SpanGuard<'_> {
    /// Attach a field to the span
    pub fn field(&mut self, key: &str, value: impl ToString) {
        self.fields.push((key.to_string(), value.to_string()));
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        self.trace.record(TraceSpan {
            name: std::mem::take(&mut self.name),
            started_at: self.started_at,
            duration_ms: self.timer.elapsed_millis(),
            fields: std::mem::take(&mut self.fields),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_recorded_on_drop() {
        let trace = QueryTrace::new("q1");
        {
            let mut span = trace.span("advance");
            span.field("strategy", "parallel");
        }
        let _ = trace.span("advance");

        let spans = trace.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "advance");
        assert_eq!(spans[0].fields, vec![("strategy".to_string(), "parallel".to_string())]);
        assert!(spans[0].started_at >= trace.started_at());
    }
}
