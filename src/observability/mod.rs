//! Observability for query coordination
//!
//! This module provides:
//! - Structured logging (JSON), gated by a process-wide threshold
//! - Per-query counters
//! - Per-query traces passed to `advance`
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on execution
//! 3. Deterministic output
//!
//! # Usage
//!
//! ```ignore
//! use crossquery::observability::{log_event_with_fields, Event, QueryMetrics};
//!
//! log_event_with_fields(Event::PartitionSplit, &[("range", "[AA,CC)")]);
//!
//! let metrics = QueryMetrics::new();
//! metrics.record_fetch_issued();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;
mod trace;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{QueryMetrics, QueryMetricsSnapshot};
pub use scope::{ObservationScope, Timer};
pub use trace::{QueryTrace, SpanGuard, TraceSpan};

/// Log an event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log an event with fields at its own severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
