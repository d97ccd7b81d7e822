//! Run telemetry: append-only structured events and timing spans.
//!
//! Telemetry is part of the audit record, not a side channel. It carries
//! no I/O of its own; the `tracing` layer is the parallel observability
//! path. Events and spans are only ever appended, with non-decreasing
//! timestamps, so the vectors can be replayed as a faithful trace of the
//! run.

use serde::{Deserialize, Serialize};

use crate::types::{now_ms, ErrorCode};

/// One structured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Milliseconds since the Unix epoch.
    pub ts_ms: i64,
    /// Event discriminator, e.g. `tool_called`, `plan_created`.
    pub kind: String,
    /// Free-form structured payload.
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// A timing block covering one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Span name, e.g. `perceive`.
    pub name: String,
    /// Start timestamp.
    pub start_ms: i64,
    /// End timestamp, set on close.
    pub end_ms: Option<i64>,
}

/// Opaque handle to an open span.
#[derive(Debug, Clone, Copy)]
pub struct SpanHandle(usize);

/// Append-only telemetry for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Structured events in append order.
    pub events: Vec<TelemetryEvent>,
    /// Timing spans in open order.
    pub spans: Vec<Span>,
    /// Most recent terminal failure reason, for quick access.
    pub last_error: Option<String>,
    /// Error code accompanying `last_error`.
    pub error_code: Option<ErrorCode>,
}

impl Telemetry {
    /// Append an event stamped with the current time.
    pub fn event(&mut self, kind: &str, fields: serde_json::Value) {
        self.events.push(TelemetryEvent {
            ts_ms: now_ms(),
            kind: kind.to_owned(),
            fields,
        });
    }

    /// Open a span. Close it with [`span_close`](Self::span_close).
    pub fn span_start(&mut self, name: &str) -> SpanHandle {
        self.spans.push(Span {
            name: name.to_owned(),
            start_ms: now_ms(),
            end_ms: None,
        });
        SpanHandle(self.spans.len().saturating_sub(1))
    }

    /// Close a span opened by [`span_start`](Self::span_start).
    pub fn span_close(&mut self, handle: SpanHandle) {
        if let Some(span) = self.spans.get_mut(handle.0) {
            span.end_ms = Some(now_ms());
        }
    }

    /// Whether any event of the given kind was recorded.
    pub fn has_event(&self, kind: &str) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }

    /// All events of the given kind, in append order.
    pub fn events_of(&self, kind: &str) -> Vec<&TelemetryEvent> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }
}
