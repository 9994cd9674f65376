//! Span data model and the `ReadableSpan` boundary to the (external) tracing SDK.
//!
//! The SDK owns span creation, sampling decisions, ids and clocks (out of scope, §1).
//! This module defines the shape the core reads: a concrete [`Span`] handle usable by
//! SDK adapters and by the demo binary, and the [`ReadableSpan`] trait the cache/
//! processor consume so they never depend on the concrete handle type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::status_code::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub is_sampled: bool,
    pub trace_flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{s}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpanStatus {
    pub code: StatusCode,
    pub description: Option<String>,
}

impl SpanStatus {
    pub fn ok() -> SpanStatus {
        SpanStatus {
            code: StatusCode::Ok,
            description: None,
        }
    }

    pub fn error(code: StatusCode, description: impl Into<String>) -> SpanStatus {
        SpanStatus {
            code,
            description: Some(description.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub epoch_nanos: u64,
    pub name: String,
    pub attributes: HashMap<String, AttributeValue>,
}

/// Read-only view the cache and processor operate against. Any SDK span type can
/// implement this; the core never names [`Span`] directly outside of the demo binary.
///
/// Methods return owned values rather than borrows: the concrete [`Span`] handle is
/// backed by a lock (fields may be mutated by the SDK concurrently with a read here),
/// so there is no lifetime under which a borrow could safely escape a trait method.
pub trait ReadableSpan: Send + Sync {
    fn name(&self) -> String;
    fn span_context(&self) -> SpanContext;
    fn parent_span_id(&self) -> Option<u64>;
    fn start_epoch_nanos(&self) -> u64;
    fn end_epoch_nanos(&self) -> Option<u64>;
    fn status(&self) -> SpanStatus;
    fn events(&self) -> Vec<SpanEvent>;
    fn attributes(&self) -> HashMap<String, AttributeValue>;
    fn resource_attributes(&self) -> HashMap<String, AttributeValue>;

    fn has_ended(&self) -> bool {
        self.end_epoch_nanos().is_some()
    }

    fn latency_nanos(&self) -> Option<u64> {
        self.end_epoch_nanos()
            .map(|end| end.saturating_sub(self.start_epoch_nanos()))
    }
}

struct SpanData {
    name: String,
    kind: SpanKind,
    context: SpanContext,
    parent_span_id: Option<u64>,
    start_epoch_nanos: u64,
    end_epoch_nanos: Option<u64>,
    status: SpanStatus,
    events: Vec<SpanEvent>,
    attributes: HashMap<String, AttributeValue>,
    resource_attributes: HashMap<String, AttributeValue>,
}

/// A concrete, cheaply-cloneable span handle. Represents the part of an SDK's own span
/// type that this core cares about: a shared, lock-protected record that can be read
/// consistently while the owning code path is still appending events or attributes.
#[derive(Clone)]
pub struct Span(Arc<Mutex<SpanData>>);

impl Span {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        name: impl Into<String>,
        kind: SpanKind,
        is_sampled: bool,
        start_epoch_nanos: u64,
    ) -> Span {
        Span(Arc::new(Mutex::new(SpanData {
            name: name.into(),
            kind,
            context: SpanContext {
                trace_id,
                span_id,
                is_sampled,
                trace_flags: u8::from(is_sampled),
            },
            parent_span_id: (parent_span_id != 0).then_some(parent_span_id),
            start_epoch_nanos,
            end_epoch_nanos: None,
            status: SpanStatus::ok(),
            events: Vec::new(),
            attributes: HashMap::new(),
            resource_attributes: HashMap::new(),
        })))
    }

    pub fn kind(&self) -> SpanKind {
        self.0.lock().expect("span lock poisoned").kind
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: AttributeValue) {
        self.0
            .lock()
            .expect("span lock poisoned")
            .attributes
            .insert(key.into(), value);
    }

    pub fn set_resource_attribute(&self, key: impl Into<String>, value: AttributeValue) {
        self.0
            .lock()
            .expect("span lock poisoned")
            .resource_attributes
            .insert(key.into(), value);
    }

    pub fn add_event(
        &self,
        epoch_nanos: u64,
        name: impl Into<String>,
        attributes: HashMap<String, AttributeValue>,
    ) {
        self.0
            .lock()
            .expect("span lock poisoned")
            .events
            .push(SpanEvent {
                epoch_nanos,
                name: name.into(),
                attributes,
            });
    }

    pub fn finish(&self, status: SpanStatus, end_epoch_nanos: u64) {
        let mut data = self.0.lock().expect("span lock poisoned");
        data.status = status;
        data.end_epoch_nanos = Some(end_epoch_nanos);
    }
}

impl ReadableSpan for Span {
    fn name(&self) -> String {
        self.0.lock().expect("span lock poisoned").name.clone()
    }

    fn span_context(&self) -> SpanContext {
        self.0.lock().expect("span lock poisoned").context
    }

    fn parent_span_id(&self) -> Option<u64> {
        self.0.lock().expect("span lock poisoned").parent_span_id
    }

    fn start_epoch_nanos(&self) -> u64 {
        self.0.lock().expect("span lock poisoned").start_epoch_nanos
    }

    fn end_epoch_nanos(&self) -> Option<u64> {
        self.0.lock().expect("span lock poisoned").end_epoch_nanos
    }

    fn status(&self) -> SpanStatus {
        self.0.lock().expect("span lock poisoned").status.clone()
    }

    fn events(&self) -> Vec<SpanEvent> {
        self.0.lock().expect("span lock poisoned").events.clone()
    }

    fn attributes(&self) -> HashMap<String, AttributeValue> {
        self.0
            .lock()
            .expect("span lock poisoned")
            .attributes
            .clone()
    }

    fn resource_attributes(&self) -> HashMap<String, AttributeValue> {
        self.0
            .lock()
            .expect("span lock poisoned")
            .resource_attributes
            .clone()
    }
}

/// An immutable value capturing a span's observable fields at end time. Created exactly
/// once per ended span, when the cache admits it; destroyed only by ring eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedSpanSnapshot {
    pub name: String,
    pub span_context: SpanContext,
    pub parent_span_id: Option<u64>,
    pub start_epoch_nanos: u64,
    pub end_epoch_nanos: u64,
    pub status: SpanStatus,
    pub events: Vec<SpanEvent>,
    pub attributes: HashMap<String, AttributeValue>,
    pub resource_attributes: HashMap<String, AttributeValue>,
}

impl FinishedSpanSnapshot {
    /// Returns `None` if `span` has not ended — capturing a finished snapshot from a
    /// still-running span would violate the invariant that every ring entry has an
    /// end timestamp.
    pub fn capture(span: &dyn ReadableSpan) -> Option<FinishedSpanSnapshot> {
        let end_epoch_nanos = span.end_epoch_nanos()?;
        Some(FinishedSpanSnapshot {
            name: span.name(),
            span_context: span.span_context(),
            parent_span_id: span.parent_span_id(),
            start_epoch_nanos: span.start_epoch_nanos(),
            end_epoch_nanos,
            status: span.status(),
            events: span.events(),
            attributes: span.attributes(),
            resource_attributes: span.resource_attributes(),
        })
    }

    pub fn latency_nanos(&self) -> u64 {
        self.end_epoch_nanos.saturating_sub(self.start_epoch_nanos)
    }
}
