//! TraceZ: an in-process trace-diagnostic subsystem.
//!
//! A span-processor cache absorbs `on_start`/`on_end` notifications from a tracing
//! SDK under concurrent access from arbitrary producer threads, bucketising finished
//! spans by name, latency, and status. A pure-query aggregator and an HTML page
//! handler let an operator inspect the currently-running and recently-finished spans
//! without an external backend.
//!
//! Export to remote backends, the tracing SDK itself, and the HTTP server binding
//! this page handler to a route are all out of scope: this crate consumes span
//! notifications and produces HTML bytes, nothing more.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod latency;
pub mod page_handler;
pub mod processor;
pub mod span;
pub mod status_code;

pub use aggregator::DataAggregator;
pub use cache::{CacheConfig, CacheSnapshot, NameBucketSnapshot, SpanCache};
pub use config::Config;
pub use error::TraceZError;
pub use latency::{LatencyBucket, LATENCY_BUCKET_COUNT};
pub use page_handler::{parse_query, PageHandler};
pub use processor::{SpanProcessor, TraceZSpanProcessor};
pub use span::{
    AttributeValue, FinishedSpanSnapshot, ReadableSpan, Span, SpanContext, SpanEvent, SpanKind, SpanStatus,
};
pub use status_code::{ErrorCode, StatusCode, ERROR_CODE_COUNT};
