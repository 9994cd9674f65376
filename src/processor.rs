//! The SDK-facing span-processor capability (§4.1, §6) and the cache-backed
//! implementation that drives it.

use std::sync::Arc;

use crate::cache::SpanCache;
use crate::span::ReadableSpan;

/// Mirrors a tracing SDK's span-processor interface: `on_start`/`on_end` are called by
/// the SDK on the thread that started or ended the span. `shutdown`/`force_flush` are
/// no-ops here since this core never exports (§6).
pub trait SpanProcessor: Send + Sync {
    fn on_start(&self, span: Arc<dyn ReadableSpan>);
    fn on_end(&self, span: &dyn ReadableSpan);

    fn shutdown(&self) {}
    fn force_flush(&self) {}

    fn is_start_required(&self) -> bool {
        true
    }
    fn is_end_required(&self) -> bool {
        true
    }
}

/// Feeds a [`SpanCache`], subject to the `only_sampled_export` admission filter (§4.1).
///
/// Sampling is immutable for a span's lifetime, so `on_end` simply re-checks
/// `span_context().is_sampled` rather than tracking a separate admitted-set — the
/// "simpler variant" the contract explicitly allows, at the cost of one extra read.
pub struct TraceZSpanProcessor {
    cache: Arc<SpanCache>,
    only_sampled_export: bool,
}

impl TraceZSpanProcessor {
    pub fn new(cache: Arc<SpanCache>, only_sampled_export: bool) -> TraceZSpanProcessor {
        TraceZSpanProcessor {
            cache,
            only_sampled_export,
        }
    }

    pub fn cache(&self) -> &Arc<SpanCache> {
        &self.cache
    }
}

impl SpanProcessor for TraceZSpanProcessor {
    fn on_start(&self, span: Arc<dyn ReadableSpan>) {
        if self.only_sampled_export && !span.span_context().is_sampled {
            tracing::debug!(name = %span.name(), "dropping non-sampled span at start");
            return;
        }
        let cache = Arc::clone(&self.cache);
        // Non-interference (§4.1): a cascading failure in the cache (e.g. a lock
        // poisoned by an earlier panic) must not unwind into the SDK's thread.
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cache.insert_running(span))).is_err() {
            tracing::warn!("panic while admitting span at on_start; dropping span");
        }
    }

    fn on_end(&self, span: &dyn ReadableSpan) {
        if self.only_sampled_export && !span.span_context().is_sampled {
            tracing::debug!(name = %span.name(), "dropping non-sampled span at end");
            return;
        }
        let cache = &self.cache;
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cache.move_to_finished(span))).is_err() {
            tracing::warn!("panic while finishing span at on_end; dropping span");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::span::{AttributeValue, Span, SpanContext, SpanEvent, SpanKind, SpanStatus};
    use std::collections::HashMap;

    /// A span whose `name()` panics, used to exercise the processor's panic
    /// containment without needing a poisoned lock or other hard-to-stage failure.
    struct PanickingSpan;

    impl ReadableSpan for PanickingSpan {
        fn name(&self) -> String {
            panic!("boom")
        }
        fn span_context(&self) -> SpanContext {
            SpanContext {
                trace_id: 1,
                span_id: 1,
                is_sampled: true,
                trace_flags: 1,
            }
        }
        fn parent_span_id(&self) -> Option<u64> {
            None
        }
        fn start_epoch_nanos(&self) -> u64 {
            0
        }
        fn end_epoch_nanos(&self) -> Option<u64> {
            None
        }
        fn status(&self) -> SpanStatus {
            SpanStatus::ok()
        }
        fn events(&self) -> Vec<SpanEvent> {
            Vec::new()
        }
        fn attributes(&self) -> HashMap<String, AttributeValue> {
            HashMap::new()
        }
        fn resource_attributes(&self) -> HashMap<String, AttributeValue> {
            HashMap::new()
        }
    }

    #[test]
    fn non_sampled_span_is_invisible_when_filter_enabled() {
        let cache = Arc::new(SpanCache::new(CacheConfig::default()));
        let processor = TraceZSpanProcessor::new(Arc::clone(&cache), true);

        let span = Span::new(1, 1, 0, "op", SpanKind::Internal, false, 0);
        processor.on_start(Arc::new(span.clone()));
        span.finish(SpanStatus::ok(), 10);
        processor.on_end(&span);

        let snap = cache.snapshot();
        assert!(snap.buckets.is_empty());
    }

    #[test]
    fn non_sampled_span_is_admitted_when_filter_disabled() {
        let cache = Arc::new(SpanCache::new(CacheConfig::default()));
        let processor = TraceZSpanProcessor::new(Arc::clone(&cache), false);

        let span = Span::new(1, 1, 0, "op", SpanKind::Internal, false, 0);
        processor.on_start(Arc::new(span.clone()));
        let snap = cache.snapshot();
        assert_eq!(snap.buckets["op"].running.len(), 1);

        span.finish(SpanStatus::ok(), 10);
        processor.on_end(&span);
        let snap = cache.snapshot();
        assert_eq!(snap.buckets["op"].running.len(), 0);
        assert_eq!(snap.buckets["op"].ok_rings[0].len(), 1);
    }

    #[test]
    fn panic_inside_cache_call_is_contained_at_on_start() {
        let cache = Arc::new(SpanCache::new(CacheConfig::default()));
        let processor = TraceZSpanProcessor::new(Arc::clone(&cache), true);

        processor.on_start(Arc::new(PanickingSpan));

        let snap = cache.snapshot();
        assert!(snap.buckets.is_empty(), "panicking admission must not leave partial state");
    }

    #[test]
    fn panic_inside_cache_call_is_contained_at_on_end() {
        let cache = Arc::new(SpanCache::new(CacheConfig::default()));
        let processor = TraceZSpanProcessor::new(Arc::clone(&cache), true);

        processor.on_end(&PanickingSpan);

        let snap = cache.snapshot();
        assert!(snap.buckets.is_empty());
    }
}
