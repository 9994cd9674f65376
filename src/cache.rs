//! Name-partitioned store of running and finished spans (§4.2).
//!
//! The outer name-to-bucket map is a `RwLock<HashMap<..>>` (read-locked fast path,
//! write-locked insert-if-absent on first sight of a name) — the compute-if-absent
//! shape this codebase already uses for its own shared session maps. Each bucket then
//! holds a single `Mutex` guarding its running set and rings: the per-name bucket is
//! the unit of concurrency (§5), not the whole cache.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use crate::latency::{LatencyBucket, LATENCY_BUCKET_COUNT};
use crate::span::{FinishedSpanSnapshot, ReadableSpan};
use crate::status_code::{ErrorCode, ERROR_CODE_COUNT};

/// Ring capacities. Defaults match §3: 16 OK samples per latency bucket, 16 error
/// samples per error code, per span name.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ok_capacity: usize,
    pub err_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            ok_capacity: 16,
            err_capacity: 16,
        }
    }
}

struct NameBucketInner {
    running: HashMap<u64, Arc<dyn ReadableSpan>>,
    ok_rings: [VecDeque<FinishedSpanSnapshot>; LATENCY_BUCKET_COUNT],
    err_rings: [VecDeque<FinishedSpanSnapshot>; ERROR_CODE_COUNT],
}

impl NameBucketInner {
    fn new() -> NameBucketInner {
        NameBucketInner {
            running: HashMap::new(),
            ok_rings: std::array::from_fn(|_| VecDeque::new()),
            err_rings: std::array::from_fn(|_| VecDeque::new()),
        }
    }
}

struct NameBucket {
    inner: Mutex<NameBucketInner>,
}

impl NameBucket {
    fn new() -> NameBucket {
        NameBucket {
            inner: Mutex::new(NameBucketInner::new()),
        }
    }
}

fn push_bounded(ring: &mut VecDeque<FinishedSpanSnapshot>, snapshot: FinishedSpanSnapshot, capacity: usize) {
    ring.push_back(snapshot);
    while ring.len() > capacity {
        ring.pop_front();
    }
    debug_assert!(ring.len() <= capacity, "ring exceeded configured capacity");
}

/// A point-in-time view of one name bucket, built by [`SpanCache::snapshot`].
pub struct NameBucketSnapshot {
    pub running: Vec<Arc<dyn ReadableSpan>>,
    pub ok_rings: [Vec<FinishedSpanSnapshot>; LATENCY_BUCKET_COUNT],
    pub err_rings: [Vec<FinishedSpanSnapshot>; ERROR_CODE_COUNT],
}

/// A point-in-time view of the whole cache, sufficient for every `DataAggregator` query.
pub struct CacheSnapshot {
    pub buckets: HashMap<String, NameBucketSnapshot>,
}

pub struct SpanCache {
    config: CacheConfig,
    buckets: RwLock<HashMap<String, Arc<NameBucket>>>,
}

impl SpanCache {
    pub fn new(config: CacheConfig) -> SpanCache {
        SpanCache {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn bucket_for(&self, name: &str) -> Arc<NameBucket> {
        if let Some(bucket) = self
            .buckets
            .read()
            .expect("cache outer lock poisoned")
            .get(name)
        {
            return Arc::clone(bucket);
        }
        let mut buckets = self.buckets.write().expect("cache outer lock poisoned");
        Arc::clone(
            buckets
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(NameBucket::new())),
        )
    }

    /// Inserts a span into the running set of its name bucket. O(1) expected.
    pub fn insert_running(&self, span: Arc<dyn ReadableSpan>) {
        let bucket = self.bucket_for(&span.name());
        let span_id = span.span_context().span_id;
        let mut inner = bucket.inner.lock().expect("bucket lock poisoned");
        inner.running.insert(span_id, span);
    }

    /// Removes a span from the running set and files it into the appropriate ring.
    /// Tolerates being called for a span that was never inserted (illegal transition,
    /// §4.2): the removal from `running` is simply a no-op in that case.
    pub fn move_to_finished(&self, span: &dyn ReadableSpan) {
        let bucket = self.bucket_for(&span.name());
        let span_id = span.span_context().span_id;
        let mut inner = bucket.inner.lock().expect("bucket lock poisoned");
        inner.running.remove(&span_id);

        let Some(snapshot) = FinishedSpanSnapshot::capture(span) else {
            return;
        };

        if snapshot.status.code.is_ok() {
            let ring_index = LatencyBucket::classify(snapshot.latency_nanos()).ordinal();
            push_bounded(&mut inner.ok_rings[ring_index], snapshot, self.config.ok_capacity);
        } else {
            let error_code =
                ErrorCode::try_from_status(snapshot.status.code).unwrap_or_else(ErrorCode::unknown);
            push_bounded(&mut inner.err_rings[error_code.index()], snapshot, self.config.err_capacity);
        }
    }

    /// Returns a point-in-time view sufficient for the aggregator's queries. Each
    /// name bucket is read under its own single lock acquisition, so no bucket is
    /// observed mid-transition; different buckets may reflect slightly different
    /// instants, which is within the per-query (not cross-query) consistency
    /// guarantee in §3/§5.
    pub fn snapshot(&self) -> CacheSnapshot {
        let names: Vec<(String, Arc<NameBucket>)> = self
            .buckets
            .read()
            .expect("cache outer lock poisoned")
            .iter()
            .map(|(name, bucket)| (name.clone(), Arc::clone(bucket)))
            .collect();

        let mut out = HashMap::with_capacity(names.len());
        for (name, bucket) in names {
            let inner = bucket.inner.lock().expect("bucket lock poisoned");
            let running = inner.running.values().cloned().collect();
            let ok_rings = std::array::from_fn(|i| inner.ok_rings[i].iter().cloned().collect());
            let err_rings = std::array::from_fn(|i| inner.err_rings[i].iter().cloned().collect());
            out.insert(
                name,
                NameBucketSnapshot {
                    running,
                    ok_rings,
                    err_rings,
                },
            );
        }
        CacheSnapshot { buckets: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Span, SpanKind, SpanStatus};
    use crate::status_code::StatusCode;

    fn as_readable(span: &Span) -> Arc<dyn ReadableSpan> {
        Arc::new(span.clone())
    }

    #[test]
    fn running_then_finished_are_disjoint() {
        let cache = SpanCache::new(CacheConfig::default());
        let span = Span::new(1, 7, 0, "op", SpanKind::Internal, true, 0);
        cache.insert_running(as_readable(&span));

        let snap = cache.snapshot();
        assert_eq!(snap.buckets["op"].running.len(), 1);

        span.finish(SpanStatus::ok(), 500);
        cache.move_to_finished(&span);

        let snap = cache.snapshot();
        assert_eq!(snap.buckets["op"].running.len(), 0);
        assert_eq!(snap.buckets["op"].ok_rings[0].len(), 1);
    }

    #[test]
    fn error_status_files_into_error_ring() {
        let cache = SpanCache::new(CacheConfig::default());
        let span = Span::new(1, 1, 0, "op", SpanKind::Internal, true, 0);
        span.finish(SpanStatus::error(StatusCode::NotFound, "missing"), 10);
        cache.move_to_finished(&span);

        let snap = cache.snapshot();
        let error_code = ErrorCode::try_from_status(StatusCode::NotFound).unwrap();
        assert_eq!(snap.buckets["op"].err_rings[error_code.index()].len(), 1);
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let cache = SpanCache::new(CacheConfig {
            ok_capacity: 4,
            err_capacity: 4,
        });
        for i in 0..10u64 {
            let span = Span::new(1, i, 0, "op", SpanKind::Internal, true, 0);
            span.finish(SpanStatus::ok(), 1);
            cache.move_to_finished(&span);
        }
        let snap = cache.snapshot();
        let ring = &snap.buckets["op"].ok_rings[0];
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.front().unwrap().span_context.span_id, 6);
        assert_eq!(ring.back().unwrap().span_context.span_id, 9);
    }

    #[test]
    fn move_to_finished_without_prior_start_is_tolerated() {
        let cache = SpanCache::new(CacheConfig::default());
        let span = Span::new(1, 1, 0, "op", SpanKind::Internal, true, 0);
        span.finish(SpanStatus::ok(), 1);
        cache.move_to_finished(&span);
        let snap = cache.snapshot();
        assert_eq!(snap.buckets["op"].ok_rings[0].len(), 1);
    }
}
