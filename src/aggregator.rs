//! Pure-query facade over [`SpanCache`] (§4.3). Every operation performs a bounded
//! scan over a fresh snapshot and allocates its result; none mutate state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cache::SpanCache;
use crate::latency::{LatencyBucket, LATENCY_BUCKET_COUNT};
use crate::span::{FinishedSpanSnapshot, ReadableSpan};

pub struct DataAggregator {
    cache: Arc<SpanCache>,
}

impl DataAggregator {
    pub fn new(cache: Arc<SpanCache>) -> DataAggregator {
        DataAggregator { cache }
    }

    pub fn span_names(&self) -> BTreeSet<String> {
        self.cache.snapshot().buckets.into_keys().collect()
    }

    pub fn running_span_counts(&self) -> BTreeMap<String, usize> {
        self.cache
            .snapshot()
            .buckets
            .into_iter()
            .filter(|(_, bucket)| !bucket.running.is_empty())
            .map(|(name, bucket)| (name, bucket.running.len()))
            .collect()
    }

    pub fn running_spans_by_name(&self, name: &str) -> Vec<Arc<dyn ReadableSpan>> {
        let mut spans = self
            .cache
            .snapshot()
            .buckets
            .remove(name)
            .map(|bucket| bucket.running)
            .unwrap_or_default();
        spans.sort_by_key(ReadableSpan::start_epoch_nanos);
        spans
    }

    pub fn span_latency_counts(&self) -> BTreeMap<String, [usize; LATENCY_BUCKET_COUNT]> {
        self.cache
            .snapshot()
            .buckets
            .into_iter()
            .map(|(name, bucket)| {
                let counts = std::array::from_fn(|i| bucket.ok_rings[i].len());
                (name, counts)
            })
            .collect()
    }

    /// Count of `OK` finished spans with `lo <= latency < hi`, per name, across every
    /// cached name — the ranged sibling of `span_latency_counts()` (§4.3 table).
    pub fn span_latency_counts_range(&self, lo: u64, hi: u64) -> BTreeMap<String, usize> {
        self.cache
            .snapshot()
            .buckets
            .into_iter()
            .map(|(name, bucket)| {
                let count = bucket
                    .ok_rings
                    .into_iter()
                    .flatten()
                    .filter(|snapshot| {
                        let latency = snapshot.latency_nanos();
                        latency >= lo && latency < hi
                    })
                    .count();
                (name, count)
            })
            .collect()
    }

    pub fn ok_spans(&self, name: &str, lo: u64, hi: u64) -> Vec<FinishedSpanSnapshot> {
        let Some(bucket) = self.cache.snapshot().buckets.remove(name) else {
            return Vec::new();
        };
        let mut spans: Vec<FinishedSpanSnapshot> = bucket
            .ok_rings
            .into_iter()
            .flatten()
            .filter(|snapshot| {
                let latency = snapshot.latency_nanos();
                latency >= lo && latency < hi
            })
            .collect();
        sort_finished_newest_first(&mut spans);
        spans
    }

    pub fn ok_spans_in_bucket(&self, name: &str, bucket: LatencyBucket) -> Vec<FinishedSpanSnapshot> {
        self.ok_spans(name, bucket.lower_bound_nanos(), bucket.upper_bound_nanos())
    }

    pub fn error_span_counts(&self) -> BTreeMap<String, usize> {
        self.cache
            .snapshot()
            .buckets
            .into_iter()
            .map(|(name, bucket)| {
                let count = bucket.err_rings.iter().map(Vec::len).sum();
                (name, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    pub fn error_spans_by_name(&self, name: &str) -> Vec<FinishedSpanSnapshot> {
        let Some(bucket) = self.cache.snapshot().buckets.remove(name) else {
            return Vec::new();
        };
        let mut spans: Vec<FinishedSpanSnapshot> = bucket.err_rings.into_iter().flatten().collect();
        sort_finished_newest_first(&mut spans);
        spans
    }

    /// Finished spans for one error code ring, `0` meaning "every error code" (§4.4).
    pub fn error_spans_by_code(
        &self,
        name: &str,
        error_code: Option<crate::status_code::ErrorCode>,
    ) -> Vec<FinishedSpanSnapshot> {
        let Some(code) = error_code else {
            return self.error_spans_by_name(name);
        };
        let Some(bucket) = self.cache.snapshot().buckets.remove(name) else {
            return Vec::new();
        };
        let mut spans: Vec<FinishedSpanSnapshot> = bucket.err_rings[code.index()].clone();
        sort_finished_newest_first(&mut spans);
        spans
    }
}

/// Newest-first by end time, falling back to start time — the loosely-preserved
/// observable ordering documented as an open question in §9 (the source's mixed
/// start/end comparator is not reproduced).
fn sort_finished_newest_first(spans: &mut [FinishedSpanSnapshot]) {
    spans.sort_by_key(|s| std::cmp::Reverse((s.end_epoch_nanos, s.start_epoch_nanos)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::span::{Span, SpanKind, SpanStatus};
    use crate::status_code::StatusCode;

    fn cache_with(spans: &[Span]) -> Arc<SpanCache> {
        let cache = Arc::new(SpanCache::new(CacheConfig::default()));
        for span in spans {
            if span.end_epoch_nanos().is_some() {
                cache.move_to_finished(span);
            } else {
                cache.insert_running(Arc::new(span.clone()));
            }
        }
        cache
    }

    #[test]
    fn running_span_counts_groups_by_name() {
        let spans: Vec<Span> = (0..3)
            .map(|i| Span::new(1, i, 0, "one", SpanKind::Internal, true, 0))
            .collect();
        let aggregator = DataAggregator::new(cache_with(&spans));
        assert_eq!(aggregator.running_span_counts()["one"], 3);
    }

    #[test]
    fn span_latency_counts_hits_expected_buckets() {
        let a = Span::new(1, 1, 0, "x", SpanKind::Internal, true, 0);
        a.finish(SpanStatus::ok(), 500);
        let b = Span::new(1, 2, 0, "x", SpanKind::Internal, true, 0);
        b.finish(SpanStatus::ok(), 10_000);
        let c = Span::new(1, 3, 0, "x", SpanKind::Internal, true, 0);
        c.finish(SpanStatus::ok(), 100_000_000);

        let aggregator = DataAggregator::new(cache_with(&[a, b, c]));
        let counts = aggregator.span_latency_counts();
        let buckets = &counts["x"];
        assert_eq!(buckets[0], 1);
        assert_eq!(buckets[1], 1);
        assert_eq!(buckets[5], 1);
        assert_eq!(buckets[2] + buckets[3] + buckets[4] + buckets[6] + buckets[7] + buckets[8], 0);
    }

    #[test]
    fn error_span_counts_excludes_ok_spans() {
        let ok = Span::new(1, 1, 0, "x", SpanKind::Internal, true, 0);
        ok.finish(SpanStatus::ok(), 10);
        let err = Span::new(1, 2, 0, "x", SpanKind::Internal, true, 0);
        err.finish(SpanStatus::error(StatusCode::Internal, "boom"), 10);

        let aggregator = DataAggregator::new(cache_with(&[ok, err]));
        assert_eq!(aggregator.error_span_counts()["x"], 1);
    }

    #[test]
    fn span_latency_counts_range_spans_every_cached_name() {
        let x_in_range = Span::new(1, 1, 0, "x", SpanKind::Internal, true, 0);
        x_in_range.finish(SpanStatus::ok(), 500);
        let x_out_of_range = Span::new(1, 2, 0, "x", SpanKind::Internal, true, 0);
        x_out_of_range.finish(SpanStatus::ok(), 10_000);
        let y_in_range = Span::new(1, 3, 0, "y", SpanKind::Internal, true, 0);
        y_in_range.finish(SpanStatus::ok(), 750);

        let aggregator = DataAggregator::new(cache_with(&[x_in_range, x_out_of_range, y_in_range]));
        let counts = aggregator.span_latency_counts_range(0, 1_000);

        assert_eq!(counts["x"], 1);
        assert_eq!(counts["y"], 1);
    }
}
