//! Synthetic end-to-end demonstration of the TraceZ pipeline.
//!
//! Spins up several producer threads that generate spans with realistic attributes
//! (HTTP/DB/messaging operation shapes, 80% with a parent, ~10% error rate), feeds
//! them through [`TraceZSpanProcessor`], and renders the resulting page to stdout.
//!
//! ```bash
//! cargo run --bin demo            # full mode: 8 producers, 100 spans each
//! cargo run --bin demo -- --quick # 4 producers, 25 spans each
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracez::{
    AttributeValue, DataAggregator, PageHandler, SpanCache, SpanKind, SpanProcessor, SpanStatus,
    StatusCode, TraceZSpanProcessor,
};

static NEXT_SPAN_ID: AtomicU64 = AtomicU64::new(1);

fn now_epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos() as u64
}

const OPERATION_NAMES: &[&str] = &[
    "GET /api/users/:id",
    "POST /api/orders",
    "db.query.select_orders",
    "cache.get",
    "messaging.publish.order_created",
    "grpc.InventoryService/Reserve",
];

fn synthetic_attributes(rng: &mut impl Rng, name: &str) -> HashMap<String, AttributeValue> {
    let mut attributes = HashMap::new();
    attributes.insert(
        "service.name".to_string(),
        AttributeValue::String("checkout-service".to_string()),
    );
    if name.starts_with("GET") || name.starts_with("POST") {
        attributes.insert(
            "http.method".to_string(),
            AttributeValue::String(name.split_whitespace().next().unwrap_or("GET").to_string()),
        );
        attributes.insert(
            "http.status_code".to_string(),
            AttributeValue::Int(if rng.gen_bool(0.9) { 200 } else { 500 }),
        );
    } else if name.starts_with("db.") {
        attributes.insert("db.system".to_string(), AttributeValue::String("postgresql".to_string()));
        attributes.insert("db.rows_affected".to_string(), AttributeValue::Int(rng.gen_range(0..50)));
    }
    attributes
}

fn generate_span(
    processor: &TraceZSpanProcessor,
    rng: &mut impl Rng,
    trace_id: u128,
    parent_span_id: u64,
) {
    let name = OPERATION_NAMES[rng.gen_range(0..OPERATION_NAMES.len())];
    let span_id = NEXT_SPAN_ID.fetch_add(1, Ordering::Relaxed);
    let is_sampled = rng.gen_bool(0.95);
    let start = now_epoch_nanos();
    let kind = if name.starts_with("GET") || name.starts_with("POST") {
        SpanKind::Server
    } else {
        SpanKind::Internal
    };

    let span = tracez::Span::new(trace_id, span_id, parent_span_id, name, kind, is_sampled, start);
    for (key, value) in synthetic_attributes(rng, name) {
        span.set_attribute(key, value);
    }
    span.set_resource_attribute("service.instance.id", AttributeValue::String(format!("instance-{trace_id:x}")));
    span.add_event(start, "span.start", HashMap::new());

    processor.on_start(Arc::new(span.clone()));

    let latency_nanos = rng.gen_range(500..200_000_000_000u64);
    let end = start.saturating_add(latency_nanos);
    let status = if rng.gen_bool(0.1) {
        SpanStatus::error(StatusCode::Internal, "downstream unavailable")
    } else {
        SpanStatus::ok()
    };
    span.finish(status, end);
    processor.on_end(&span);
}

fn main() {
    tracing_subscriber::fmt::init();

    let quick = std::env::args().any(|arg| arg == "--quick");
    let (producers, spans_per_producer) = if quick { (4, 25) } else { (8, 100) };

    println!("TraceZ demo: {producers} producers, {spans_per_producer} spans each");

    let cache = Arc::new(SpanCache::new(tracez::CacheConfig::default()));
    let processor = Arc::new(TraceZSpanProcessor::new(Arc::clone(&cache), true));

    let handles: Vec<_> = (0..producers)
        .map(|producer_id| {
            let processor = Arc::clone(&processor);
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for i in 0..spans_per_producer {
                    let trace_id = ((producer_id as u128) << 64) | i as u128;
                    let has_parent = rng.gen_bool(0.8);
                    let parent_span_id = if has_parent { NEXT_SPAN_ID.fetch_add(1, Ordering::Relaxed) } else { 0 };
                    generate_span(&processor, &mut rng, trace_id, parent_span_id);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("producer thread panicked");
    }

    let aggregator = Arc::new(DataAggregator::new(Arc::clone(&cache)));
    println!("span names observed: {}", aggregator.span_names().len());
    println!("running span counts: {:?}", aggregator.running_span_counts());
    println!("error span counts: {:?}", aggregator.error_span_counts());

    let handler = PageHandler::new(Some(aggregator));
    let mut page = Vec::new();
    handler
        .emit_html(&HashMap::new(), &mut page)
        .expect("in-memory sink cannot fail");
    println!("\nrendered {} bytes to {}", page.len(), handler.url_path());
}
