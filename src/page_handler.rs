//! Renders the TraceZ summary table and per-span drill-down as HTML (§4.4).

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::aggregator::DataAggregator;
use crate::error::TraceZError;
use crate::latency::{LatencyBucket, LATENCY_BUCKET_COUNT};
use crate::span::{AttributeValue, FinishedSpanSnapshot, ReadableSpan, SpanContext, SpanEvent, SpanStatus};
use crate::status_code::ErrorCode;

pub const URL_PATH: &str = "/tracez";

/// Characters percent-encoded in query-string values; `NON_ALPHANUMERIC` is already
/// conservative, this just documents the choice at the call site.
const QUERY_VALUE: &AsciiSet = NON_ALPHANUMERIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZType {
    Running,
    Latency,
    Error,
}

impl ZType {
    fn ordinal(self) -> u8 {
        match self {
            ZType::Running => 0,
            ZType::Latency => 1,
            ZType::Error => 2,
        }
    }

    fn from_query(raw: &str) -> Option<ZType> {
        match raw {
            "0" => Some(ZType::Running),
            "1" => Some(ZType::Latency),
            "2" => Some(ZType::Error),
            _ => None,
        }
    }
}

/// Splits a raw query string on `&` then `=` (single-value semantics, empty string
/// when `=` is absent), percent-decoding each side. This is the same algorithm the
/// external HTTP adapter is expected to run (§6) before calling `emit_html`; exposed
/// here so drill-down links and their parsing stay round-trip tested together (§8).
pub fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8_lossy()
        .into_owned()
}

fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn drill_down_link(name: &str, ztype: ZType, subtype: usize) -> String {
    format!(
        "{URL_PATH}?zspanname={}&ztype={}&zsubtype={}",
        utf8_percent_encode(name, QUERY_VALUE),
        ztype.ordinal(),
        subtype
    )
}

/// Renders the TraceZ page. Holds an optional [`DataAggregator`]: when absent, the
/// page reports "implementation not available" rather than panicking (§9).
pub struct PageHandler {
    aggregator: Option<Arc<DataAggregator>>,
}

impl PageHandler {
    pub fn new(aggregator: Option<Arc<DataAggregator>>) -> PageHandler {
        PageHandler { aggregator }
    }

    pub fn url_path(&self) -> &'static str {
        URL_PATH
    }

    /// Writes the full HTML response. Only a sink-write failure (`out` itself erroring)
    /// propagates as `Err`; any other failure while building the body is caught and
    /// turned into a short diagnostic appended to the otherwise-complete page, since
    /// by this point an HTTP 200 has already been sent and the body cannot be replaced.
    pub fn emit_html(&self, query: &HashMap<String, String>, out: &mut dyn Write) -> Result<(), TraceZError> {
        write_head(out)?;

        let Some(aggregator) = &self.aggregator else {
            writeln!(out, "<p>TraceZ implementation not available.</p>")?;
            writeln!(out, "</body></html>")?;
            return Ok(());
        };

        let mut body = Vec::new();
        let render = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            render_body(aggregator.as_ref(), query, &mut body)
        }));

        match render {
            Ok(Ok(())) => out.write_all(&body).map_err(TraceZError::Sink)?,
            Ok(Err(err)) => {
                out.write_all(&body).map_err(TraceZError::Sink)?;
                tracing::warn!(error = %err, "tracez render failure");
                writeln!(out, "<p>render error: {}</p>", html_escape(&err.to_string()))?;
            }
            Err(_) => {
                tracing::warn!("panic during tracez page render");
                writeln!(out, "<p>render error: internal failure</p>")?;
            }
        }

        writeln!(out, "</body></html>")?;
        Ok(())
    }
}

fn write_head(out: &mut dyn Write) -> Result<(), TraceZError> {
    write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head>\n<title>TraceZ</title>\n<style>\n\
         body {{ font-family: monospace; }}\n\
         table {{ border-collapse: collapse; }}\n\
         td, th {{ border: 1px solid #ccc; padding: 2px 8px; }}\n\
         .row-even {{ background: #f2f2f2; }}\n\
         .row-odd {{ background: #ffffff; }}\n\
         .sampled {{ color: #C1272D; }}\n\
         </style>\n</head>\n<body>\n\
         <img src=\"data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBTAA7\" alt=\"\"/>\n\
         <h1>TraceZ</h1>\n"
    )
    .map_err(TraceZError::Sink)
}

fn render_body(
    aggregator: &DataAggregator,
    query: &HashMap<String, String>,
    out: &mut Vec<u8>,
) -> Result<(), TraceZError> {
    write_summary_table(aggregator, out)?;
    match write_details(aggregator, query, out) {
        Ok(()) => Ok(()),
        // Malformed `ztype`/`zsubtype` are not render failures (§7): the drill-down
        // is silently omitted and the summary table already written stands.
        Err(TraceZError::UnknownSampleType(_) | TraceZError::OutOfRangeSubtype { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

fn write_summary_table(aggregator: &DataAggregator, out: &mut Vec<u8>) -> Result<(), TraceZError> {
    let names = aggregator.span_names();
    let running_counts = aggregator.running_span_counts();
    let latency_counts = aggregator.span_latency_counts();
    let error_counts = aggregator.error_span_counts();

    writeln!(out, "<table>")?;
    write!(out, "<tr><th>Name</th><th>Running</th>")?;
    for bucket in LatencyBucket::ALL {
        write!(out, "<th>{}</th>", html_escape(bucket.label()))?;
    }
    writeln!(out, "<th>Errors</th></tr>")?;

    for (row_index, name) in names.iter().enumerate() {
        let row_class = if row_index % 2 == 0 { "row-even" } else { "row-odd" };
        writeln!(out, "<tr class=\"{row_class}\">")?;
        write!(out, "<td>{}</td>", html_escape(name))?;

        let running = running_counts.get(name).copied().unwrap_or(0);
        write_count_cell(out, running, || drill_down_link(name, ZType::Running, 0))?;

        let buckets = latency_counts.get(name).copied().unwrap_or([0; LATENCY_BUCKET_COUNT]);
        for (bucket_index, count) in buckets.iter().enumerate() {
            write_count_cell(out, *count, || drill_down_link(name, ZType::Latency, bucket_index))?;
        }

        let errors = error_counts.get(name).copied().unwrap_or(0);
        write_count_cell(out, errors, || drill_down_link(name, ZType::Error, 0))?;
        writeln!(out, "</tr>")?;
    }
    writeln!(out, "</table>")?;
    Ok(())
}

fn write_count_cell(out: &mut Vec<u8>, count: usize, link: impl FnOnce() -> String) -> Result<(), TraceZError> {
    if count > 0 {
        write!(out, "<td><a href=\"{}\">{}</a></td>", html_escape(&link()), count)?;
    } else {
        write!(out, "<td>0</td>")?;
    }
    Ok(())
}

fn write_details(
    aggregator: &DataAggregator,
    query: &HashMap<String, String>,
    out: &mut Vec<u8>,
) -> Result<(), TraceZError> {
    let Some(name) = query.get("zspanname") else {
        return Ok(());
    };
    let Some(ztype_raw) = query.get("ztype") else {
        return Ok(());
    };
    let ztype = ZType::from_query(ztype_raw).ok_or_else(|| TraceZError::UnknownSampleType(ztype_raw.clone()))?;
    let subtype: Option<usize> = query.get("zsubtype").and_then(|s| s.parse().ok());

    match ztype {
        ZType::Running => {
            let mut spans = aggregator.running_spans_by_name(name);
            spans.sort_by_key(|s| s.start_epoch_nanos());
            write_section_header(out, name, "running", spans.len())?;
            for span in &spans {
                write_running_span_block(out, span.as_ref())?;
            }
        }
        ZType::Latency => {
            let Some(subtype_val) = subtype else {
                return Ok(());
            };
            let bucket = LatencyBucket::from_ordinal(subtype_val).ok_or_else(|| TraceZError::OutOfRangeSubtype {
                ztype: "LATENCY".to_string(),
                subtype: subtype_val.to_string(),
            })?;
            let spans = aggregator.ok_spans_in_bucket(name, bucket);
            write_section_header(out, name, "latency samples", spans.len())?;
            for span in &spans {
                write_finished_span_block(out, span)?;
            }
        }
        ZType::Error => {
            let error_code = match subtype {
                None | Some(0) => None,
                Some(index) => {
                    let code = ErrorCode::from_index(index - 1).ok_or_else(|| TraceZError::OutOfRangeSubtype {
                        ztype: "ERROR".to_string(),
                        subtype: index.to_string(),
                    })?;
                    Some(code)
                }
            };
            let spans = aggregator.error_spans_by_code(name, error_code);
            write_section_header(out, name, "error samples", spans.len())?;
            for span in &spans {
                write_finished_span_block(out, span)?;
            }
        }
    }
    Ok(())
}

fn write_section_header(out: &mut Vec<u8>, name: &str, kind: &str, count: usize) -> Result<(), TraceZError> {
    writeln!(out, "<h2>Span Name: {}</h2>", html_escape(name))?;
    writeln!(out, "<p>Number of {kind}: {count}</p>")?;
    Ok(())
}

const INVALID_SPAN_ID: u64 = 0;

fn format_trace_id(trace_id: u128) -> String {
    format!("{trace_id:032x}")
}

fn format_span_id(span_id: u64) -> String {
    format!("{span_id:016x}")
}

fn nanos_to_datetime(epoch_nanos: u64) -> chrono::DateTime<chrono::Utc> {
    let secs = (epoch_nanos / 1_000_000_000) as i64;
    let nanos_rem = (epoch_nanos % 1_000_000_000) as u32;
    chrono::DateTime::from_timestamp(secs, nanos_rem).unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap())
}

fn format_header_timestamp(epoch_nanos: u64) -> String {
    nanos_to_datetime(epoch_nanos).format("%Y/%m/%d-%H:%M:%S%.6f").to_string()
}

fn format_delta(delta_nanos: u64) -> String {
    if delta_nanos >= 1_000_000_000 {
        format!("{:.6}", delta_nanos as f64 / 1_000_000_000.0)
    } else {
        format!(".{:06}", delta_nanos / 1_000)
    }
}

fn write_running_span_block(out: &mut Vec<u8>, span: &dyn ReadableSpan) -> Result<(), TraceZError> {
    write_span_block(
        out,
        span.span_context(),
        span.parent_span_id(),
        span.start_epoch_nanos(),
        span.end_epoch_nanos(),
        &span.status(),
        &span.events(),
        &span.resource_attributes(),
    )
}

fn write_finished_span_block(out: &mut Vec<u8>, snapshot: &FinishedSpanSnapshot) -> Result<(), TraceZError> {
    write_span_block(
        out,
        snapshot.span_context,
        snapshot.parent_span_id,
        snapshot.start_epoch_nanos,
        Some(snapshot.end_epoch_nanos),
        &snapshot.status,
        &snapshot.events,
        &snapshot.resource_attributes,
    )
}

#[allow(clippy::too_many_arguments)]
fn write_span_block(
    out: &mut Vec<u8>,
    context: SpanContext,
    parent_span_id: Option<u64>,
    start_epoch_nanos: u64,
    end_epoch_nanos: Option<u64>,
    status: &SpanStatus,
    events: &[SpanEvent],
    resource_attributes: &HashMap<String, AttributeValue>,
) -> Result<(), TraceZError> {
    if let Some(end) = end_epoch_nanos {
        if end < start_epoch_nanos {
            return Err(TraceZError::RenderFailure(format!(
                "span {} has end_epoch_nanos {end} before start_epoch_nanos {start_epoch_nanos}",
                format_span_id(context.span_id),
            )));
        }
    }

    let elapsed = end_epoch_nanos
        .map(|end| format!("{:.6}", end.saturating_sub(start_epoch_nanos) as f64 / 1_000_000_000.0))
        .unwrap_or_default();
    let trace_id_class = if context.is_sampled { "sampled" } else { "" };
    let parent = parent_span_id.unwrap_or(INVALID_SPAN_ID);

    writeln!(out, "<p>")?;
    writeln!(
        out,
        "{}&nbsp;&nbsp;{}&nbsp;&nbsp;TraceId: <span class=\"{}\">{}</span>&nbsp;&nbsp;SpanId: {}&nbsp;&nbsp;ParentSpanId: {}<br/>",
        format_header_timestamp(start_epoch_nanos),
        html_escape(&elapsed),
        trace_id_class,
        format_trace_id(context.trace_id),
        format_span_id(context.span_id),
        format_span_id(parent),
    )?;

    let mut last_day = nanos_to_datetime(start_epoch_nanos).date_naive();
    let mut last_epoch_nanos = start_epoch_nanos;
    let mut sorted_events = events.to_vec();
    sorted_events.sort_by_key(|e| e.epoch_nanos);

    for event in &sorted_events {
        let day = nanos_to_datetime(event.epoch_nanos).date_naive();
        let delta = event.epoch_nanos.saturating_sub(last_epoch_nanos);
        let mut line = String::new();
        if day != last_day {
            line.push_str(&nanos_to_datetime(event.epoch_nanos).format("%Y/%m/%d-").to_string());
        }
        line.push_str(&format_delta(delta));
        line.push_str("&nbsp;&nbsp;");
        line.push_str(&html_escape(&event.name));
        if !event.attributes.is_empty() {
            line.push_str(&format!(" {}", format_attributes(&event.attributes)));
        }
        writeln!(out, "{line}<br/>")?;
        last_day = day;
        last_epoch_nanos = event.epoch_nanos;
    }

    if !status.code.is_ok() || status.description.is_some() {
        writeln!(out, "Status: {}<br/>", html_escape(&status.code.to_string()))?;
    }
    writeln!(out, "Attributes:{}", format_attributes(resource_attributes))?;
    writeln!(out, "</p>")?;
    Ok(())
}

fn format_attributes(attributes: &HashMap<String, AttributeValue>) -> String {
    let mut pairs: Vec<(&String, &AttributeValue)> = attributes.iter().collect();
    pairs.sort_by_key(|(k, _)| (*k).clone());
    let body = pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", html_escape(k), html_escape(&v.to_string())))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{body}}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, SpanCache};
    use crate::span::{Span, SpanKind, SpanStatus};
    use std::sync::Arc;

    fn handler_with(spans: &[Span]) -> PageHandler {
        let cache = Arc::new(SpanCache::new(CacheConfig::default()));
        for span in spans {
            if span.end_epoch_nanos().is_some() {
                cache.move_to_finished(span);
            } else {
                cache.insert_running(Arc::new(span.clone()));
            }
        }
        PageHandler::new(Some(Arc::new(DataAggregator::new(cache))))
    }

    #[test]
    fn escapes_html_unsafe_span_names() {
        let span = Span::new(1, 1, 0, "<script>alert(1)</script>", SpanKind::Internal, true, 0);
        span.finish(SpanStatus::ok(), 10);
        let handler = handler_with(&[span]);

        let mut out = Vec::new();
        handler.emit_html(&HashMap::new(), &mut out).unwrap();
        let html = String::from_utf8(out).unwrap();

        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>alert"));
    }

    #[test]
    fn drill_down_link_round_trips_through_parse_query() {
        let name = "weird name & stuff";
        let link = drill_down_link(name, ZType::Latency, 3);
        let query_string = link.split_once('?').unwrap().1;
        let parsed = parse_query(query_string);
        assert_eq!(parsed.get("zspanname"), Some(&name.to_string()));
    }

    #[test]
    fn absent_aggregator_renders_fallback() {
        let handler = PageHandler::new(None);
        let mut out = Vec::new();
        handler.emit_html(&HashMap::new(), &mut out).unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("not available"));
    }

    #[test]
    fn malformed_ztype_renders_summary_only() {
        let span = Span::new(1, 1, 0, "op", SpanKind::Internal, true, 0);
        span.finish(SpanStatus::ok(), 10);
        let handler = handler_with(&[span]);

        let mut query = HashMap::new();
        query.insert("zspanname".to_string(), "op".to_string());
        query.insert("ztype".to_string(), "not-a-number".to_string());

        let mut out = Vec::new();
        handler.emit_html(&query, &mut out).unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(!html.contains("Span Name:"));
    }

    #[test]
    fn out_of_range_subtype_renders_summary_only() {
        let span = Span::new(1, 1, 0, "op", SpanKind::Internal, true, 0);
        span.finish(SpanStatus::ok(), 10);
        let handler = handler_with(&[span]);

        let mut query = HashMap::new();
        query.insert("zspanname".to_string(), "op".to_string());
        query.insert("ztype".to_string(), "1".to_string());
        query.insert("zsubtype".to_string(), "99".to_string());

        let mut out = Vec::new();
        handler.emit_html(&query, &mut out).unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(!html.contains("Span Name:"));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn render_failure_surfaces_real_diagnostic_for_corrupt_timing() {
        let span = Span::new(1, 1, 0, "corrupt.op", SpanKind::Internal, true, 1_000);
        span.finish(SpanStatus::ok(), 500); // end before start: invalid, must not panic
        let handler = handler_with(&[span]);

        let mut query = HashMap::new();
        query.insert("zspanname".to_string(), "corrupt.op".to_string());
        query.insert("ztype".to_string(), "1".to_string());
        query.insert("zsubtype".to_string(), "0".to_string());

        let mut out = Vec::new();
        handler.emit_html(&query, &mut out).unwrap();
        let html = String::from_utf8(out).unwrap();

        assert!(html.contains("<table>"), "summary table should still be written before the failure");
        assert!(html.contains("render error: render failure: span"));
        assert!(html.contains("before start_epoch_nanos"));
    }
}
