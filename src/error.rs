//! The error taxonomy for every fallible boundary in this crate (§7).
//!
//! `SpanProcessor::on_start`/`on_end` never return this type to their caller — the SDK
//! callback contract is infallible by design — but log via `tracing` before discarding.
//! `PageHandler::emit_html` returns `Result<(), TraceZError>` only for sink-write
//! failures; malformed query parameters degrade to "summary table only" rather than
//! producing an error value.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceZError {
    /// `ztype` did not parse to one of `RUNNING`/`LATENCY`/`ERROR`.
    #[error("unrecognised ztype value: {0}")]
    UnknownSampleType(String),

    /// `zsubtype` parsed but was outside the valid range for the selected `ztype`.
    #[error("zsubtype {subtype} out of range for ztype {ztype}")]
    OutOfRangeSubtype { ztype: String, subtype: String },

    /// A failure during HTML body emission, recovered by writing a short diagnostic
    /// in place of the remaining output.
    #[error("render failure: {0}")]
    RenderFailure(String),

    /// The output sink itself failed (the one failure mode that terminates rendering
    /// without being caught and converted into a diagnostic line).
    #[error("output sink error")]
    Sink(#[from] std::io::Error),
}
