//! Tracing spans for the clock threads.

use tracing::{Level, Span, span};

/// Create a span for a clock's scheduler thread.
///
/// # Example
///
/// ```rust
/// use mediaclock::observability::span_clock;
///
/// let span = span_clock("video");
/// let _guard = span.enter();
/// // Scheduler work here...
/// ```
#[inline]
pub fn span_clock(name: &str) -> Span {
    span!(Level::DEBUG, "clock", name = %name)
}

/// Create a span for an adjustment engine's processing thread.
#[inline]
pub fn span_adjuster(name: &str) -> Span {
    span!(Level::DEBUG, "adjuster", name = %name)
}

/// Enter a clock span for the rest of the current scope.
pub fn instrument_clock(name: &str) -> tracing::span::EnteredSpan {
    span_clock(name).entered()
}

/// Log a clock changing between running states.
#[inline]
pub fn trace_state_change(clock: &str, from: &str, to: &str) {
    tracing::debug!(
        clock = %clock,
        from = %from,
        to = %to,
        "clock state changed"
    );
}
