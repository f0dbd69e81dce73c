//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters, gauges, and histograms via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `mediaclock_requests_serviced` | Counter | Requests fired with a media time |
//! | `mediaclock_requests_rejected` | Counter | Requests refused (threshold or full pool) |
//! | `mediaclock_requests_flushed` | Counter | Requests completed by a flush |
//! | `mediaclock_discontinuities` | Counter | Discontinuities detected |
//! | `mediaclock_timer_delay_us` | Histogram | Scheduler timer delays |
//! | `mediaclock_clock_restarts` | Counter | Hard restarts by the adjustment engine |
//! | `mediaclock_clock_offset_us` | Gauge | Offset currently applied to the clocks |
//! | `mediaclock_clock_adjustment_us` | Histogram | Soft adjustments |
//! | `mediaclock_event_queue_depth` | Gauge | Events pending for the adjustment thread |
//!
//! ## Tracing
//!
//! Each scheduler thread runs inside a `clock` span and each adjustment
//! thread inside an `adjuster` span.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mediaclock::observability::init_metrics;
//!
//! // Initialize metrics (call once at startup)
//! init_metrics();
//!
//! // Install a metrics exporter (prometheus, statsd, etc.) to collect them
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{AdjusterMetrics, ClockMetrics, init_metrics, record_event_queue_depth};
pub use tracing_support::{instrument_clock, span_adjuster, span_clock, trace_state_change};
