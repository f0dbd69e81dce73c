//! Metrics collection using metrics-rs.

use metrics::{Counter, Gauge, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const REQUESTS_SERVICED: &str = "mediaclock_requests_serviced";
const REQUESTS_REJECTED: &str = "mediaclock_requests_rejected";
const REQUESTS_FLUSHED: &str = "mediaclock_requests_flushed";
const DISCONTINUITIES: &str = "mediaclock_discontinuities";
const TIMER_DELAY_US: &str = "mediaclock_timer_delay_us";
const CLOCK_RESTARTS: &str = "mediaclock_clock_restarts";
const CLOCK_OFFSET_US: &str = "mediaclock_clock_offset_us";
const CLOCK_ADJUSTMENT_US: &str = "mediaclock_clock_adjustment_us";
const EVENT_QUEUE_DEPTH: &str = "mediaclock_event_queue_depth";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_counter!(
        REQUESTS_SERVICED,
        Unit::Count,
        "Clock requests whose callback fired with a media time"
    );
    metrics::describe_counter!(
        REQUESTS_REJECTED,
        Unit::Count,
        "Clock requests refused by the request threshold or a full pool"
    );
    metrics::describe_counter!(
        REQUESTS_FLUSHED,
        Unit::Count,
        "Clock requests completed by a flush"
    );
    metrics::describe_counter!(
        DISCONTINUITIES,
        Unit::Count,
        "Media-time discontinuities detected"
    );
    metrics::describe_histogram!(
        TIMER_DELAY_US,
        Unit::Microseconds,
        "Wall-time delay the scheduler timer was armed for"
    );
    metrics::describe_counter!(
        CLOCK_RESTARTS,
        Unit::Count,
        "Hard restarts of the attached clocks"
    );
    metrics::describe_gauge!(
        CLOCK_OFFSET_US,
        Unit::Microseconds,
        "Current media-time offset applied to the clocks"
    );
    metrics::describe_histogram!(
        CLOCK_ADJUSTMENT_US,
        Unit::Microseconds,
        "Soft adjustment applied per frame"
    );
    metrics::describe_gauge!(
        EVENT_QUEUE_DEPTH,
        Unit::Count,
        "Events waiting for the adjustment thread"
    );
}

/// Record the number of events waiting in a controller queue.
#[inline]
pub fn record_event_queue_depth(controller: &str, depth: usize) {
    gauge!(EVENT_QUEUE_DEPTH, "controller" => controller.to_string()).set(depth as f64);
}

/// Metrics for one media clock, labelled with its name.
#[derive(Clone)]
pub struct ClockMetrics {
    serviced: Counter,
    rejected: Counter,
    flushed: Counter,
    discontinuities: Counter,
    timer_delay: Histogram,
}

impl ClockMetrics {
    /// Create the collector for a clock.
    pub fn new(clock: &str) -> Self {
        Self {
            serviced: counter!(REQUESTS_SERVICED, "clock" => clock.to_string()),
            rejected: counter!(REQUESTS_REJECTED, "clock" => clock.to_string()),
            flushed: counter!(REQUESTS_FLUSHED, "clock" => clock.to_string()),
            discontinuities: counter!(DISCONTINUITIES, "clock" => clock.to_string()),
            timer_delay: histogram!(TIMER_DELAY_US, "clock" => clock.to_string()),
        }
    }

    /// Record serviced requests.
    #[inline]
    pub fn record_serviced(&self, count: usize) {
        self.serviced.increment(count as u64);
    }

    /// Record a refused request.
    #[inline]
    pub fn record_rejected(&self) {
        self.rejected.increment(1);
    }

    /// Record flushed requests.
    #[inline]
    pub fn record_flushed(&self, count: usize) {
        self.flushed.increment(count as u64);
    }

    /// Record a detected discontinuity.
    #[inline]
    pub fn record_discontinuity(&self) {
        self.discontinuities.increment(1);
    }

    /// Record the delay the timer was armed for.
    #[inline]
    pub fn record_timer_delay(&self, delay_us: u64) {
        self.timer_delay.record(delay_us as f64);
    }
}

/// Metrics for one adjustment engine.
#[derive(Clone)]
pub struct AdjusterMetrics {
    restarts: Counter,
    discontinuities: Counter,
    offset: Gauge,
    adjustment: Histogram,
}

impl AdjusterMetrics {
    /// Create the collector for an engine.
    pub fn new(name: &str) -> Self {
        Self {
            restarts: counter!(CLOCK_RESTARTS, "adjuster" => name.to_string()),
            discontinuities: counter!(DISCONTINUITIES, "adjuster" => name.to_string()),
            offset: gauge!(CLOCK_OFFSET_US, "adjuster" => name.to_string()),
            adjustment: histogram!(CLOCK_ADJUSTMENT_US, "adjuster" => name.to_string()),
        }
    }

    /// Record a hard restart.
    #[inline]
    pub fn record_restart(&self) {
        self.restarts.increment(1);
    }

    /// Record a stream discontinuity.
    #[inline]
    pub fn record_discontinuity(&self) {
        self.discontinuities.increment(1);
    }

    /// Record the offset now applied.
    #[inline]
    pub fn record_offset(&self, offset_us: i64) {
        self.offset.set(offset_us as f64);
    }

    /// Record one soft adjustment.
    #[inline]
    pub fn record_adjustment(&self, adjustment_us: i64) {
        self.adjustment.record(adjustment_us as f64);
    }
}
