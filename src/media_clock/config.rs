//! Media clock configuration and threshold settings.

use crate::clock::{Clock, MediaTime, SystemClock};
use crate::rational::Rational;
use crate::timer::{TimerBackend, default_backend};
use std::sync::Arc;
use std::time::Duration;

/// Default number of request slots per clock.
pub const DEFAULT_REQUEST_SLOTS: usize = 32;

/// Default lead applied to requests so they fire slightly early (µs).
pub const DEFAULT_LEAD_TIME_US: i64 = 20;

/// Default timer re-arm period while the clock is paused.
pub const DEFAULT_PAUSED_POLL: Duration = Duration::from_millis(200);

// ============================================================================
// Thresholds
// ============================================================================

/// Hysteresis applied to media-time references while the clock runs.
///
/// A reference further than `upper` from the local media time is applied
/// at once. Smaller differences are smoothed, and only applied once the
/// smoothed difference exceeds `lower`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateThreshold {
    /// Smoothed difference that triggers a correction.
    pub lower: MediaTime,
    /// Difference that triggers an immediate jump.
    pub upper: MediaTime,
}

impl UpdateThreshold {
    /// Create a threshold pair.
    pub const fn new(lower: MediaTime, upper: MediaTime) -> Self {
        Self { lower, upper }
    }
}

impl Default for UpdateThreshold {
    fn default() -> Self {
        Self {
            lower: MediaTime::from_micros(8_000),
            upper: MediaTime::from_micros(50_000),
        }
    }
}

/// Detection of backward media-time jumps in the scheduler.
///
/// When the media time falls more than `threshold` behind the value seen
/// when the timer was last armed, all pending requests fire and requests
/// belonging to the old timeline keep firing immediately for `duration`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscontinuityThreshold {
    /// Backward jump that counts as a discontinuity.
    pub threshold: MediaTime,
    /// Length of the window (both media and wall time).
    pub duration: MediaTime,
}

impl DiscontinuityThreshold {
    /// Create a discontinuity setting.
    pub const fn new(threshold: MediaTime, duration: MediaTime) -> Self {
        Self {
            threshold,
            duration,
        }
    }
}

impl Default for DiscontinuityThreshold {
    fn default() -> Self {
        Self {
            threshold: MediaTime::from_secs(1),
            duration: MediaTime::from_secs(1),
        }
    }
}

/// Limit on how far ahead of the current media time requests may be.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestThreshold {
    /// Maximum distance into the future.
    pub threshold: MediaTime,
    /// Whether the limit is enforced.
    pub enabled: bool,
}

impl RequestThreshold {
    /// An enforced limit.
    pub const fn enabled(threshold: MediaTime) -> Self {
        Self {
            threshold,
            enabled: true,
        }
    }

    /// No limit.
    pub const fn disabled() -> Self {
        Self {
            threshold: MediaTime::ZERO,
            enabled: false,
        }
    }
}

// ============================================================================
// ClockConfig
// ============================================================================

/// Configuration for a [`MediaClock`](super::MediaClock).
///
/// ```rust
/// use mediaclock::clock::ManualClock;
/// use mediaclock::media_clock::ClockConfig;
/// use std::sync::Arc;
///
/// let config = ClockConfig::default()
///     .with_name("video")
///     .with_request_slots(64)
///     .with_time_source(Arc::new(ManualClock::new()));
/// assert_eq!(config.request_slots, 64);
/// ```
#[derive(Clone)]
pub struct ClockConfig {
    /// Name used in logs and thread names.
    pub name: String,
    /// Wall-clock source.
    pub time_source: Arc<dyn Clock>,
    /// Timer factory for the scheduler.
    pub timer_backend: Arc<dyn TimerBackend>,
    /// Size of the request pool.
    pub request_slots: usize,
    /// Lead applied to every request at unity scale (µs).
    pub lead_time_us: i64,
    /// Timer period while paused.
    pub paused_poll: Duration,
    /// Initial scale.
    pub scale: Rational,
    /// Initial update threshold.
    pub update_threshold: UpdateThreshold,
    /// Initial discontinuity threshold.
    pub discontinuity_threshold: DiscontinuityThreshold,
    /// Initial request threshold.
    pub request_threshold: RequestThreshold,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            name: "mediaclock".to_string(),
            time_source: Arc::new(SystemClock::new()),
            timer_backend: default_backend(),
            request_slots: DEFAULT_REQUEST_SLOTS,
            lead_time_us: DEFAULT_LEAD_TIME_US,
            paused_poll: DEFAULT_PAUSED_POLL,
            scale: Rational::ONE,
            update_threshold: UpdateThreshold::default(),
            discontinuity_threshold: DiscontinuityThreshold::default(),
            request_threshold: RequestThreshold::default(),
        }
    }
}

impl ClockConfig {
    /// Set the clock name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the wall-clock source.
    pub fn with_time_source(mut self, source: Arc<dyn Clock>) -> Self {
        self.time_source = source;
        self
    }

    /// Set the timer backend.
    pub fn with_timer_backend(mut self, backend: Arc<dyn TimerBackend>) -> Self {
        self.timer_backend = backend;
        self
    }

    /// Set the request pool size.
    pub fn with_request_slots(mut self, slots: usize) -> Self {
        self.request_slots = slots;
        self
    }

    /// Set the request lead time (µs).
    pub fn with_lead_time_us(mut self, lead: i64) -> Self {
        self.lead_time_us = lead;
        self
    }

    /// Set the timer period used while paused.
    pub fn with_paused_poll(mut self, poll: Duration) -> Self {
        self.paused_poll = poll;
        self
    }

    /// Set the initial scale.
    pub fn with_scale(mut self, scale: Rational) -> Self {
        self.scale = scale;
        self
    }

    /// Set the initial update threshold.
    pub fn with_update_threshold(mut self, threshold: UpdateThreshold) -> Self {
        self.update_threshold = threshold;
        self
    }

    /// Set the initial discontinuity threshold.
    pub fn with_discontinuity_threshold(mut self, threshold: DiscontinuityThreshold) -> Self {
        self.discontinuity_threshold = threshold;
        self
    }

    /// Set the initial request threshold.
    pub fn with_request_threshold(mut self, threshold: RequestThreshold) -> Self {
        self.request_threshold = threshold;
        self
    }
}

impl std::fmt::Debug for ClockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockConfig")
            .field("name", &self.name)
            .field("time_source", &self.time_source.name())
            .field("timer_backend", &self.timer_backend.name())
            .field("request_slots", &self.request_slots)
            .field("lead_time_us", &self.lead_time_us)
            .field("paused_poll", &self.paused_poll)
            .field("scale", &self.scale)
            .field("update_threshold", &self.update_threshold)
            .field("discontinuity_threshold", &self.discontinuity_threshold)
            .field("request_threshold", &self.request_threshold)
            .finish()
    }
}
