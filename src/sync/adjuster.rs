//! Cross-stream clock adjustment.
//!
//! The [`ClockAdjuster`] keeps one [`StreamTracker`] per input stream. Each
//! completed frame triggers an adjustment pass:
//!
//! 1. Age out stale samples and pick the most-behind (minimum offset) and
//!    most-ahead (maximum offset) streams.
//! 2. After a discontinuity, restart every attached clock at
//!    `min.avg - latency + now`.
//! 3. Otherwise move the clock offset towards
//!    `min(max.avg - latency, min.avg - frame_duration)`, limited by the
//!    attack rate and damped by the confidence in the minimum stream.
//!
//! The adjuster is single threaded. Drive it from one thread directly, or
//! hand it to a [`ClockController`](super::ClockController).

use crate::clock::MediaTime;
use crate::error::{Error, Result};
use crate::format::Framerate;
use crate::media_clock::{DiscontinuityThreshold, MediaClock, RequestThreshold, UpdateThreshold};
use crate::observability::AdjusterMetrics;
use crate::rational::Rational;
use crate::stats::{StreamEvent, StreamId, StreamTracker};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default latency target (µs).
pub const DEFAULT_LATENCY_TARGET_US: i64 = 60_000;

/// Default number of streams needed before adjusting.
pub const DEFAULT_MIN_ELIGIBLE_STREAMS: usize = 2;

/// Default confidence divisor, as a power of two.
pub const DEFAULT_CONFIDENCE_DIVISOR_LOG2: u32 = 2;

/// One in Q20 fixed point.
const CONFIDENCE_ONE: i64 = 1 << 20;

// ============================================================================
// Configuration
// ============================================================================

/// Latency the clocks run behind the slowest stream, and how fast the
/// offset may move towards its target.
///
/// The offset moves at most `attack_rate` every `attack_period` of wall
/// time. A zero period allows no soft correction at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyTarget {
    /// Target latency.
    pub target: MediaTime,
    /// Maximum correction per attack period.
    pub attack_rate: MediaTime,
    /// Wall time over which `attack_rate` applies.
    pub attack_period: MediaTime,
}

impl LatencyTarget {
    /// Latency target without soft correction.
    pub const fn new(target: MediaTime) -> Self {
        Self {
            target,
            attack_rate: MediaTime::ZERO,
            attack_period: MediaTime::ZERO,
        }
    }

    /// Set the attack rate and period.
    pub const fn with_attack(mut self, rate: MediaTime, period: MediaTime) -> Self {
        self.attack_rate = rate;
        self.attack_period = period;
        self
    }

    /// Largest correction allowed after `elapsed_us` of wall time.
    fn max_correction(&self, elapsed_us: i64) -> i64 {
        let period = self.attack_period.as_micros();
        if period <= 0 {
            return 0;
        }
        let max = elapsed_us as i128 * self.attack_rate.as_micros() as i128 / period as i128;
        max.clamp(0, i64::MAX as i128) as i64
    }
}

impl Default for LatencyTarget {
    fn default() -> Self {
        Self::new(MediaTime::from_micros(DEFAULT_LATENCY_TARGET_US))
    }
}

/// Configuration of a [`ClockAdjuster`].
#[derive(Clone, Debug)]
pub struct AdjusterConfig {
    /// Name used in logs, metrics and thread names.
    pub name: String,
    /// Nominal frame rate of the streams.
    pub frame_rate: Framerate,
    /// Latency target and attack.
    pub latency: LatencyTarget,
    /// Streams with statistics needed before adjusting.
    pub min_eligible_streams: usize,
    /// Deviation divisor used by the confidence factor, as a power of two.
    pub confidence_divisor_log2: u32,
    /// Update threshold pushed to the clocks.
    pub update_threshold: UpdateThreshold,
    /// Discontinuity threshold for the streams and the clocks.
    pub discontinuity_threshold: DiscontinuityThreshold,
    /// Request threshold pushed to the clocks.
    pub request_threshold: RequestThreshold,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            name: "adjuster".to_string(),
            frame_rate: Framerate::default(),
            latency: LatencyTarget::default(),
            min_eligible_streams: DEFAULT_MIN_ELIGIBLE_STREAMS,
            confidence_divisor_log2: DEFAULT_CONFIDENCE_DIVISOR_LOG2,
            update_threshold: UpdateThreshold::default(),
            discontinuity_threshold: DiscontinuityThreshold::default(),
            request_threshold: RequestThreshold::default(),
        }
    }
}

impl AdjusterConfig {
    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the frame rate.
    pub fn with_frame_rate(mut self, frame_rate: Framerate) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Set the latency target.
    pub fn with_latency(mut self, latency: LatencyTarget) -> Self {
        self.latency = latency;
        self
    }

    /// Set the number of streams needed before adjusting.
    pub fn with_min_eligible_streams(mut self, streams: usize) -> Self {
        self.min_eligible_streams = streams;
        self
    }

    /// Set the confidence divisor (as a power of two).
    pub fn with_confidence_divisor_log2(mut self, log2: u32) -> Self {
        self.confidence_divisor_log2 = log2;
        self
    }

    /// Set the update threshold.
    pub fn with_update_threshold(mut self, threshold: UpdateThreshold) -> Self {
        self.update_threshold = threshold;
        self
    }

    /// Set the discontinuity threshold.
    pub fn with_discontinuity_threshold(mut self, threshold: DiscontinuityThreshold) -> Self {
        self.discontinuity_threshold = threshold;
        self
    }

    /// Set the request threshold.
    pub fn with_request_threshold(mut self, threshold: RequestThreshold) -> Self {
        self.request_threshold = threshold;
        self
    }
}

// ============================================================================
// Adjuster
// ============================================================================

/// Outcome of the last adjustment pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Adjustment {
    /// Stream with the lowest offset.
    pub min_stream: StreamId,
    /// Stream with the highest offset.
    pub max_stream: StreamId,
    /// Offset applied to the clocks (µs).
    pub offset: i64,
    /// Offset the engine is converging to (µs).
    pub target: i64,
    /// Proportional correction before damping (µs).
    pub proportional: i64,
    /// Confidence factor in Q20.
    pub confidence: i64,
    /// Correction actually applied (µs).
    pub applied: i64,
    /// True if the clocks were restarted instead of corrected.
    pub restarted: bool,
}

/// Cross-stream clock adjustment engine.
pub struct ClockAdjuster {
    name: String,
    frame_rate: Framerate,
    frame_duration: i64,
    frame_rate_log2: u32,
    latency: LatencyTarget,
    min_eligible_streams: usize,
    confidence_divisor_log2: u32,
    update_threshold: UpdateThreshold,
    discontinuity_threshold: DiscontinuityThreshold,
    request_threshold: RequestThreshold,

    clocks: Vec<Arc<MediaClock>>,
    streams: BTreeMap<StreamId, StreamTracker>,

    scale: Rational,
    pending_scale: bool,
    discontinuity: bool,
    offset: i64,
    target: i64,
    last_update: i64,
    last_adjustment: Option<Adjustment>,

    metrics: AdjusterMetrics,
}

impl ClockAdjuster {
    /// Create an engine with no clocks and no streams.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an invalid frame rate or a zero
    /// `min_eligible_streams`.
    pub fn new(config: AdjusterConfig) -> Result<Self> {
        let frame_rate = config.frame_rate.validate()?;
        if config.min_eligible_streams == 0 {
            return Err(Error::InvalidArgument(
                "min_eligible_streams must be at least 1".to_string(),
            ));
        }
        tracing::debug!(
            adjuster = %config.name,
            frame_rate = %frame_rate,
            latency = %config.latency.target,
            "adjuster created"
        );
        Ok(Self {
            metrics: AdjusterMetrics::new(&config.name),
            name: config.name,
            frame_rate,
            frame_duration: frame_rate.frame_duration_us(),
            frame_rate_log2: frame_rate.log2_ceil(),
            latency: config.latency,
            min_eligible_streams: config.min_eligible_streams,
            confidence_divisor_log2: config.confidence_divisor_log2,
            update_threshold: config.update_threshold,
            discontinuity_threshold: config.discontinuity_threshold,
            request_threshold: config.request_threshold,
            clocks: Vec::new(),
            streams: BTreeMap::new(),
            scale: Rational::ONE,
            pending_scale: false,
            discontinuity: true,
            offset: 0,
            target: 0,
            last_update: 0,
            last_adjustment: None,
        })
    }

    /// Engine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive `clock` from this engine. The current thresholds are pushed to
    /// it immediately.
    pub fn attach(&mut self, clock: Arc<MediaClock>) {
        clock.set_update_threshold(self.update_threshold);
        clock.set_discontinuity_threshold(self.discontinuity_threshold);
        clock.set_request_threshold(self.request_threshold);
        tracing::debug!(adjuster = %self.name, clock = clock.name(), "clock attached");
        self.clocks.push(clock);
    }

    /// Stop driving `clock`. Returns false if it was not attached.
    pub fn detach(&mut self, clock: &Arc<MediaClock>) -> bool {
        let before = self.clocks.len();
        self.clocks.retain(|c| !Arc::ptr_eq(c, clock));
        self.clocks.len() != before
    }

    /// Attached clocks.
    pub fn clocks(&self) -> &[Arc<MediaClock>] {
        &self.clocks
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Feed one timing sample: the media time a stream claims for data that
    /// arrived at wall time `wall`.
    pub fn process_sample(
        &mut self,
        stream: StreamId,
        wall: MediaTime,
        media: MediaTime,
    ) -> StreamEvent {
        let filter_length = self.frame_rate.filter_length();
        let threshold = self.discontinuity_threshold.threshold;
        let event = self
            .streams
            .entry(stream)
            .or_insert_with(|| {
                tracing::debug!(stream, filter_length, "stream created");
                StreamTracker::new(stream, filter_length)
            })
            .update(wall, media, threshold);

        match event {
            StreamEvent::FrameComplete => self.adjust(wall),
            StreamEvent::Discontinuous => {
                self.metrics.record_discontinuity();
                self.reset_streams();
            }
            StreamEvent::None | StreamEvent::Started => {}
        }
        event
    }

    /// Forget a stream. Returns false if it was unknown.
    pub fn remove_stream(&mut self, stream: StreamId) -> bool {
        let removed = self.streams.remove(&stream).is_some();
        if removed {
            tracing::debug!(adjuster = %self.name, stream, "stream removed");
        }
        removed
    }

    /// Restart the clocks on the next adjustment, e.g. after a seek.
    pub fn signal_discontinuity(&mut self) {
        tracing::info!(adjuster = %self.name, "discontinuity signalled");
        self.metrics.record_discontinuity();
        self.reset_streams();
    }

    /// Change the playback scale.
    ///
    /// Pausing (zero) applies to the clocks at once. Resuming at unity speed
    /// is deferred until the next adjustment restarts the clocks at the right
    /// media time. Other scales are ignored.
    pub fn set_scale(&mut self, scale: Rational) {
        if scale.is_zero() {
            self.scale = scale;
            self.apply_scale();
        } else if scale == self.scale {
            tracing::trace!(adjuster = %self.name, scale = %scale, "scale unchanged");
        } else if scale == Rational::ONE {
            tracing::debug!(adjuster = %self.name, scale = %scale, "scale deferred");
            self.scale = scale;
            self.pending_scale = true;
            self.reset_streams();
        } else {
            tracing::warn!(adjuster = %self.name, scale = %scale, "unsupported scale ignored");
        }
    }

    /// Change the latency target. Restarts the clocks on the next adjustment.
    pub fn set_latency(&mut self, latency: LatencyTarget) {
        tracing::debug!(
            adjuster = %self.name,
            target = %latency.target,
            attack_rate = %latency.attack_rate,
            attack_period = %latency.attack_period,
            "latency changed"
        );
        self.latency = latency;
        self.reset_streams();
    }

    /// Change the nominal frame rate.
    ///
    /// Existing streams keep their filter length; new streams use the new
    /// one.
    pub fn set_frame_rate(&mut self, frame_rate: Framerate) -> Result<()> {
        let frame_rate = frame_rate.validate()?;
        self.frame_rate = frame_rate;
        self.frame_duration = frame_rate.frame_duration_us();
        self.frame_rate_log2 = frame_rate.log2_ceil();
        tracing::debug!(
            adjuster = %self.name,
            frame_rate = %frame_rate,
            log2 = self.frame_rate_log2,
            duration = self.frame_duration,
            "frame rate changed"
        );
        Ok(())
    }

    /// Change the update threshold of every clock.
    pub fn set_update_threshold(&mut self, threshold: UpdateThreshold) {
        self.update_threshold = threshold;
        for clock in &self.clocks {
            clock.set_update_threshold(threshold);
        }
    }

    /// Change the discontinuity threshold of the streams and every clock.
    pub fn set_discontinuity_threshold(&mut self, threshold: DiscontinuityThreshold) {
        self.discontinuity_threshold = threshold;
        for clock in &self.clocks {
            clock.set_discontinuity_threshold(threshold);
        }
    }

    /// Change the request threshold of every clock.
    pub fn set_request_threshold(&mut self, threshold: RequestThreshold) {
        self.request_threshold = threshold;
        for clock in &self.clocks {
            clock.set_request_threshold(threshold);
        }
    }

    fn reset_streams(&mut self) {
        for tracker in self.streams.values_mut() {
            tracker.reset();
        }
        self.discontinuity = true;
    }

    // ========================================================================
    // Adjustment
    // ========================================================================

    /// Age out stale samples and pick the streams with the lowest and
    /// highest offsets.
    ///
    /// Streams whose filters are only partly filled are biased towards zero
    /// so a stream that just started does not dominate.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] if fewer than `min_eligible_streams` streams have
    /// statistics.
    pub fn select_extreme_streams(&mut self, now: MediaTime) -> Result<(StreamId, StreamId)> {
        let now = now.as_micros();
        let drop_threshold = self.frame_duration.saturating_mul(6);
        let reset_threshold = self.latency.target.as_micros().saturating_mul(2);

        let mut eligible = 0;
        let mut min: Option<(i64, StreamId)> = None;
        let mut max: Option<(i64, StreamId)> = None;

        for tracker in self.streams.values_mut() {
            let gap = now.saturating_sub(tracker.last_wall().as_micros());
            if gap > reset_threshold {
                tracing::trace!(stream = tracker.id(), gap, "stream filters reset");
                tracker.clear_filters();
            } else if gap > drop_threshold {
                tracing::trace!(stream = tracker.id(), gap, "stream sample dropped");
                tracker.drop_oldest();
            }

            let filter = tracker.avg_filter();
            if filter.is_empty() {
                continue;
            }
            tracker.refresh();
            eligible += 1;

            let filter = tracker.avg_filter();
            let avg = tracker.offset_avg();
            let capacity = filter.capacity() as i128;
            let missing = capacity - filter.count() as i128;
            let bias = (missing * avg.unsigned_abs() as i128 / capacity) as i64;

            let low = avg.saturating_add(bias);
            if min.is_none_or(|(best, _)| low < best) {
                min = Some((low, tracker.id()));
            }
            let high = avg.saturating_sub(bias);
            if max.is_none_or(|(best, _)| high > best) {
                max = Some((high, tracker.id()));
            }
        }

        match (min, max) {
            (Some((_, min)), Some((_, max))) if eligible >= self.min_eligible_streams => {
                Ok((min, max))
            }
            _ => Err(Error::NotReady),
        }
    }

    /// Run one adjustment pass at wall time `now`.
    pub fn adjust(&mut self, now: MediaTime) {
        let (min_id, max_id) = match self.select_extreme_streams(now) {
            Ok(pair) => pair,
            Err(Error::NotReady) => {
                tracing::trace!(adjuster = %self.name, "not enough streams to adjust");
                return;
            }
            Err(e) => {
                tracing::warn!(adjuster = %self.name, error = %e, "stream selection failed");
                return;
            }
        };
        let (Some(min), Some(max)) = (self.streams.get(&min_id), self.streams.get(&max_id)) else {
            return;
        };
        let min_avg = min.offset_avg();
        let min_dev = min.offset_dev();
        let min_count = min.avg_filter().count() as i128;
        let min_capacity = min.avg_filter().capacity() as i128;
        let max_avg = max.offset_avg();

        let now = now.as_micros();
        let previous = std::mem::replace(&mut self.last_update, now);
        let latency = self.latency.target.as_micros();

        let adjustment = if self.discontinuity {
            self.discontinuity = false;
            self.offset = min_avg.saturating_sub(latency);
            self.target = self.offset;

            tracing::info!(
                adjuster = %self.name,
                offset = self.offset,
                min_stream = min_id,
                max_stream = max_id,
                "restarting clocks"
            );
            self.metrics.record_restart();
            self.restart_clocks(MediaTime::from_micros(self.offset.saturating_add(now)));

            Adjustment {
                min_stream: min_id,
                max_stream: max_id,
                offset: self.offset,
                target: self.target,
                proportional: 0,
                confidence: CONFIDENCE_ONE,
                applied: 0,
                restarted: true,
            }
        } else {
            self.target = max_avg
                .saturating_sub(latency)
                .min(min_avg.saturating_sub(self.frame_duration));

            let elapsed = now.saturating_sub(previous).max(0);
            let limit = self.latency.max_correction(elapsed);
            let proportional = self.target.saturating_sub(self.offset).clamp(-limit, limit);

            // Confidence falls with the deviation of the slowest stream
            let spread = min_dev.saturating_mul(1i64 << self.frame_rate_log2.min(62))
                >> self.confidence_divisor_log2.min(63);
            let confidence = CONFIDENCE_ONE.saturating_sub(spread).max(0);

            let damped = (proportional as i128 * confidence as i128) >> 20;
            let applied = ((damped * (min_count << 8) / min_capacity) >> 8) as i64;
            self.offset = self.offset.saturating_add(applied);

            tracing::debug!(
                adjuster = %self.name,
                offset = self.offset,
                target = self.target,
                proportional,
                confidence,
                applied,
                "clock adjusted"
            );
            self.metrics.record_adjustment(applied);

            let media = MediaTime::from_micros(self.offset.saturating_add(now));
            for clock in &self.clocks {
                if let Err(e) = clock.set_media_time(media) {
                    tracing::warn!(clock = clock.name(), error = %e, "failed to adjust clock");
                }
            }

            Adjustment {
                min_stream: min_id,
                max_stream: max_id,
                offset: self.offset,
                target: self.target,
                proportional,
                confidence,
                applied,
                restarted: false,
            }
        };
        self.metrics.record_offset(self.offset);
        self.last_adjustment = Some(adjustment);

        if self.pending_scale {
            self.apply_scale();
        }
    }

    /// Flush and stop every clock, then start them all at `media_time`.
    fn restart_clocks(&self, media_time: MediaTime) {
        for clock in &self.clocks {
            clock.flush();
            clock.set_active(false);
        }
        for clock in &self.clocks {
            if let Err(e) = clock.set_media_time(media_time) {
                tracing::warn!(clock = clock.name(), error = %e, "failed to restart clock");
                continue;
            }
            clock.set_update_threshold(self.update_threshold);
            clock.set_discontinuity_threshold(self.discontinuity_threshold);
            clock.set_request_threshold(self.request_threshold);
            clock.set_active(true);
        }
    }

    fn apply_scale(&mut self) {
        tracing::debug!(adjuster = %self.name, scale = %self.scale, "applying scale");
        for clock in &self.clocks {
            clock.set_scale(self.scale);
        }
        self.pending_scale = false;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Offset currently applied to the clocks (µs).
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Offset the engine is converging to (µs).
    pub fn target(&self) -> i64 {
        self.target
    }

    /// Outcome of the last adjustment pass.
    pub fn last_adjustment(&self) -> Option<Adjustment> {
        self.last_adjustment
    }

    /// True if the next adjustment restarts the clocks.
    pub fn is_discontinuous(&self) -> bool {
        self.discontinuity
    }

    /// Scale requested from the engine.
    pub fn scale(&self) -> Rational {
        self.scale
    }

    /// True while a resume waits for the next adjustment.
    pub fn has_pending_scale(&self) -> bool {
        self.pending_scale
    }

    /// Latency target.
    pub fn latency(&self) -> LatencyTarget {
        self.latency
    }

    /// Nominal frame rate.
    pub fn frame_rate(&self) -> Framerate {
        self.frame_rate
    }

    /// Frame duration derived from the frame rate (µs).
    pub fn frame_duration_us(&self) -> i64 {
        self.frame_duration
    }

    /// Tracker of one stream.
    pub fn stream(&self, stream: StreamId) -> Option<&StreamTracker> {
        self.streams.get(&stream)
    }

    /// Number of known streams.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

impl std::fmt::Debug for ClockAdjuster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockAdjuster")
            .field("name", &self.name)
            .field("frame_rate", &self.frame_rate)
            .field("latency", &self.latency)
            .field("clocks", &self.clocks.len())
            .field("streams", &self.streams.len())
            .field("offset", &self.offset)
            .field("discontinuity", &self.discontinuity)
            .finish()
    }
}
