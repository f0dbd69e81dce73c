//! Wall-time to media-time mapping.

use super::config::UpdateThreshold;
use crate::clock::MediaTime;
use crate::rational::{Rational, q16_inverse};

/// Mask of the Q24 fractional media-time accumulator.
const FRAC_MASK: i128 = (1 << 24) - 1;

/// What a media-time reference did to the mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReferenceOutcome {
    /// The clock was inactive; the reference was taken as is.
    Snapped,
    /// The difference exceeded the upper threshold; the reference was taken.
    Jumped,
    /// The smoothed difference exceeded the lower threshold and was applied.
    Corrected,
    /// The difference was absorbed by the smoothing filter.
    Filtered,
    /// The clock is paused; the reference was ignored.
    Ignored,
}

impl ReferenceOutcome {
    /// Whether the scheduler must re-evaluate its queue.
    pub(crate) fn needs_wake(self) -> bool {
        matches!(self, ReferenceOutcome::Jumped | ReferenceOutcome::Corrected)
    }
}

/// Mapping between wall time and media time.
///
/// Every method takes the current wall time in microseconds, so the mapping
/// itself never reads a clock.
#[derive(Debug)]
pub(crate) struct TimeBase {
    wall: i64,
    media: i64,
    /// Sub-microsecond media time, Q24.
    frac: i64,
    scale: Rational,
    scale_q16: i32,
    scale_inv_q16: i32,
    active: bool,
    ref_diff_avg: i64,
    update: UpdateThreshold,
}

impl TimeBase {
    pub(crate) fn new(scale: Rational, update: UpdateThreshold, now: i64) -> Self {
        let scale_q16 = scale.to_q16();
        Self {
            wall: now,
            media: 0,
            frac: 0,
            scale,
            scale_q16,
            scale_inv_q16: q16_inverse(scale_q16),
            active: false,
            ref_diff_avg: 0,
            update,
        }
    }

    /// Advance the mapping to `now`. Media time only moves while active.
    fn advance(&mut self, now: i64) {
        let elapsed = now.saturating_sub(self.wall).max(0);
        self.wall = self.wall.max(now);
        if !self.active || elapsed == 0 {
            return;
        }
        let diff = elapsed as i128 * ((self.scale_q16 as i128) << 8) + self.frac as i128;
        let whole = (diff >> 24).clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64;
        self.media = self.media.saturating_add(whole).max(i64::MIN + 1);
        self.frac = (diff & FRAC_MASK) as i64;
    }

    pub(crate) fn media_time(&mut self, now: i64) -> MediaTime {
        self.advance(now);
        MediaTime::from_micros(self.media)
    }

    /// Wall time of the last update (µs).
    pub(crate) fn wall_time(&self) -> i64 {
        self.wall
    }

    pub(crate) fn scale(&self) -> Rational {
        self.scale
    }

    pub(crate) fn scale_q16(&self) -> i32 {
        self.scale_q16
    }

    pub(crate) fn scale_inv_q16(&self) -> i32 {
        self.scale_inv_q16
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.scale_q16 == 0
    }

    /// True when pending requests are ordered by descending media time.
    pub(crate) fn is_reverse(&self) -> bool {
        self.scale_q16 < 0
    }

    /// Change the scale, returning true when the playback direction flipped.
    pub(crate) fn set_scale(&mut self, scale: Rational, now: i64) -> bool {
        self.advance(now);
        let was_reverse = self.is_reverse();
        self.scale = scale;
        self.scale_q16 = scale.to_q16();
        self.scale_inv_q16 = q16_inverse(self.scale_q16);
        was_reverse != self.is_reverse()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool, now: i64) {
        self.advance(now);
        self.active = active;
    }

    pub(crate) fn update_threshold(&self) -> UpdateThreshold {
        self.update
    }

    pub(crate) fn set_update_threshold(&mut self, update: UpdateThreshold) {
        self.update = update;
    }

    /// Media time a request should be serviced at, pulled earlier by the
    /// lead time scaled to the playback rate.
    pub(crate) fn adjusted(&self, requested: MediaTime, lead_time_us: i64) -> i64 {
        let lead = (self.scale_q16 as i64).saturating_mul(lead_time_us) >> 16;
        requested.as_micros().saturating_sub(lead)
    }

    /// Apply an external media-time reference.
    pub(crate) fn set_reference(&mut self, reference: MediaTime, now: i64) -> ReferenceOutcome {
        let reference = reference.as_micros();

        if !self.active {
            self.wall = now;
            self.media = reference;
            self.frac = 0;
            return ReferenceOutcome::Snapped;
        }

        if self.is_paused() {
            return ReferenceOutcome::Ignored;
        }

        self.advance(now);

        let diff = self.media.saturating_sub(reference);
        let upper = self.update.upper.as_micros().max(0) as u64;
        if diff.unsigned_abs() > upper {
            self.media = reference;
            self.ref_diff_avg = 0;
            return ReferenceOutcome::Jumped;
        }

        self.ref_diff_avg =
            (self.ref_diff_avg.saturating_mul(64) - self.ref_diff_avg + diff) >> 6;
        let lower = self.update.lower.as_micros().max(0) as u64;
        if self.ref_diff_avg.unsigned_abs() > lower {
            self.media = self.media.saturating_sub(self.ref_diff_avg);
            self.ref_diff_avg = 0;
            ReferenceOutcome::Corrected
        } else {
            ReferenceOutcome::Filtered
        }
    }

    #[cfg(test)]
    pub(crate) fn ref_diff_avg(&self) -> i64 {
        self.ref_diff_avg
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new(Rational::ONE, UpdateThreshold::default(), 0)
    }
}
