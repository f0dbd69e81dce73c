//! Stream frame rate.
//!
//! The adjustment engine derives its timing constants (frame duration,
//! sample filter length, confidence shift) from the nominal frame rate of
//! the streams it synchronizes.

use crate::error::{Error, Result};

/// Length of the statistics window, in seconds of stream time.
pub const FILTER_DURATION_SECS: u32 = 2;

/// Upper bound on samples kept per statistics window.
pub const MAX_FILTER_LENGTH: usize = 180;

/// Frame rate as numerator/denominator (8 bytes, Copy).
///
/// Using a fraction allows exact representation of common framerates
/// like 29.97 fps (30000/1001) and 23.976 fps (24000/1001).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Framerate {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (time units).
    pub den: u32,
}

impl Framerate {
    /// Create a new framerate.
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// 24 fps (film).
    pub const FPS_24: Self = Self::new(24, 1);
    /// 25 fps (PAL).
    pub const FPS_25: Self = Self::new(25, 1);
    /// 30 fps.
    pub const FPS_30: Self = Self::new(30, 1);
    /// 60 fps.
    pub const FPS_60: Self = Self::new(60, 1);
    /// 29.97 fps (NTSC).
    pub const FPS_29_97: Self = Self::new(30000, 1001);

    /// Check the rate can drive the adjustment engine.
    pub fn validate(self) -> Result<Self> {
        if self.num == 0 || self.den == 0 {
            return Err(Error::InvalidArgument(format!(
                "frame rate {}/{} must be non-zero",
                self.num, self.den
            )));
        }
        Ok(self)
    }

    /// Get the framerate as a floating-point value.
    #[inline]
    pub fn fps(&self) -> f64 {
        self.num as f64 / self.den.max(1) as f64
    }

    /// Get frame duration in microseconds.
    #[inline]
    pub const fn frame_duration_us(&self) -> i64 {
        if self.num == 0 {
            return 0;
        }
        (self.den as i64 * 1_000_000) / self.num as i64
    }

    /// Base-2 logarithm of the numerator rounded up to a power of two.
    ///
    /// Only the numerator is considered, so 30000/1001 shifts as if it
    /// were 32768 fps.
    #[inline]
    pub const fn log2_ceil(&self) -> u32 {
        if self.num <= 1 {
            return 0;
        }
        match self.num.checked_next_power_of_two() {
            Some(p) => p.trailing_zeros(),
            None => u32::BITS,
        }
    }

    /// Samples in a statistics window of [`FILTER_DURATION_SECS`],
    /// clamped to `[1, MAX_FILTER_LENGTH]`.
    pub const fn filter_length(&self) -> usize {
        if self.den == 0 {
            return MAX_FILTER_LENGTH;
        }
        let n = (self.num as u64 * FILTER_DURATION_SECS as u64) / self.den as u64;
        if n < 1 {
            1
        } else if n > MAX_FILTER_LENGTH as u64 {
            MAX_FILTER_LENGTH
        } else {
            n as usize
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl PartialOrd for Framerate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Framerate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Compare as fractions: a/b vs c/d => a*d vs c*b
        let lhs = (self.num as u64) * (other.den as u64);
        let rhs = (other.num as u64) * (self.den as u64);
        lhs.cmp(&rhs)
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
