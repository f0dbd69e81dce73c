//! Time types and wall-clock sources.
//!
//! This module provides:
//! - [`MediaTime`]: signed microsecond media time with an `UNKNOWN` sentinel
//! - [`ClockTime`]: unsigned nanosecond wall time (8 bytes, Copy)
//! - [`Clock`]: trait for wall-clock time sources
//! - [`SystemClock`]: monotonic system clock
//! - [`ManualClock`]: externally stepped clock for simulation and tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ============================================================================
// MediaTime
// ============================================================================

/// Media time in microseconds (8 bytes, Copy).
///
/// Media time is the logical position on the content timeline. It is signed
/// because offsets between media time and wall time are routinely negative.
///
/// # Special Values
///
/// - `MediaTime::ZERO`: start of the timeline
/// - `MediaTime::UNKNOWN`: timestamp not known (sentinel value)
/// - `MediaTime::MIN` / `MediaTime::MAX`: saturation bounds
///
/// Arithmetic saturates at `MIN`/`MAX` and never produces `UNKNOWN` from
/// known operands. Any operation involving `UNKNOWN` yields `UNKNOWN`.
///
/// # Examples
///
/// ```rust
/// use mediaclock::clock::MediaTime;
///
/// let t = MediaTime::from_millis(1500) - MediaTime::from_secs(2);
/// assert_eq!(t.as_micros(), -500_000);
/// assert_eq!(format!("{}", t), "-0.500000s");
/// assert!((t + MediaTime::UNKNOWN).is_unknown());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct MediaTime(i64);

impl MediaTime {
    /// Zero media time.
    pub const ZERO: Self = Self(0);

    /// Unknown media time (sentinel value).
    pub const UNKNOWN: Self = Self(i64::MIN);

    /// Smallest representable known time (one above the sentinel).
    pub const MIN: Self = Self(i64::MIN + 1);

    /// Largest representable time.
    pub const MAX: Self = Self(i64::MAX);

    /// Create from microseconds.
    ///
    /// `i64::MIN` is the sentinel and maps to `UNKNOWN`.
    #[inline]
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    /// Create from milliseconds (saturating).
    #[inline]
    pub const fn from_millis(ms: i64) -> Self {
        Self::clamp_known(ms.saturating_mul(1_000))
    }

    /// Create from seconds (saturating).
    #[inline]
    pub const fn from_secs(s: i64) -> Self {
        Self::clamp_known(s.saturating_mul(1_000_000))
    }

    /// Get as microseconds. Returns `i64::MIN` for `UNKNOWN`.
    #[inline]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Check if this is the UNKNOWN sentinel.
    #[inline]
    pub const fn is_unknown(self) -> bool {
        self.0 == i64::MIN
    }

    /// Check if this is a known time.
    #[inline]
    pub const fn is_known(self) -> bool {
        self.0 != i64::MIN
    }

    /// Convert to Option, returning None for the UNKNOWN sentinel.
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_unknown() { None } else { Some(self) }
    }

    #[inline]
    const fn clamp_known(us: i64) -> Self {
        if us == i64::MIN { Self::MIN } else { Self(us) }
    }

    /// Saturating addition. Returns UNKNOWN if either operand is UNKNOWN.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_unknown() || rhs.is_unknown() {
            return Self::UNKNOWN;
        }
        Self::clamp_known(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction. Returns UNKNOWN if either operand is UNKNOWN.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_unknown() || rhs.is_unknown() {
            return Self::UNKNOWN;
        }
        Self::clamp_known(self.0.saturating_sub(rhs.0))
    }

    /// Absolute value (saturating). UNKNOWN stays UNKNOWN.
    #[inline]
    pub const fn abs(self) -> Self {
        if self.is_unknown() {
            return Self::UNKNOWN;
        }
        Self(self.0.saturating_abs())
    }

    /// Absolute difference in microseconds, or None if either is UNKNOWN.
    #[inline]
    pub const fn abs_diff(self, other: Self) -> Option<u64> {
        if self.is_unknown() || other.is_unknown() {
            return None;
        }
        Some(self.0.abs_diff(other.0))
    }
}

impl std::ops::Add for MediaTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::AddAssign for MediaTime {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl std::ops::Sub for MediaTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl std::ops::SubAssign for MediaTime {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = self.saturating_sub(rhs);
    }
}

impl std::ops::Neg for MediaTime {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        if self.is_unknown() {
            Self::UNKNOWN
        } else {
            Self(-self.0)
        }
    }
}

impl std::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            return write!(f, "UNKNOWN");
        }
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:06}s", sign, abs / 1_000_000, abs % 1_000_000)
    }
}

// ============================================================================
// ClockTime
// ============================================================================

/// Wall time in nanoseconds (8 bytes, Copy).
///
/// Represents host time as nanoseconds since an arbitrary epoch (usually the
/// creation of the [`Clock`] it came from).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable time (one less than NONE sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Invalid/unset time (sentinel value).
    pub const NONE: Self = Self(u64::MAX);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us.saturating_mul(1_000))
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Get as nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Get as microseconds (truncated).
    #[inline]
    pub const fn micros(self) -> u64 {
        self.0 / 1_000
    }

    /// Get as milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Check if this is the NONE sentinel value.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check if this is a valid time (not NONE).
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Wall time expressed on the signed microsecond scale used for
    /// arrival times. NONE maps to `MediaTime::UNKNOWN`.
    #[inline]
    pub const fn as_wall_micros(self) -> MediaTime {
        if self.is_none() {
            return MediaTime::UNKNOWN;
        }
        MediaTime::from_micros((self.0 / 1_000) as i64)
    }

    /// Saturating addition. Returns NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        let result = self.0.saturating_add(rhs.0);
        // Don't overflow into NONE
        if result == u64::MAX {
            Self::MAX
        } else {
            Self(result)
        }
    }

    /// Saturating subtraction. Returns NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    #[inline]
    fn from(d: Duration) -> Self {
        Self(d.as_nanos().min(u64::MAX as u128 - 1) as u64)
    }
}

impl From<ClockTime> for Duration {
    #[inline]
    fn from(t: ClockTime) -> Self {
        if t.is_none() {
            Duration::ZERO
        } else {
            Duration::from_nanos(t.0)
        }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            let secs = self.0 / 1_000_000_000;
            let ms = (self.0 / 1_000_000) % 1000;
            write!(f, "{}.{:03}s", secs, ms)
        }
    }
}

// ============================================================================
// Clock Trait
// ============================================================================

/// A wall-clock time source.
///
/// Implementations must be monotonic (never go backwards). The media clock
/// measures elapsed wall time through this trait, so injecting a
/// [`ManualClock`] makes the time mapping fully deterministic.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> ClockTime;

    /// Get clock resolution in nanoseconds.
    ///
    /// Returns 0 if resolution is unknown.
    fn resolution(&self) -> u64 {
        0
    }

    /// Get a human-readable name for the clock.
    fn name(&self) -> &str {
        "unknown"
    }
}

// ============================================================================
// SystemClock
// ============================================================================

/// System monotonic clock.
///
/// Uses `std::time::Instant` for monotonic time measurement.
/// Time is relative to when the clock was created.
pub struct SystemClock {
    epoch: Instant,
    name: String,
}

impl SystemClock {
    /// Create a new system clock with the current instant as epoch.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            name: "system-monotonic".to_string(),
        }
    }

    /// Create a system clock with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            epoch: Instant::now(),
            name: name.into(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> ClockTime {
        ClockTime::from(self.epoch.elapsed())
    }

    fn resolution(&self) -> u64 {
        1
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// ManualClock
// ============================================================================

/// A clock that only moves when told to.
///
/// Useful for simulations and for exercising the media-time mapping without
/// depending on scheduler latency.
///
/// ```rust
/// use mediaclock::clock::{Clock, ClockTime, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(5));
/// assert_eq!(clock.now(), ClockTime::from_millis(5));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manual clock at the given time.
    pub fn starting_at(time: ClockTime) -> Self {
        Self {
            nanos: AtomicU64::new(time.nanos()),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = ClockTime::from(by).nanos();
        let _ = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_add(by).min(u64::MAX - 1))
            });
    }

    /// Move the clock forward by a number of microseconds.
    pub fn advance_micros(&self, us: u64) {
        self.advance(Duration::from_micros(us));
    }

    /// Set the clock to an absolute time. Values in the past are ignored.
    pub fn set(&self, time: ClockTime) {
        self.nanos.fetch_max(time.nanos(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> ClockTime {
        ClockTime::from_nanos(self.nanos.load(Ordering::Acquire))
    }

    fn name(&self) -> &str {
        "manual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_time_creation() {
        assert_eq!(MediaTime::from_micros(1_000).as_micros(), 1_000);
        assert_eq!(MediaTime::from_millis(-3).as_micros(), -3_000);
        assert_eq!(MediaTime::from_secs(2).as_micros(), 2_000_000);
    }

    #[test]
    fn test_media_time_unknown() {
        assert!(MediaTime::UNKNOWN.is_unknown());
        assert!(!MediaTime::UNKNOWN.is_known());
        assert!(MediaTime::ZERO.is_known());
        assert_eq!(MediaTime::UNKNOWN.to_option(), None);
        assert_eq!(MediaTime::ZERO.to_option(), Some(MediaTime::ZERO));
    }

    #[test]
    fn test_media_time_unknown_arithmetic() {
        let t = MediaTime::from_secs(1);
        assert!((t + MediaTime::UNKNOWN).is_unknown());
        assert!((MediaTime::UNKNOWN - t).is_unknown());
        assert!((-MediaTime::UNKNOWN).is_unknown());
        assert!(MediaTime::UNKNOWN.abs().is_unknown());
        assert_eq!(t.abs_diff(MediaTime::UNKNOWN), None);
    }

    #[test]
    fn test_media_time_saturating() {
        let big = MediaTime::MAX;
        assert_eq!(big + MediaTime::from_secs(1), MediaTime::MAX);

        // Subtraction saturates to MIN, never to the sentinel
        let small = MediaTime::MIN;
        let result = small - MediaTime::from_secs(1);
        assert_eq!(result, MediaTime::MIN);
        assert!(result.is_known());

        assert_eq!(MediaTime::from_secs(i64::MAX), MediaTime::MAX);
        assert_eq!(MediaTime::from_secs(i64::MIN), MediaTime::MIN);
    }

    #[test]
    fn test_media_time_display() {
        assert_eq!(format!("{}", MediaTime::from_millis(1500)), "1.500000s");
        assert_eq!(format!("{}", MediaTime::from_micros(-20)), "-0.000020s");
        assert_eq!(format!("{}", MediaTime::UNKNOWN), "UNKNOWN");
    }

    #[test]
    fn test_clock_time_conversions() {
        let t = ClockTime::from_secs(2);
        assert_eq!(t.millis(), 2_000);
        assert_eq!(t.micros(), 2_000_000);
        assert_eq!(t.as_wall_micros(), MediaTime::from_secs(2));
        assert!(ClockTime::NONE.as_wall_micros().is_unknown());
    }

    #[test]
    fn test_clock_time_saturating() {
        let t = ClockTime::from_secs(1);
        assert_eq!(ClockTime::from_millis(100) - t, ClockTime::ZERO);
        assert_eq!(ClockTime::MAX + t, ClockTime::MAX);
        assert!((t + ClockTime::NONE).is_none());
    }

    #[test]
    fn test_clock_time_duration_conversion() {
        let t = ClockTime::from_millis(1500);
        let d: Duration = t.into();
        assert_eq!(d, Duration::from_millis(1500));
        assert_eq!(format!("{}", t), "1.500s");
    }

    #[test]
    fn test_system_clock() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = clock.now();
        assert!(t2 > t1);
        assert_eq!(clock.name(), "system-monotonic");
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), ClockTime::ZERO);

        clock.advance_micros(250);
        assert_eq!(clock.now().micros(), 250);

        clock.set(ClockTime::from_millis(2));
        assert_eq!(clock.now().micros(), 2_000);

        // Going backwards is ignored
        clock.set(ClockTime::from_millis(1));
        assert_eq!(clock.now().micros(), 2_000);
    }
}
