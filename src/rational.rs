//! Exact signed rational numbers used for clock scale.
//!
//! [`Rational`] is the public representation of a clock scale factor
//! (media-time advance per wall-time advance). The scheduler works with a
//! Q16 fixed-point copy for speed; conversions live here so the lossy form
//! never leaks into the API.

use crate::error::{Error, Result};
use std::cmp::Ordering;

/// 1.0 in Q16 format.
pub(crate) const Q16_ONE: i32 = 1 << 16;

/// Signed rational number (8 bytes, Copy).
///
/// Always stored reduced with a positive denominator, so derived equality is
/// equality by value:
///
/// ```rust
/// use mediaclock::rational::Rational;
///
/// let half = Rational::new(2, 4).unwrap();
/// assert_eq!(half, Rational::new(-1, -2).unwrap());
/// assert_eq!((half + half), Rational::ONE);
/// assert!(Rational::new(1, 0).is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i32,
    den: i32,
}

impl Rational {
    /// Zero (a paused clock).
    pub const ZERO: Self = Self { num: 0, den: 1 };

    /// One (normal playback speed).
    pub const ONE: Self = Self { num: 1, den: 1 };

    /// Create a rational, rejecting a zero denominator.
    pub fn new(num: i32, den: i32) -> Result<Self> {
        Self::from_i64(num as i64, den as i64).ok_or_else(|| {
            Error::InvalidArgument(format!("rational {}/{} has a zero denominator", num, den))
        })
    }

    /// Create a whole number.
    pub const fn from_integer(n: i32) -> Self {
        let num = if n == i32::MIN { -i32::MAX } else { n };
        Self { num, den: 1 }
    }

    /// Build from wide components, reducing and approximating when the
    /// reduced value still does not fit in `i32`.
    fn from_i64(mut num: i64, mut den: i64) -> Option<Self> {
        if den == 0 {
            return None;
        }
        if den < 0 {
            num = -num;
            den = -den;
        }
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()) as i64;
        if g > 1 {
            num /= g;
            den /= g;
        }
        // Drop precision until both parts fit
        while num > i32::MAX as i64 || num < -(i32::MAX as i64) || den > i32::MAX as i64 {
            if den == 1 {
                num = num.clamp(-(i32::MAX as i64), i32::MAX as i64);
                break;
            }
            num >>= 1;
            den >>= 1;
        }
        Some(Self {
            num: num as i32,
            den: den as i32,
        })
    }

    /// Numerator (sign carrier).
    #[inline]
    pub const fn num(self) -> i32 {
        self.num
    }

    /// Denominator (always positive).
    #[inline]
    pub const fn den(self) -> i32 {
        self.den
    }

    /// True if the value is zero.
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.num == 0
    }

    /// True if the value is negative.
    #[inline]
    pub const fn is_negative(self) -> bool {
        self.num < 0
    }

    /// Reciprocal, or None for zero.
    pub fn recip(self) -> Option<Self> {
        Self::from_i64(self.den as i64, self.num as i64)
    }

    /// Division, or None when dividing by zero.
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        Self::from_i64(
            self.num as i64 * rhs.den as i64,
            self.den as i64 * rhs.num as i64,
        )
    }

    /// Floating-point approximation.
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Q16 fixed-point approximation, saturated to the `i32` range.
    pub(crate) fn to_q16(self) -> i32 {
        let q = ((self.num as i64) << 16) / self.den as i64;
        q.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}

/// Q16 reciprocal of a Q16 value; 1.0 for zero so a paused clock never
/// divides by zero.
pub(crate) fn q16_inverse(q16: i32) -> i32 {
    if q16 == 0 {
        return Q16_ONE;
    }
    ((1i64 << 32) / q16 as i64).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

impl Default for Rational {
    fn default() -> Self {
        Self::ONE
    }
}

impl From<i32> for Rational {
    fn from(n: i32) -> Self {
        Self::from_integer(n)
    }
}

impl std::ops::Add for Rational {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let num = self.num as i64 * rhs.den as i64 + rhs.num as i64 * self.den as i64;
        let den = self.den as i64 * rhs.den as i64;
        // den is a product of positive values, never zero
        Self::from_i64(num, den).unwrap_or(Self::ZERO)
    }
}

impl std::ops::Sub for Rational {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl std::ops::Mul for Rational {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let num = self.num as i64 * rhs.num as i64;
        let den = self.den as i64 * rhs.den as i64;
        Self::from_i64(num, den).unwrap_or(Self::ZERO)
    }
}

impl std::ops::Neg for Rational {
    type Output = Self;

    fn neg(self) -> Self {
        // num is never i32::MIN after construction
        Self {
            num: -self.num,
            den: self.den,
        }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare as fractions: a/b vs c/d => a*d vs c*b (denominators positive)
        let lhs = self.num as i64 * other.den as i64;
        let rhs = other.num as i64 * self.den as i64;
        lhs.cmp(&rhs)
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
