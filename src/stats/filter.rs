//! Fixed-capacity sliding window with a running sum.

use crate::format::MAX_FILTER_LENGTH;

/// Sliding window of the most recent samples.
///
/// The window keeps a running sum so the average is O(1). The sum is
/// accumulated in 128 bits and always equals the total of the held samples.
///
/// ```rust
/// use mediaclock::stats::SampleFilter;
///
/// let mut f = SampleFilter::new(3);
/// for s in [10, 20, 30, 40] {
///     f.insert(s);
/// }
/// assert_eq!(f.count(), 3);
/// assert_eq!(f.sum(), 90);
/// assert_eq!(f.average(), 30);
/// ```
#[derive(Clone, Debug)]
pub struct SampleFilter {
    samples: Box<[i64]>,
    /// Index of the oldest sample.
    first: usize,
    count: usize,
    sum: i128,
}

impl SampleFilter {
    /// Create an empty window holding up to `capacity` samples.
    ///
    /// The capacity is clamped to `[1, MAX_FILTER_LENGTH]`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_FILTER_LENGTH);
        Self {
            samples: vec![0; capacity].into_boxed_slice(),
            first: 0,
            count: 0,
            sum: 0,
        }
    }

    /// Empty the window and change its capacity.
    pub fn reset(&mut self, capacity: usize) {
        let capacity = capacity.clamp(1, MAX_FILTER_LENGTH);
        if capacity != self.samples.len() {
            self.samples = vec![0; capacity].into_boxed_slice();
        }
        self.clear();
    }

    /// Empty the window keeping its capacity.
    pub fn clear(&mut self) {
        self.first = 0;
        self.count = 0;
        self.sum = 0;
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn insert(&mut self, sample: i64) {
        if self.count == self.samples.len() {
            self.drop_oldest();
        }
        let last = (self.first + self.count) % self.samples.len();
        self.samples[last] = sample;
        self.sum += sample as i128;
        self.count += 1;
    }

    /// Remove the oldest sample. No-op when empty.
    pub fn drop_oldest(&mut self) {
        if self.count == 0 {
            return;
        }
        self.sum -= self.samples[self.first] as i128;
        self.first = (self.first + 1) % self.samples.len();
        self.count -= 1;
    }

    /// Mean of the held samples, 0 when empty.
    #[inline]
    pub fn average(&self) -> i64 {
        if self.count == 0 {
            return 0;
        }
        // The mean of i64 samples always fits
        (self.sum / self.count as i128) as i64
    }

    /// Number of held samples.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Maximum number of samples.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Running sum of the held samples, clamped to the `i64` range.
    #[inline]
    pub fn sum(&self) -> i64 {
        self.sum.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// True if no samples are held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True if the window is at capacity.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.samples.len()
    }

    /// Held samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        let cap = self.samples.len();
        (0..self.count).map(move |i| self.samples[(self.first + i) % cap])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let f = SampleFilter::new(4);
        assert!(f.is_empty());
        assert_eq!(f.average(), 0);
        assert_eq!(f.sum(), 0);
        assert_eq!(f.capacity(), 4);
    }

    #[test]
    fn test_capacity_clamped() {
        assert_eq!(SampleFilter::new(0).capacity(), 1);
        assert_eq!(SampleFilter::new(10_000).capacity(), MAX_FILTER_LENGTH);
    }

    #[test]
    fn test_overflowing_inserts_keep_last_k() {
        let k = 5;
        let mut f = SampleFilter::new(k);
        for s in 1..=12 {
            f.insert(s);
        }
        assert_eq!(f.count(), k);
        assert_eq!(f.sum(), (8..=12).sum::<i64>());
        assert_eq!(f.iter().collect::<Vec<_>>(), vec![8, 9, 10, 11, 12]);
        assert_eq!(f.sum(), f.iter().sum::<i64>());
    }

    #[test]
    fn test_drop_oldest() {
        let mut f = SampleFilter::new(3);
        f.insert(-10);
        f.insert(20);
        f.drop_oldest();
        assert_eq!(f.count(), 1);
        assert_eq!(f.sum(), 20);
        f.drop_oldest();
        f.drop_oldest();
        assert!(f.is_empty());
        assert_eq!(f.sum(), 0);
    }

    #[test]
    fn test_average_negative() {
        let mut f = SampleFilter::new(4);
        for s in [-100, -200, -300] {
            f.insert(s);
        }
        assert_eq!(f.average(), -200);
    }

    #[test]
    fn test_sum_recovers_after_overflow() {
        let mut f = SampleFilter::new(4);
        f.insert(i64::MAX);
        f.insert(10);
        assert_eq!(f.sum(), i64::MAX);
        assert_eq!(f.average(), i64::MAX / 2 + 5);

        f.drop_oldest();
        assert_eq!(f.iter().collect::<Vec<_>>(), vec![10]);
        assert_eq!(f.sum(), 10);
        assert_eq!(f.average(), 10);
    }

    #[test]
    fn test_extreme_samples_average() {
        let mut f = SampleFilter::new(3);
        for s in [i64::MIN, i64::MIN, i64::MIN] {
            f.insert(s);
        }
        assert_eq!(f.sum(), i64::MIN);
        assert_eq!(f.average(), i64::MIN);
    }

    #[test]
    fn test_reset() {
        let mut f = SampleFilter::new(4);
        f.insert(1);
        f.insert(2);
        f.reset(8);
        assert!(f.is_empty());
        assert_eq!(f.capacity(), 8);

        f.insert(3);
        f.clear();
        assert_eq!(f.capacity(), 8);
        assert!(f.is_empty());
    }
}
