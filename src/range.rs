// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ranges of indices and the rule used to split them.

use crate::error::RangeError;
use std::fmt;
use std::num::NonZeroUsize;

/// A half-open range `[low, high)` of indices into a sequence.
///
/// Unlike [`std::ops::Range`], a [`Range`] always satisfies `low <= high`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    low: usize,
    high: usize,
}

impl Range {
    /// Creates the range `[low, high)`, or fails if `low > high`.
    pub fn new(low: usize, high: usize) -> Result<Self, RangeError> {
        if low > high {
            Err(RangeError::Inverted { low, high })
        } else {
            Ok(Self { low, high })
        }
    }

    /// Creates the range `[low, high)` and checks that it fits in a sequence
    /// of the given length.
    pub fn within(low: usize, high: usize, len: usize) -> Result<Self, RangeError> {
        let range = Self::new(low, high)?;
        if high > len {
            Err(RangeError::OutOfBounds { high, len })
        } else {
            Ok(range)
        }
    }

    /// Creates the range `[0, len)` covering a whole sequence.
    pub fn full(len: usize) -> Self {
        Self { low: 0, high: len }
    }

    /// Returns the lower bound (inclusive).
    pub fn low(&self) -> usize {
        self.low
    }

    /// Returns the upper bound (exclusive).
    pub fn high(&self) -> usize {
        self.high
    }

    /// Returns the number of indices in this range.
    pub fn len(&self) -> usize {
        self.high - self.low
    }

    /// Checks if the range is empty.
    pub fn is_empty(&self) -> bool {
        self.low == self.high
    }

    /// Checks if the given index belongs to this range.
    pub fn contains(&self, index: usize) -> bool {
        self.low <= index && index < self.high
    }

    /// Returns the equivalent [`std::ops::Range`].
    pub fn to_std(self) -> std::ops::Range<usize> {
        self.low..self.high
    }

    /// Splits the range at its midpoint into two adjacent halves. For an odd
    /// length, the left half receives the extra index.
    ///
    /// ```
    /// # use forkjoin::Range;
    /// let (left, right) = Range::new(10, 15).unwrap().split();
    /// assert_eq!(left, Range::new(10, 13).unwrap());
    /// assert_eq!(right, Range::new(13, 15).unwrap());
    /// ```
    pub fn split(self) -> (Self, Self) {
        let len = self.len();
        // Written as `len - len / 2` rather than `(len + 1) / 2`, which could
        // overflow.
        let mid = self.low + (len - len / 2);
        (
            Self {
                low: self.low,
                high: mid,
            },
            Self {
                low: mid,
                high: self.high,
            },
        )
    }

    /// Splits the range if it is longer than the cutoff, or returns [`None`]
    /// if it must be processed as a single leaf.
    pub fn split_above(self, cutoff: NonZeroUsize) -> Option<(Self, Self)> {
        if self.len() <= cutoff.get() {
            None
        } else {
            Some(self.split())
        }
    }

    /// Returns the leaf ranges obtained by recursively splitting this range
    /// with the given cutoff, in increasing order of indices.
    ///
    /// This is the exact partition that a divide-and-conquer computation
    /// evaluates.
    pub fn leaves(self, cutoff: NonZeroUsize) -> Vec<Self> {
        let mut leaves = Vec::new();
        let mut stack = vec![self];
        while let Some(range) = stack.pop() {
            match range.split_above(cutoff) {
                None => leaves.push(range),
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        leaves
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}

impl From<Range> for std::ops::Range<usize> {
    fn from(range: Range) -> Self {
        range.to_std()
    }
}

impl TryFrom<std::ops::Range<usize>> for Range {
    type Error = RangeError;

    fn try_from(range: std::ops::Range<usize>) -> Result<Self, Self::Error> {
        Range::new(range.start, range.end)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cutoff(n: usize) -> NonZeroUsize {
        NonZeroUsize::try_from(n).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        assert_eq!(
            Range::new(3, 2),
            Err(RangeError::Inverted { low: 3, high: 2 })
        );
        assert!(Range::new(2, 2).unwrap().is_empty());
        assert_eq!(Range::new(2, 7).unwrap().len(), 5);
    }

    #[test]
    fn test_within() {
        assert_eq!(Range::within(0, 10, 10), Ok(Range::full(10)));
        assert_eq!(
            Range::within(5, 11, 10),
            Err(RangeError::OutOfBounds { high: 11, len: 10 })
        );
        assert_eq!(
            Range::within(7, 6, 10),
            Err(RangeError::Inverted { low: 7, high: 6 })
        );
    }

    #[test]
    fn test_contains() {
        let range = Range::new(3, 6).unwrap();
        assert!(!range.contains(2));
        assert!(range.contains(3));
        assert!(range.contains(5));
        assert!(!range.contains(6));
    }

    #[test]
    fn test_std_conversions() {
        let range = Range::try_from(4..9).unwrap();
        assert_eq!(range.to_std(), 4..9);
        assert_eq!(std::ops::Range::from(range), 4..9);
        #[allow(clippy::reversed_empty_ranges)]
        let inverted = Range::try_from(9..4);
        assert!(inverted.is_err());
        assert_eq!(format!("{range:?}"), "[4, 9)");
    }

    #[test]
    fn test_split_is_exhaustive() {
        for low in 0..50 {
            for high in low..100 {
                let (left, right) = Range::new(low, high).unwrap().split();
                assert_eq!(left.low(), low);
                assert_eq!(left.high(), right.low());
                assert_eq!(right.high(), high);
            }
        }
    }

    #[test]
    fn test_split_favors_left_half() {
        for low in 0..50 {
            for high in low..100 {
                let (left, right) = Range::new(low, high).unwrap().split();
                assert!(right.len() <= left.len());
                assert!(left.len() <= right.len() + 1);
            }
        }
        let (left, right) = Range::new(0, 3).unwrap().split();
        assert_eq!((left, right), (Range::new(0, 2).unwrap(), Range::new(2, 3).unwrap()));
        let (left, right) = Range::new(0, 2).unwrap().split();
        assert_eq!((left, right), (Range::new(0, 1).unwrap(), Range::new(1, 2).unwrap()));
    }

    #[test]
    fn test_split_overflow() {
        let (left, right) = Range::new(usize::MAX - 3, usize::MAX).unwrap().split();
        assert_eq!(left, Range::new(usize::MAX - 3, usize::MAX - 1).unwrap());
        assert_eq!(right, Range::new(usize::MAX - 1, usize::MAX).unwrap());

        let (left, right) = Range::new(0, usize::MAX).unwrap().split();
        assert_eq!(left.len(), usize::MAX / 2 + 1);
        assert_eq!(right.len(), usize::MAX / 2);
    }

    #[test]
    fn test_split_above_cutoff_boundary() {
        for n in 1..100 {
            let range = Range::new(17, 17 + n).unwrap();
            assert_eq!(range.split_above(cutoff(n)), None);
            assert_eq!(range.leaves(cutoff(n)), vec![range]);

            let range = Range::new(17, 17 + n + 1).unwrap();
            assert_eq!(range.split_above(cutoff(n)), Some(range.split()));
            assert_eq!(range.leaves(cutoff(n)).len(), 2);
        }
    }

    #[test]
    fn test_leaves_partition_the_range() {
        for len in [0, 1, 2, 3, 7, 10, 100, 1000, 1023, 1024, 1025] {
            for c in [1, 2, 3, 10, 64, 500, 1000, 5000] {
                let root = Range::new(5, 5 + len).unwrap();
                let leaves = root.leaves(cutoff(c));

                assert_eq!(leaves.first().unwrap().low(), root.low());
                assert_eq!(leaves.last().unwrap().high(), root.high());
                for pair in leaves.windows(2) {
                    assert_eq!(pair[0].high(), pair[1].low());
                }
                for leaf in &leaves {
                    assert!(leaf.len() <= c);
                    if len > 0 {
                        assert!(!leaf.is_empty());
                    }
                }
                assert_eq!(leaves.iter().map(Range::len).sum::<usize>(), len);
            }
        }
    }
}
