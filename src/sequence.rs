// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Sequences that can be split into independent segments.

/// An ordered, indexable sequence that a divide-and-conquer computation
/// splits into disjoint segments, each handed to exactly one task.
///
/// Shared slices (`&[T]`) are read concurrently by all the leaves. Mutable
/// slices (`&mut [T]`) are split into non-overlapping sub-slices, so that each
/// leaf can write into its own segment without any synchronization.
pub trait Sequence: Send + Sized {
    /// Returns the number of items in this sequence.
    fn len(&self) -> usize;

    /// Checks if this sequence is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits this sequence into the items at indices `[0, index)` and the
    /// items at `[index, len)`.
    ///
    /// Callers guarantee that `index <= self.len()`.
    fn split_at(self, index: usize) -> (Self, Self);
}

impl<T: Sync> Sequence for &[T] {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn split_at(self, index: usize) -> (Self, Self) {
        <[T]>::split_at(self, index)
    }
}

impl<T: Send> Sequence for &mut [T] {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn split_at(self, index: usize) -> (Self, Self) {
        <[T]>::split_at_mut(self, index)
    }
}

/// A pair of sequences of equal lengths, split in lockstep. This allows a leaf
/// to read one sequence and write the matching segment of another.
impl<A: Sequence, B: Sequence> Sequence for (A, B) {
    fn len(&self) -> usize {
        let len = self.0.len();
        assert_eq!(
            len,
            self.1.len(),
            "paired sequences must have the same length"
        );
        len
    }

    fn split_at(self, index: usize) -> (Self, Self) {
        let (a_left, a_right) = self.0.split_at(index);
        let (b_left, b_right) = self.1.split_at(index);
        ((a_left, b_left), (a_right, b_right))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shared_slice() {
        let input = [1, 2, 3, 4, 5];
        let seq: &[i32] = &input;
        assert_eq!(Sequence::len(&seq), 5);
        assert!(!Sequence::is_empty(&seq));

        let (left, right) = Sequence::split_at(seq, 2);
        assert_eq!(left, [1, 2]);
        assert_eq!(right, [3, 4, 5]);

        let (left, right) = Sequence::split_at(seq, 5);
        assert_eq!(left, input);
        assert!(Sequence::is_empty(&right));
    }

    #[test]
    fn test_mutable_slice_segments_are_disjoint() {
        let mut output = [0; 6];
        let seq: &mut [i32] = &mut output;
        let (left, right) = Sequence::split_at(seq, 3);
        left.fill(1);
        right.fill(2);
        assert_eq!(output, [1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_paired_sequences() {
        let input = [1, 2, 3, 4];
        let mut output = [0; 4];
        let seq = (input.as_slice(), output.as_mut_slice());
        assert_eq!(seq.len(), 4);

        let ((in_left, out_left), (in_right, out_right)) = seq.split_at(1);
        out_left.copy_from_slice(in_left);
        for (o, i) in out_right.iter_mut().zip(in_right) {
            *o = i * 10;
        }
        assert_eq!(output, [1, 20, 30, 40]);
    }

    #[test]
    #[should_panic(expected = "paired sequences must have the same length")]
    fn test_paired_sequences_length_mismatch() {
        let input = [1, 2, 3];
        let mut output = [0; 4];
        let seq = (input.as_slice(), output.as_mut_slice());
        seq.len();
    }
}
