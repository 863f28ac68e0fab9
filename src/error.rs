// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors reported by divide-and-conquer computations.

use thiserror::Error;

/// Error returned when submitting a computation to a
/// [`ThreadPool`](crate::ThreadPool) that has been shut down.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("the thread pool has been shut down and rejects new computations")]
pub struct RejectedError;

/// Error returned when a range is malformed for the sequence it applies to.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    /// The lower bound is greater than the upper bound.
    #[error("invalid range: low bound {low} is greater than high bound {high}")]
    Inverted {
        /// Lower bound of the range.
        low: usize,
        /// Upper bound of the range.
        high: usize,
    },
    /// The range extends past the end of the sequence.
    #[error("invalid range: high bound {high} exceeds the sequence length {len}")]
    OutOfBounds {
        /// Upper bound of the range.
        high: usize,
        /// Length of the sequence.
        len: usize,
    },
}

/// Outcome of a failed divide-and-conquer computation, where `E` is the error
/// type of the leaf computation and combiner.
///
/// No partial result is ever returned alongside an error: the first failure
/// observed aborts the whole computation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error<E> {
    /// A leaf computation failed.
    #[error("leaf computation failed: {0}")]
    Leaf(E),
    /// Merging two partial results failed.
    #[error("combiner failed: {0}")]
    Combine(E),
    /// The requested range was rejected before any task was created.
    #[error(transparent)]
    InvalidRange(#[from] RangeError),
    /// The thread pool was shut down.
    #[error(transparent)]
    Rejected(#[from] RejectedError),
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::<String>::Leaf("division by zero".to_owned()).to_string(),
            "leaf computation failed: division by zero"
        );
        assert_eq!(
            Error::<String>::Combine("overflow".to_owned()).to_string(),
            "combiner failed: overflow"
        );
        assert_eq!(
            Error::<Infallible>::from(RangeError::Inverted { low: 5, high: 2 }).to_string(),
            "invalid range: low bound 5 is greater than high bound 2"
        );
        assert_eq!(
            Error::<Infallible>::from(RangeError::OutOfBounds { high: 12, len: 10 }).to_string(),
            "invalid range: high bound 12 exceeds the sequence length 10"
        );
        assert_eq!(
            Error::<Infallible>::from(RejectedError).to_string(),
            "the thread pool has been shut down and rejects new computations"
        );
    }
}
