// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ready-made leaf computations and combiners, to plug into a
//! [`ParallelArrayProcessor`](crate::ParallelArrayProcessor).

use crate::range::Range;
use crate::task::{Combiner, LeafComputation};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::convert::Infallible;
use std::iter::Sum;
use std::ops::Add;

/// Sums the items of a sequence.
///
/// ```
/// # use forkjoin::payload::Summation;
/// # use forkjoin::{ParallelArrayProcessor, ThreadPoolBuilder};
/// # use std::num::NonZeroUsize;
/// let pool = ThreadPoolBuilder::default().build();
/// let processor =
///     ParallelArrayProcessor::new(NonZeroUsize::try_from(10).unwrap(), Summation, Summation);
///
/// let input = (1..=100).collect::<Vec<u32>>();
/// assert_eq!(processor.process(&pool, input.as_slice()), Ok(5050));
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Summation;

impl<'a, T> LeafComputation<&'a [T], T, Infallible> for Summation
where
    T: Copy + Sum + Sync,
{
    fn evaluate(&self, segment: &'a [T], _range: Range) -> Result<T, Infallible> {
        Ok(segment.iter().copied().sum())
    }
}

impl<T: Add<Output = T>> Combiner<T, Infallible> for Summation {
    fn combine(&self, left: T, right: T) -> Result<T, Infallible> {
        Ok(left + right)
    }
}

/// Computes the minimum of a function over the items of a sequence. The
/// minimum over an empty sequence is positive infinity.
///
/// The result doesn't depend on how the sequence is split, so parallel and
/// sequential runs return the exact same value.
#[derive(Clone, Copy, Debug)]
pub struct MinOf<F> {
    f: F,
}

impl<F> MinOf<F> {
    /// Creates the computation of the minimum of `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<'a, T, F> LeafComputation<&'a [T], f64, Infallible> for MinOf<F>
where
    T: Sync,
    F: Fn(&T) -> f64 + Sync,
{
    fn evaluate(&self, segment: &'a [T], _range: Range) -> Result<f64, Infallible> {
        Ok(segment
            .iter()
            .map(&self.f)
            .fold(f64::INFINITY, f64::min))
    }
}

impl<F: Sync> Combiner<f64, Infallible> for MinOf<F> {
    fn combine(&self, left: f64, right: f64) -> Result<f64, Infallible> {
        Ok(left.min(right))
    }
}

/// Fills a sequence with random probable primes of a fixed bit size.
///
/// The value written at each index only depends on the seed and on the index,
/// so the output is the same regardless of the cutoff or of the number of
/// threads. Combine with [`Discard`](crate::Discard).
///
/// ```
/// # use forkjoin::payload::{is_probable_prime, PrimeFill};
/// # use forkjoin::{Discard, ParallelArrayProcessor, ThreadPoolBuilder};
/// # use std::num::NonZeroUsize;
/// let pool = ThreadPoolBuilder::default().build();
/// let processor = ParallelArrayProcessor::new(
///     NonZeroUsize::try_from(4).unwrap(),
///     PrimeFill::new(40, 42),
///     Discard,
/// );
///
/// let mut primes = vec![0; 32];
/// processor.process(&pool, primes.as_mut_slice()).unwrap();
/// assert!(primes.iter().all(|&p| is_probable_prime(p)));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrimeFill {
    bits: u32,
    seed: u64,
}

impl PrimeFill {
    /// Creates a computation that generates primes of exactly `bits` bits.
    ///
    /// Panics if `bits` isn't in `2..=63`.
    pub fn new(bits: u32, seed: u64) -> Self {
        assert!(
            (2..=63).contains(&bits),
            "prime size must be between 2 and 63 bits, got {bits}"
        );
        Self { bits, seed }
    }

    /// Returns the number of bits of the generated primes.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Generates the prime for the given index of the sequence.
    pub fn prime_at(&self, index: usize) -> u64 {
        let mut rng = ChaCha12Rng::seed_from_u64(self.seed);
        rng.set_stream(index as u64);

        let top_bit = 1 << (self.bits - 1);
        loop {
            let candidate = (rng.random::<u64>() >> (64 - self.bits)) | top_bit | 1;
            if is_probable_prime(candidate) {
                return candidate;
            }
        }
    }
}

impl<'a> LeafComputation<&'a mut [u64], (), Infallible> for PrimeFill {
    fn evaluate(&self, segment: &'a mut [u64], range: Range) -> Result<(), Infallible> {
        for (slot, index) in segment.iter_mut().zip(range.to_std()) {
            *slot = self.prime_at(index);
        }
        Ok(())
    }
}

/// Witnesses for which the Miller-Rabin test is exact on all 64-bit integers.
const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Checks whether `n` is prime, with the Miller-Rabin test.
///
/// With the fixed set of witnesses used here, the test is deterministic and
/// exact for all `u64` values.
pub fn is_probable_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for p in WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }

    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;
    'witness: for a in WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut result = 1;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    result
}
