// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The recursive divide-and-conquer task, and the two capabilities plugged
//! into it: the leaf computation and the combiner.

use crate::core::Context;
use crate::error::Error;
use crate::macros::log_debug;
use crate::range::Range;
use crate::sequence::Sequence;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Sequential computation over a segment of the input, run for every range
/// that is no longer than the cutoff.
///
/// The `segment` covers exactly the indices of `range` (index `0` of the
/// segment is index `range.low()` of the whole sequence). A leaf may write
/// into its segment when the sequence is mutable, but has no access to any
/// other index.
///
/// This is implemented for closures of the matching signature.
pub trait LeafComputation<S, R, E>: Sync {
    /// Computes the partial result for the given range.
    fn evaluate(&self, segment: S, range: Range) -> Result<R, E>;
}

impl<S, R, E, F> LeafComputation<S, R, E> for F
where
    F: Fn(S, Range) -> Result<R, E> + Sync,
{
    fn evaluate(&self, segment: S, range: Range) -> Result<R, E> {
        self(segment, range)
    }
}

/// Merges the partial results of two adjacent ranges.
///
/// The `left` result always covers lower indices than the `right` one. The
/// operation doesn't need to be commutative, but should be associative over
/// the split tree (the grouping of operands depends on the cutoff).
///
/// This is implemented for closures of the matching signature.
pub trait Combiner<R, E>: Sync {
    /// Merges two adjacent partial results.
    fn combine(&self, left: R, right: R) -> Result<R, E>;
}

impl<R, E, F> Combiner<R, E> for F
where
    F: Fn(R, R) -> Result<R, E> + Sync,
{
    fn combine(&self, left: R, right: R) -> Result<R, E> {
        self(left, right)
    }
}

/// Combiner for computations whose only effect is to write into the
/// sequence.
#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

impl<E> Combiner<(), E> for Discard {
    fn combine(&self, _left: (), _right: ()) -> Result<(), E> {
        Ok(())
    }
}

/// Marker for a branch that stopped because the computation failed somewhere.
/// The failure itself is recorded in the [`FailFast`] state.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Aborted;

/// Records the first failure of a computation, and lets the other branches
/// skip their remaining leaves.
pub(crate) struct FailFast<E> {
    aborted: AtomicBool,
    first_error: Mutex<Option<Error<E>>>,
}

impl<E> FailFast<E> {
    pub(crate) fn new() -> Self {
        Self {
            aborted: AtomicBool::new(false),
            first_error: Mutex::new(None),
        }
    }

    /// Returns whether a failure has been recorded.
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Records the failure, unless another one was recorded before.
    fn record(&self, error: Error<E>) {
        let mut first_error = self.first_error.lock().unwrap();
        if first_error.is_none() {
            *first_error = Some(error);
        }
        self.aborted.store(true, Ordering::Release);
    }

    /// Converts the result of a leaf or combiner, recording any failure.
    fn check<R>(&self, result: Result<R, Error<E>>) -> Result<R, Aborted> {
        result.map_err(|error| {
            self.record(error);
            Aborted
        })
    }

    /// Returns the first recorded failure, if any.
    pub(crate) fn into_error(self) -> Option<Error<E>> {
        self.first_error.into_inner().unwrap()
    }
}

/// Parameters shared by all the tasks of one computation.
pub(crate) struct Plan<'a, L, C, E> {
    pub(crate) cutoff: NonZeroUsize,
    pub(crate) leaf: &'a L,
    pub(crate) combiner: &'a C,
    pub(crate) fail_fast: &'a FailFast<E>,
}

/// The recursive unit of work: a segment of the sequence, the range of
/// indices it covers, and the plan of the computation.
pub(crate) struct DivideConquerTask<'p, 'a, S, L, C, E> {
    segment: S,
    range: Range,
    plan: &'p Plan<'a, L, C, E>,
}

impl<'p, 'a, S, L, C, E> DivideConquerTask<'p, 'a, S, L, C, E>
where
    S: Sequence,
    L: Sync,
    C: Sync,
    E: Send,
{
    /// Creates a task over the given segment, which must contain exactly
    /// `range.len()` items.
    pub(crate) fn new(segment: S, range: Range, plan: &'p Plan<'a, L, C, E>) -> Self {
        debug_assert_eq!(segment.len(), range.len());
        Self {
            segment,
            range,
            plan,
        }
    }

    /// Splits this task into two child tasks if its range is longer than the
    /// cutoff.
    fn split(self) -> Result<(Self, Self), Self> {
        match self.range.split_above(self.plan.cutoff) {
            None => Err(self),
            Some((left_range, right_range)) => {
                let (left_segment, right_segment) = self.segment.split_at(left_range.len());
                Ok((
                    Self::new(left_segment, left_range, self.plan),
                    Self::new(right_segment, right_range, self.plan),
                ))
            }
        }
    }

    /// Computes the result of this task: directly for a range within the
    /// cutoff, otherwise by forking the left half, computing the right half
    /// inline, joining the left half and combining both results.
    pub(crate) fn compute<R>(self, ctx: &Context<'_>) -> Result<R, Aborted>
    where
        L: LeafComputation<S, R, E>,
        C: Combiner<R, E>,
        R: Send,
    {
        let plan = self.plan;
        if plan.fail_fast.is_aborted() {
            return Err(Aborted);
        }

        match self.split() {
            Err(leaf) => {
                let range = leaf.range;
                let result = plan.leaf.evaluate(leaf.segment, range);
                if result.is_err() {
                    log_debug!("Leaf computation failed on range {range:?}");
                }
                plan.fail_fast.check(result.map_err(Error::Leaf))
            }
            Ok((left, right)) => {
                let (left, right) =
                    ctx.fork_join(|ctx| left.compute(ctx), |ctx| right.compute(ctx));
                // A failed sibling was already recorded: discard the other result.
                let (left, right) = (left?, right?);
                plan.fail_fast
                    .check(plan.combiner.combine(left, right).map_err(Error::Combine))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CpuPinningPolicy, ThreadCount, ThreadPool, ThreadPoolBuilder};
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;

    fn build_pool(num_threads: usize) -> ThreadPool {
        ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
            thread_name: None,
        }
        .build()
    }

    fn run<S, R, E, L, C>(
        pool: &ThreadPool,
        segment: S,
        cutoff: usize,
        leaf: &L,
        combiner: &C,
    ) -> (Result<R, Aborted>, Option<Error<E>>)
    where
        S: Sequence,
        R: Send,
        E: Send,
        L: LeafComputation<S, R, E>,
        C: Combiner<R, E>,
    {
        let fail_fast = FailFast::new();
        let plan = Plan {
            cutoff: NonZeroUsize::try_from(cutoff).unwrap(),
            leaf,
            combiner,
            fail_fast: &fail_fast,
        };
        let range = Range::full(segment.len());
        let result = pool
            .invoke(|ctx| DivideConquerTask::new(segment, range, &plan).compute(ctx))
            .unwrap();
        (result, fail_fast.into_error())
    }

    #[test]
    fn test_leaves_see_their_own_segment() {
        let pool = build_pool(4);
        let input = (0..1000).collect::<Vec<usize>>();
        let leaf = |segment: &[usize], range: Range| -> Result<Vec<Range>, Infallible> {
            assert_eq!(segment, &input[range.to_std()]);
            Ok(vec![range])
        };
        let concat = |mut left: Vec<Range>, right: Vec<Range>| -> Result<Vec<Range>, Infallible> {
            left.extend(right);
            Ok(left)
        };

        let cutoff = NonZeroUsize::try_from(7).unwrap();
        let (result, error) = run(&pool, input.as_slice(), cutoff.get(), &leaf, &concat);
        assert!(error.is_none());
        assert_eq!(result.unwrap(), Range::full(1000).leaves(cutoff));
    }

    #[test]
    fn test_combine_order_follows_indices() {
        let pool = build_pool(4);
        let input = "the quick brown fox jumps over the lazy dog"
            .chars()
            .collect::<Vec<char>>();
        let leaf = |segment: &[char], _: Range| -> Result<String, Infallible> {
            Ok(segment.iter().collect())
        };
        let concat = |left: String, right: String| -> Result<String, Infallible> {
            Ok(left + &right)
        };

        for cutoff in 1..=5 {
            let (result, _) = run(&pool, input.as_slice(), cutoff, &leaf, &concat);
            assert_eq!(
                result.unwrap(),
                "the quick brown fox jumps over the lazy dog"
            );
        }
    }

    #[test]
    fn test_leaf_failure_is_recorded_once() {
        let pool = build_pool(4);
        let input = (0..1000).collect::<Vec<u32>>();
        let evaluated = AtomicUsize::new(0);
        let leaf = |segment: &[u32], range: Range| -> Result<u32, String> {
            evaluated.fetch_add(1, Ordering::SeqCst);
            if range.contains(500) {
                Err(format!("failed on {range:?}"))
            } else {
                Ok(segment.iter().sum())
            }
        };
        let sum = |a: u32, b: u32| -> Result<u32, String> { Ok(a + b) };

        let (result, error) = run(&pool, input.as_slice(), 10, &leaf, &sum);
        assert_eq!(result, Err(Aborted));
        let leaves = Range::full(1000).leaves(NonZeroUsize::try_from(10).unwrap());
        let failing = leaves.iter().find(|r| r.contains(500)).unwrap();
        assert_eq!(error, Some(Error::Leaf(format!("failed on {failing:?}"))));
        assert!(evaluated.load(Ordering::SeqCst) <= leaves.len());
    }

    #[test]
    fn test_combiner_failure() {
        let pool = build_pool(2);
        let input = [1u8; 64];
        let leaf = |segment: &[u8], _: Range| -> Result<u8, &'static str> {
            Ok(segment.iter().sum())
        };
        let checked_sum = |a: u8, b: u8| a.checked_add(b).ok_or("overflow");

        // 64 fits in a u8.
        let (result, error) = run(&pool, input.as_slice(), 4, &leaf, &checked_sum);
        assert_eq!(result, Ok(64));
        assert_eq!(error, None);

        let input = [100u8; 8];
        let (result, error) = run(&pool, input.as_slice(), 1, &leaf, &checked_sum);
        assert_eq!(result, Err(Aborted));
        assert_eq!(error, Some(Error::Combine("overflow")));
    }

    #[test]
    fn test_writes_into_disjoint_segments() {
        let pool = build_pool(4);
        let mut output = vec![usize::MAX; 1234];
        let leaf = |segment: &mut [usize], range: Range| -> Result<(), Infallible> {
            for (slot, index) in segment.iter_mut().zip(range.to_std()) {
                assert_eq!(*slot, usize::MAX);
                *slot = index;
            }
            Ok(())
        };

        let (result, error) = run(&pool, output.as_mut_slice(), 3, &leaf, &Discard);
        assert_eq!(result, Ok(()));
        assert!(error.is_none());
        assert_eq!(output, (0..1234).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_sequence_is_a_single_leaf() {
        let pool = build_pool(2);
        let calls = AtomicUsize::new(0);
        let leaf = |segment: &[i64], range: Range| -> Result<i64, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            assert!(segment.is_empty());
            assert!(range.is_empty());
            Ok(0)
        };
        let sum = |a: i64, b: i64| -> Result<i64, Infallible> { Ok(a + b) };

        let input: [i64; 0] = [];
        let (result, _) = run(&pool, input.as_slice(), 1, &leaf, &sum);
        assert_eq!(result, Ok(0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
