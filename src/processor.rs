// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Driver binding a leaf computation and a combiner into a computation over a
//! whole sequence.

use crate::core::ThreadPool;
use crate::error::Error;
use crate::macros::log_debug;
use crate::range::Range;
use crate::sequence::Sequence;
use crate::task::{Aborted, Combiner, DivideConquerTask, FailFast, LeafComputation, Plan};
use std::num::NonZeroUsize;

/// A divide-and-conquer computation, ready to be run over any sequence.
///
/// ```
/// # use forkjoin::{ParallelArrayProcessor, Range, ThreadPoolBuilder};
/// # use std::convert::Infallible;
/// # use std::num::NonZeroUsize;
/// let pool = ThreadPoolBuilder::default().build();
/// let processor = ParallelArrayProcessor::new(
///     NonZeroUsize::try_from(100).unwrap(),
///     |segment: &[u64], _: Range| -> Result<u64, Infallible> { Ok(segment.iter().sum()) },
///     |a: u64, b: u64| -> Result<u64, Infallible> { Ok(a + b) },
/// );
///
/// let input = (1..=1000).collect::<Vec<u64>>();
/// assert_eq!(processor.process(&pool, input.as_slice()), Ok(500_500));
/// assert_eq!(processor.process_range(&pool, input.as_slice(), 0, 10), Ok(55));
/// ```
pub struct ParallelArrayProcessor<L, C> {
    cutoff: NonZeroUsize,
    leaf: L,
    combiner: C,
}

impl<L, C> ParallelArrayProcessor<L, C> {
    /// Creates a processor. Ranges of at most `cutoff` items are evaluated
    /// sequentially by the `leaf` computation, longer ones are split in two
    /// halves whose results are merged by the `combiner`.
    pub fn new(cutoff: NonZeroUsize, leaf: L, combiner: C) -> Self {
        Self {
            cutoff,
            leaf,
            combiner,
        }
    }

    /// Returns the cutoff below which ranges aren't split anymore.
    pub fn cutoff(&self) -> NonZeroUsize {
        self.cutoff
    }

    /// Runs the computation over the whole sequence on the given pool.
    pub fn process<S, R, E>(&self, pool: &ThreadPool, sequence: S) -> Result<R, Error<E>>
    where
        S: Sequence,
        R: Send,
        E: Send,
        L: LeafComputation<S, R, E>,
        C: Combiner<R, E>,
    {
        let range = Range::full(sequence.len());
        self.run(pool, sequence, range)
    }

    /// Runs the computation over the indices `[low, high)` of the sequence.
    ///
    /// The ranges passed to the leaf computation are expressed in indices of
    /// the whole sequence. An inverted or out-of-bounds range is rejected
    /// before any work is submitted to the pool.
    pub fn process_range<S, R, E>(
        &self,
        pool: &ThreadPool,
        sequence: S,
        low: usize,
        high: usize,
    ) -> Result<R, Error<E>>
    where
        S: Sequence,
        R: Send,
        E: Send,
        L: LeafComputation<S, R, E>,
        C: Combiner<R, E>,
    {
        let range = Range::within(low, high, sequence.len())?;
        let (_, rest) = sequence.split_at(range.low());
        let (segment, _) = rest.split_at(range.len());
        self.run(pool, segment, range)
    }

    /// Evaluates the leaf computation once over the whole sequence, on the
    /// current thread. This is the sequential baseline of
    /// [`process()`](Self::process).
    pub fn process_sequential<S, R, E>(&self, sequence: S) -> Result<R, Error<E>>
    where
        S: Sequence,
        L: LeafComputation<S, R, E>,
    {
        let range = Range::full(sequence.len());
        self.leaf.evaluate(sequence, range).map_err(Error::Leaf)
    }

    fn run<S, R, E>(&self, pool: &ThreadPool, segment: S, range: Range) -> Result<R, Error<E>>
    where
        S: Sequence,
        R: Send,
        E: Send,
        L: LeafComputation<S, R, E>,
        C: Combiner<R, E>,
    {
        log_debug!(
            "Processing range {range:?} with cutoff {} on {} threads",
            self.cutoff,
            pool.num_threads()
        );

        let fail_fast = FailFast::new();
        let plan = Plan {
            cutoff: self.cutoff,
            leaf: &self.leaf,
            combiner: &self.combiner,
            fail_fast: &fail_fast,
        };
        let outcome =
            pool.invoke(|ctx| DivideConquerTask::new(segment, range, &plan).compute(ctx))?;

        match (outcome, fail_fast.into_error()) {
            (_, Some(error)) => Err(error),
            (Ok(result), None) => Ok(result),
            (Err(Aborted), None) => unreachable!("computation aborted without any failure"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{RangeError, RejectedError};
    use crate::{CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn build_pool(num_threads: usize) -> ThreadPool {
        ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
            thread_name: None,
        }
        .build()
    }

    fn cutoff(n: usize) -> NonZeroUsize {
        NonZeroUsize::try_from(n).unwrap()
    }

    fn sum(segment: &[u64], _: Range) -> Result<u64, Infallible> {
        Ok(segment.iter().sum())
    }

    fn add(a: u64, b: u64) -> Result<u64, Infallible> {
        Ok(a + b)
    }

    #[test]
    fn test_cutoff() {
        let processor = ParallelArrayProcessor::new(cutoff(42), sum, add);
        assert_eq!(processor.cutoff().get(), 42);
    }

    #[test]
    fn test_process_matches_sequential() {
        let pool = build_pool(4);
        let input = (0..10_000).collect::<Vec<u64>>();
        for c in [1, 10, 100, 10_000, 20_000] {
            let processor = ParallelArrayProcessor::new(cutoff(c), sum, add);
            assert_eq!(
                processor.process(&pool, input.as_slice()),
                processor.process_sequential(input.as_slice())
            );
            assert_eq!(processor.process(&pool, input.as_slice()), Ok(49_995_000));
        }
    }

    #[test]
    fn test_process_range() {
        let pool = build_pool(4);
        let input = (0..1000).collect::<Vec<u64>>();
        let processor = ParallelArrayProcessor::new(cutoff(16), sum, add);

        assert_eq!(
            processor.process_range(&pool, input.as_slice(), 100, 200),
            Ok((100..200).sum())
        );
        assert_eq!(
            processor.process_range(&pool, input.as_slice(), 0, 1000),
            Ok((0..1000).sum())
        );
        assert_eq!(
            processor.process_range(&pool, input.as_slice(), 999, 1000),
            Ok(999)
        );
        assert_eq!(
            processor.process_range(&pool, input.as_slice(), 500, 500),
            Ok(0)
        );
    }

    #[test]
    fn test_process_range_uses_absolute_indices() {
        let pool = build_pool(4);
        let input = (0..1000).collect::<Vec<usize>>();
        let seen = Mutex::new(Vec::new());
        let leaf = |segment: &[usize], range: Range| -> Result<(), Infallible> {
            assert_eq!(segment, &input[range.to_std()]);
            seen.lock().unwrap().push(range);
            Ok(())
        };
        let processor = ParallelArrayProcessor::new(cutoff(10), leaf, crate::Discard);

        assert_eq!(
            processor.process_range(&pool, input.as_slice(), 250, 333),
            Ok(())
        );
        let mut seen = seen.into_inner().unwrap();
        seen.sort_by_key(Range::low);
        assert_eq!(seen, Range::new(250, 333).unwrap().leaves(cutoff(10)));
    }

    #[test]
    fn test_process_range_writes_only_the_range() {
        let pool = build_pool(4);
        let mut output = vec![0u32; 100];
        let leaf = |segment: &mut [u32], _: Range| -> Result<(), Infallible> {
            segment.fill(1);
            Ok(())
        };
        let processor = ParallelArrayProcessor::new(cutoff(3), leaf, crate::Discard);

        assert_eq!(
            processor.process_range(&pool, output.as_mut_slice(), 20, 70),
            Ok(())
        );
        for (i, x) in output.iter().enumerate() {
            assert_eq!(*x, u32::from((20..70).contains(&i)));
        }
    }

    #[test]
    fn test_invalid_range_is_rejected_before_any_work() {
        let pool = build_pool(2);
        let input = (0..10).collect::<Vec<u64>>();
        let calls = AtomicUsize::new(0);
        let leaf = |segment: &[u64], _: Range| -> Result<u64, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(segment.iter().sum())
        };
        let processor = ParallelArrayProcessor::new(cutoff(2), leaf, add);

        assert_eq!(
            processor.process_range(&pool, input.as_slice(), 7, 3),
            Err(Error::InvalidRange(RangeError::Inverted { low: 7, high: 3 }))
        );
        assert_eq!(
            processor.process_range(&pool, input.as_slice(), 5, 11),
            Err(Error::InvalidRange(RangeError::OutOfBounds { high: 11, len: 10 }))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_process_sequential_evaluates_once() {
        let input = (0..1000).collect::<Vec<u64>>();
        let calls = AtomicUsize::new(0);
        let leaf = |segment: &[u64], range: Range| -> Result<u64, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(range, Range::full(1000));
            Ok(segment.iter().sum())
        };
        let processor = ParallelArrayProcessor::new(cutoff(1), leaf, add);

        assert_eq!(processor.process_sequential(input.as_slice()), Ok(499_500));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_process_sequential_failure() {
        let processor = ParallelArrayProcessor::new(
            cutoff(1),
            |_: &[u64], _: Range| -> Result<u64, &'static str> { Err("no input") },
            |a: u64, b: u64| -> Result<u64, &'static str> { Ok(a + b) },
        );
        let input: [u64; 0] = [];
        assert_eq!(
            processor.process_sequential(input.as_slice()),
            Err(Error::Leaf("no input"))
        );
    }

    #[test]
    fn test_rejected_after_shutdown() {
        let pool = build_pool(2);
        let input = (0..100).collect::<Vec<u64>>();
        let processor = ParallelArrayProcessor::new(cutoff(10), sum, add);
        assert_eq!(processor.process(&pool, input.as_slice()), Ok(4950));

        pool.shutdown();
        assert_eq!(
            processor.process(&pool, input.as_slice()),
            Err(Error::Rejected(RejectedError))
        );
        assert_eq!(
            processor.process_range(&pool, input.as_slice(), 0, 10),
            Err(Error::Rejected(RejectedError))
        );
        // The sequential baseline doesn't use the pool.
        assert_eq!(processor.process_sequential(input.as_slice()), Ok(4950));
    }

    #[test]
    fn test_processor_is_reusable_across_pools() {
        let input = (0..500).collect::<Vec<u64>>();
        let processor = ParallelArrayProcessor::new(cutoff(7), sum, add);
        for num_threads in [1, 2, 3, 8] {
            let pool = build_pool(num_threads);
            assert_eq!(processor.process(&pool, input.as_slice()), Ok(124_750));
        }
    }
}
