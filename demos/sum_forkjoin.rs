// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that computes the sum of a slice by recursively splitting
//! it on a work-stealing thread pool.

use forkjoin::payload::Summation;
use forkjoin::{CpuPinningPolicy, ParallelArrayProcessor, ThreadCount, ThreadPoolBuilder};
use std::hint::black_box;
use std::num::NonZeroUsize;

fn main() {
    let thread_pool = ThreadPoolBuilder {
        num_threads: ThreadCount::AvailableParallelism,
        cpu_pinning: CpuPinningPolicy::IfSupported,
        thread_name: None,
    }
    .build();

    let input_size = 1_000_000;
    let cutoff = NonZeroUsize::new(10_000).unwrap();

    let input = (0..input_size).collect::<Vec<u64>>();
    let processor = ParallelArrayProcessor::new(cutoff, Summation, Summation);
    let sum: u64 = processor
        .process(&thread_pool, black_box(input.as_slice()))
        .unwrap();
    println!("sum = {sum}");
}
