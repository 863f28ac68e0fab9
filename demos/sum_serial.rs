// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that computes the sum of a slice with a single leaf
//! computation, without any thread pool.

use forkjoin::payload::Summation;
use forkjoin::ParallelArrayProcessor;
use std::hint::black_box;
use std::num::NonZeroUsize;

fn main() {
    let input_size = 1_000_000;

    let input = (0..input_size).collect::<Vec<u64>>();
    let cutoff = NonZeroUsize::new(input_size as usize).unwrap();
    let processor = ParallelArrayProcessor::new(cutoff, Summation, Summation);
    let sum: u64 = processor
        .process_sequential(black_box(input.as_slice()))
        .unwrap();
    println!("sum = {sum}");
}
