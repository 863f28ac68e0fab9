// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to time divide-and-conquer computations, sequentially and in
//! parallel.

use clap::{Parser, ValueEnum};
use forkjoin::payload::{is_probable_prime, MinOf, PrimeFill, Summation};
use forkjoin::{
    CpuPinningPolicy, Discard, ParallelArrayProcessor, ThreadCount, ThreadPool, ThreadPoolBuilder,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::time::Instant;

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let thread_pool = ThreadPoolBuilder {
        num_threads: match cli.num_threads {
            Some(num_threads) => ThreadCount::Count(num_threads),
            None => ThreadCount::AvailableParallelism,
        },
        cpu_pinning: CpuPinningPolicy::IfSupported,
        thread_name: Some("forkjoin".to_owned()),
    }
    .build();
    println!(
        "Running {:?} over {} items with cutoff {} on {} threads",
        cli.scenario,
        cli.input_size,
        cli.cutoff,
        thread_pool.num_threads()
    );

    match cli.scenario {
        Scenario::Sum => sum(&cli, &thread_pool),
        Scenario::MinOf => min_of(&cli, &thread_pool),
        Scenario::Primes => primes(&cli, &thread_pool),
    }
}

/// Runs the given operation once, and prints its description along with the
/// elapsed wall-clock time.
fn time_it(label: &str, op: impl FnOnce() -> String) {
    let start = Instant::now();
    let description = op();
    let elapsed = start.elapsed();
    println!("[{label}] {description} in {elapsed:?}");
}

/// Creates a vector of `input_size` random numbers in `[0, 1)`, fixed by a
/// constant seed for reproducibility.
fn random_doubles(input_size: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    (0..input_size).map(|_| rng.random()).collect()
}

/// Deliberately slow function, to make leaves expensive.
fn expensive(x: &f64) -> f64 {
    let mut y = *x;
    for _ in 0..100 {
        y = (y * 3.7).sin().abs() + y.sqrt() * 0.5;
    }
    y
}

fn sum(cli: &Cli, thread_pool: &ThreadPool) {
    let input = random_doubles(cli.input_size, cli.seed);
    let processor = ParallelArrayProcessor::new(cli.cutoff, Summation, Summation);

    if cli.sequential {
        time_it("sequential", || {
            let sum: f64 = processor
                .process_sequential(black_box(input.as_slice()))
                .unwrap();
            format!("sum = {sum}")
        });
    }
    time_it("parallel", || {
        let sum: f64 = processor
            .process(thread_pool, black_box(input.as_slice()))
            .unwrap();
        format!("sum = {sum}")
    });
}

fn min_of(cli: &Cli, thread_pool: &ThreadPool) {
    let input = random_doubles(cli.input_size, cli.seed);
    let min_of = MinOf::new(expensive);
    let processor = ParallelArrayProcessor::new(cli.cutoff, min_of, min_of);

    if cli.sequential {
        time_it("sequential", || {
            let min: f64 = processor
                .process_sequential(black_box(input.as_slice()))
                .unwrap();
            format!("min = {min}")
        });
    }
    time_it("parallel", || {
        let min: f64 = processor
            .process(thread_pool, black_box(input.as_slice()))
            .unwrap();
        format!("min = {min}")
    });
}

fn primes(cli: &Cli, thread_pool: &ThreadPool) {
    let processor =
        ParallelArrayProcessor::new(cli.cutoff, PrimeFill::new(cli.bits, cli.seed), Discard);
    let mut output = vec![0; cli.input_size];

    if cli.sequential {
        time_it("sequential", || {
            processor
                .process_sequential(black_box(output.as_mut_slice()))
                .unwrap();
            format!("generated {} primes of {} bits", output.len(), cli.bits)
        });
    }
    time_it("parallel", || {
        processor
            .process(thread_pool, black_box(output.as_mut_slice()))
            .unwrap();
        format!("generated {} primes of {} bits", output.len(), cli.bits)
    });

    assert!(output.iter().all(|&p| is_probable_prime(p)));
    if let Some(first) = output.first() {
        println!("first prime = {first}");
    }
}

/// CLI tool to time divide-and-conquer computations.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Scenario to run.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Maximal number of items processed sequentially by a leaf.
    #[arg(long)]
    cutoff: NonZeroUsize,

    /// Number of items in the input.
    #[arg(long, default_value_t = 1_000_000)]
    input_size: usize,

    /// Seed of the random inputs.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Bit size of the generated primes. Used only for the primes scenario.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u32).range(2..=63))]
    bits: u32,

    /// Whether to also time the sequential baseline.
    #[arg(long, default_value_t = false)]
    sequential: bool,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Scenario {
    /// Sum random numbers.
    Sum,
    /// Find the minimum of an expensive function over random numbers.
    MinOf,
    /// Fill an array with random primes.
    Primes,
}
