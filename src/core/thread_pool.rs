// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A work-stealing thread pool exposing fork/join primitives.

use super::job::{JobRef, StackJob};
use super::sync::{LockLatch, Sleep, SpinLatch};
use crate::error::RejectedError;
#[cfg(feature = "log_parallelism")]
use crate::macros::{log_info, log_trace};
use crate::macros::{log_debug, log_error, log_warn};
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::cell::Cell;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
#[cfg(feature = "log_parallelism")]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Upper bound on how long an idle worker stays parked without being woken up.
/// Wake-ups are not expected to be missed, this only bounds the damage if one
/// is.
const PARK_TIMEOUT: Duration = Duration::from_millis(5);

/// Number of threads to spawn in a thread pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl ThreadCount {
    /// Resolves the number of threads to spawn.
    pub fn count(self) -> NonZeroUsize {
        match self {
            ThreadCount::AvailableParallelism => std::thread::available_parallelism()
                .expect("Getting the available parallelism failed"),
            ThreadCount::Count(count) => count,
        }
    }
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), building a thread pool will panic.
    Always,
}

/// A builder for [`ThreadPool`].
#[derive(Clone, Debug)]
pub struct ThreadPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
    /// Optional name of the pool. Worker threads are named `{name}-{index}`.
    pub thread_name: Option<String>,
}

impl Default for ThreadPoolBuilder {
    /// A pool with one unpinned, unnamed worker per available CPU.
    fn default() -> Self {
        Self {
            num_threads: ThreadCount::AvailableParallelism,
            cpu_pinning: CpuPinningPolicy::No,
            thread_name: None,
        }
    }
}

impl ThreadPoolBuilder {
    /// Spawns a thread pool.
    ///
    /// ```
    /// # use forkjoin::{CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};
    /// let thread_pool = ThreadPoolBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     cpu_pinning: CpuPinningPolicy::No,
    ///     thread_name: Some("compute".to_owned()),
    /// }
    /// .build();
    ///
    /// let (a, b) = thread_pool
    ///     .invoke(|ctx| ctx.fork_join(|_| 1 + 2, |_| 3 + 4))
    ///     .unwrap();
    /// assert_eq!((a, b), (3, 7));
    /// ```
    pub fn build(&self) -> ThreadPool {
        ThreadPool::new(self)
    }
}

/// A pool of worker threads that execute fork/join computations, balancing
/// the load via work stealing.
///
/// Computations are submitted with [`invoke()`](Self::invoke), which hands a
/// [`Context`] to the root job. The context exposes the
/// [`fork_join()`](Context::fork_join) primitive to recursively split the
/// work.
pub struct ThreadPool {
    /// State shared with the worker threads.
    registry: Arc<Registry>,
    /// Handles to all the worker threads in the pool.
    threads: Vec<WorkerThreadHandle>,
}

/// Handle to a worker thread in a thread pool.
struct WorkerThreadHandle {
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl ThreadPool {
    /// Creates a new thread pool using the given parameters.
    fn new(builder: &ThreadPoolBuilder) -> Self {
        let num_threads: usize = builder.num_threads.count().into();

        #[cfg(any(
            miri,
            not(any(
                target_os = "android",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "linux"
            ))
        ))]
        match builder.cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                panic!("Pinning threads to CPUs is not implemented on this platform.")
            }
        }

        let deques = (0..num_threads)
            .map(|_| Worker::new_lifo())
            .collect::<Vec<Worker<JobRef>>>();
        let registry = Arc::new(Registry {
            injector: Injector::new(),
            stealers: deques.iter().map(Worker::stealer).collect(),
            sleep: Arc::new(Sleep::new()),
            terminate: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            name: builder.thread_name.clone(),
            #[cfg(feature = "log_parallelism")]
            stats: SchedulerStats::default(),
        });

        let cpu_pinning = builder.cpu_pinning;
        let threads = deques
            .into_iter()
            .enumerate()
            .map(|(id, deque)| {
                let registry = registry.clone();
                let mut thread_builder = std::thread::Builder::new();
                if let Some(name) = &builder.thread_name {
                    thread_builder = thread_builder.name(format!("{name}-{id}"));
                }
                let handle = thread_builder
                    .spawn(move || {
                        pin_current_thread(cpu_pinning, id);
                        main_loop(registry, id, deque)
                    })
                    .unwrap_or_else(|e| panic!("Failed to spawn worker thread #{id}: {e}"));
                WorkerThreadHandle { handle }
            })
            .collect();
        log_debug!("[main thread] Spawned {num_threads} threads");

        Self { registry, threads }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.registry.num_threads()
    }

    /// Returns the name given to this pool in [`ThreadPoolBuilder`], if any.
    pub fn name(&self) -> Option<&str> {
        self.registry.name.as_deref()
    }

    /// Runs the given operation as the root of a new computation on this pool,
    /// and blocks until it completes.
    ///
    /// When called from one of this pool's worker threads, the operation runs
    /// inline on the current worker, as part of the computation that is
    /// already running there. When called from a worker of another pool, that
    /// worker keeps executing jobs of its own pool until the operation
    /// completes here. Independent computations submitted from several
    /// threads run concurrently on the same workers.
    ///
    /// If the operation panics, the panic is propagated to the caller.
    ///
    /// Returns a [`RejectedError`] if the pool has been
    /// [shut down](Self::shutdown) and this isn't a nested call from one of
    /// its worker threads.
    pub fn invoke<OP, R>(&self, op: OP) -> Result<R, RejectedError>
    where
        OP: FnOnce(&Context<'_>) -> R + Send,
        R: Send,
    {
        // SAFETY: A non-null pointer refers to the `WorkerThread` of the current
        // thread, which lives until the end of its main loop.
        let current = unsafe { WorkerThread::current().as_ref() };
        if let Some(worker) = current {
            if Arc::ptr_eq(&worker.registry, &self.registry) {
                log_debug!(
                    "[thread {}] Running a nested computation inline",
                    worker.index
                );
                return Ok(op(&Context::new(worker)));
            }
        }

        if self.is_shut_down() {
            log_warn!("Rejecting a computation submitted after shutdown");
            return Err(RejectedError);
        }

        match current {
            Some(worker) => {
                log_debug!(
                    "[thread {}] Submitting a computation to another pool",
                    worker.index
                );
                let job = StackJob::new(op, SpinLatch::cross(&worker.registry.sleep));
                // SAFETY: The job stays in place until its latch is set, as the
                // current worker waits on the latch before returning.
                let job_ref = unsafe { job.as_job_ref() };
                self.registry.inject(job_ref);
                worker.wait_until(job.latch());
                Ok(job.into_result())
            }
            None => {
                let job = StackJob::new(op, LockLatch::new());
                // SAFETY: The job stays in place until its latch is set, as this
                // function waits on the latch before returning.
                let job_ref = unsafe { job.as_job_ref() };
                self.registry.inject(job_ref);
                job.latch().wait();
                Ok(job.into_result())
            }
        }
    }

    /// Stops accepting new computations. Computations that are already running
    /// are unaffected, and the worker threads keep running until the pool is
    /// dropped.
    pub fn shutdown(&self) {
        log_debug!("[main thread] Shutting down the pool");
        self.registry.shut_down.store(true, Ordering::SeqCst);
    }

    /// Returns whether [`shutdown()`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.registry.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for ThreadPool {
    /// Joins all the threads in the pool.
    #[allow(clippy::unused_enumerate_index)]
    fn drop(&mut self) {
        log_debug!("[main thread] Notifying threads to finish...");
        self.registry.terminate.store(true, Ordering::SeqCst);
        self.registry.sleep.force_wake_all();

        log_debug!("[main thread] Joining threads in the pool...");
        for (_i, t) in self.threads.drain(..).enumerate() {
            let result = t.handle.join();
            match result {
                Ok(_) => log_debug!("[main thread] Thread {_i} joined with result: {result:?}"),
                Err(_) => log_error!("[main thread] Thread {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[main thread] Joined threads.");

        #[cfg(feature = "log_parallelism")]
        self.registry.stats.print();
    }
}

/// Pins the current thread to the CPU of the given index, according to the
/// policy.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(cpu_pinning: CpuPinningPolicy, id: usize) {
    let pin = || -> nix::Result<()> {
        let mut cpu_set = CpuSet::new();
        cpu_set.set(id)?;
        sched_setaffinity(Pid::from_raw(0), &cpu_set)
    };
    match cpu_pinning {
        CpuPinningPolicy::No => (),
        CpuPinningPolicy::IfSupported => match pin() {
            Ok(()) => log_debug!("Pinned thread #{id} to CPU #{id}"),
            Err(_e) => log_warn!("Failed to set CPU affinity for thread #{id}: {_e}"),
        },
        CpuPinningPolicy::Always => match pin() {
            Ok(()) => log_debug!("Pinned thread #{id} to CPU #{id}"),
            Err(e) => panic!("Failed to set CPU affinity for thread #{id}: {e}"),
        },
    }
}

/// Pinning is rejected or ignored when building the pool on these platforms.
#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn pin_current_thread(_cpu_pinning: CpuPinningPolicy, _id: usize) {}

/// State shared between a [`ThreadPool`] and its worker threads.
struct Registry {
    /// Queue of root jobs submitted from outside the pool.
    injector: Injector<JobRef>,
    /// Handles to steal from the deque of each worker thread.
    stealers: Box<[Stealer<JobRef>]>,
    /// Parking lot for idle worker threads.
    sleep: Arc<Sleep>,
    /// Whether the worker threads must exit.
    terminate: AtomicBool,
    /// Whether new computations are rejected.
    shut_down: AtomicBool,
    /// Name of the pool.
    name: Option<String>,
    /// Scheduling statistics.
    #[cfg(feature = "log_parallelism")]
    stats: SchedulerStats,
}

impl Registry {
    fn num_threads(&self) -> NonZeroUsize {
        self.stealers.len().try_into().unwrap()
    }

    /// Submits a root job from outside the pool.
    fn inject(&self, job: JobRef) {
        self.injector.push(job);
        #[cfg(feature = "log_parallelism")]
        self.stats.injections.fetch_add(1, Ordering::Relaxed);
        self.sleep.wake_one();
    }

    /// Takes a root job submitted from outside the pool, if any.
    fn take_injected(&self) -> Option<JobRef> {
        loop {
            match self.injector.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Returns whether any job is visible in the queues.
    fn has_work(&self) -> bool {
        !self.injector.is_empty() || self.stealers.iter().any(|stealer| !stealer.is_empty())
    }

    fn must_terminate(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }
}

/// Counters of scheduling events, printed when the pool is dropped.
#[cfg(feature = "log_parallelism")]
#[derive(Default)]
struct SchedulerStats {
    forks: AtomicU64,
    inline_pops: AtomicU64,
    thefts: AtomicU64,
    injections: AtomicU64,
    executed: AtomicU64,
}

#[cfg(feature = "log_parallelism")]
impl SchedulerStats {
    fn print(&self) {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        log_info!("Work-stealing statistics:");
        log_info!("- forks: {}", load(&self.forks));
        log_info!("- inline_pops: {}", load(&self.inline_pops));
        log_info!("- thefts: {}", load(&self.thefts));
        log_info!("- injections: {}", load(&self.injections));
        log_info!("- executed: {}", load(&self.executed));
    }
}

thread_local! {
    /// Pointer to the [`WorkerThread`] running on this thread, or null if this
    /// isn't a worker thread.
    static WORKER_THREAD: Cell<*const WorkerThread> = const { Cell::new(std::ptr::null()) };
}

/// State owned by a worker thread.
pub(crate) struct WorkerThread {
    /// Thread index.
    index: usize,
    /// Local deque of forked jobs. The owner pushes and pops at the back,
    /// thieves steal from the front.
    deque: Worker<JobRef>,
    /// State shared with the pool.
    registry: Arc<Registry>,
}

/// Main function run by each worker thread.
fn main_loop(registry: Arc<Registry>, index: usize, deque: Worker<JobRef>) {
    let worker = WorkerThread {
        index,
        deque,
        registry,
    };
    WORKER_THREAD.with(|current| current.set(&worker));
    log_debug!("[thread {index}] Started");

    loop {
        let epoch = worker.registry.sleep.epoch();
        if let Some(job) = worker.find_work() {
            // SAFETY: Jobs in the queues are executed exactly once, by whoever takes
            // them out of the queue.
            unsafe { worker.execute(job) };
            continue;
        }
        if worker.registry.must_terminate() {
            break;
        }
        worker.registry.sleep.sleep(epoch, PARK_TIMEOUT, || {
            worker.registry.must_terminate() || worker.registry.has_work()
        });
    }

    log_debug!("[thread {index}] Received finish signal");
    WORKER_THREAD.with(|current| current.set(std::ptr::null()));
}

impl WorkerThread {
    /// Returns a pointer to the worker running on the current thread, or null.
    pub(crate) fn current() -> *const WorkerThread {
        WORKER_THREAD.with(Cell::get)
    }

    /// Pushes a job on the local deque, making it available to thieves.
    fn push(&self, job: JobRef) {
        self.deque.push(job);
        #[cfg(feature = "log_parallelism")]
        self.registry.stats.forks.fetch_add(1, Ordering::Relaxed);
        self.registry.sleep.wake_one();
    }

    /// Pops the most recently pushed job of the local deque.
    fn take_local_job(&self) -> Option<JobRef> {
        self.deque.pop()
    }

    /// Steals the oldest job of another worker's deque, trying the other
    /// workers in a round-robin order starting after this one.
    fn steal(&self) -> Option<JobRef> {
        let stealers = &self.registry.stealers;
        let num_threads = stealers.len();
        loop {
            let mut retry = false;
            for offset in 1..num_threads {
                let victim = (self.index + offset) % num_threads;
                match stealers[victim].steal() {
                    Steal::Success(job) => {
                        #[cfg(feature = "log_parallelism")]
                        {
                            self.registry.stats.thefts.fetch_add(1, Ordering::Relaxed);
                            log_trace!("[thread {}] Stole a job from thread {victim}", self.index);
                        }
                        return Some(job);
                    }
                    Steal::Empty => (),
                    Steal::Retry => retry = true,
                }
            }
            if !retry {
                return None;
            }
        }
    }

    /// Looks for a job to run: locally first, then in other workers' deques,
    /// then among the root jobs.
    fn find_work(&self) -> Option<JobRef> {
        self.take_local_job()
            .or_else(|| self.steal())
            .or_else(|| self.registry.take_injected())
    }

    /// Executes the given job.
    ///
    /// # Safety
    ///
    /// The job must have been taken out of a queue, and executed only once.
    unsafe fn execute(&self, job: JobRef) {
        #[cfg(feature = "log_parallelism")]
        self.registry.stats.executed.fetch_add(1, Ordering::Relaxed);
        // SAFETY: Upheld by the caller, and this is a worker thread.
        unsafe { job.execute() }
    }

    /// Keeps executing other jobs until the given latch is set.
    fn wait_until(&self, latch: &SpinLatch<'_>) {
        while !latch.probe() {
            let epoch = self.registry.sleep.epoch();
            if let Some(job) = self.find_work() {
                // SAFETY: The job was just taken out of a queue.
                unsafe { self.execute(job) };
                continue;
            }
            self.registry.sleep.sleep(epoch, PARK_TIMEOUT, || {
                latch.probe() || self.registry.has_work()
            });
        }
    }
}

/// Handle to the worker thread running the current job, passed to every
/// operation executed on a [`ThreadPool`].
///
/// A context cannot be sent to another thread: each job receives the context
/// of the worker that runs it.
pub struct Context<'w> {
    worker: &'w WorkerThread,
}

impl<'w> Context<'w> {
    pub(crate) fn new(worker: &'w WorkerThread) -> Self {
        Self { worker }
    }

    /// Returns the index of the worker thread running the current job, in
    /// `0..num_threads`.
    pub fn worker_index(&self) -> usize {
        self.worker.index
    }

    /// Returns the number of worker threads in the pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.worker.registry.num_threads()
    }

    /// Forks `left` for execution by any worker, runs `right` on the current
    /// worker, then joins `left`, and returns both results.
    ///
    /// While `left` is running elsewhere, the current worker keeps executing
    /// other pending jobs rather than blocking. If `left` wasn't stolen by the
    /// time `right` completes, it runs inline.
    ///
    /// If either closure panics, the panic is propagated once both closures
    /// are done with their borrowed data.
    ///
    /// ```
    /// # use forkjoin::{Context, ThreadPoolBuilder};
    /// fn fib(ctx: &Context<'_>, n: u64) -> u64 {
    ///     if n < 2 {
    ///         return n;
    ///     }
    ///     let (a, b) = ctx.fork_join(|ctx| fib(ctx, n - 1), |ctx| fib(ctx, n - 2));
    ///     a + b
    /// }
    ///
    /// let thread_pool = ThreadPoolBuilder::default().build();
    /// assert_eq!(thread_pool.invoke(|ctx| fib(ctx, 20)).unwrap(), 6765);
    /// ```
    pub fn fork_join<A, B, RA, RB>(&self, left: A, right: B) -> (RA, RB)
    where
        A: FnOnce(&Context<'_>) -> RA + Send,
        B: FnOnce(&Context<'_>) -> RB + Send,
        RA: Send,
        RB: Send,
    {
        let worker = self.worker;
        let left_job = StackJob::new(left, SpinLatch::new(&worker.registry.sleep));
        // SAFETY: `left_job` isn't moved nor dropped before either its latch is set
        // or its handle is popped back from the local deque, including when `right`
        // panics: that panic is caught and only resumed afterwards.
        let left_ref = unsafe { left_job.as_job_ref() };
        worker.push(left_ref);

        let right_result = panic::catch_unwind(AssertUnwindSafe(|| right(self)));

        while !left_job.latch().probe() {
            match worker.take_local_job() {
                Some(job) if job == left_ref => {
                    #[cfg(feature = "log_parallelism")]
                    worker
                        .registry
                        .stats
                        .inline_pops
                        .fetch_add(1, Ordering::Relaxed);
                    let right_value = unwrap_or_resume(right_result);
                    let left_value = left_job.run_inline(self);
                    return (left_value, right_value);
                }
                Some(job) => {
                    // SAFETY: The job was just taken out of the local deque.
                    unsafe { worker.execute(job) };
                }
                None => {
                    // The left job was stolen: help other workers until it completes.
                    worker.wait_until(left_job.latch());
                    break;
                }
            }
        }

        let right_value = unwrap_or_resume(right_result);
        (left_job.into_result(), right_value)
    }
}

fn unwrap_or_resume<T>(result: std::thread::Result<T>) -> T {
    result.unwrap_or_else(|payload| panic::resume_unwind(payload))
}
