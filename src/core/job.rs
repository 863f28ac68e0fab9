// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Type-erased jobs that can be queued on the worker deques.

use super::sync::Latch;
use super::thread_pool::{Context, WorkerThread};
use std::any::Any;
use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};

/// A unit of work that can be executed exactly once by a worker thread.
pub trait Job {
    /// Executes the job pointed to by `this`.
    ///
    /// # Safety
    ///
    /// - `this` must point to a valid `Self` that was erased by
    ///   [`JobRef::new()`].
    /// - This function must be called at most once per job.
    /// - This function must be called on a worker thread.
    unsafe fn execute(this: *const ());
}

/// A lifetime-erased handle to a [`Job`], small enough to be pushed on the
/// worker deques.
///
/// The job itself typically lives on the stack of the thread that created it,
/// which must not return (nor unwind) before the job has completed.
#[derive(Clone, Copy)]
pub struct JobRef {
    pointer: *const (),
    execute_fn: unsafe fn(*const ()),
}

/// SAFETY: A [`JobRef`] is only ever created from jobs whose closure and result
/// are [`Send`] (see [`StackJob::as_job_ref()`]), and the pointed-to job is
/// accessed by a single thread at a time: the thread that executes it, then
/// the owner once the latch is set.
unsafe impl Send for JobRef {}

impl JobRef {
    /// Erases the given job.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `data` remains valid until the job has been
    /// executed, and that the job is executed at most once.
    unsafe fn new<T: Job>(data: *const T) -> Self {
        Self {
            pointer: data as *const (),
            execute_fn: T::execute,
        }
    }

    /// Executes the underlying job.
    ///
    /// # Safety
    ///
    /// See [`Job::execute()`].
    #[inline(always)]
    pub unsafe fn execute(self) {
        // SAFETY: Upheld by the caller.
        unsafe { (self.execute_fn)(self.pointer) }
    }
}

impl PartialEq for JobRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.pointer, other.pointer)
    }
}

impl Eq for JobRef {}

/// Outcome of running a job closure.
pub enum JobResult<T> {
    /// The job hasn't run yet.
    Pending,
    /// The job returned a value.
    Ok(T),
    /// The job panicked with the given payload.
    Panic(Box<dyn Any + Send>),
}

impl<T> JobResult<T> {
    /// Runs the given function, capturing any panic.
    fn call(f: impl FnOnce() -> T) -> Self {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(x) => JobResult::Ok(x),
            Err(payload) => JobResult::Panic(payload),
        }
    }

    /// Unwraps the value of a completed job, resuming the panic if the job
    /// panicked.
    pub fn into_return_value(self) -> T {
        match self {
            JobResult::Pending => unreachable!("the job result was read before completion"),
            JobResult::Ok(x) => x,
            JobResult::Panic(payload) => panic::resume_unwind(payload),
        }
    }
}

/// A job that lives on the stack of the thread that forked it. The owner
/// waits on the latch before reading the result and dropping the job.
pub struct StackJob<L, F, R> {
    latch: L,
    func: UnsafeCell<Option<F>>,
    result: UnsafeCell<JobResult<R>>,
}

impl<L, F, R> StackJob<L, F, R>
where
    L: Latch,
    F: FnOnce(&Context<'_>) -> R + Send,
    R: Send,
{
    /// Creates a new job running the given function.
    pub fn new(func: F, latch: L) -> Self {
        Self {
            latch,
            func: UnsafeCell::new(Some(func)),
            result: UnsafeCell::new(JobResult::Pending),
        }
    }

    /// Returns the latch that is set once this job has completed.
    pub fn latch(&self) -> &L {
        &self.latch
    }

    /// Returns a type-erased handle to this job.
    ///
    /// # Safety
    ///
    /// The caller must not move nor drop this job until either its latch is
    /// set, or the returned handle has been reclaimed without executing it
    /// (e.g. popped back from the local deque).
    pub unsafe fn as_job_ref(&self) -> JobRef {
        // SAFETY: Upheld by the caller.
        unsafe { JobRef::new(self) }
    }

    /// Runs the job on the current thread, for a job that was never executed
    /// through its [`JobRef`].
    pub fn run_inline(self, context: &Context<'_>) -> R {
        let func = self
            .func
            .into_inner()
            .expect("an inline job must not have been executed already");
        func(context)
    }

    /// Returns the result of a job whose latch has been set, resuming its
    /// panic if it panicked.
    pub fn into_result(self) -> R {
        self.result.into_inner().into_return_value()
    }
}

impl<L, F, R> Job for StackJob<L, F, R>
where
    L: Latch,
    F: FnOnce(&Context<'_>) -> R + Send,
    R: Send,
{
    unsafe fn execute(this: *const ()) {
        // SAFETY: The caller guarantees that `this` points to a valid `Self` that
        // is only accessed by this thread until the latch is set.
        let this = unsafe { &*(this as *const Self) };
        // SAFETY: The job is executed at most once and the owner doesn't touch
        // `func` before the latch is set.
        let func = unsafe { (*this.func.get()).take() }
            .expect("a job must not be executed twice");
        let worker = WorkerThread::current();
        assert!(!worker.is_null(), "jobs must run on a worker thread");
        // SAFETY: A non-null worker pointer refers to the `WorkerThread` that lives
        // in the main loop frame of the current thread, which outlives this call.
        let context = Context::new(unsafe { &*worker });
        let result = JobResult::call(|| func(&context));
        // SAFETY: The owner doesn't read the result before the latch is set.
        unsafe {
            *this.result.get() = result;
        }
        // Past this point, the owner may free the job: the latch takes care of not
        // touching it after publishing the completion.
        // SAFETY: `this.latch` is valid at the time of the call.
        unsafe { L::set(&this.latch) };
    }
}
