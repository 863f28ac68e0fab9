// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives: completion latches and the parking lot for
//! idle worker threads.

use super::util::Status;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A one-shot flag signaling that a job has completed.
pub trait Latch {
    /// Sets the latch, waking up whoever waits on it.
    ///
    /// # Safety
    ///
    /// `this` must be valid when calling this function. As soon as the latch
    /// is observed as set, its owner may free it, so implementations must not
    /// access `*this` after publishing the new state.
    unsafe fn set(this: *const Self);
}

/// A latch probed by a worker thread, which keeps executing other jobs while
/// waiting. Idle workers parked on the [`Sleep`] are woken up when it is set.
pub struct SpinLatch<'r> {
    state: AtomicBool,
    sleep: &'r Arc<Sleep>,
    /// Whether the latch is set by a thread of another pool, which doesn't
    /// keep the waiter's [`Sleep`] alive.
    cross: bool,
}

impl<'r> SpinLatch<'r> {
    /// Creates a new unset latch, that wakes up the sleepers of the given
    /// [`Sleep`] when set by a thread of the same pool.
    pub fn new(sleep: &'r Arc<Sleep>) -> Self {
        Self {
            state: AtomicBool::new(false),
            sleep,
            cross: false,
        }
    }

    /// Creates a new unset latch, that wakes up the sleepers of the given
    /// [`Sleep`] when set by a thread of another pool.
    pub fn cross(sleep: &'r Arc<Sleep>) -> Self {
        Self {
            state: AtomicBool::new(false),
            sleep,
            cross: true,
        }
    }

    /// Returns whether the latch has been set.
    #[inline(always)]
    pub fn probe(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }
}

impl Latch for SpinLatch<'_> {
    unsafe fn set(this: *const Self) {
        // SAFETY: `this` is valid until the store below.
        let (sleep, cross): (&Arc<Sleep>, bool) = unsafe { ((*this).sleep, (*this).cross) };
        // The waiter's pool may be dropped as soon as the store is visible, unless
        // the setter belongs to the same pool.
        let owned = cross.then(|| Arc::clone(sleep));
        // SAFETY: `this` is valid at this point.
        unsafe { (*this).state.store(true, Ordering::SeqCst) };
        match owned {
            Some(sleep) => sleep.wake_all(),
            // The setter's registry owns this sleep object and outlives every job.
            None => sleep.wake_all(),
        }
    }
}

/// A latch on which a thread outside of the pool blocks.
pub struct LockLatch {
    status: Status<bool>,
}

impl LockLatch {
    /// Creates a new unset latch.
    pub fn new() -> Self {
        Self {
            status: Status::new(false),
        }
    }

    /// Blocks the current thread until the latch is set.
    pub fn wait(&self) {
        let guard = self.status.wait_while(|set| !*set);
        assert!(*guard);
    }
}

impl Latch for LockLatch {
    unsafe fn set(this: *const Self) {
        // SAFETY: `this` is valid at this point. The waiter cannot return from
        // `wait()` before `notify_all()` releases the lock.
        unsafe { (*this).status.notify_all(true) };
    }
}

/// Parking lot for worker threads that didn't find any work.
///
/// A thread reads the current [`epoch()`](Self::epoch) before searching for
/// work, and passes it to [`sleep()`](Self::sleep) if the search was
/// fruitless. Any wake-up in between bumps the epoch, so the thread doesn't go
/// to sleep on a stale view.
pub struct Sleep {
    /// Number of threads currently inside `sleep()`.
    sleepers: CachePadded<AtomicUsize>,
    /// Incremented by every wake-up that found sleepers.
    epoch: CachePadded<AtomicU64>,
    /// Condition variable on which the sleepers are parked.
    parked: Status<()>,
}

impl Sleep {
    /// Creates a new parking lot without any sleepers.
    pub fn new() -> Self {
        Self {
            sleepers: CachePadded::new(AtomicUsize::new(0)),
            epoch: CachePadded::new(AtomicU64::new(0)),
            parked: Status::new(()),
        }
    }

    /// Returns the current wake-up epoch.
    #[inline(always)]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Parks the current thread until a wake-up happens after the given epoch,
    /// or until the timeout elapses.
    ///
    /// The `ready` predicate is re-checked after announcing this thread as a
    /// sleeper: if it returns true, the thread doesn't park.
    pub fn sleep(&self, epoch: u64, timeout: Duration, ready: impl Fn() -> bool) {
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        if !ready() {
            self.parked
                .wait_timeout_while(timeout, |_| self.epoch.load(Ordering::SeqCst) == epoch);
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Wakes up one sleeping thread, if any.
    pub fn wake_one(&self) {
        if self.has_sleepers() {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.parked.notify_one(());
        }
    }

    /// Wakes up all sleeping threads, if any.
    pub fn wake_all(&self) {
        if self.has_sleepers() {
            self.force_wake_all();
        }
    }

    /// Wakes up all sleeping threads, without checking if there are any.
    pub fn force_wake_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.parked.notify_all(());
    }

    #[inline(always)]
    fn has_sleepers(&self) -> bool {
        // Pairs with the fence in `sleep()`: either the sleeper sees the state
        // published before this call, or this sees the sleeper.
        fence(Ordering::SeqCst);
        self.sleepers.load(Ordering::SeqCst) != 0
    }
}
