// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Sets the status to the given value and notifies one waiting thread.
    pub fn notify_one(&self, t: T) {
        let mut guard = self.mutex.lock().unwrap();
        *guard = t;
        self.condvar.notify_one();
    }

    /// Sets the status to the given value and notifies all waiting threads.
    ///
    /// The lock is held while notifying, so a waiter cannot observe the new
    /// value (and possibly free this status) before the notification is sent.
    pub fn notify_all(&self, t: T) {
        let mut guard = self.mutex.lock().unwrap();
        *guard = t;
        self.condvar.notify_all();
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        self.condvar
            .wait_while(self.mutex.lock().unwrap(), predicate)
            .unwrap()
    }

    /// Waits until the predicate is false on this status, or until the timeout
    /// elapses, whichever comes first.
    ///
    /// Returns whether the timeout elapsed with the predicate still true.
    pub fn wait_timeout_while(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&mut T) -> bool,
    ) -> bool {
        let (_guard, result) = self
            .condvar
            .wait_timeout_while(self.mutex.lock().unwrap(), timeout, predicate)
            .unwrap();
        result.timed_out()
    }
}
