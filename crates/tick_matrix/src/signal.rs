// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use parking_lot::{Condvar, Mutex};

/// Lock and wait condition owned by an interval slot.
///
/// The lock protects no data. It only orders a waiter's final predicate check against the driver's
/// broadcast: a waiter re-checks its predicate under the lock and the driver must hold the same lock
/// to broadcast, so a tick published before a successful broadcast is never missed by a waiter that
/// is about to park.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    lock: Mutex<()>,
    cond: Condvar,
}

impl Signal {
    /// Wakes all waiters if the lock is free.
    ///
    /// Returns `false` without waiting if a waiter currently holds the lock. The producer never
    /// blocks on consumers; a waiter holding the lock is re-checking its predicate and will either
    /// observe the new tick or be woken by the next broadcast.
    pub fn try_broadcast(&self) -> bool {
        match self.lock.try_lock() {
            Some(_guard) => {
                self.cond.notify_all();
                true
            }
            None => false,
        }
    }

    /// Wakes all waiters, blocking until the lock is available.
    ///
    /// Only used by the final drain sweep, where a missed broadcast would leave a waiter parked forever.
    pub fn broadcast(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Parks the calling thread until the next broadcast if `should_wait` returns `true`
    /// when evaluated under the lock.
    ///
    /// Returns whether the thread parked. Spurious wakeups are possible; callers re-evaluate
    /// their own state in a loop.
    pub fn wait_if(&self, should_wait: impl FnOnce() -> bool) -> bool {
        let mut guard = self.lock.lock();

        if should_wait() {
            self.cond.wait(&mut guard);
            true
        } else {
            false
        }
    }
}
