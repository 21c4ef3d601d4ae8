// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// The run state of a [`TimerMatrix`][crate::TimerMatrix].
///
/// The state only ever moves forward:
///
/// ```text
/// NotStarted -> Running -> Stopping -> Stopped
///      \___________________________/^
/// ```
///
/// A matrix that is shut down before its driver starts goes straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RunState {
    /// The driver has not started yet. Timer registration blocks in this state.
    NotStarted = 0,
    /// The driver is advancing the matrix.
    Running = 1,
    /// Shutdown was requested; the driver is draining waiting timers.
    Stopping = 2,
    /// The driver has exited, or never started before shutdown.
    Stopped = 3,
}

impl RunState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Coordinates startup ordering and shutdown drain between the driver and clients.
///
/// The lock doubles as the global lock that guards slot registration. The state itself is mirrored
/// in an atomic so that the hot paths (`step`, `next`, the driver loop) can read it without locking.
/// Every transition happens under the lock and is followed by a broadcast on `changed`.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    lock: Mutex<()>,
    changed: Condvar,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::NotStarted as u8),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Takes the global lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Blocks until the driver has left `NotStarted` and returns the state observed at that point.
    ///
    /// The guard is handed back so that callers can register under the same critical section that
    /// observed `Running`; a concurrent shutdown cannot slip in between.
    pub fn wait_started(&self) -> (RunState, MutexGuard<'_, ()>) {
        let mut guard = self.lock.lock();

        while self.state() == RunState::NotStarted {
            self.changed.wait(&mut guard);
        }

        (self.state(), guard)
    }

    /// `NotStarted -> Running`. Returns `false` if the matrix has already left `NotStarted`.
    pub fn mark_running(&self) -> bool {
        self.transition(|state| (state == RunState::NotStarted).then_some(RunState::Running))
    }

    /// Requests shutdown and returns the state that was current before the request.
    ///
    /// A running matrix moves to `Stopping` and must be finished by its driver. A matrix whose driver
    /// never started moves straight to `Stopped` so that blocked registrations are released.
    pub fn request_stop(&self) -> RunState {
        let _guard = self.lock.lock();
        let previous = self.state();

        let next = match previous {
            RunState::NotStarted => RunState::Stopped,
            RunState::Running => RunState::Stopping,
            RunState::Stopping | RunState::Stopped => return previous,
        };

        self.state.store(next as u8, Ordering::SeqCst);
        self.changed.notify_all();
        previous
    }

    /// Any state `-> Stopped`.
    pub fn mark_stopped(&self) {
        self.transition(|state| (state != RunState::Stopped).then_some(RunState::Stopped));
    }

    /// Blocks until the matrix reaches `Stopped`.
    pub fn wait_stopped(&self) {
        let mut guard = self.lock.lock();

        while self.state() != RunState::Stopped {
            self.changed.wait(&mut guard);
        }
    }

    fn transition(&self, f: impl FnOnce(RunState) -> Option<RunState>) -> bool {
        let _guard = self.lock.lock();

        match f(self.state()) {
            Some(next) => {
                self.state.store(next as u8, Ordering::SeqCst);
                self.changed.notify_all();
                true
            }
            None => false,
        }
    }
}
