// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The capability set a host binds to its own timer interface table.

use crate::{Readiness, Result};

/// Client operations of an interval timer.
///
/// Hosts that dispatch timers dynamically (for example through a per-timer-instance table of
/// function pointers) can store any implementation as `Box<dyn Timer>`. The semantics of each
/// operation are documented on [`TimerHandle`][crate::TimerHandle].
pub trait Timer: Send {
    /// Steps once and blocks until the timer's next interval boundary.
    ///
    /// # Errors
    ///
    /// Fails once the timer source stops running or after the timer was destroyed.
    fn next(&mut self) -> Result<()>;

    /// Steps to the next interval without waiting.
    ///
    /// # Errors
    ///
    /// Fails if the timer source is not running or the timer was destroyed.
    fn step(&mut self) -> Result<()>;

    /// Discards accumulated drift and steps once.
    ///
    /// # Errors
    ///
    /// Fails if the timer source is not running or the timer was destroyed.
    fn sync(&mut self) -> Result<()>;

    /// Polls whether the interval elapsed, stepping when ready and `advance` is set.
    ///
    /// # Errors
    ///
    /// Fails if the timer source is not running or the timer was destroyed.
    fn check(&mut self, advance: bool) -> Result<Readiness>;

    /// Releases the timer. Later operations fail.
    fn destroy(&mut self);
}

/// Creates [`Timer`]s, the `init` operation of the capability set.
pub trait TimerProvider {
    /// The timer type produced by this provider.
    type Timer: Timer;

    /// Registers a timer that fires every `interval` milliseconds, accounting `samples_per_unit`
    /// samples per elapsed interval.
    ///
    /// # Errors
    ///
    /// Fails if the interval is unsupported or the timer source stopped before it started running.
    fn init(&self, interval: usize, samples_per_unit: u32) -> Result<Self::Timer>;
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TimerHandle, TimerMatrix};

    #[test]
    fn timer_is_object_safe() {
        static_assertions::assert_obj_safe!(Timer);
        static_assertions::assert_impl_all!(TimerHandle: Timer);
        static_assertions::assert_impl_all!(TimerMatrix: TimerProvider);
    }
}
