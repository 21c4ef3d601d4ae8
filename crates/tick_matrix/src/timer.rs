// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::thread;

use tracing::trace;

use crate::interface::Timer;
use crate::slot::Position;
use crate::{Error, Result, TimerMatrix};

/// Outcome of a non-blocking [`TimerHandle::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Readiness {
    /// The timer's interval has elapsed.
    Ready,
    /// The timer's interval has not elapsed yet; [`TimerHandle::diff`] tells by how many ticks.
    Pending,
}

impl Readiness {
    /// Returns `true` for [`Readiness::Ready`].
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Where a timer stands relative to its slot.
///
/// All arithmetic wraps in 32 bits. `start` may sit "below zero" (wrapped) right after a
/// resynchronization; only the difference `reference - start` is ever interpreted, and it is
/// never zero right after any resynchronization point.
///
/// A rollover rebases `start`, so the samples reported before it are kept in `carried` and the
/// reported sample count keeps growing across generations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cursor {
    /// Tick the timer is waiting for.
    reference: u32,
    /// Baseline the sample count is measured from.
    start: u32,
    /// Last slot generation the timer has caught up with.
    roll: u32,
    /// Samples accounted in earlier generations.
    carried: u32,
    /// Sample count returned by the last step.
    reported: u32,
}

impl Cursor {
    /// Seeds a fresh timer two ticks behind the slot so that the first step accounts for a full unit
    /// without waiting for the driver.
    const fn seed(position: Position) -> Self {
        Self {
            reference: position.tick,
            start: position.tick.wrapping_sub(2),
            roll: position.roll,
            carried: 0,
            reported: 0,
        }
    }

    /// Catches up with one generation if the slot wrapped since the timer last looked.
    ///
    /// Returns whether the cursor was rebased.
    fn rebase_on_roll(&mut self, position: Position) -> bool {
        if self.roll >= position.roll {
            return false;
        }

        self.roll = self.roll.wrapping_add(1);
        self.reference = position.tick;
        self.start = position.tick.wrapping_sub(1);
        self.carried = self.reported;
        true
    }

    /// Signed distance from the slot's tick to the reference. Negative when the timer is behind.
    const fn drift(&self, tick: u32) -> i32 {
        self.reference.wrapping_sub(tick).cast_signed()
    }

    /// Ticks left until the reference is reached, or 0 if it already was.
    const fn remaining(&self, tick: u32) -> u32 {
        self.reference.saturating_sub(tick)
    }

    /// Accounts the samples elapsed since `start` on top of the carried samples and moves the
    /// reference one tick ahead.
    ///
    /// A sample count that does not fit in 32 bits is replaced by a single unit and the baseline is
    /// moved right behind the reference, so the next step measures from there.
    fn step(&mut self, samples_per_unit: u32) -> u32 {
        let units = self.reference.wrapping_sub(self.start);

        let samples = match u32::try_from(u64::from(samples_per_unit) * u64::from(units)) {
            Ok(samples) => samples,
            Err(_) => {
                self.start = self.reference.wrapping_sub(1);
                samples_per_unit
            }
        };

        self.reference = self.reference.wrapping_add(1);
        // The sample counter is a 32-bit timestamp and wraps like one.
        self.reported = self.carried.wrapping_add(samples);
        self.reported
    }
}

/// A client timer registered at one interval of a [`TimerMatrix`].
///
/// The handle tracks a reference tick it is waiting for and a sample count that grows by
/// `samples_per_unit` for every interval it steps over. Pace a loop with [`next`][Self::next],
/// poll with [`check`][Self::check], and realign with [`sync`][Self::sync].
///
/// A handle belongs to one thread at a time; every operation takes `&mut self`. Dropping the handle
/// deregisters it, which is the same as calling [`destroy`][Self::destroy].
///
/// # Examples
///
/// ```no_run
/// use tick_matrix::{Readiness, TimerMatrix};
///
/// # fn poll(matrix: &TimerMatrix) -> tick_matrix::Result<()> {
/// let mut timer = matrix.timer(10, 80)?;
///
/// loop {
///     if timer.check(true)? == Readiness::Ready {
///         // 10ms elapsed; timer.sample_count() is the new timestamp
///         # break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TimerHandle {
    matrix: TimerMatrix,
    interval: usize,
    samples_per_unit: u32,
    cursor: Cursor,
    ready: bool,
    tick: u32,
    diff: u32,
    sample_count: u32,
}

impl TimerHandle {
    pub(crate) fn new(matrix: TimerMatrix, interval: usize, samples_per_unit: u32) -> Result<Self> {
        let position = matrix.register(interval)?;

        Ok(Self {
            matrix,
            interval,
            samples_per_unit,
            cursor: Cursor::seed(position),
            ready: true,
            tick: position.tick,
            diff: 0,
            sample_count: samples_per_unit,
        })
    }

    /// Interval of the timer, in milliseconds.
    #[must_use]
    pub fn interval(&self) -> usize {
        self.interval
    }

    /// Samples accounted per elapsed interval.
    #[must_use]
    pub fn samples_per_unit(&self) -> u32 {
        self.samples_per_unit
    }

    /// Sample timestamp computed by the last successful step.
    ///
    /// Grows by `samples_per_unit` per elapsed interval, including across slot wraparounds, and
    /// wraps like any 32-bit media timestamp.
    #[must_use]
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Slot tick observed by the last `check` or resynchronization.
    #[must_use]
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Ticks that were still outstanding at the last `check`.
    #[must_use]
    pub fn diff(&self) -> u32 {
        self.diff
    }

    /// Tick the timer is currently waiting for.
    #[must_use]
    pub fn reference(&self) -> u32 {
        self.cursor.reference
    }

    /// Whether the timer can still be used, i.e. it has not been destroyed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Accounts the samples of the current position and moves the reference one interval ahead
    /// without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the timer was destroyed and [`Error::NotRunning`] if the matrix
    /// is not running. The timer is left untouched in both cases.
    pub fn step(&mut self) -> Result<()> {
        self.ensure_usable()?;
        self.rebase_on_roll();
        self.sample_count = self.cursor.step(self.samples_per_unit);
        Ok(())
    }

    /// Steps once and blocks until the slot reaches the new reference.
    ///
    /// A timer that fell more than one tick behind (because it was not called for a while) is first
    /// resynchronized to the current tick instead of returning immediately several times in a row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] once the matrix stops, including while blocked, and
    /// [`Error::NotReady`] if the timer was destroyed.
    #[cfg_attr(test, mutants::skip)] // Mutations of the wait loop hang instead of failing.
    pub fn next(&mut self) -> Result<()> {
        self.ensure_usable()?;

        let tick = self.matrix.slot(self.interval).tick();
        if self.cursor.drift(tick) < -1 {
            self.cursor.reference = tick;
            self.tick = tick;
        }

        self.step()?;

        let slot = self.matrix.slot(self.interval);
        let signal = self.matrix.wait_signal(self.interval);
        let lifecycle = self.matrix.lifecycle();

        while lifecycle.is_running() && slot.tick() < self.cursor.reference {
            if self.cursor.rebase_on_roll(slot.position()) {
                trace!(interval = self.interval, roll = self.cursor.roll, "timer rebased after wraparound");
            }

            thread::yield_now();

            let reference = self.cursor.reference;
            signal.wait_if(|| lifecycle.is_running() && slot.tick() < reference);
        }

        if lifecycle.is_running() {
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    /// Discards any drift by moving the reference to the slot's current tick, then steps once.
    ///
    /// # Errors
    ///
    /// Same as [`step`][Self::step].
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_usable()?;

        let tick = self.matrix.slot(self.interval).tick();
        self.cursor.reference = tick;
        self.tick = tick;

        self.step()
    }

    /// Polls whether the timer's interval has elapsed, never blocking.
    ///
    /// When ready and `advance` is `true`, the timer also steps to the next interval.
    /// Polling without advancing does not change the verdict until the slot ticks again.
    ///
    /// # Errors
    ///
    /// Same as [`step`][Self::step].
    pub fn check(&mut self, advance: bool) -> Result<Readiness> {
        self.ensure_usable()?;
        self.rebase_on_roll();

        let tick = self.matrix.slot(self.interval).tick();
        self.tick = tick;
        self.diff = self.cursor.remaining(tick);

        if self.diff != 0 {
            return Ok(Readiness::Pending);
        }

        if advance {
            self.step()?;
        }

        Ok(Readiness::Ready)
    }

    /// Marks the timer unusable and deregisters it from its slot.
    ///
    /// Calling this more than once has no further effect.
    pub fn destroy(&mut self) {
        if !self.ready {
            return;
        }

        self.ready = false;
        self.matrix.deregister(self.interval);
    }

    fn ensure_usable(&self) -> Result<()> {
        if !self.ready {
            return Err(Error::NotReady);
        }

        if !self.matrix.is_running() {
            return Err(Error::NotRunning);
        }

        Ok(())
    }

    fn rebase_on_roll(&mut self) {
        let position = self.matrix.slot(self.interval).position();

        if self.cursor.rebase_on_roll(position) {
            trace!(interval = self.interval, roll = self.cursor.roll, "timer rebased after wraparound");
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Timer for TimerHandle {
    fn next(&mut self) -> Result<()> {
        Self::next(self)
    }

    fn step(&mut self) -> Result<()> {
        Self::step(self)
    }

    fn sync(&mut self) -> Result<()> {
        Self::sync(self)
    }

    fn check(&mut self, advance: bool) -> Result<Readiness> {
        Self::check(self, advance)
    }

    fn destroy(&mut self) {
        Self::destroy(self);
    }
}
