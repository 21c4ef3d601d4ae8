// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::interface::TimerProvider;
use crate::lifecycle::{Lifecycle, RunState};
use crate::signal::Signal;
use crate::slot::{Position, Slot, SlotSnapshot};
use crate::{Error, MAX_INTERVAL, MAX_TICK, Result, TimerHandle};

/// Selects which slot's wait condition a blocked timer parks on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum WakeStrategy {
    /// Every timer parks on the 1ms slot and re-evaluates its own slot on each base tick.
    ///
    /// The driver broadcasts once per physical tick regardless of how many intervals are in use.
    #[default]
    BaseTick,

    /// Every timer parks on its own slot, which the driver broadcasts whenever it advances that slot.
    ///
    /// Wakes coarse timers less often at the cost of one broadcast per advanced slot.
    PerInterval,
}

/// Options for constructing a [`TimerMatrix`].
///
/// # Examples
///
/// ```
/// use tick_matrix::{MatrixOptions, TimerMatrix, WakeStrategy};
///
/// let matrix = TimerMatrix::with_options(MatrixOptions::new().wake_strategy(WakeStrategy::PerInterval));
/// assert_eq!(matrix.wake_strategy(), WakeStrategy::PerInterval);
/// ```
#[derive(Debug, Clone)]
pub struct MatrixOptions {
    wake_strategy: WakeStrategy,
    tick_ceiling: u32,
}

impl MatrixOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            wake_strategy: WakeStrategy::default(),
            tick_ceiling: MAX_TICK,
        }
    }

    /// Sets how blocked timers are woken up.
    #[must_use]
    pub fn wake_strategy(mut self, wake_strategy: WakeStrategy) -> Self {
        self.wake_strategy = wake_strategy;
        self
    }

    /// Lowers the value at which slot ticks wrap around, so that wraparound can be exercised quickly.
    ///
    /// The ceiling is clamped to `2..=MAX_TICK`.
    #[cfg(any(feature = "test-util", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
    #[must_use]
    pub fn tick_ceiling(mut self, tick_ceiling: u32) -> Self {
        self.tick_ceiling = tick_ceiling.clamp(2, MAX_TICK);
        self
    }
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared synchronization manager: one slot per supported interval plus the run state.
///
/// A matrix is created once per process (or per clock domain) and handed to exactly one
/// [`MatrixDriver`][crate::MatrixDriver], which advances it from a [`TickSource`][crate::TickSource],
/// and to any number of clients, which register [`TimerHandle`]s at the interval they pace at.
///
/// Cloning a matrix is inexpensive (an `Arc` clone) and every clone shares the same slots and run state.
///
/// # Examples
///
/// ```no_run
/// use tick_matrix::{IntervalTickSource, MatrixDriver, TimerMatrix};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let matrix = TimerMatrix::new();
/// let driver = MatrixDriver::new(&matrix, IntervalTickSource::new()).spawn()?;
///
/// // Pace a 20ms audio frame loop at 8 samples per millisecond.
/// let mut timer = matrix.timer(20, 160)?;
/// for _ in 0..50 {
///     timer.next()?;
///     // deliver one frame stamped with timer.sample_count()
/// }
///
/// matrix.shutdown();
/// driver.join().expect("driver thread panicked")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TimerMatrix(Arc<MatrixState>);

#[derive(Debug)]
struct MatrixState {
    // Index 0 is never used; intervals index the slice directly.
    slots: Box<[Slot]>,
    lifecycle: Lifecycle,
    options: MatrixOptions,
    registered: AtomicUsize,
    driver_claimed: AtomicBool,
}

impl TimerMatrix {
    /// Creates a matrix with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MatrixOptions::new())
    }

    /// Creates a matrix with the given options.
    #[must_use]
    pub fn with_options(options: MatrixOptions) -> Self {
        let slots = (0..=MAX_INTERVAL).map(|_| Slot::default()).collect();

        Self(Arc::new(MatrixState {
            slots,
            lifecycle: Lifecycle::new(),
            options,
            registered: AtomicUsize::new(0),
            driver_claimed: AtomicBool::new(false),
        }))
    }

    /// Registers a timer that fires every `interval` milliseconds and accounts `samples_per_unit`
    /// samples per elapsed interval.
    ///
    /// Blocks until the driver is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntervalOutOfRange`] if `interval` is 0 or larger than [`MAX_INTERVAL`], and
    /// [`Error::NotRunning`] if the matrix shut down before or instead of starting.
    pub fn timer(&self, interval: usize, samples_per_unit: u32) -> Result<TimerHandle> {
        TimerHandle::new(self.clone(), interval, samples_per_unit)
    }

    /// Current run state.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.0.lifecycle.state()
    }

    /// Whether the driver is advancing the matrix.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.0.lifecycle.is_running()
    }

    /// Configured wake strategy.
    #[must_use]
    pub fn wake_strategy(&self) -> WakeStrategy {
        self.0.options.wake_strategy
    }

    /// Number of live timers across all intervals.
    #[must_use]
    pub fn registered_timers(&self) -> usize {
        self.0.registered.load(Ordering::SeqCst)
    }

    /// Returns a point-in-time view of the slot for `interval`, or `None` if the interval is unsupported.
    #[must_use]
    pub fn snapshot(&self, interval: usize) -> Option<SlotSnapshot> {
        validate(interval).ok().map(|interval| self.slot(interval).snapshot())
    }

    /// Stops the matrix and blocks until its driver has drained every waiting timer.
    ///
    /// Timers blocked in [`TimerHandle::next`] return [`Error::NotRunning`]; later calls on any
    /// timer fail the same way. Registrations blocked waiting for startup are released with the
    /// same error. Calling this more than once is harmless.
    ///
    /// Must not be called from the driver's own thread while the driver is running.
    pub fn shutdown(&self) {
        match self.0.lifecycle.request_stop() {
            RunState::NotStarted => warn!("timer matrix shut down before its driver started"),
            RunState::Running | RunState::Stopping => self.0.lifecycle.wait_stopped(),
            RunState::Stopped => {}
        }
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.0.lifecycle
    }

    pub(crate) fn tick_ceiling(&self) -> u32 {
        self.0.options.tick_ceiling
    }

    /// The slot for an interval already validated by registration.
    pub(crate) fn slot(&self, interval: usize) -> &Slot {
        &self.0.slots[interval]
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.0.slots.iter().enumerate().skip(1)
    }

    /// The signal a timer at `interval` parks on.
    pub(crate) fn wait_signal(&self, interval: usize) -> &Signal {
        match self.0.options.wake_strategy {
            WakeStrategy::BaseTick => self.slot(1).signal_or_init(),
            WakeStrategy::PerInterval => self.slot(interval).signal_or_init(),
        }
    }

    /// Claims the single driver seat. Returns `false` if a driver already claimed it.
    pub(crate) fn claim_driver(&self) -> bool {
        !self.0.driver_claimed.swap(true, Ordering::SeqCst)
    }

    /// Waits for the driver, then adds a timer to the slot for `interval` and returns the slot's position
    /// as observed right after registering.
    pub(crate) fn register(&self, interval: usize) -> Result<Position> {
        let interval = validate(interval)?;
        let (state, _guard) = self.0.lifecycle.wait_started();

        if state != RunState::Running {
            return Err(Error::NotRunning);
        }

        let slot = self.slot(interval);
        let active = slot.register();
        self.0.registered.fetch_add(1, Ordering::SeqCst);

        debug!(interval, active, "timer registered");

        Ok(slot.position())
    }

    /// Removes a timer from the slot for `interval`, reclaiming the slot's tick if it was the last one.
    pub(crate) fn deregister(&self, interval: usize) {
        let _guard = self.0.lifecycle.lock();

        let active = self.slot(interval).deregister();
        _ = self
            .0
            .registered
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |registered| registered.checked_sub(1));

        if active == 0 {
            debug!(interval, "last timer deregistered, slot reclaimed");
        } else {
            debug!(interval, active, "timer deregistered");
        }
    }
}

impl Default for TimerMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerProvider for TimerMatrix {
    type Timer = TimerHandle;

    fn init(&self, interval: usize, samples_per_unit: u32) -> Result<Self::Timer> {
        self.timer(interval, samples_per_unit)
    }
}

fn validate(interval: usize) -> Result<usize> {
    if (1..=MAX_INTERVAL).contains(&interval) {
        Ok(interval)
    } else {
        Err(Error::interval_out_of_range(interval))
    }
}
