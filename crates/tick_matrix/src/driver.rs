// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::matrix::WakeStrategy;
use crate::source::TickSource;
use crate::{Error, MAX_INTERVAL, Result, TICK_PERIOD, TimerMatrix};

/// Samples per physical tick for an 8 kHz clock ticking every millisecond.
pub const DEFAULT_SAMPLES_PER_INTERVAL: u32 = 8;

/// What the driver does when its tick source fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailurePolicy {
    /// Log every failure and keep going.
    ///
    /// A source that cannot be opened still lets the matrix start, and a failed wait skips the tick.
    /// Timers stop advancing for as long as the source keeps failing.
    Degrade,

    /// Refuse to start if the source cannot be opened or configured, and stop the matrix after
    /// `max_consecutive_failures` failed waits or acknowledgments in a row.
    FailFast {
        /// Consecutive failures tolerated before stopping. Values below 1 are treated as 1.
        max_consecutive_failures: u32,
    },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::FailFast {
            max_consecutive_failures: 3,
        }
    }
}

/// Options for a [`MatrixDriver`].
#[derive(Debug, Clone)]
pub struct DriverOptions {
    samples_per_interval: u32,
    failure_policy: FailurePolicy,
    thread_name: String,
}

impl DriverOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples_per_interval: DEFAULT_SAMPLES_PER_INTERVAL,
            failure_policy: FailurePolicy::default(),
            thread_name: "tick-matrix-driver".to_string(),
        }
    }

    /// Sets the value passed to [`TickSource::configure`].
    #[must_use]
    pub fn samples_per_interval(mut self, samples_per_interval: u32) -> Self {
        self.samples_per_interval = samples_per_interval;
        self
    }

    /// Sets how tick source failures are handled.
    #[must_use]
    pub fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Sets the name of the thread started by [`MatrixDriver::spawn`].
    #[must_use]
    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Advances a [`TimerMatrix`] once per tick of a [`TickSource`].
///
/// Exactly one driver runs per matrix. On every physical tick the driver advances the 1ms slot and
/// every slot whose interval divides the free-running millisecond counter and that has timers
/// registered, then wakes blocked timers. Waking never blocks the driver: if a timer holds the lock
/// of the wait condition at that moment, the wakeup is skipped and the timer catches up on the
/// next tick.
///
/// Most hosts call [`spawn`][Self::spawn]. Hosts that own their tick loop call
/// [`start`][Self::start], then [`advance`][Self::advance] once per tick, and
/// [`finish`][Self::finish] when [`is_running`][Self::is_running] turns `false`.
///
/// Dropping a started driver stops the matrix.
#[derive(Debug)]
pub struct MatrixDriver<S: TickSource> {
    matrix: TimerMatrix,
    source: S,
    options: DriverOptions,
    millis: usize,
    failures: u32,
    started: bool,
    finished: bool,
}

impl<S: TickSource> MatrixDriver<S> {
    /// Creates a driver for `matrix` with default options.
    #[must_use]
    pub fn new(matrix: &TimerMatrix, source: S) -> Self {
        Self::with_options(matrix, source, DriverOptions::new())
    }

    /// Creates a driver for `matrix` with the given options.
    #[must_use]
    pub fn with_options(matrix: &TimerMatrix, source: S, options: DriverOptions) -> Self {
        Self {
            matrix: matrix.clone(),
            source,
            options,
            millis: 0,
            failures: 0,
            started: false,
            finished: false,
        }
    }

    /// Opens and configures the tick source, then moves the matrix to running.
    ///
    /// Blocked timer registrations are released once this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if another driver already started the matrix.
    /// - [`Error::TickSource`] if the source cannot be prepared under [`FailurePolicy::FailFast`].
    ///   The matrix is stopped.
    /// - [`Error::NotRunning`] if the matrix was shut down before it started.
    pub fn start(&mut self) -> Result<()> {
        if self.started || !self.matrix.claim_driver() {
            return Err(Error::AlreadyStarted);
        }

        self.started = true;

        if let Err(error) = self.prepare_source() {
            error!(%error, "unable to prepare the tick source");

            if matches!(self.options.failure_policy, FailurePolicy::FailFast { .. }) {
                self.finished = true;
                self.matrix.lifecycle().mark_stopped();
                return Err(Error::TickSource(error));
            }
        }

        self.matrix.slot(1).signal_or_init();

        if !self.matrix.lifecycle().mark_running() {
            self.finished = true;
            return Err(Error::NotRunning);
        }

        info!(
            samples_per_interval = self.options.samples_per_interval,
            wake_strategy = ?self.matrix.wake_strategy(),
            failure_policy = ?self.options.failure_policy,
            "timer matrix driver started"
        );

        Ok(())
    }

    /// Whether the matrix is still running. Hosts driving the loop themselves stop when this turns `false`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.matrix.is_running()
    }

    /// Advances the matrix by one physical tick and wakes blocked timers.
    pub fn advance(&mut self) {
        self.millis += 1;

        let ceiling = self.matrix.tick_ceiling();
        let strategy = self.matrix.wake_strategy();

        let base = self.matrix.slot(1);
        base.advance(ceiling);

        for interval in 2..=MAX_INTERVAL {
            if self.millis % interval != 0 {
                continue;
            }

            let slot = self.matrix.slot(interval);
            if slot.advance_if_active(ceiling).is_none() {
                continue;
            }

            if strategy == WakeStrategy::PerInterval
                && let Some(signal) = slot.signal()
            {
                signal.try_broadcast();
            }
        }

        // Only after every due slot moved: a coarse timer woken here must observe its own slot's new tick.
        if self.matrix.registered_timers() > 0
            && let Some(signal) = base.signal()
        {
            signal.try_broadcast();
        }

        if self.millis == MAX_INTERVAL {
            self.millis = 0;
        }
    }

    /// Stops the matrix if it is still running, wakes every blocked timer, and marks the matrix stopped.
    ///
    /// Completes a pending [`TimerMatrix::shutdown`].
    pub fn finish(mut self) {
        self.drain();
    }

    /// Starts the driver and advances the matrix on every tick of the source until shutdown.
    ///
    /// # Errors
    ///
    /// Returns the [`start`][Self::start] error, or [`Error::TickSourceFailed`] if the source failed
    /// too often under [`FailurePolicy::FailFast`]. Blocked timers are released in every case.
    #[cfg_attr(test, mutants::skip)] // Mutations of the loop hang instead of failing.
    pub fn run(mut self) -> Result<()> {
        self.start()?;

        let mut outcome = Ok(());

        while self.matrix.is_running() {
            if let Err(error) = self.pump() {
                outcome = Err(error);
                break;
            }
        }

        self.drain();
        outcome
    }

    /// Runs the driver on a new thread. See [`run`][Self::run].
    ///
    /// # Errors
    ///
    /// Returns the error of the operating system if the thread cannot be created.
    pub fn spawn(self) -> io::Result<JoinHandle<Result<()>>>
    where
        S: Send + 'static,
    {
        thread::Builder::new()
            .name(self.options.thread_name.clone())
            .spawn(move || self.run())
    }

    fn prepare_source(&mut self) -> io::Result<()> {
        self.source.open()?;
        self.source.configure(self.options.samples_per_interval)
    }

    /// Waits for one tick from the source and advances the matrix.
    fn pump(&mut self) -> Result<()> {
        if let Err(error) = self.source.wait() {
            self.on_source_failure("wait", error)?;
            // A failing source usually fails immediately; pace the retries at the tick rate.
            thread::sleep(TICK_PERIOD);
            return Ok(());
        }

        match self.source.acknowledge() {
            Ok(()) => self.failures = 0,
            Err(error) => self.on_source_failure("acknowledge", error)?,
        }

        self.advance();
        Ok(())
    }

    fn on_source_failure(&mut self, operation: &'static str, error: io::Error) -> Result<()> {
        self.failures = self.failures.saturating_add(1);
        error!(operation, failures = self.failures, %error, "tick source failure");

        match self.options.failure_policy {
            FailurePolicy::FailFast {
                max_consecutive_failures,
            } if self.failures >= max_consecutive_failures.max(1) => {
                warn!(failures = self.failures, "tick source keeps failing, stopping the timer matrix");

                Err(Error::TickSourceFailed {
                    failures: self.failures,
                    source: error,
                })
            }
            _ => Ok(()),
        }
    }

    fn drain(&mut self) {
        if !self.started || self.finished {
            return;
        }

        self.finished = true;
        self.matrix.lifecycle().request_stop();

        for (_, slot) in self.matrix.slots() {
            if let Some(signal) = slot.signal() {
                signal.broadcast();
            }
        }

        self.matrix.lifecycle().mark_stopped();
        info!("timer matrix driver exiting");
    }
}

impl<S: TickSource> Drop for MatrixDriver<S> {
    fn drop(&mut self) {
        self.drain();
    }
}
