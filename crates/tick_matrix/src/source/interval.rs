// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use super::TickSource;
use crate::TICK_PERIOD;

/// Paces ticks with the operating system's sleep.
///
/// Deadlines are absolute: tick `n` is due `n` periods after [`open`][TickSource::open], no matter
/// how late earlier ticks were delivered. A late tick is followed by shorter waits until the source
/// is back on schedule, so the tick count never drifts from the monotonic clock.
///
/// # Precision
///
/// Individual ticks are only as precise as the operating system's sleep. Prefer a hardware source
/// where one exists.
#[derive(Debug)]
pub struct IntervalTickSource {
    period: Duration,
    next_deadline: Option<Instant>,
}

impl IntervalTickSource {
    /// Creates a source that ticks every [`TICK_PERIOD`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_period(TICK_PERIOD)
    }

    /// Creates a source that ticks every `period`.
    ///
    /// A zero period is adjusted to [`TICK_PERIOD`].
    #[must_use]
    pub fn with_period(period: Duration) -> Self {
        Self {
            period: if period.is_zero() { TICK_PERIOD } else { period },
            next_deadline: None,
        }
    }

    /// Period between ticks.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    fn schedule_after(&self, instant: Instant) -> Instant {
        // A deadline that cannot be represented is practically never reached.
        instant.checked_add(self.period).unwrap_or(instant)
    }
}

impl Default for IntervalTickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for IntervalTickSource {
    fn open(&mut self) -> io::Result<()> {
        self.next_deadline = Some(self.schedule_after(Instant::now()));
        Ok(())
    }

    #[cfg_attr(test, mutants::skip)] // Timing dependent.
    fn wait(&mut self) -> io::Result<()> {
        let deadline = match self.next_deadline {
            Some(deadline) => deadline,
            None => self.schedule_after(Instant::now()),
        };

        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline.duration_since(now));
        }

        self.next_deadline = Some(self.schedule_after(deadline));
        Ok(())
    }
}
