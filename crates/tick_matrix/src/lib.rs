// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(
    test,
    allow(
        clippy::arithmetic_side_effects,
        clippy::unwrap_used,
        reason = "allow these lints in tests to improve the readability of the tests"
    )
)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Drift-free interval timers for media pipelines, fanned out from a single periodic tick source.
//!
//! Many consumers in a media stack need to run "every N milliseconds" in lockstep: a 20ms audio
//! frame loop, a 10ms jitter buffer, a 30ms video pacer. Sleeping independently lets each of them
//! drift. This crate instead drives one shared [`TimerMatrix`] from one 1ms [`TickSource`] and lets
//! every consumer derive its pace from it, so all timers of the same interval stay aligned and each
//! timer reports a monotonically growing sample timestamp.
//!
//! # Quick Start
//!
//! ```no_run
//! use tick_matrix::{IntervalTickSource, MatrixDriver, TimerMatrix};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let matrix = TimerMatrix::new();
//! let driver = MatrixDriver::new(&matrix, IntervalTickSource::new()).spawn()?;
//!
//! // 20ms frames of 8kHz audio: 160 samples per frame.
//! let mut timer = matrix.timer(20, 160)?;
//! for _ in 0..10 {
//!     timer.next()?;
//!     println!("frame at sample {}", timer.sample_count());
//! }
//!
//! drop(timer);
//! matrix.shutdown();
//! driver.join().expect("driver thread panicked")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Overview
//!
//! - [`TimerMatrix`] - The shared state: one slot per interval from 1ms to [`MAX_INTERVAL`], plus the
//!   run state. Cheap to clone.
//! - [`MatrixDriver`] - Advances the matrix on every tick of a [`TickSource`], usually on its own
//!   thread via [`MatrixDriver::spawn`]. Exactly one driver runs per matrix.
//! - [`TimerHandle`] - A client timer. [`next`][TimerHandle::next] paces a loop,
//!   [`check`][TimerHandle::check] polls, [`sync`][TimerHandle::sync] discards drift.
//! - [`Timer`] and [`TimerProvider`] - The same operations as traits, for hosts that dispatch timers
//!   dynamically.
//! - [`TickSource`] - The periodic signal. [`IntervalTickSource`] sleeps on the monotonic clock;
//!   [`ChannelTickSource`] ticks whenever its [`TickSender`] pulses.
//! - [`Error`] - What can go wrong. [`Error::is_soft`] separates "the timer source is gone" from
//!   programming errors.
//!
//! # Lifecycle
//!
//! Registering a timer blocks until the driver is running. [`TimerMatrix::shutdown`] stops the
//! matrix: the driver wakes every blocked timer, which then returns [`Error::NotRunning`], and
//! `shutdown` returns once the driver has exited. Shutting down a matrix whose driver never started
//! releases blocked registrations immediately.
//!
//! # Testing
//!
//! [`ChannelTickSource`] makes the driver deterministic: each [`TickSender::pulse`] is exactly one
//! tick. Hosts that want full control can skip the driver thread and call
//! [`MatrixDriver::advance`] directly.
//!
//! # Features
//!
//! - **`test-util`** - Enables [`MatrixOptions::tick_ceiling`], which lowers the wraparound point of
//!   slot ticks so that rollover handling can be tested without running for weeks.
//!   **Only enable this in `dev-dependencies`.**

use std::time::Duration;

mod driver;
mod error;
mod interface;
mod lifecycle;
mod matrix;
mod signal;
mod slot;
pub mod source;
mod timer;

pub use driver::{DEFAULT_SAMPLES_PER_INTERVAL, DriverOptions, FailurePolicy, MatrixDriver};
pub use error::{Error, Result};
pub use interface::{Timer, TimerProvider};
pub use lifecycle::RunState;
pub use matrix::{MatrixOptions, TimerMatrix, WakeStrategy};
pub use slot::SlotSnapshot;
#[doc(inline)]
pub use source::{ChannelTickSource, IntervalTickSource, TickSender, TickSource};
pub use timer::{Readiness, TimerHandle};

/// Largest supported timer interval, in milliseconds.
pub const MAX_INTERVAL: usize = 3600;

/// Slot ticks wrap to 0 when they reach this value, leaving headroom below `u32::MAX` for the
/// reference arithmetic of timers.
pub const MAX_TICK: u32 = u32::MAX - 1024;

/// Period of one physical tick.
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants() {
        assert_eq!(MAX_INTERVAL, 3600);
        assert_eq!(u32::MAX - MAX_TICK, 1024);
        assert_eq!(TICK_PERIOD.as_millis(), 1);
    }
}
