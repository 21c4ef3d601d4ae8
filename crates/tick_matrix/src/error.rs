// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;

use thiserror::Error;

use crate::MAX_INTERVAL;

/// An error that can occur when registering, driving, or operating interval timers.
///
/// Client timer operations fail "softly": [`Error::NotRunning`] and [`Error::NotReady`] mean the
/// timer is currently unusable, not that anything is broken. Callers are expected to treat them as
/// a signal to stop pacing, typically because the matrix is shutting down.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested interval is outside of the range supported by the matrix.
    ///
    /// Valid intervals are `1..=MAX_INTERVAL` milliseconds.
    #[error("interval {interval}ms is outside of the supported range 1..={max}ms")]
    IntervalOutOfRange {
        /// The rejected interval.
        interval: usize,
        /// The largest supported interval.
        max: usize,
    },

    /// The matrix is not running, either because the driver has not started yet
    /// or because shutdown has been requested.
    #[error("the timer matrix is not running")]
    NotRunning,

    /// The timer has been destroyed and can no longer be used.
    #[error("the timer has been destroyed")]
    NotReady,

    /// The driver was started more than once for the same matrix.
    #[error("a driver has already been started for this timer matrix")]
    AlreadyStarted,

    /// The tick source could not be opened or configured.
    #[error("the tick source could not be prepared: {0}")]
    TickSource(#[source] io::Error),

    /// The tick source failed repeatedly while the driver was running and the driver stopped.
    #[error("the tick source failed {failures} consecutive times")]
    TickSourceFailed {
        /// Number of consecutive failures observed before giving up.
        failures: u32,
        /// The last failure reported by the tick source.
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) const fn interval_out_of_range(interval: usize) -> Self {
        Self::IntervalOutOfRange {
            interval,
            max: MAX_INTERVAL,
        }
    }

    /// Returns `true` if the error means the timer is merely unusable right now
    /// rather than misconfigured or broken.
    #[must_use]
    pub const fn is_soft(&self) -> bool {
        matches!(self, Self::NotRunning | Self::NotReady)
    }
}

/// A specialized `Result` for timer matrix operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn interval_out_of_range_message() {
        let error = Error::interval_out_of_range(0);

        assert!(matches!(error, Error::IntervalOutOfRange { interval: 0, max: MAX_INTERVAL }));
        assert_eq!(error.to_string(), "interval 0ms is outside of the supported range 1..=3600ms");
    }

    #[test]
    fn soft_errors() {
        assert!(Error::NotRunning.is_soft());
        assert!(Error::NotReady.is_soft());
        assert!(!Error::AlreadyStarted.is_soft());
        assert!(!Error::interval_out_of_range(4000).is_soft());
    }

    #[test]
    fn tick_source_failed_exposes_source() {
        let error = Error::TickSourceFailed {
            failures: 3,
            source: io::Error::other("device gone"),
        };

        assert_eq!(error.to_string(), "the tick source failed 3 consecutive times");
        assert_eq!(error.source().unwrap().to_string(), "device gone");
    }

    #[test]
    fn tick_source_exposes_source() {
        let error = Error::TickSource(io::Error::new(io::ErrorKind::NotFound, "no such device"));

        assert_eq!(error.to_string(), "the tick source could not be prepared: no such device");
        assert_eq!(error.source().unwrap().to_string(), "no such device");
        assert!(!error.is_soft());
    }
}
