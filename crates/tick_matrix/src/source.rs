// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Sources of physical ticks that pace a [`MatrixDriver`][crate::MatrixDriver].
//!
//! The driver owns its source and calls it from a single thread:
//!
//! 1. [`TickSource::open`] and [`TickSource::configure`] once, before the matrix starts running.
//! 2. [`TickSource::wait`] followed by [`TickSource::acknowledge`] once per physical tick.
//!
//! Hardware clock devices implement this trait directly. The crate ships two software sources:
//!
//! - [`IntervalTickSource`] paces ticks with the operating system's sleep on absolute deadlines, for
//!   hosts without a hardware clock.
//! - [`ChannelTickSource`] receives ticks pushed from another thread through a [`TickSender`], for
//!   hosts that follow an external clock of their own, and for tests.

use std::io;

mod channel;
mod interval;

pub use channel::{ChannelTickSource, TickSender};
pub use interval::IntervalTickSource;

/// A source of physical ticks, nominally one per [`TICK_PERIOD`][crate::TICK_PERIOD].
pub trait TickSource {
    /// Opens the underlying device.
    ///
    /// # Errors
    ///
    /// Returns the device's error if it cannot be opened.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Configures the device to produce one tick per `samples_per_interval` samples of its clock.
    ///
    /// # Errors
    ///
    /// Returns the device's error if it rejects the configuration.
    fn configure(&mut self, samples_per_interval: u32) -> io::Result<()> {
        _ = samples_per_interval;
        Ok(())
    }

    /// Blocks until the next tick.
    ///
    /// # Errors
    ///
    /// Returns the device's error if no tick could be awaited. The driver does not advance the matrix
    /// for a failed wait.
    fn wait(&mut self) -> io::Result<()>;

    /// Acknowledges the tick returned by the last [`wait`][Self::wait].
    ///
    /// # Errors
    ///
    /// Returns the device's error if the acknowledgment fails. The tick still counts.
    fn acknowledge(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: TickSource + ?Sized> TickSource for Box<S> {
    fn open(&mut self) -> io::Result<()> {
        (**self).open()
    }

    fn configure(&mut self, samples_per_interval: u32) -> io::Result<()> {
        (**self).configure(samples_per_interval)
    }

    fn wait(&mut self) -> io::Result<()> {
        (**self).wait()
    }

    fn acknowledge(&mut self) -> io::Result<()> {
        (**self).acknowledge()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counting {
        waits: usize,
    }

    impl TickSource for Counting {
        fn wait(&mut self) -> io::Result<()> {
            self.waits += 1;
            Ok(())
        }
    }

    #[test]
    fn default_methods_succeed() {
        let mut source = Counting::default();

        source.open().unwrap();
        source.configure(8).unwrap();
        source.wait().unwrap();
        source.acknowledge().unwrap();

        assert_eq!(source.waits, 1);
    }

    #[test]
    fn boxed_source_forwards() {
        let mut source: Box<dyn TickSource> = Box::new(Counting::default());

        source.open().unwrap();
        source.wait().unwrap();
        source.wait().unwrap();
        source.acknowledge().unwrap();
    }
}
