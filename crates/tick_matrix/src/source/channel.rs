// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

use super::TickSource;

/// Receives ticks pushed by a [`TickSender`] on another thread.
///
/// Use this to follow an external clock the host already observes, such as a sound card's
/// period interrupt or an incoming media stream, or to drive a matrix deterministically in tests.
///
/// The channel is a rendezvous: [`TickSender::pulse`] returns once the driver has taken the tick.
/// When every sender is dropped, [`wait`][TickSource::wait] fails with
/// [`io::ErrorKind::BrokenPipe`] and the driver applies its failure policy.
///
/// # Examples
///
/// ```no_run
/// use std::thread;
/// use std::time::Duration;
///
/// use tick_matrix::{ChannelTickSource, MatrixDriver, TimerMatrix};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let matrix = TimerMatrix::new();
/// let (source, sender) = ChannelTickSource::new();
/// let driver = MatrixDriver::new(&matrix, source).spawn()?;
///
/// thread::spawn(move || {
///     // Forward an external 1ms clock until the driver goes away.
///     while sender.pulse().is_ok() {
///         thread::sleep(Duration::from_millis(1));
///     }
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChannelTickSource {
    receiver: Receiver<()>,
}

/// Pushes ticks into a [`ChannelTickSource`].
///
/// Cloning a sender is inexpensive; all clones feed the same source.
#[derive(Debug, Clone)]
pub struct TickSender {
    sender: SyncSender<()>,
}

impl ChannelTickSource {
    /// Creates a connected source and sender pair.
    #[must_use]
    pub fn new() -> (Self, TickSender) {
        let (sender, receiver) = sync_channel(0);

        (Self { receiver }, TickSender { sender })
    }
}

impl TickSender {
    /// Delivers one tick, blocking until the driver takes it.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::BrokenPipe`] once the source has been dropped, typically because the
    /// driver exited.
    pub fn pulse(&self) -> io::Result<()> {
        self.sender
            .send(())
            .map_err(|error| io::Error::new(io::ErrorKind::BrokenPipe, error))
    }
}

impl TickSource for ChannelTickSource {
    fn wait(&mut self) -> io::Result<()> {
        self.receiver
            .recv()
            .map_err(|error| io::Error::new(io::ErrorKind::BrokenPipe, error))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(ChannelTickSource: Send);
        static_assertions::assert_impl_all!(TickSender: Send, Sync, Clone);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn pulses_are_received_in_order() {
        let (mut source, sender) = ChannelTickSource::new();

        let pulser = thread::spawn(move || {
            for _ in 0..3 {
                sender.pulse().unwrap();
            }
        });

        for _ in 0..3 {
            source.wait().unwrap();
        }

        pulser.join().unwrap();
    }

    #[test]
    fn wait_fails_when_senders_dropped() {
        let (mut source, sender) = ChannelTickSource::new();
        drop(sender);

        assert_eq!(source.wait().unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn pulse_fails_when_source_dropped() {
        let (source, sender) = ChannelTickSource::new();
        drop(source);

        assert_eq!(sender.pulse().unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
