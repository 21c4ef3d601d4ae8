// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(clippy::unwrap_used, reason = "test code")]

//! End-to-end scenarios with a driver running on its own thread.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tick_matrix::{
    ChannelTickSource, DriverOptions, Error, FailurePolicy, IntervalTickSource, MatrixDriver, MatrixOptions, Readiness,
    RunState, TICK_PERIOD, TickSender, Timer, TimerMatrix, TimerProvider, WakeStrategy,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `f` on a separate thread and panics if it does not finish within [`TEST_TIMEOUT`].
fn within_timeout<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (sender, receiver) = mpsc::channel();

    thread::spawn(move || {
        let result = f();
        _ = sender.send(result);
    });

    receiver.recv_timeout(TEST_TIMEOUT).expect("scenario timed out or panicked")
}

/// Pulses every tick period until the driver goes away.
fn pulse_forever(sender: TickSender) -> JoinHandle<()> {
    thread::spawn(move || {
        while sender.pulse().is_ok() {
            thread::sleep(TICK_PERIOD);
        }
    })
}

fn spin_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_TIMEOUT;

    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::yield_now();
    }
}

struct Running {
    matrix: TimerMatrix,
    driver: JoinHandle<tick_matrix::Result<()>>,
}

impl Running {
    fn start(options: MatrixOptions) -> Self {
        let matrix = TimerMatrix::with_options(options);
        let (source, sender) = ChannelTickSource::new();
        let driver = MatrixDriver::new(&matrix, source).spawn().unwrap();
        pulse_forever(sender);

        Self { matrix, driver }
    }

    fn stop(self) -> tick_matrix::Result<()> {
        self.matrix.shutdown();
        self.driver.join().unwrap()
    }
}

fn pace<T: Timer>(mut timer: T, iterations: usize) -> T {
    for _ in 0..iterations {
        timer.next().unwrap();
    }

    timer
}

#[test]
#[cfg_attr(miri, ignore)]
fn clients_pace_at_their_interval() {
    within_timeout(|| {
        for strategy in [WakeStrategy::BaseTick, WakeStrategy::PerInterval] {
            let running = Running::start(MatrixOptions::new().wake_strategy(strategy));

            let clients: Vec<_> = [1, 2, 5, 10, 10]
                .into_iter()
                .map(|interval| {
                    let matrix = running.matrix.clone();
                    thread::spawn(move || {
                        let mut timer = matrix.init(interval, 8).unwrap();
                        let mut previous = timer.sample_count();

                        for _ in 0..5 {
                            timer.next().unwrap();

                            // The wait only ends once the slot reached the reference.
                            assert!(matrix.snapshot(interval).unwrap().tick() >= timer.reference());

                            let current = timer.sample_count();
                            assert!(current > previous);
                            assert_eq!(current % 8, 0);
                            previous = current;
                        }
                    })
                })
                .collect();

            for client in clients {
                client.join().unwrap();
            }

            assert_eq!(running.matrix.registered_timers(), 0);
            running.stop().unwrap();
        }
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn coarse_slots_advance_at_a_fraction_of_the_base_rate() {
    within_timeout(|| {
        let running = Running::start(MatrixOptions::new());
        let matrix = running.matrix.clone();

        let one = thread::spawn({
            let matrix = matrix.clone();
            move || pace(matrix.timer(1, 8).unwrap(), 40)
        });
        let two = thread::spawn({
            let matrix = matrix.clone();
            move || pace(matrix.timer(2, 16).unwrap(), 20)
        });

        let one = one.join().unwrap();
        let two = two.join().unwrap();

        let base = matrix.snapshot(1).unwrap().tick();
        let coarse = matrix.snapshot(2).unwrap().tick();

        assert!(coarse >= two.reference());
        assert!(coarse <= base / 2 + 1);
        assert!(base >= one.reference());

        drop((one, two));
        running.stop().unwrap();
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn shutdown_releases_blocked_timer() {
    within_timeout(|| {
        let running = Running::start(MatrixOptions::new());
        let mut timer = running.matrix.timer(3600, 8).unwrap();
        timer.step().unwrap();

        let (parked_tx, parked_rx) = mpsc::channel();
        let client = thread::spawn(move || {
            parked_tx.send(()).unwrap();
            let result = timer.next();
            (timer, result)
        });

        parked_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));

        let matrix = running.matrix.clone();
        running.stop().unwrap();
        assert_eq!(matrix.run_state(), RunState::Stopped);

        let (mut timer, result) = client.join().unwrap();
        assert!(matches!(result, Err(Error::NotRunning)));

        // Every later operation fails the same way.
        assert!(matches!(timer.step(), Err(Error::NotRunning)));
        assert!(matches!(timer.check(true), Err(Error::NotRunning)));
        assert!(matches!(matrix.timer(10, 8), Err(Error::NotRunning)));
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn destroying_every_timer_reclaims_the_slot() {
    within_timeout(|| {
        let matrix = TimerMatrix::new();
        let (source, sender) = ChannelTickSource::new();
        let driver = MatrixDriver::new(&matrix, source).spawn().unwrap();

        let mut first = matrix.timer(2, 16).unwrap();
        let mut second = matrix.timer(2, 16).unwrap();

        for _ in 0..10 {
            sender.pulse().unwrap();
        }
        spin_until(|| matrix.snapshot(2).unwrap().tick() == 5);

        first.destroy();
        assert_eq!(matrix.snapshot(2).unwrap().tick(), 5);
        second.destroy();

        let snapshot = matrix.snapshot(2).unwrap();
        assert_eq!(snapshot.tick(), 0);
        assert_eq!(snapshot.active_count(), 0);

        for _ in 0..10 {
            sender.pulse().unwrap();
        }
        spin_until(|| matrix.snapshot(1).unwrap().tick() == 20);
        assert_eq!(matrix.snapshot(2).unwrap().tick(), 0);

        let fresh = matrix.timer(2, 16).unwrap();
        assert_eq!(fresh.reference(), 0);
        drop(fresh);

        pulse_forever(sender);
        matrix.shutdown();
        driver.join().unwrap().unwrap();
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn polling_client_observes_each_interval_once() {
    within_timeout(|| {
        let matrix = TimerMatrix::new();
        let (source, sender) = ChannelTickSource::new();
        let driver = MatrixDriver::new(&matrix, source).spawn().unwrap();

        let mut timer = matrix.timer(4, 32).unwrap();
        assert_eq!(timer.check(true).unwrap(), Readiness::Ready);
        assert_eq!(timer.check(true).unwrap(), Readiness::Pending);

        let mut ready = 0;
        for pulse in 1..=16 {
            sender.pulse().unwrap();
            spin_until(|| matrix.snapshot(1).unwrap().tick() == pulse);
            spin_until(|| pulse % 4 != 0 || matrix.snapshot(4).unwrap().tick() == pulse / 4);

            if timer.check(true).unwrap().is_ready() {
                ready += 1;
            }
        }

        assert_eq!(ready, 4);
        drop(timer);

        pulse_forever(sender);
        matrix.shutdown();
        driver.join().unwrap().unwrap();
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn losing_the_tick_source_stops_the_matrix() {
    within_timeout(|| {
        let matrix = TimerMatrix::new();
        let (source, sender) = ChannelTickSource::new();
        let driver = MatrixDriver::with_options(
            &matrix,
            source,
            DriverOptions::new().failure_policy(FailurePolicy::FailFast {
                max_consecutive_failures: 2,
            }),
        )
        .spawn()
        .unwrap();

        let mut timer = matrix.timer(1, 8).unwrap();
        timer.step().unwrap();

        let client = thread::spawn(move || {
            loop {
                if let Err(error) = timer.next() {
                    return error;
                }
            }
        });

        sender.pulse().unwrap();
        drop(sender);

        let result = driver.join().unwrap();
        assert!(matches!(result, Err(Error::TickSourceFailed { failures: 2, .. })));
        assert_eq!(matrix.run_state(), RunState::Stopped);

        // The client was released rather than left waiting for ticks that never come.
        assert!(matches!(client.join().unwrap(), Error::NotRunning));
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn shutdown_before_start_refuses_everything() {
    within_timeout(|| {
        let matrix = TimerMatrix::new();
        matrix.shutdown();

        assert!(matches!(matrix.timer(1, 8), Err(Error::NotRunning)));

        let result = MatrixDriver::new(&matrix, IntervalTickSource::new()).run();
        assert!(matches!(result, Err(Error::NotRunning)));
        assert_eq!(matrix.run_state(), RunState::Stopped);
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn interval_source_paces_in_real_time() {
    within_timeout(|| {
        let matrix = TimerMatrix::new();
        let driver = MatrixDriver::new(&matrix, IntervalTickSource::new()).spawn().unwrap();

        let started = Instant::now();
        let timer = pace(matrix.timer(5, 40).unwrap(), 10);
        let elapsed = started.elapsed();

        // Ten advances of the 5ms slot, minus one partial interval before the first and some slack
        // for a driver catching up on late ticks.
        assert!(elapsed >= Duration::from_millis(40), "paced too fast: {elapsed:?}");

        drop(timer);
        matrix.shutdown();
        driver.join().unwrap().unwrap();
    });
}
