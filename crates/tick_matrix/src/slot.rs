// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::signal::Signal;

/// Position of an interval slot: the tick counter and the number of times it wrapped around.
///
/// Both halves are stored in one atomic word so that a reader never pairs a tick from one
/// generation with the roll of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub tick: u32,
    pub roll: u32,
}

impl Position {
    const fn pack(self) -> u64 {
        ((self.roll as u64) << 32) | self.tick as u64
    }

    #[expect(clippy::cast_possible_truncation, reason = "unpacking two 32-bit halves")]
    const fn unpack(packed: u64) -> Self {
        Self {
            tick: packed as u32,
            roll: (packed >> 32) as u32,
        }
    }

    /// The position one tick later. The tick never reaches `ceiling`; it wraps to 0 and bumps the roll.
    const fn advanced(self, ceiling: u32) -> Self {
        let tick = self.tick.wrapping_add(1);

        if tick >= ceiling {
            Self {
                tick: 0,
                roll: self.roll.wrapping_add(1),
            }
        } else {
            Self { tick, roll: self.roll }
        }
    }
}

/// Point-in-time view of one interval slot, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    tick: u32,
    roll: u32,
    active_count: u32,
}

impl SlotSnapshot {
    /// Number of intervals that elapsed since the slot was last reclaimed, modulo the tick ceiling.
    #[must_use]
    pub const fn tick(&self) -> u32 {
        self.tick
    }

    /// Number of times the tick counter wrapped around.
    #[must_use]
    pub const fn roll(&self) -> u32 {
        self.roll
    }

    /// Number of live timers registered at this interval.
    #[must_use]
    pub const fn active_count(&self) -> u32 {
        self.active_count
    }
}

/// Shared state of one interval.
///
/// The position is advanced by the driver only. The active count is changed by clients, always under
/// the matrix's global lock; the driver reads it without locking to decide whether the slot is live.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    position: AtomicU64,
    active: AtomicU32,
    // Created on first registration and kept for the lifetime of the matrix, so a waiter can never
    // observe it being torn down by a concurrent deregistration.
    signal: OnceLock<Signal>,
}

impl Slot {
    pub fn position(&self) -> Position {
        Position::unpack(self.position.load(Ordering::SeqCst))
    }

    pub fn tick(&self) -> u32 {
        self.position().tick
    }

    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active_count() > 0
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        let position = self.position();

        SlotSnapshot {
            tick: position.tick,
            roll: position.roll,
            active_count: self.active_count(),
        }
    }

    /// Advances the slot by one tick and returns the new position.
    pub fn advance(&self, ceiling: u32) -> Position {
        // Reclamation may reset the tick concurrently; the read-modify-write is one atomic update.
        let previous = match self
            .position
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |packed| {
                Some(Position::unpack(packed).advanced(ceiling).pack())
            }) {
            Ok(previous) | Err(previous) => previous,
        };

        Position::unpack(previous).advanced(ceiling)
    }

    /// Advances the slot by one tick if a timer is registered, returning the new position.
    ///
    /// The activity check is repeated inside the atomic update. A deregistration clears the active
    /// count before it resets the tick, so an update that lost the race to the reset re-reads the
    /// count, finds the slot idle and leaves the reset tick alone.
    pub fn advance_if_active(&self, ceiling: u32) -> Option<Position> {
        self.position
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |packed| {
                self.is_active().then(|| Position::unpack(packed).advanced(ceiling).pack())
            })
            .ok()
            .map(|previous| Position::unpack(previous).advanced(ceiling))
    }

    /// Returns the slot's signal, if any timer was ever registered here.
    pub fn signal(&self) -> Option<&Signal> {
        self.signal.get()
    }

    /// Returns the slot's signal, creating it on first use.
    pub fn signal_or_init(&self) -> &Signal {
        self.signal.get_or_init(Signal::default)
    }

    /// Adds a timer to the slot. Must be called under the matrix's global lock.
    pub fn register(&self) -> u32 {
        self.signal_or_init();
        self.active.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Removes a timer from the slot. Must be called under the matrix's global lock.
    ///
    /// When the last timer leaves, the tick is reset to 0 so that the next registration does not inherit
    /// a stale count. The roll is preserved.
    pub fn deregister(&self) -> u32 {
        let remaining = self.active_count().saturating_sub(1);
        self.active.store(remaining, Ordering::SeqCst);

        if remaining == 0 {
            self.reset_tick();
        }

        remaining
    }

    fn reset_tick(&self) {
        _ = self.position.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |packed| {
            Some(Position { tick: 0, ..Position::unpack(packed) }.pack())
        });
    }

    #[cfg(test)]
    pub(crate) fn set_position(&self, position: Position) {
        self.position.store(position.pack(), Ordering::SeqCst);
    }
}
