//! Holds the [`Queue`] type and methods

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::RefCell;

use critical_section::Mutex;

/// The ring itself, only touched inside a critical section
struct Ring<T, const N: usize> {
    slots: [Option<T>; N],
    read: usize,
    write: usize,
}

impl<T, const N: usize> Ring<T, N> {
    const fn next(idx: usize) -> usize {
        if idx == N - 1 { 0 } else { idx + 1 }
    }
}

/// A fixed-capacity FIFO that interrupt handlers and threads can share
///
/// Each slot is either empty or holds one item, and the read and write
/// indices chase each other around the ring. An offer is accepted only if
/// the slot under the write index is empty, so a full queue rejects new
/// items rather than overwriting old ones.
///
/// Every operation runs in a critical section. The intended use is one
/// producer (usually an interrupt) and one consumer (usually the main
/// thread); with several producers each offer is still atomic, but there is
/// no ordering between producers beyond that.
pub struct Queue<T, const N: usize> {
    ring: Mutex<RefCell<Ring<T, N>>>,
}

impl<T: Copy, const N: usize> Queue<T, N> {
    /// Build an empty queue
    pub const fn new() -> Queue<T, N> {
        assert!(N > 0);
        Queue {
            ring: Mutex::new(RefCell::new(Ring {
                slots: [const { None }; N],
                read: 0,
                write: 0,
            })),
        }
    }

    /// How many items the queue can hold
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Append an item
    ///
    /// Returns `false`, leaving the queue untouched, if it is full.
    pub fn offer(&self, item: T) -> bool {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            let write = ring.write;
            if ring.slots[write].is_some() {
                return false;
            }
            ring.slots[write] = Some(item);
            ring.write = Ring::<T, N>::next(write);
            true
        })
    }

    /// Remove and return the oldest item, if any
    pub fn poll(&self) -> Option<T> {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            let read = ring.read;
            let item = ring.slots[read].take()?;
            ring.read = Ring::<T, N>::next(read);
            Some(item)
        })
    }

    /// Look at the oldest item without removing it
    pub fn peek(&self) -> Option<T> {
        critical_section::with(|cs| {
            let ring = self.ring.borrow_ref(cs);
            ring.slots[ring.read]
        })
    }

    /// How many items are waiting
    pub fn len(&self) -> usize {
        critical_section::with(|cs| {
            self.ring
                .borrow_ref(cs)
                .slots
                .iter()
                .filter(|slot| slot.is_some())
                .count()
        })
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.peek().is_none()
    }
}

impl<T: Copy, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Queue::new()
    }
}


// End of File
