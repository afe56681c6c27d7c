//! Holds the [`Pool`] type and methods

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

/// Refers to one block in a [`Pool`]
///
/// A `BlockRef` is a plain index. It does not keep the block alive - the
/// reference count does, through [`Pool::acquire`] and [`Pool::release`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockRef(u8);

impl BlockRef {
    /// The slot number of this block within its pool
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One slot in the pool
struct Block<T> {
    refcount: u8,
    payload: Option<T>,
}

impl<T> Block<T> {
    const FREE: Block<T> = Block {
        refcount: 0,
        payload: None,
    };
}

/// A fixed-size, fixed-count, reference counted block allocator
///
/// All `N` blocks are reserved when the pool is built (usually in a
/// `static`) and live for as long as the pool does. A block is handed out
/// by [`Pool::allocate`] with a reference count of one; every extra holder
/// calls [`Pool::acquire`], and every holder calls [`Pool::release`] when
/// done. The block is recycled when the count returns to zero.
///
/// Every operation runs in a critical section, so the pool can be used from
/// interrupt handlers as well as from threads.
pub struct Pool<T, const N: usize> {
    blocks: Mutex<RefCell<[Block<T>; N]>>,
}

impl<T, const N: usize> Pool<T, N> {
    /// Build an empty pool
    pub const fn new() -> Pool<T, N> {
        assert!(N > 0 && N <= u8::MAX as usize);
        Pool {
            blocks: Mutex::new(RefCell::new([const { Block::FREE }; N])),
        }
    }

    /// How many blocks the pool holds in total
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Take a free block, store `value` in it, and return a reference to it
    ///
    /// Returns `None` if every block is in use.
    pub fn allocate(&self, value: T) -> Option<BlockRef> {
        critical_section::with(|cs| self.allocate_in(cs, value))
    }

    /// Add a holder to a live block
    ///
    /// Returns `false` (and changes nothing) if the block is free or its
    /// count is saturated.
    pub fn acquire(&self, block: BlockRef) -> bool {
        critical_section::with(|cs| {
            let mut blocks = self.blocks.borrow_ref_mut(cs);
            let Some(slot) = blocks.get_mut(block.index()) else {
                return false;
            };
            if slot.refcount == 0 || slot.refcount == u8::MAX {
                return false;
            }
            slot.refcount += 1;
            true
        })
    }

    /// Drop a holder from a live block
    ///
    /// Returns `true` if that was the last holder and the block is now free.
    /// Releasing a free block does nothing.
    pub fn release(&self, block: BlockRef) -> bool {
        critical_section::with(|cs| self.release_in(cs, block))
    }

    /// Current reference count of a block (zero when free)
    pub fn refcount(&self, block: BlockRef) -> u8 {
        critical_section::with(|cs| {
            self.blocks
                .borrow_ref(cs)
                .get(block.index())
                .map_or(0, |slot| slot.refcount)
        })
    }

    /// How many blocks are currently allocated
    pub fn in_use(&self) -> usize {
        critical_section::with(|cs| {
            self.blocks
                .borrow_ref(cs)
                .iter()
                .filter(|slot| slot.refcount > 0)
                .count()
        })
    }

    /// Run `f` against the payload of a live block
    ///
    /// Returns `None` if the block is free.
    pub fn with<R>(&self, block: BlockRef, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        critical_section::with(|cs| self.with_in(cs, block, f))
    }

    pub(crate) fn allocate_in(&self, cs: CriticalSection<'_>, value: T) -> Option<BlockRef> {
        let mut blocks = self.blocks.borrow_ref_mut(cs);
        let (index, slot) = blocks
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.refcount == 0)?;
        slot.refcount = 1;
        slot.payload = Some(value);
        Some(BlockRef(index as u8))
    }

    pub(crate) fn release_in(&self, cs: CriticalSection<'_>, block: BlockRef) -> bool {
        let mut blocks = self.blocks.borrow_ref_mut(cs);
        let Some(slot) = blocks.get_mut(block.index()) else {
            return false;
        };
        if slot.refcount == 0 {
            return false;
        }
        slot.refcount -= 1;
        if slot.refcount == 0 {
            slot.payload = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn with_in<R>(
        &self,
        cs: CriticalSection<'_>,
        block: BlockRef,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let mut blocks = self.blocks.borrow_ref_mut(cs);
        let slot = blocks.get_mut(block.index())?;
        if slot.refcount == 0 {
            return None;
        }
        slot.payload.as_mut().map(f)
    }
}

impl<T: Copy, const N: usize> Pool<T, N> {
    /// Copy the payload out of a live block
    pub fn get(&self, block: BlockRef) -> Option<T> {
        self.with(block, |payload| *payload)
    }

    pub(crate) fn get_in(&self, cs: CriticalSection<'_>, block: BlockRef) -> Option<T> {
        self.with_in(cs, block, |payload| *payload)
    }
}

impl<T, const N: usize> Default for Pool<T, N> {
    fn default() -> Self {
        Pool::new()
    }
}


// End of File
