//! Contains the [`Timers`] type, and the [`TickSource`] it runs from
//!
//! Pending timers form a delta list: a singly linked list, sorted by the
//! number of ticks until each timer is next due, where the links are pool
//! indices rather than pointers. The tick source is armed to interrupt when
//! the head of the list is due. When it does, every node is walked once:
//! due nodes run and are re-armed (or freed), the rest have the elapsed
//! ticks deducted, and the list is rebuilt in order.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use crate::pool::{BlockRef, Pool};

/// A count of timer ticks, at [`crate::config::TIMER_HZ`]
pub type Ticks = u16;

/// How many times a timer fires
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Repeat {
    /// Fire this many more times, then free the timer. `Times(0)` fires once.
    Times(u8),
    /// Fire every period until deleted
    Forever,
}

impl Repeat {
    /// Fire once
    pub const ONCE: Repeat = Repeat::Times(1);

    /// The budget left after one firing, or `None` if it is spent
    const fn after_firing(self) -> Option<Repeat> {
        match self {
            Repeat::Forever => Some(Repeat::Forever),
            Repeat::Times(0 | 1) => None,
            Repeat::Times(n) => Some(Repeat::Times(n - 1)),
        }
    }
}

/// The hardware compare timer behind [`Timers`]
///
/// An implementation counts ticks from the moment it is armed, and raises
/// an interrupt - whose handler must call [`Timers::on_compare`] - when the
/// count reaches the armed value.
pub trait TickSource {
    /// Ticks counted since the last call to [`TickSource::arm`]
    fn elapsed(&self) -> Ticks;

    /// Restart the count from zero, and interrupt after `ticks` ticks
    fn arm(&self, ticks: Ticks);

    /// Stop interrupting
    fn disarm(&self);
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn elapsed(&self) -> Ticks {
        T::elapsed(self)
    }

    fn arm(&self, ticks: Ticks) {
        T::arm(self, ticks)
    }

    fn disarm(&self) {
        T::disarm(self)
    }
}

/// The counter state of a [`SoftCompare`]
#[derive(Copy, Clone)]
struct CompareState {
    count: Ticks,
    compare: Ticks,
    armed: bool,
}

/// A compare register kept in software
///
/// Call [`SoftCompare::tick`] from a periodic interrupt running at the timer
/// rate (SysTick, on Cortex-M). When it returns `true`, call
/// [`Timers::on_compare`].
pub struct SoftCompare {
    state: Mutex<Cell<CompareState>>,
}

impl SoftCompare {
    /// Build a disarmed compare counter
    pub const fn new() -> SoftCompare {
        SoftCompare {
            state: Mutex::new(Cell::new(CompareState {
                count: 0,
                compare: 0,
                armed: false,
            })),
        }
    }

    /// Count one tick
    ///
    /// Returns `true` if this tick reached the armed compare value.
    pub fn tick(&self) -> bool {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            if !state.armed {
                return false;
            }
            state.count = state.count.saturating_add(1);
            cell.set(state);
            state.count == state.compare
        })
    }

    /// Is the compare armed?
    pub fn is_armed(&self) -> bool {
        critical_section::with(|cs| self.state.borrow(cs).get().armed)
    }
}

impl Default for SoftCompare {
    fn default() -> Self {
        SoftCompare::new()
    }
}

impl TickSource for SoftCompare {
    fn elapsed(&self) -> Ticks {
        critical_section::with(|cs| self.state.borrow(cs).get().count)
    }

    fn arm(&self, ticks: Ticks) {
        critical_section::with(|cs| {
            self.state.borrow(cs).set(CompareState {
                count: 0,
                compare: ticks,
                armed: true,
            })
        })
    }

    fn disarm(&self) {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            state.armed = false;
            cell.set(state);
        })
    }
}

/// Identifies one registered timer, for [`Timers::del_timer`]
///
/// Handles stay unique after their timer is freed, so an old handle never
/// deletes a newer timer that happens to reuse the same pool block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerHandle {
    block: BlockRef,
    id: u16,
}

/// One pending timer
#[derive(Copy, Clone)]
struct TimerNode {
    callback: fn(),
    period: Ticks,
    remaining: Ticks,
    repeats: Repeat,
    id: u16,
    next: Option<BlockRef>,
}

/// The head of the list, and what the tick source was last armed with
#[derive(Copy, Clone)]
struct TimerList {
    head: Option<BlockRef>,
    armed: Ticks,
    next_id: u16,
}

/// A set of up to `N` software timers sharing one compare interrupt
///
/// Callbacks run in interrupt context, with interrupts masked. A callback
/// must not add or delete timers - defer that work to a thread with
/// [`crate::Tasks`] instead.
pub struct Timers<S, const N: usize> {
    source: S,
    nodes: Pool<TimerNode, N>,
    list: Mutex<Cell<TimerList>>,
}

impl<S: TickSource, const N: usize> Timers<S, N> {
    /// Build an empty timer set driven by `source`
    pub const fn new(source: S) -> Timers<S, N> {
        Timers {
            source,
            nodes: Pool::new(),
            list: Mutex::new(Cell::new(TimerList {
                head: None,
                armed: 0,
                next_id: 0,
            })),
        }
    }

    /// Get the tick source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Register `callback` to run every `period` ticks, `repeats` times
    ///
    /// Returns `None` if all `N` timers are in use.
    pub fn add_timer(&self, callback: fn(), period: Ticks, repeats: Repeat) -> Option<TimerHandle> {
        critical_section::with(|cs| {
            let cell = self.list.borrow(cs);
            let mut list = cell.get();
            let id = list.next_id;
            list.next_id = id.wrapping_add(1);
            cell.set(list);

            // While a compare is waiting to be serviced, `on_compare` will
            // deduct the whole armed count, so a new node carries that much
            // extra
            let due = self.compare_due(list);
            let node = TimerNode {
                callback,
                period,
                remaining: if due {
                    period.saturating_add(list.armed)
                } else {
                    period
                },
                repeats,
                id,
                next: None,
            };
            let Some(block) = self.nodes.allocate_in(cs, node) else {
                warn!("No free timers");
                return None;
            };
            trace!("add timer {} every {} ticks", id, period);

            if due {
                self.link(cs, block);
            } else {
                self.settle(cs);
                self.link(cs, block);
                self.rearm(cs);
            }
            Some(TimerHandle { block, id })
        })
    }

    /// Delete a timer before its repeat budget runs out
    ///
    /// Returns `false` if the timer has already finished or been deleted.
    pub fn del_timer(&self, handle: TimerHandle) -> bool {
        critical_section::with(|cs| {
            let cell = self.list.borrow(cs);
            let mut prev: Option<BlockRef> = None;
            let mut cur = cell.get().head;
            while let Some(block) = cur {
                let Some(node) = self.nodes.get_in(cs, block) else {
                    break;
                };
                if block == handle.block && node.id == handle.id {
                    match prev {
                        None => {
                            let mut list = cell.get();
                            list.head = node.next;
                            cell.set(list);
                        }
                        Some(prev) => {
                            self.nodes.with_in(cs, prev, |n| n.next = node.next);
                        }
                    }
                    self.nodes.release_in(cs, block);
                    trace!("del timer {}", node.id);
                    // A pending `on_compare` settles and re-arms for us
                    if !self.compare_due(cell.get()) {
                        self.settle(cs);
                        self.rearm(cs);
                    }
                    return true;
                }
                prev = Some(block);
                cur = node.next;
            }
            false
        })
    }

    /// How many timers are pending
    pub fn pending(&self) -> usize {
        critical_section::with(|cs| {
            let mut count = 0;
            let mut cur = self.list.borrow(cs).get().head;
            while let Some(block) = cur {
                count += 1;
                cur = self.nodes.get_in(cs, block).and_then(|node| node.next);
            }
            count
        })
    }

    /// Is any timer pending?
    pub fn is_armed(&self) -> bool {
        critical_section::with(|cs| self.list.borrow(cs).get().head.is_some())
    }

    /// Service the compare interrupt
    ///
    /// Call this from the interrupt handler of the tick source.
    pub fn on_compare(&self) {
        critical_section::with(|cs| {
            let cell = self.list.borrow(cs);
            let mut list = cell.get();
            let ticks = list.armed;
            let mut cur = list.head.take();
            cell.set(list);

            while let Some(block) = cur {
                let Some(node) = self.nodes.get_in(cs, block) else {
                    break;
                };
                cur = node.next;

                if node.remaining <= ticks {
                    (node.callback)();
                    match node.repeats.after_firing() {
                        None => {
                            self.nodes.release_in(cs, block);
                        }
                        Some(repeats) => {
                            self.nodes.with_in(cs, block, |n| {
                                n.remaining = n.period;
                                n.repeats = repeats;
                            });
                            self.link(cs, block);
                        }
                    }
                } else {
                    self.nodes
                        .with_in(cs, block, |n| n.remaining -= ticks);
                    self.link(cs, block);
                }
            }

            self.rearm(cs);
        })
    }

    /// Has the armed compare been reached, with `on_compare` yet to run?
    ///
    /// The tick source and this list are updated in separate critical
    /// sections, so an interrupt can land between the two.
    fn compare_due(&self, list: TimerList) -> bool {
        list.armed > 0 && self.source.elapsed() >= list.armed
    }

    /// Deduct the ticks counted since the source was armed from every node
    ///
    /// Must be followed by [`Self::rearm`], which restarts the count.
    fn settle(&self, cs: CriticalSection<'_>) {
        let elapsed = self.source.elapsed();
        if elapsed == 0 {
            return;
        }
        let mut cur = self.list.borrow(cs).get().head;
        while let Some(block) = cur {
            cur = self
                .nodes
                .with_in(cs, block, |n| {
                    n.remaining = n.remaining.saturating_sub(elapsed);
                    n.next
                })
                .flatten();
        }
    }

    /// Insert a node in order, after any nodes due at the same time
    fn link(&self, cs: CriticalSection<'_>, block: BlockRef) {
        let cell = self.list.borrow(cs);
        let mut list = cell.get();
        let Some(remaining) = self.nodes.with_in(cs, block, |n| {
            n.next = None;
            n.remaining
        }) else {
            return;
        };

        let due_after = |other: BlockRef| {
            self.nodes
                .get_in(cs, other)
                .is_some_and(|n| n.remaining <= remaining)
        };

        match list.head {
            Some(head) if due_after(head) => {
                let mut cur = head;
                while let Some(next) = self.nodes.get_in(cs, cur).and_then(|n| n.next) {
                    if !due_after(next) {
                        break;
                    }
                    cur = next;
                }
                let after = self.nodes.with_in(cs, cur, |n| n.next.replace(block)).flatten();
                self.nodes.with_in(cs, block, |n| n.next = after);
            }
            old_head => {
                self.nodes.with_in(cs, block, |n| n.next = old_head);
                list.head = Some(block);
                cell.set(list);
            }
        }
    }

    /// Point the tick source at the head of the list
    fn rearm(&self, cs: CriticalSection<'_>) {
        let cell = self.list.borrow(cs);
        let mut list = cell.get();
        match list.head.and_then(|head| self.nodes.get_in(cs, head)) {
            Some(head) => {
                // A zero count would never match, so fire on the next tick
                let ticks = head.remaining.max(1);
                self.source.arm(ticks);
                list.armed = ticks;
            }
            None => {
                self.source.disarm();
                list.armed = 0;
            }
        }
        cell.set(list);
    }
}


// End of File
