//! Contains the [`Threads`] type, a cooperative stack-switching scheduler

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    cell::Cell,
    sync::atomic::{AtomicPtr, AtomicU8, AtomicUsize, Ordering},
};

use critical_section::Mutex;

use crate::{Stack, arch};

/// Represents a Thread
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ThreadId(usize);

impl ThreadId {
    /// The first thread created, which [`Threads::start_main`] runs
    pub const MAIN: ThreadId = ThreadId(0);

    /// Represents the Thread ID we produce when the scheduler isn't running
    const INVALID_ID: usize = usize::MAX;

    /// Is this the invalid Thread ID?
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID_ID
    }

    #[cfg(test)]
    pub(crate) const fn from_index(index: usize) -> ThreadId {
        ThreadId(index)
    }

    /// The slot this thread occupies in its [`Threads`]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadId {
    fn format(&self, fmt: defmt::Formatter) {
        if self.is_invalid() {
            defmt::write!(fmt, "T---");
        } else {
            defmt::write!(fmt, "T{=usize:03}", self.0);
        }
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_invalid() {
            write!(fmt, "T---")
        } else {
            write!(fmt, "T{:03}", self.0)
        }
    }
}

/// What a thread is doing
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    /// Created, with an initial frame, but never switched to
    NeverStarted,
    /// Currently executing
    Running,
    /// Switched away from, with its context saved on its stack
    Suspended,
}

impl ThreadState {
    const fn from_u8(value: u8) -> ThreadState {
        match value {
            0 => ThreadState::NeverStarted,
            1 => ThreadState::Running,
            _ => ThreadState::Suspended,
        }
    }
}

/// The control block for one thread
///
/// The saved stack pointer must stay the first field; the context switch
/// code reads and writes it directly.
#[repr(C)]
pub(crate) struct Thread {
    sp: AtomicPtr<usize>,
    name: Mutex<Cell<Option<&'static str>>>,
    state: AtomicU8,
}

impl Thread {
    /// `size_of::<Thread>()` is `1 << SIZE_BITS`, so the context switch can
    /// index the thread table with a shift
    #[cfg(target_arch = "arm")]
    pub(crate) const SIZE_BITS: usize = 4;

    const fn new() -> Thread {
        Thread {
            sp: AtomicPtr::new(core::ptr::null_mut()),
            name: Mutex::new(Cell::new(None)),
            state: AtomicU8::new(ThreadState::NeverStarted as u8),
        }
    }

    /// Where the saved stack pointer lives
    #[cfg(target_arch = "x86_64")]
    pub(crate) fn sp_slot(&self) -> *mut *mut usize {
        self.sp.as_ptr()
    }

    /// The saved stack pointer
    #[cfg(target_arch = "x86_64")]
    pub(crate) fn sp(&self) -> *mut usize {
        self.sp.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

#[cfg(target_arch = "arm")]
const _: () = assert!(core::mem::size_of::<Thread>() == 1 << Thread::SIZE_BITS);

/// Which thread is running, and which the context switch should move to
///
/// The switch code on Cortex-M reads this through fixed offsets, so the
/// layout is fixed.
#[repr(C)]
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
pub(crate) struct Switcher {
    /// Which thread is currently running
    pub(crate) current: AtomicUsize,
    /// Which thread the pending switch will run
    pub(crate) next: AtomicUsize,
    /// The start of the thread table
    pub(crate) table: AtomicPtr<Thread>,
}

impl Switcher {
    /// The offset, in bytes, to the `current` field
    #[cfg(target_arch = "arm")]
    pub(crate) const CURRENT_OFFSET: usize = core::mem::offset_of!(Switcher, current);

    /// The offset, in bytes, to the `next` field
    #[cfg(target_arch = "arm")]
    pub(crate) const NEXT_OFFSET: usize = core::mem::offset_of!(Switcher, next);

    /// The offset, in bytes, to the `table` field
    #[cfg(target_arch = "arm")]
    pub(crate) const TABLE_OFFSET: usize = core::mem::offset_of!(Switcher, table);

    const fn new() -> Switcher {
        Switcher {
            current: AtomicUsize::new(ThreadId::INVALID_ID),
            next: AtomicUsize::new(0),
            table: AtomicPtr::new(core::ptr::null_mut()),
        }
    }
}

/// The object-safe part of [`Threads`]
///
/// Code that only needs to move between threads (like a [`crate::Blocker`])
/// holds a `&'static dyn Switch`, so it doesn't need to know the thread
/// count or stack size.
pub trait Switch: Sync {
    /// The thread that is running now
    fn current(&self) -> ThreadId;

    /// Suspend the calling thread and run `target`
    fn switch_to(&self, target: ThreadId);
}

/// A cooperative scheduler for up to `N` threads, each with a stack of
/// `STACK` bytes
///
/// Threads only give up the CPU by calling [`Threads::switch_to`]. There is
/// no time slicing and no priority. Put this in a `static`; it must not
/// move once [`Threads::start_main`] has been called.
pub struct Threads<const N: usize, const STACK: usize> {
    switcher: Switcher,
    threads: [Thread; N],
    created: AtomicUsize,
    stacks: [Stack<STACK>; N],
}

impl<const N: usize, const STACK: usize> Threads<N, STACK> {
    /// Build the scheduler, with no threads created yet
    pub const fn new() -> Threads<N, STACK> {
        // Cannot schedule without at least one thread
        assert!(N > 0);
        assert!(STACK >= arch::MIN_STACK_SIZE);
        Threads {
            switcher: Switcher::new(),
            threads: [const { Thread::new() }; N],
            created: AtomicUsize::new(0),
            stacks: [const { Stack::new() }; N],
        }
    }

    /// Create a thread that will run `entry` when first switched to
    ///
    /// Threads are numbered in creation order, starting at
    /// [`ThreadId::MAIN`].
    ///
    /// # Panics
    ///
    /// Panics if all `N` threads have been created.
    pub fn create(&self, name: &'static str, entry: fn() -> !) -> ThreadId {
        let idx = critical_section::with(|_cs| {
            let idx = self.created.load(Ordering::Relaxed);
            if idx < N {
                self.created.store(idx + 1, Ordering::Relaxed);
            }
            idx
        });
        if idx >= N {
            panic!("Tried to create more than {} threads", N);
        }

        let thread = &self.threads[idx];
        let stack_top = self.stacks[idx].top();
        debug!(
            "Init thread frame {=usize}, with stack @ 0x{=usize:08x}",
            idx,
            stack_top as usize
        );

        // SAFETY: `new` checked the stack is big enough for a frame
        let sp = unsafe { arch::init_frame(stack_top, entry) };
        thread.sp.store(sp, Ordering::Release);
        critical_section::with(|cs| thread.name.borrow(cs).set(Some(name)));
        thread.set_state(ThreadState::NeverStarted);

        let id = ThreadId(idx);
        info!("Created {} {=str}", id, name);
        id
    }

    /// Run [`ThreadId::MAIN`] on its own stack
    ///
    /// You may only call this once, and you should call it from `fn main()`
    /// once all your hardware is configured and your threads are created.
    /// The calling context is abandoned.
    ///
    /// # Panics
    ///
    /// Panics if no thread has been created, or if called twice.
    pub fn start_main(&self) -> ! {
        if self.created() == 0 {
            panic!("Tried to start with no threads");
        }
        if !self.current().is_invalid() {
            panic!("Tried to re-start threads!");
        }
        self.threads[0].set_state(ThreadState::Running);
        info!("Starting {}", ThreadId::MAIN);
        // SAFETY: thread 0 has an initial frame, and `self` is not going
        // anywhere because we never return
        unsafe { arch::start(&self.threads, &self.switcher) }
    }

    /// Suspend the calling thread and run `target`
    ///
    /// Returns when some other thread switches back to the caller. Switching
    /// to the current thread does nothing. Only call this from thread
    /// context, outside of any critical section.
    pub fn switch_to(&self, target: ThreadId) {
        let from = self.switcher.current.load(Ordering::Acquire);
        let to = target.index();
        if from == to {
            return;
        }
        debug_assert!(from < self.created(), "switch before start_main");
        debug_assert!(to < self.created(), "switch to uncreated {}", target);
        if from >= self.created() || to >= self.created() {
            return;
        }
        trace!("switch {} -> {}", ThreadId(from), target);
        self.threads[from].set_state(ThreadState::Suspended);
        self.threads[to].set_state(ThreadState::Running);
        // SAFETY: both threads exist, and `from` is the one calling us
        unsafe { arch::switch(&self.threads, &self.switcher, from, to) }
    }

    /// The thread that is running now
    ///
    /// Invalid until [`Threads::start_main`] is called.
    pub fn current(&self) -> ThreadId {
        ThreadId(self.switcher.current.load(Ordering::Acquire))
    }

    /// The name a thread was created with
    pub fn name(&self, id: ThreadId) -> Option<&'static str> {
        if id.index() >= self.created() {
            return None;
        }
        critical_section::with(|cs| self.threads[id.index()].name.borrow(cs).get())
    }

    /// What a thread is doing
    pub fn state(&self, id: ThreadId) -> Option<ThreadState> {
        if id.index() >= self.created() {
            return None;
        }
        let raw = self.threads[id.index()].state.load(Ordering::Relaxed);
        Some(ThreadState::from_u8(raw))
    }

    /// How many threads have been created
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<const N: usize, const STACK: usize> Default for Threads<N, STACK> {
    fn default() -> Self {
        Threads::new()
    }
}

impl<const N: usize, const STACK: usize> Switch for Threads<N, STACK> {
    fn current(&self) -> ThreadId {
        Threads::current(self)
    }

    fn switch_to(&self, target: ThreadId) {
        Threads::switch_to(self, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn ids_format_with_three_digits() {
        assert_eq!(std::format!("{}", ThreadId::MAIN), "T000");
        assert_eq!(std::format!("{}", ThreadId(12)), "T012");
        assert_eq!(std::format!("{}", ThreadId(usize::MAX)), "T---");
    }

    #[test]
    fn create_numbers_threads_in_order() {
        let threads: Threads<3, 1024> = Threads::new();
        assert!(threads.current().is_invalid());
        assert_eq!(threads.created(), 0);
        assert_eq!(threads.name(ThreadId::MAIN), None);

        assert_eq!(threads.create("main", idle), ThreadId::MAIN);
        assert_eq!(threads.create("sensor", idle), ThreadId(1));
        assert_eq!(threads.created(), 2);
        assert_eq!(threads.name(ThreadId(1)), Some("sensor"));
        assert_eq!(threads.state(ThreadId(1)), Some(ThreadState::NeverStarted));
        assert_eq!(threads.state(ThreadId(2)), None);
    }

    #[test]
    fn initial_frame_sits_inside_its_stack() {
        let threads: Threads<2, 1024> = Threads::new();
        threads.create("a", idle);
        threads.create("b", idle);
        for (thread, stack) in threads.threads.iter().zip(threads.stacks.iter()) {
            let sp = thread.sp() as usize;
            let top = stack.top() as usize;
            assert!(sp < top);
            assert!(top - sp <= arch::MIN_STACK_SIZE);
            assert_eq!(sp % core::mem::align_of::<usize>(), 0);
        }
    }

    #[test]
    #[should_panic]
    fn too_many_threads_panics() {
        let threads: Threads<1, 1024> = Threads::new();
        threads.create("one", idle);
        threads.create("two", idle);
    }
}

// End of File
