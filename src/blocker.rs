//! Contains the [`Blocker`] type, which turns an interrupt-driven operation
//! into a blocking call

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::Cell;

use critical_section::Mutex;

use crate::{
    tasks::Job,
    thread::{Switch, ThreadId},
};

/// Parks a thread until some completion resumes it
///
/// A thread starts an operation, then calls [`Blocker::block`], which hands
/// the CPU to the home thread (the one running the task queue). When the
/// operation completes, its interrupt handler defers the `Blocker` itself
/// as a [`Job`]; when the home thread runs that job, [`Blocker::resume`]
/// switches back into the parked thread.
///
/// One `Blocker` parks one thread at a time.
pub struct Blocker {
    threads: &'static dyn Switch,
    home: ThreadId,
    parked: Mutex<Cell<Option<ThreadId>>>,
}

impl Blocker {
    /// Build a blocker that parks threads by switching to `home`
    pub const fn new(threads: &'static dyn Switch, home: ThreadId) -> Blocker {
        Blocker {
            threads,
            home,
            parked: Mutex::new(Cell::new(None)),
        }
    }

    /// Park the calling thread until [`Blocker::resume`] is called
    ///
    /// Must not be called from the home thread, which has nowhere to go.
    pub fn block(&self) {
        let me = self.threads.current();
        debug_assert_ne!(me, self.home, "the home thread cannot block");
        trace!("{} blocks", me);
        // Recorded before switching, so a completion that has already been
        // deferred will find us
        critical_section::with(|cs| self.parked.borrow(cs).set(Some(me)));
        self.threads.switch_to(self.home);
    }

    /// Switch into the parked thread, if there is one
    ///
    /// Returns `false` if nothing was parked. Returns `true` once the
    /// resumed thread switches back to the caller.
    pub fn resume(&self) -> bool {
        let Some(parked) = critical_section::with(|cs| self.parked.borrow(cs).take()) else {
            return false;
        };
        trace!("resume {}", parked);
        self.threads.switch_to(parked);
        true
    }

    /// Is a thread waiting on this blocker?
    pub fn is_parked(&self) -> bool {
        critical_section::with(|cs| self.parked.borrow(cs).get().is_some())
    }
}

impl Job for Blocker {
    fn run(&self) {
        self.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;

    /// Records switches instead of making them
    struct FakeThreads {
        current: StdMutex<ThreadId>,
        switches: StdMutex<Vec<ThreadId>>,
    }

    impl Switch for FakeThreads {
        fn current(&self) -> ThreadId {
            *self.current.lock().unwrap()
        }

        fn switch_to(&self, target: ThreadId) {
            self.switches.lock().unwrap().push(target);
            *self.current.lock().unwrap() = target;
        }
    }

    fn fake() -> &'static FakeThreads {
        std::boxed::Box::leak(std::boxed::Box::new(FakeThreads {
            current: StdMutex::new(ThreadId::MAIN),
            switches: StdMutex::new(Vec::new()),
        }))
    }

    #[test]
    fn resume_with_nothing_parked_does_nothing() {
        let threads = fake();
        let blocker = Blocker::new(threads, ThreadId::MAIN);
        assert!(!blocker.resume());
        assert!(threads.switches.lock().unwrap().is_empty());
    }

    #[test]
    fn block_goes_home_and_resume_comes_back() {
        let threads = fake();
        let worker = ThreadId::from_index(1);
        *threads.current.lock().unwrap() = worker;

        let blocker = Blocker::new(threads, ThreadId::MAIN);
        blocker.block();
        assert!(blocker.is_parked());
        assert_eq!(threads.current(), ThreadId::MAIN);

        blocker.run();
        assert!(!blocker.is_parked());
        assert_eq!(*threads.switches.lock().unwrap(), [ThreadId::MAIN, worker]);

        // A second resume has nobody to wake
        assert!(!blocker.resume());
    }
}

// End of File
