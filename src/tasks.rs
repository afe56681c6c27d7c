//! Contains the [`Tasks`] deferred work runner

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{config::TASK_LATE_DEPTH, queue::Queue};

/// Deferred work that carries its own context
///
/// Implement this on a `static` to have [`Tasks::defer`] call back into it.
pub trait Job: Sync {
    /// Do the work
    fn run(&self);
}

/// One item of deferred work
#[derive(Copy, Clone)]
pub enum Work {
    /// Call a plain function
    Call(fn()),
    /// Run a job object
    Run(&'static dyn Job),
}

impl Work {
    fn run(self) {
        match self {
            Work::Call(f) => f(),
            Work::Run(job) => job.run(),
        }
    }
}

/// Something that accepts deferred jobs
///
/// Lets code that only needs to queue work (like an interrupt handler) hold
/// a `&'static dyn Defer` without knowing the queue depth.
pub trait Defer: Sync {
    /// Queue `job` to run later. Returns `false` if it was dropped.
    fn defer(&self, job: &'static dyn Job) -> bool;
}

/// A queue of deferred work, drained by one thread
///
/// Interrupt handlers call [`Tasks::schedule`] or [`Tasks::defer`] to hand
/// work to thread context, and the main loop calls [`Tasks::run`].
///
/// A job that arrives while the queue is full is held back, up to
/// [`TASK_LATE_DEPTH`] distinct jobs, and moved into the queue as soon as
/// a slot frees up. Jobs often resume a blocked thread, which would never
/// run again if the job were lost. Plain function calls are dropped.
pub struct Tasks<const N: usize> {
    queue: Queue<Work, N>,
    late: Mutex<RefCell<heapless::Deque<&'static dyn Job, TASK_LATE_DEPTH>>>,
}

impl<const N: usize> Tasks<N> {
    /// Build an empty runner
    pub const fn new() -> Tasks<N> {
        Tasks {
            queue: Queue::new(),
            late: Mutex::new(RefCell::new(heapless::Deque::new())),
        }
    }

    /// Queue a function call
    ///
    /// Returns `false` if the queue is full. The work is dropped.
    pub fn schedule(&self, f: fn()) -> bool {
        self.push(Work::Call(f))
    }

    /// Queue a job
    ///
    /// If the queue is full the job waits for room instead, unless it is
    /// already waiting. Returns `false` only if there was no room for that
    /// either, and the job is dropped.
    pub fn defer(&self, job: &'static dyn Job) -> bool {
        if self.queue.offer(Work::Run(job)) {
            return true;
        }
        critical_section::with(|cs| {
            let mut late = self.late.borrow_ref_mut(cs);
            if late.iter().any(|held| core::ptr::addr_eq(*held, job)) {
                return true;
            }
            match late.push_back(job) {
                Ok(()) => {
                    warn!("Task queue full, holding job back");
                    true
                }
                Err(_) => {
                    error!("Task queue full, dropping job");
                    false
                }
            }
        })
    }

    /// Run the oldest queued item, if any
    ///
    /// Returns `true` if something ran. Items run one per call, so the
    /// caller decides how much time to give the queue.
    pub fn run(&self) -> bool {
        let work = self.queue.poll().or_else(|| {
            critical_section::with(|cs| self.late.borrow_ref_mut(cs).pop_front())
                .map(Work::Run)
        });
        let Some(work) = work else {
            return false;
        };
        self.promote();
        work.run();
        true
    }

    /// How many items are queued, or waiting for room
    pub fn pending(&self) -> usize {
        let late = critical_section::with(|cs| self.late.borrow_ref(cs).len());
        self.queue.len() + late
    }

    /// Move the oldest held-back job into the queue, if there is room
    fn promote(&self) {
        critical_section::with(|cs| {
            let mut late = self.late.borrow_ref_mut(cs);
            if let Some(&job) = late.front() {
                if self.queue.offer(Work::Run(job)) {
                    late.pop_front();
                }
            }
        })
    }

    fn push(&self, work: Work) -> bool {
        let queued = self.queue.offer(work);
        if !queued {
            warn!("Task queue full, dropping work");
        }
        queued
    }
}

impl<const N: usize> Default for Tasks<N> {
    fn default() -> Self {
        Tasks::new()
    }
}

impl<const N: usize> Defer for Tasks<N> {
    fn defer(&self, job: &'static dyn Job) -> bool {
        Tasks::defer(self, job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_in_order_one_per_call() {
        static TASKS: Tasks<4> = Tasks::new();
        static LOG: std::sync::Mutex<Vec<u8>> = std::sync::Mutex::new(Vec::new());
        fn one() {
            LOG.lock().unwrap().push(1);
        }
        fn two() {
            LOG.lock().unwrap().push(2);
        }

        assert!(!TASKS.run());
        assert!(TASKS.schedule(one));
        assert!(TASKS.schedule(two));
        assert!(TASKS.schedule(one));
        assert_eq!(TASKS.pending(), 3);

        assert!(TASKS.run());
        assert_eq!(*LOG.lock().unwrap(), [1]);
        assert!(TASKS.run());
        assert!(TASKS.run());
        assert!(!TASKS.run());
        assert_eq!(*LOG.lock().unwrap(), [1, 2, 1]);
    }

    #[test]
    fn full_queue_drops_work() {
        static TASKS: Tasks<2> = Tasks::new();
        static RAN: AtomicUsize = AtomicUsize::new(0);
        fn count() {
            RAN.fetch_add(1, Ordering::Relaxed);
        }

        assert!(TASKS.schedule(count));
        assert!(TASKS.schedule(count));
        assert!(!TASKS.schedule(count));
        while TASKS.run() {}
        assert_eq!(RAN.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn full_queue_holds_jobs_back() {
        struct Counter(AtomicUsize);

        impl Job for Counter {
            fn run(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        static TASKS: Tasks<1> = Tasks::new();
        static WAKE: Counter = Counter(AtomicUsize::new(0));
        static OTHER: Counter = Counter(AtomicUsize::new(0));
        static RAN: AtomicUsize = AtomicUsize::new(0);
        fn filler() {
            RAN.fetch_add(1, Ordering::Relaxed);
        }

        assert!(TASKS.schedule(filler));
        assert!(TASKS.defer(&WAKE));
        // Already waiting, so not held twice
        assert!(TASKS.defer(&WAKE));
        assert!(TASKS.defer(&OTHER));
        assert_eq!(TASKS.pending(), 3);

        // Running the filler makes room for the first held job
        assert!(TASKS.run());
        assert_eq!(RAN.load(Ordering::Relaxed), 1);
        assert_eq!(TASKS.pending(), 2);
        while TASKS.run() {}

        assert_eq!(WAKE.0.load(Ordering::Relaxed), 1);
        assert_eq!(OTHER.0.load(Ordering::Relaxed), 1);
        assert_eq!(TASKS.pending(), 0);
    }

    #[test]
    fn jobs_get_their_context() {
        struct Counter(AtomicUsize);

        impl Job for Counter {
            fn run(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        static TASKS: Tasks<3> = Tasks::new();
        static FIRST: Counter = Counter(AtomicUsize::new(0));
        static SECOND: Counter = Counter(AtomicUsize::new(0));

        let defer: &dyn Defer = &TASKS;
        assert!(defer.defer(&FIRST));
        assert!(defer.defer(&SECOND));
        assert!(defer.defer(&FIRST));
        while TASKS.run() {}

        assert_eq!(FIRST.0.load(Ordering::Relaxed), 2);
        assert_eq!(SECOND.0.load(Ordering::Relaxed), 1);
    }
}

// End of File
