//! Runs real threads on the host, switching stacks with the x86-64 back end
//!
//! The threads never return, so they run on an OS thread of their own and
//! report what they see over a channel. Nothing inside a thread asserts:
//! a panic cannot unwind off a thread's stack.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    sync::{OnceLock, mpsc},
    time::Duration,
};

use steep::{ThreadId, ThreadState, Threads};

const STACK: usize = 128 * 1024;

/// Run `start` on an OS thread of its own, which it never gives back
fn launch(start: fn() -> !) {
    std::thread::Builder::new()
        .name("steep-threads".into())
        .spawn(move || {
            start();
        })
        .unwrap();
}

/// Wait for `count` reports
fn collect(rx: &mpsc::Receiver<String>, count: usize) -> Vec<String> {
    (0..count)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect()
}

fn park_forever() -> ! {
    loop {
        std::thread::park();
    }
}

#[test]
fn round_trip_keeps_each_threads_state() {
    static THREADS: Threads<3, STACK> = Threads::new();
    static REPORT: OnceLock<mpsc::Sender<String>> = OnceLock::new();
    static WORKER: OnceLock<ThreadId> = OnceLock::new();
    static IDLE: OnceLock<ThreadId> = OnceLock::new();

    fn report(message: String) {
        let _ = REPORT.get().map(|tx| tx.send(message));
    }

    fn main_thread() -> ! {
        let Some(&worker) = WORKER.get() else {
            park_forever()
        };
        // Lives in this thread's stack frame, across every switch
        let mut counter = 1000u32;
        for round in 0..3 {
            report(format!("{} round {} at {}", THREADS.current(), round, counter));
            counter += 1;
            THREADS.switch_to(worker);
        }
        let idle = IDLE.get().and_then(|id| THREADS.state(*id));
        report(format!(
            "done at {}, worker {:?}, idle {:?}",
            counter,
            THREADS.state(worker),
            idle
        ));
        park_forever()
    }

    fn worker_thread() -> ! {
        let mut turns = 0u32;
        loop {
            report(format!("{} turn {}", THREADS.current(), turns));
            turns += 1;
            THREADS.switch_to(ThreadId::MAIN);
        }
    }

    fn idle_thread() -> ! {
        report("idle ran".into());
        park_forever()
    }

    fn start() -> ! {
        THREADS.start_main()
    }

    let (tx, rx) = mpsc::channel();
    REPORT.set(tx).unwrap();
    assert_eq!(THREADS.create("main", main_thread), ThreadId::MAIN);
    WORKER.set(THREADS.create("worker", worker_thread)).unwrap();
    IDLE.set(THREADS.create("idle", idle_thread)).unwrap();
    launch(start);

    assert_eq!(
        collect(&rx, 7),
        [
            "T000 round 0 at 1000",
            "T001 turn 0",
            "T000 round 1 at 1001",
            "T001 turn 1",
            "T000 round 2 at 1002",
            "T001 turn 2",
            "done at 1003, worker Some(Suspended), idle Some(NeverStarted)",
        ]
    );
    // The idle thread was never switched to, so it never ran
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(THREADS.state(ThreadId::MAIN), Some(ThreadState::Running));
    assert_eq!(THREADS.name(*IDLE.get().unwrap()), Some("idle"));
}

#[test]
fn switching_to_self_is_a_no_op() {
    static THREADS: Threads<2, STACK> = Threads::new();
    static REPORT: OnceLock<mpsc::Sender<String>> = OnceLock::new();

    fn report(message: String) {
        let _ = REPORT.get().map(|tx| tx.send(message));
    }

    fn main_thread() -> ! {
        THREADS.switch_to(ThreadId::MAIN);
        report(format!("still {}", THREADS.current()));
        park_forever()
    }

    fn other_thread() -> ! {
        report("other ran".into());
        park_forever()
    }

    fn start() -> ! {
        THREADS.start_main()
    }

    let (tx, rx) = mpsc::channel();
    REPORT.set(tx).unwrap();
    THREADS.create("main", main_thread);
    THREADS.create("other", other_thread);
    launch(start);

    assert_eq!(collect(&rx, 1), ["still T000"]);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

// End of File
