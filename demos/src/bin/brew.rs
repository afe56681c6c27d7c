//! Brews a pot of tea, in timer ticks
//!
//! A steeping thread sleeps on software timers while the main thread runs
//! the task queue. SysTick drives the timers, and each timer callback
//! defers a wake-up job through the task queue, which switches back into
//! the sleeping thread.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

use core::{cell::Cell, sync::atomic::Ordering};

use critical_section::Mutex;

use steep::{
    Blocker, Repeat, SoftCompare, Tasks, ThreadId, Threads, Ticks, Timers,
    config::{MAX_TIMERS, TASK_QUEUE_DEPTH, TIMER_HZ},
    port,
};
use steep_demos::UPTIME;

/// The processor clock of the MPS2 boards QEMU emulates
const CORE_HZ: u32 = 25_000_000;

/// Ticks in one second
const SECOND: Ticks = TIMER_HZ as Ticks;

static THREADS: Threads<2, 2048> = Threads::new();
static TASKS: Tasks<TASK_QUEUE_DEPTH> = Tasks::new();
static CLOCK: SoftCompare = SoftCompare::new();
static TIMERS: Timers<&SoftCompare, MAX_TIMERS> = Timers::new(&CLOCK);
static NAP: Blocker = Blocker::new(&THREADS, ThreadId::MAIN);
static STEEPER: Mutex<Cell<Option<ThreadId>>> = Mutex::new(Cell::new(None));

#[cortex_m_rt::entry]
fn main() -> ! {
    let Some(mut cp) = cortex_m::Peripherals::take() else {
        panic!("peripherals already taken");
    };
    port::set_switch_priority(&mut cp.SCB);
    port::start_ticks(&mut cp.SYST, CORE_HZ);

    THREADS.create("main", main_loop);
    let steeper = THREADS.create("steep", steep);
    critical_section::with(|cs| STEEPER.borrow(cs).set(Some(steeper)));
    THREADS.start_main();
}

#[cortex_m_rt::exception]
fn SysTick() {
    UPTIME.fetch_add(1, Ordering::Relaxed);
    if CLOCK.tick() {
        TIMERS.on_compare();
    }
}

/// Runs deferred work forever
fn main_loop() -> ! {
    defmt::info!("{} running the task queue", THREADS.current());
    if let Some(steeper) = critical_section::with(|cs| STEEPER.borrow(cs).get()) {
        THREADS.switch_to(steeper);
    }
    loop {
        if !TASKS.run() {
            cortex_m::asm::wfi();
        }
    }
}

fn wake() {
    if !TASKS.defer(&NAP) {
        defmt::warn!("Task queue full, steeping thread not woken");
    }
}

fn pour() {
    defmt::info!("poured");
}

/// Sleep the calling thread for `ticks`
fn sleep(ticks: Ticks) {
    if TIMERS.add_timer(wake, ticks, Repeat::ONCE).is_none() {
        defmt::warn!("no timer free, not sleeping");
        return;
    }
    NAP.block();
}

fn steep() -> ! {
    TASKS.schedule(pour);
    for minute in 1..=3u8 {
        sleep(SECOND);
        defmt::info!("{} steeped {=u8} of 3", THREADS.current(), minute);
    }
    defmt::info!("tea is ready");
    cortex_m::asm::bkpt();
    loop {
        sleep(SECOND);
    }
}

// End of File
