//! # steep
//!
//! The run-time core of a tea and yogurt maker: a small set of static,
//! allocation-free building blocks for one single-core microcontroller.
//!
//! * [`Pool`] - fixed-count, reference counted blocks
//! * [`Queue`] - a FIFO that interrupts and threads can share
//! * [`Timers`] - software timers multiplexed onto one compare interrupt
//! * [`Tasks`] - deferred work, handed from interrupts to a thread
//! * [`Threads`] - cooperative, stack-switching threads
//! * [`Blocker`] - parks a thread until an interrupt-driven job is done
//! * [`TwiMaster`] - an interrupt-driven I2C master, blocking or not
//! * [`onewire`] - the DS2483 1-Wire bridge and DS18B20 thermometer
//!
//! Everything is built `const` and meant to live in a `static`. Shared
//! state is guarded with `critical-section`, so the target must provide an
//! implementation (on Cortex-M, the `critical-section-single-core` feature
//! of `cortex-m`).
//!
//! Threads switch with PendSV on Armv7-M and Armv8-M Mainline. On x86-64
//! Unix hosts they switch with a small assembly routine instead, which is
//! how the scheduler is tested.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod arch;
mod blocker;
pub mod config;
pub mod onewire;
mod pool;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod port;
mod queue;
mod stack;
mod stack_pusher;
mod tasks;
mod thread;
pub mod timer;
pub mod twi;

pub use blocker::Blocker;
pub use pool::{BlockRef, Pool};
pub use queue::Queue;
pub use stack::Stack;
use stack_pusher::StackPusher;
pub use tasks::{Defer, Job, Tasks, Work};
pub use thread::{Switch, ThreadId, ThreadState, Threads};
pub use timer::{Repeat, SoftCompare, TickSource, Ticks, TimerHandle, Timers};
pub use twi::{TwiBus, TwiMaster};

// End of File
