//! Compile-time configuration
//!
//! Capacities that vary per board are const generics on the owning types;
//! the constants here are the rates and limits the runtime is tuned around.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

/// Rate of the timer tick, in Hz.
pub const TIMER_HZ: u32 = 1024;

/// Microseconds per timer tick (rounded down).
pub const TIMER_TICK_US: u32 = 1_000_000 / TIMER_HZ;

/// Suggested timer pool size for a board.
pub const MAX_TIMERS: usize = 8;

/// Suggested deferred work queue depth for a board.
pub const TASK_QUEUE_DEPTH: usize = 10;

/// How many distinct jobs can wait for room when the deferred work queue
/// is full.
pub const TASK_LATE_DEPTH: usize = 4;

/// How many times a bus transaction is restarted after an arbitration loss,
/// bus error or NAK before it fails.
pub const TWI_MAX_RETRIES: u8 = 3;

/// Largest byte count of a single bus phase.
pub const TWI_MAX_PHASE: usize = u8::MAX as usize;

/// How many times the 1-Wire bridge status is polled while the 1-Wire bus
/// is busy.
pub const ONEWIRE_WAIT_POLLS: u8 = 10;

// End of File
