//! Context switching for each architecture we can run threads on
//!
//! Every back end provides the same three operations:
//!
//! * `init_frame` - write a saved context onto a fresh stack, such that
//!   switching to it starts the entry function
//! * `switch` - save the caller's context and load another thread's
//! * `start` - load the first thread, abandoning the caller
//!
//! plus `MIN_STACK_SIZE`, the space one saved context needs.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod cortex_m;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) use cortex_m::{MIN_STACK_SIZE, init_frame, start, switch};

#[cfg(all(target_arch = "x86_64", unix))]
mod x86_64;

#[cfg(all(target_arch = "x86_64", unix))]
pub(crate) use x86_64::{MIN_STACK_SIZE, init_frame, start, switch};

#[cfg(not(any(
    all(target_arch = "arm", target_os = "none"),
    all(target_arch = "x86_64", unix)
)))]
compile_error!("No context switch for this target: use Arm M-profile, or x86-64 Unix for testing");

// End of File
