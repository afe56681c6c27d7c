//! Arm M-profile context switch, using PendSV
//!
//! The Arm hardware will push {xPSR, PC, LR, R12, R3, R2, R1, R0} to PSP
//! when an exception occurs. The PendSV handler then pushes the rest
//! (R11 to R4, plus the EXC_RETURN value in LR).

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::{
    StackPusher,
    thread::{Switcher, Thread},
};

mod pendsv;

#[cfg(any(arm_architecture = "v6-m", arm_architecture = "v8-m.base"))]
compile_error!("Armv6-M and Armv8-M Baseline are not supported");

/// The location of our one and only [`Switcher`] object.
///
/// We need this so that the free-standing PendSV handler knows where all our
/// thread state is.
pub(crate) static SWITCH_PTR: AtomicPtr<Switcher> = AtomicPtr::new(core::ptr::null_mut());

/// This is the minimum stack we can support, because of the state we need to push
///
/// Make space for seventeen 32-bit words in the thread state, plus some
/// headroom
#[cfg(arm_abi = "eabi")]
pub(crate) const MIN_STACK_SIZE: usize = (4 * 17) + 12;

/// This is the minimum stack we can support, because of the state we need to push
///
/// Make space for seventeen 32-bit words, thirty-two 32-bit FPU registers,
/// plus FPU status register, in the thread state, plus some headroom
#[cfg(arm_abi = "eabihf")]
pub(crate) const MIN_STACK_SIZE: usize = (4 * 50) + 8;

/// The value of the Processor Status Register when a thread starts
///
/// The only bit we need to set is the T bit, to indicate that the
/// thread should run in Thumb mode (the only supported mode on Armv7-M)
const DEFAULT_XPSR: usize = 1 << 24;

/// Return to Thread Mode, Process Stack, with no FPU state
const EXC_RETURN_THREAD_PSP: usize = 0xFFFF_FFFD;

/// Build the frame that PendSV will unstack when a thread first runs
///
/// # Safety
///
/// `top` must be the 8-byte aligned top of a stack with at least
/// [`MIN_STACK_SIZE`] bytes free below it.
pub(crate) unsafe fn init_frame(top: *mut usize, entry: fn() -> !) -> *mut usize {
    // SAFETY: the caller promised us the space
    let mut stack_pusher = unsafe { StackPusher::new(top) };

    // Standard Arm exception frame

    // xPSR
    stack_pusher.push(DEFAULT_XPSR);
    // PC - the Thumb bit is carried in xPSR, not here
    stack_pusher.push(entry as usize & !1);
    // LR, R12, R3 - R0
    stack_pusher.push_zeros(6);

    // Additional thread state we persist

    // Extra copy of LR so we can check for FPU status. This copy does not
    // have the FPU bit set, so we don't need to push an Extended Frame
    // above, or the other 16 FPU registers, into the initial state.
    stack_pusher.push(EXC_RETURN_THREAD_PSP);

    // R4 - R11
    stack_pusher.push_zeros(8);

    stack_pusher.current()
}

/// Ask PendSV to switch to thread `to`
///
/// PendSV runs as soon as we return to Thread mode with interrupts enabled,
/// which is immediately when called from a thread outside a critical
/// section.
///
/// # Safety
///
/// `to` must have a valid saved context.
pub(crate) unsafe fn switch(_threads: &[Thread], switcher: &Switcher, _from: usize, to: usize) {
    switcher.next.store(to, Ordering::Release);
    cortex_m::peripheral::SCB::set_pendsv();
    // flush the pipeline to ensure the PendSV fires before we carry on
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

/// Run thread 0 on the Process Stack
///
/// We should be in Privileged Thread mode on the Main stack.
///
/// # Safety
///
/// Thread 0 must have a valid saved context, and `switcher` and `threads`
/// must never move.
pub(crate) unsafe fn start(threads: &[Thread], switcher: &Switcher) -> ! {
    switcher
        .table
        .store(threads.as_ptr() as *mut Thread, Ordering::Relaxed);
    switcher.current.store(usize::MAX, Ordering::Relaxed);
    switcher.next.store(0, Ordering::Relaxed);

    // remember where this object is - it cannot move because we do not exit this function
    let switcher_addr = switcher as *const Switcher as *mut Switcher;
    info!("Switcher @ {=usize:08x}", switcher_addr as usize);
    SWITCH_PTR.store(switcher_addr, Ordering::Release);

    // Fire the PendSV exception - with no current thread it will only load
    // thread 0
    cortex_m::peripheral::SCB::set_pendsv();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
    // impossible to get here
    unreachable!();
}

// End of File
