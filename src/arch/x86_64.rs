//! x86-64 System V context switch
//!
//! This lets the scheduler run, unmodified, inside a host process. Each
//! thread's saved context is its general purpose registers and RFLAGS,
//! pushed onto its own stack, with the resume address just above them.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::Ordering;

use crate::{
    StackPusher,
    thread::{Switcher, Thread},
};

/// General purpose registers in a saved context (everything except RSP)
const SAVED_REGS: usize = 15;

/// Space for a saved context: the registers, RFLAGS, the resume address and
/// the alignment word
pub(crate) const MIN_STACK_SIZE: usize = (SAVED_REGS + 3) * core::mem::size_of::<usize>();

/// RFLAGS for a new thread: the reserved bit, and IF
const INITIAL_RFLAGS: usize = 0x202;

/// Build the frame that [`swap_context`] will pop when a thread first runs
///
/// # Safety
///
/// `top` must be the 16-byte aligned top of a stack with at least
/// [`MIN_STACK_SIZE`] bytes free below it.
pub(crate) unsafe fn init_frame(top: *mut usize, entry: fn() -> !) -> *mut usize {
    // SAFETY: the caller promised us the space
    let mut stack_pusher = unsafe { StackPusher::new(top) };
    // Stands in for a return address, so `entry` sees the stack alignment a
    // call would give it
    stack_pusher.push(0);
    // `ret` at the end of the swap jumps here
    stack_pusher.push(entry as usize);
    stack_pusher.push(INITIAL_RFLAGS);
    // RAX, RBX, RCX, RDX, RBP, RSI, RDI, R8 - R15
    stack_pusher.push_zeros(SAVED_REGS);
    stack_pusher.current()
}

/// Save the calling thread and resume thread `to`
///
/// # Safety
///
/// `from` must be the calling thread and `to` must have a valid saved
/// context.
pub(crate) unsafe fn switch(threads: &[Thread], switcher: &Switcher, from: usize, to: usize) {
    switcher.current.store(to, Ordering::Release);
    // SAFETY: the caller guarantees both contexts
    unsafe { swap_context(threads[from].sp_slot(), threads[to].sp()) }
}

/// Resume the first thread, abandoning the calling context
///
/// # Safety
///
/// Thread 0 must have a valid saved context.
pub(crate) unsafe fn start(threads: &[Thread], switcher: &Switcher) -> ! {
    switcher
        .table
        .store(threads.as_ptr() as *mut Thread, Ordering::Release);
    switcher.next.store(0, Ordering::Relaxed);
    switcher.current.store(0, Ordering::Release);
    // The caller's context is saved here and never loaded again
    let mut abandoned: *mut usize = core::ptr::null_mut();
    // SAFETY: the caller guarantees thread 0
    unsafe { swap_context(&mut abandoned, threads[0].sp()) };
    // impossible to get here
    unreachable!();
}

/// Push every register onto the current stack, store the stack pointer to
/// `*save`, then load the stack pointer `load` and pop every register from
/// it.
///
/// It is a naked function because we do not want the compiler pushing
/// anything else to the stack.
#[unsafe(naked)]
unsafe extern "sysv64" fn swap_context(save: *mut *mut usize, load: *mut usize) {
    core::arch::naked_asm!(
        r#"
    // Stack the calling thread
    pushfq
    push    rax
    push    rbx
    push    rcx
    push    rdx
    push    rbp
    push    rsi
    push    rdi
    push    r8
    push    r9
    push    r10
    push    r11
    push    r12
    push    r13
    push    r14
    push    r15

    // *save = rsp; rsp = load
    mov     [rdi], rsp
    mov     rsp, rsi

    // Unstack the next thread
    pop     r15
    pop     r14
    pop     r13
    pop     r12
    pop     r11
    pop     r10
    pop     r9
    pop     r8
    pop     rdi
    pop     rsi
    pop     rbp
    pop     rdx
    pop     rcx
    pop     rbx
    pop     rax
    popfq

    // Return into the next thread
    ret
    "#
    );
}


// End of File
