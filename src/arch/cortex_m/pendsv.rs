//! The PendSV handler, which performs the thread switch
//!
//! PendSV runs at the lowest exception priority, so by the time it runs
//! every other handler has finished and the only state left to save is the
//! interrupted thread's. The hardware has already stacked R0-R3, R12, LR,
//! PC and xPSR (and, for EABIHF threads that used the FPU, S0-S15 and
//! FPSCR) onto that thread's PSP. The handler stacks what is left, records
//! the resulting PSP in the thread table, then unstacks the thread at
//! `Switcher::next` the same way round.
//!
//! Saved stack pointers live in the first word of each [`Thread`], and the
//! table is indexed by shifting the thread number by
//! [`Thread::SIZE_BITS`].
//!
//! The handlers are naked functions because the compiler must not spill
//! anything into R4-R11 before they are saved.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use super::SWITCH_PTR;
use crate::thread::{Switcher, Thread};

/// PendSV Handler for Armv7-M or Armv8-M Mainline, soft-float
#[cfg(arm_abi = "eabi")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    // Only r0-r3 and r12 are free here. Everything else belongs to the
    // outgoing thread until it has been stacked.
    core::arch::naked_asm!(r#"
    // r1 = &Switcher, r3 = thread table
    ldr     r1, ={switch_ptr}
    ldr     r1, [r1]
    ldr     r3, [r1, {table_offset}]

    // r2 = outgoing thread number; none at start up
    ldr     r2, [r1, {current_offset}]
    cmp     r2, #-1
    beq     1f

    // Stack r4-r11 and EXC_RETURN below the hardware frame, then save PSP
    // into thread[r2].sp
    lsl     r2, {thread_size_bits}
    mrs     r0, psp
    stmdb   r0!, {{ r4 - r11, lr }}
    str     r0, [r3, r2]

1:
    // r2 = incoming thread number; load thread[r2].sp and unstack it
    ldr     r2, [r1, {next_offset}]
    str     r2, [r1, {current_offset}]
    lsl     r2, {thread_size_bits}
    ldr     r0, [r3, r2]
    ldmia   r0!, {{ r4 - r11, lr }}
    msr     psp, r0

    // EXC_RETURN in lr takes us back to Thread mode on the PSP
    bx      lr
    "#,
    switch_ptr = sym SWITCH_PTR,
    current_offset = const Switcher::CURRENT_OFFSET,
    next_offset = const Switcher::NEXT_OFFSET,
    table_offset = const Switcher::TABLE_OFFSET,
    thread_size_bits = const Thread::SIZE_BITS,
    );
}

/// PendSV Handler for Armv7-M or Armv8-M Mainline, hard-float
///
/// Bit 4 of EXC_RETURN is clear when the thread was using the FPU. In that
/// case the hardware only stacked S0-S15, so S16-S31 are stacked here too.
#[cfg(arm_abi = "eabihf")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    // Only r0-r3 and r12 are free here. Everything else belongs to the
    // outgoing thread until it has been stacked.
    core::arch::naked_asm!(r#"
    // Workaround https://github.com/rust-lang/rust/issues/127269
    .fpu vfpv3

    // r1 = &Switcher, r3 = thread table
    ldr      r1, ={switch_ptr}
    ldr      r1, [r1]
    ldr      r3, [r1, {table_offset}]

    // r2 = outgoing thread number; none at start up
    ldr      r2, [r1, {current_offset}]
    cmp      r2, #-1
    beq      1f

    // Stack the high FPU registers if the thread used the FPU, then r4-r11
    // and EXC_RETURN, then save PSP into thread[r2].sp
    lsl      r2, {thread_size_bits}
    mrs      r0, psp
    tst      lr, #0x10
    it       eq
    vstmdbeq r0!, {{ s16 - s31 }}
    stmdb    r0!, {{ r4 - r11, lr }}
    str      r0, [r3, r2]

1:
    // r2 = incoming thread number; load thread[r2].sp and unstack it
    ldr      r2, [r1, {next_offset}]
    str      r2, [r1, {current_offset}]
    lsl      r2, {thread_size_bits}
    ldr      r0, [r3, r2]
    ldmia    r0!, {{ r4 - r11, lr }}
    tst      lr, #0x10
    it       eq
    vldmiaeq r0!, {{ s16 - s31 }}
    msr      psp, r0

    // EXC_RETURN in lr takes us back to Thread mode on the PSP
    bx       lr
    "#,
    switch_ptr = sym SWITCH_PTR,
    current_offset = const Switcher::CURRENT_OFFSET,
    next_offset = const Switcher::NEXT_OFFSET,
    table_offset = const Switcher::TABLE_OFFSET,
    thread_size_bits = const Thread::SIZE_BITS,
    );
}

// End of File
