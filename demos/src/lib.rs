//! Common panic/fault/timestamp handlers for the demos

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

use core::sync::atomic::{AtomicU32, Ordering};

use defmt_semihosting as _;

/// SysTick interrupts since boot
///
/// The demo's SysTick handler counts this up.
pub static UPTIME: AtomicU32 = AtomicU32::new(0);

/// Called when a panic occurs.
///
/// Logs the panic to defmt and then crashes the CPU.
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::println!("PANIC: {}", defmt::Debug2Format(info));
    cortex_m::asm::udf();
}

/// Called when a HardFault occurs.
///
/// Logs the fault to defmt and then crashes the CPU.
#[cortex_m_rt::exception]
unsafe fn HardFault(info: &cortex_m_rt::ExceptionFrame) -> ! {
    defmt::println!("FAULT: {}", defmt::Debug2Format(info));
    cortex_m::asm::udf();
}

// Stamp each log line with the tick count
defmt::timestamp!("{=u32:010}", UPTIME.load(Ordering::Relaxed));

// End of File
