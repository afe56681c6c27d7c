//! Cortex-M set up for the timer tick and the thread switch

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use cortex_m::peripheral::{SCB, SYST, scb::SystemHandler, syst::SystClkSource};

use crate::config::TIMER_HZ;

/// The lowest exception priority, whatever the number of priority bits
const LOWEST_PRIORITY: u8 = 0xFF;

/// Start SysTick interrupting at [`TIMER_HZ`]
///
/// `core_hz` is the processor clock. The SysTick handler should call
/// [`crate::SoftCompare::tick`], then [`crate::Timers::on_compare`] if that
/// returns `true`.
pub fn start_ticks(syst: &mut SYST, core_hz: u32) {
    let reload = (core_hz / TIMER_HZ).saturating_sub(1);
    info!("SysTick reload {=u32} for {=u32} Hz", reload, TIMER_HZ);
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Put PendSV and SysTick at the lowest priority
///
/// PendSV must not switch threads in the middle of another handler, and
/// timer callbacks must not hold off peripheral interrupts like the I2C
/// one.
pub fn set_switch_priority(scb: &mut SCB) {
    // SAFETY: lowering these priorities cannot break a priority-based
    // critical section, as nothing runs below them
    unsafe {
        scb.set_priority(SystemHandler::PendSV, LOWEST_PRIORITY);
        scb.set_priority(SystemHandler::SysTick, LOWEST_PRIORITY);
    }
}

// End of File
