//! Scheduler tick source
//!
//! Default is channel 3 of the BCM system timer, a free-running 1 MHz
//! counter with four compare registers. The `generic-timer` feature
//! switches to the ARM generic timer's virtual counter instead; both
//! sources post the same `Timer` event.

use crate::config::SCHEDULER_HZ;
use crate::event::{EventKind, EventOrigin};

/// Tick interval in microseconds (system timer runs at 1 MHz)
#[allow(dead_code)]
const TICK_INTERVAL_US: u32 = 1_000_000 / SCHEDULER_HZ;

#[cfg(all(target_arch = "arm", target_os = "none", not(feature = "generic-timer")))]
mod hw {
    use tock_registers::interfaces::{Readable, Writeable};
    use tock_registers::registers::{ReadOnly, ReadWrite};

    /// Offset of the system timer inside the peripheral window
    const TIMER_OFFSET: usize = 0x0000_3000;

    #[allow(dead_code)]
    #[repr(C)]
    struct Registers {
        cs: ReadWrite<u32>,   // 0x00, match status
        clo: ReadOnly<u32>,   // 0x04, counter low
        chi: ReadOnly<u32>,   // 0x08, counter high
        c0: ReadWrite<u32>,   // 0x0c
        c1: ReadWrite<u32>,   // 0x10
        c2: ReadWrite<u32>,   // 0x14
        c3: ReadWrite<u32>,   // 0x18
    }

    fn registers() -> &'static Registers {
        let base = super::super::mmio_base() + TIMER_OFFSET;
        // SAFETY: the peripheral window is mapped Device; the system
        // timer sits at this offset on every supported board.
        unsafe { &*(base as *const Registers) }
    }

    pub fn arm_next(interval_us: u32) {
        let timer = registers();
        timer.c3.set(timer.clo.get().wrapping_add(interval_us));
        // Writing the match bit clears it.
        timer.cs.set(1 << 3);
    }
}

#[cfg(all(target_arch = "arm", target_os = "none", feature = "generic-timer"))]
mod hw {
    use core::arch::asm;

    /// Generic timer frequency as programmed by the firmware
    fn frequency() -> u32 {
        let value: u32;
        // SAFETY: CNTFRQ reads are side-effect free.
        unsafe {
            asm!("mrc p15, 0, {}, c14, c0, 0", out(reg) value, options(nomem, nostack));
        }
        value
    }

    pub fn arm_next(interval_us: u32) {
        let ticks = (frequency() / 1_000_000) * interval_us;
        // SAFETY: programming the virtual timer downcount and enabling it
        // is the documented bring-up sequence.
        unsafe {
            asm!("mcr p15, 0, {}, c14, c3, 0", in(reg) ticks, options(nomem, nostack));
            asm!("mcr p15, 0, {r}, c14, c3, 1", r = in(reg) 1u32, options(nomem, nostack));
        }
    }
}

/// Arm the first tick.
pub fn init() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    hw::arm_next(TICK_INTERVAL_US);
    log::debug!("scheduler tick at {} Hz", SCHEDULER_HZ);
}

/// Acknowledge the fired compare, rearm, and post the scheduler tick.
/// Called from the interrupt controller's pending walk.
pub fn on_tick() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    hw::arm_next(TICK_INTERVAL_US);
    crate::event::enqueue(EventKind::Timer, EventOrigin::Kernel, 0);
}
