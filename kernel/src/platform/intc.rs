//! BCM283x interrupt controller
//!
//! Pending queries, per-vector enable/disable, and the translation of
//! hardware pending state into kernel events. Vectors 0..63 are the GPU
//! interrupts, 64..71 the ARM-basic ones; the flat numbering matches what
//! user drivers pass to the interrupt syscalls.

/// Number of forwardable vectors
pub const VECTOR_COUNT: u32 = 72;

/// System timer channel 3, the scheduler tick
pub const VECTOR_SYSTEM_TIMER3: u32 = 3;
/// PL011 UART interrupt
pub const VECTOR_UART: u32 = 57;

/// True when `vector` addresses an existing interrupt line.
pub fn valid_vector(vector: u32) -> bool {
    vector < VECTOR_COUNT
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod hw {
    use tock_registers::interfaces::{Readable, Writeable};
    use tock_registers::registers::{ReadOnly, WriteOnly};

    /// Offset of the interrupt controller inside the peripheral window
    const INTC_OFFSET: usize = 0x0000_B200;

    #[allow(dead_code)]
    #[repr(C)]
    struct Registers {
        basic_pending: ReadOnly<u32>,   // 0x00
        pending_1: ReadOnly<u32>,       // 0x04
        pending_2: ReadOnly<u32>,       // 0x08
        fiq_control: WriteOnly<u32>,    // 0x0c
        enable_1: WriteOnly<u32>,       // 0x10
        enable_2: WriteOnly<u32>,       // 0x14
        enable_basic: WriteOnly<u32>,   // 0x18
        disable_1: WriteOnly<u32>,      // 0x1c
        disable_2: WriteOnly<u32>,      // 0x20
        disable_basic: WriteOnly<u32>,  // 0x24
    }

    fn registers() -> &'static Registers {
        let base = super::super::mmio_base() + INTC_OFFSET;
        // SAFETY: the peripheral window is mapped Device; the controller
        // sits at this offset on every supported board.
        unsafe { &*(base as *const Registers) }
    }

    pub fn enable(vector: u32) {
        let intc = registers();
        match vector {
            0..=31 => intc.enable_1.set(1 << vector),
            32..=63 => intc.enable_2.set(1 << (vector - 32)),
            _ => intc.enable_basic.set(1 << (vector - 64)),
        }
    }

    pub fn disable(vector: u32) {
        let intc = registers();
        match vector {
            0..=31 => intc.disable_1.set(1 << vector),
            32..=63 => intc.disable_2.set(1 << (vector - 32)),
            _ => intc.disable_basic.set(1 << (vector - 64)),
        }
    }

    /// Flat list of pending vectors, lowest first.
    pub fn pending(mut visit: impl FnMut(u32)) {
        let intc = registers();
        let pending_1 = intc.pending_1.get();
        let pending_2 = intc.pending_2.get();
        let basic = intc.basic_pending.get() & 0xFF;
        for bit in 0..32 {
            if pending_1 & (1 << bit) != 0 {
                visit(bit);
            }
        }
        for bit in 0..32 {
            if pending_2 & (1 << bit) != 0 {
                visit(bit + 32);
            }
        }
        for bit in 0..8 {
            if basic & (1 << bit) != 0 {
                visit(bit + 64);
            }
        }
    }
}

/// Enable the scheduler tick and console lines.
pub fn init() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        hw::enable(VECTOR_SYSTEM_TIMER3);
        hw::enable(VECTOR_UART);
    }
}

/// Unmask an interrupt line.
pub fn enable_vector(vector: u32) {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    if valid_vector(vector) {
        hw::enable(vector);
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    let _ = vector;
}

/// Mask an interrupt line.
pub fn disable_vector(vector: u32) {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    if valid_vector(vector) {
        hw::disable(vector);
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    let _ = vector;
}

/// Translate pending hardware state into events. Runs in the IRQ
/// exception handler with interrupts masked.
pub fn handle_pending() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    hw::pending(|vector| match vector {
        VECTOR_SYSTEM_TIMER3 => super::systimer::on_tick(),
        VECTOR_UART => crate::event::enqueue(
            crate::event::EventKind::Serial,
            crate::event::EventOrigin::Kernel,
            vector,
        ),
        _ => crate::event::enqueue(
            crate::event::EventKind::Irq,
            crate::event::EventOrigin::Kernel,
            vector,
        ),
    });
}
