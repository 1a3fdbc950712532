//! PL011 UART console
//!
//! Polled transmit for kernel output; the receive path is interrupt
//! driven and feeds `Serial` events.

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod hw {
    use core::fmt;

    use tock_registers::interfaces::{Readable, Writeable};
    use tock_registers::register_bitfields;
    use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};

    /// Offset of the PL011 block inside the peripheral window
    const UART_OFFSET: usize = 0x0020_1000;

    register_bitfields! {
        u32,

        /// Flag register
        FR [
            /// Transmit FIFO full
            TXFF OFFSET(5) NUMBITS(1) [],
            /// Receive FIFO empty
            RXFE OFFSET(4) NUMBITS(1) []
        ],

        /// Control register
        CR [
            RXE OFFSET(9) NUMBITS(1) [],
            TXE OFFSET(8) NUMBITS(1) [],
            UARTEN OFFSET(0) NUMBITS(1) []
        ],

        /// Interrupt mask set/clear
        IMSC [
            /// Receive interrupt
            RXIM OFFSET(4) NUMBITS(1) []
        ],

        /// Interrupt clear
        ICR [
            ALL OFFSET(0) NUMBITS(11) []
        ]
    }

    #[allow(dead_code)]
    #[repr(C)]
    struct Registers {
        dr: ReadWrite<u32>,                       // 0x00
        _reserved0: [u32; 5],                     // 0x04
        fr: ReadOnly<u32, FR::Register>,          // 0x18
        _reserved1: [u32; 2],                     // 0x1c
        ibrd: WriteOnly<u32>,                     // 0x24
        fbrd: WriteOnly<u32>,                     // 0x28
        lcr_h: WriteOnly<u32>,                    // 0x2c
        cr: ReadWrite<u32, CR::Register>,         // 0x30
        ifls: ReadWrite<u32>,                     // 0x34
        imsc: ReadWrite<u32, IMSC::Register>,     // 0x38
        _reserved2: [u32; 2],                     // 0x3c
        icr: WriteOnly<u32, ICR::Register>,       // 0x44
    }

    fn registers() -> &'static Registers {
        let base = super::super::mmio_base() + UART_OFFSET;
        // SAFETY: the peripheral window is mapped Device and the PL011
        // block lives at this fixed offset on every supported board.
        unsafe { &*(base as *const Registers) }
    }

    pub fn init() {
        let uart = registers();
        uart.cr.set(0);
        uart.icr.write(ICR::ALL.val(0x7FF));
        // 115200 baud from the 48 MHz UART clock the firmware sets up.
        uart.ibrd.set(26);
        uart.fbrd.set(3);
        // 8n1 with FIFOs.
        uart.lcr_h.set((0b11 << 5) | (1 << 4));
        uart.imsc.write(IMSC::RXIM::SET);
        uart.cr.write(CR::UARTEN::SET + CR::TXE::SET + CR::RXE::SET);
    }

    pub fn write_byte(byte: u8) {
        let uart = registers();
        while uart.fr.is_set(FR::TXFF) {
            core::hint::spin_loop();
        }
        uart.dr.set(byte as u32);
    }

    pub fn read_byte() -> Option<u8> {
        let uart = registers();
        if uart.fr.is_set(FR::RXFE) {
            None
        } else {
            Some(uart.dr.get() as u8)
        }
    }

    pub struct Writer;

    impl fmt::Write for Writer {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for byte in s.bytes() {
                write_byte(byte);
            }
            Ok(())
        }
    }
}

/// Configure the UART for 115200 8n1 with receive interrupts.
pub fn init() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    hw::init();
}

/// Print formatted output; backs the `print!` macros.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn _print(args: core::fmt::Arguments) {
    let _ = core::fmt::write(&mut hw::Writer, args);
}

/// Drain the receive FIFO; runs from the `Serial` event.
pub fn handle_receive() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    while let Some(byte) = hw::read_byte() {
        log::trace!("uart rx {:#04x}", byte);
    }
}
