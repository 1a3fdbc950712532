//! Video-core mailbox, property channel
//!
//! Tags carry their argument tuple as an enum variant, so request length
//! and argument types are static. The property buffer is a 16-byte
//! aligned scratch area reused for every call.

use spin::Mutex;

/// A property-channel request tag with its typed arguments.
#[derive(Debug, Clone, Copy)]
pub enum PropertyTag {
    /// ARM-visible memory split: responds with base and size
    GetArmMemory,
    /// Video-core memory split: responds with base and size
    GetVcMemory,
    /// Board serial number
    GetBoardSerial,
    /// Clock rate query for the given clock id
    GetClockRate { clock: u32 },
    /// Clock rate assignment
    SetClockRate {
        clock: u32,
        rate: u32,
        skip_setting_turbo: u32,
    },
}

impl PropertyTag {
    /// Wire id of the tag
    pub fn id(self) -> u32 {
        match self {
            PropertyTag::GetArmMemory => 0x0001_0005,
            PropertyTag::GetVcMemory => 0x0001_0006,
            PropertyTag::GetBoardSerial => 0x0001_0004,
            PropertyTag::GetClockRate { .. } => 0x0003_0002,
            PropertyTag::SetClockRate { .. } => 0x0003_8002,
        }
    }

    /// Request payload words
    pub fn request_words(self) -> ([u32; 3], usize) {
        match self {
            PropertyTag::GetArmMemory
            | PropertyTag::GetVcMemory
            | PropertyTag::GetBoardSerial => ([0; 3], 0),
            PropertyTag::GetClockRate { clock } => ([clock, 0, 0], 1),
            PropertyTag::SetClockRate {
                clock,
                rate,
                skip_setting_turbo,
            } => ([clock, rate, skip_setting_turbo], 3),
        }
    }

    /// Response payload size in words
    pub fn response_words(self) -> usize {
        match self {
            PropertyTag::GetArmMemory | PropertyTag::GetVcMemory => 2,
            PropertyTag::GetBoardSerial => 2,
            PropertyTag::GetClockRate { .. } => 2,
            PropertyTag::SetClockRate { .. } => 2,
        }
    }
}

/// Result payload of a property call (up to two words used today)
pub type PropertyResponse = [u32; 2];

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod hw {
    use tock_registers::interfaces::{Readable, Writeable};
    use tock_registers::registers::{ReadOnly, WriteOnly};

    /// Offset of mailbox 0 inside the peripheral window
    const MAILBOX_OFFSET: usize = 0x0000_B880;
    /// Property tags (ARM to VC) channel
    const CHANNEL_PROPERTY: u32 = 8;

    const STATUS_FULL: u32 = 1 << 31;
    const STATUS_EMPTY: u32 = 1 << 30;

    #[allow(dead_code)]
    #[repr(C)]
    struct Registers {
        read: ReadOnly<u32>,     // 0x00
        _reserved: [u32; 5],     // 0x04
        status: ReadOnly<u32>,   // 0x18
        _config: ReadOnly<u32>,  // 0x1c
        write: WriteOnly<u32>,   // 0x20
    }

    fn registers() -> &'static Registers {
        let base = super::super::mmio_base() + MAILBOX_OFFSET;
        // SAFETY: the peripheral window is mapped Device; mailbox 0 sits
        // at this offset on every supported board.
        unsafe { &*(base as *const Registers) }
    }

    /// Exchange a property buffer with the firmware. `buffer_phys` must
    /// be the 16-byte aligned physical address of the message.
    pub fn call(buffer_phys: u32) -> bool {
        let mailbox = registers();
        while mailbox.status.get() & STATUS_FULL != 0 {
            core::hint::spin_loop();
        }
        mailbox.write.set((buffer_phys & !0xF) | CHANNEL_PROPERTY);
        loop {
            while mailbox.status.get() & STATUS_EMPTY != 0 {
                core::hint::spin_loop();
            }
            let value = mailbox.read.get();
            if value & 0xF == CHANNEL_PROPERTY {
                return value & !0xF == buffer_phys & !0xF;
            }
        }
    }
}

/// Property message scratch buffer; 16-byte aligned as the interface
/// demands.
#[repr(C, align(16))]
struct PropertyBuffer {
    words: [u32; 32],
}

static PROPERTY_BUFFER: Mutex<PropertyBuffer> = Mutex::new(PropertyBuffer { words: [0; 32] });

/// Issue a single-tag property call and return its response payload.
pub fn property_call(tag: PropertyTag) -> Option<PropertyResponse> {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        let mut buffer = PROPERTY_BUFFER.lock();
        let (request, request_len) = tag.request_words();
        let payload_len = request_len.max(tag.response_words());

        buffer.words.fill(0);
        buffer.words[0] = ((payload_len + 6) * 4) as u32;
        buffer.words[1] = 0; // request
        buffer.words[2] = tag.id();
        buffer.words[3] = (payload_len * 4) as u32;
        buffer.words[4] = 0; // tag request code
        buffer.words[5..5 + request_len].copy_from_slice(&request[..request_len]);
        // words[5 + payload_len] is already the end tag (zero).

        let phys = &buffer.words as *const _ as usize as u32;
        if !hw::call(phys) {
            return None;
        }
        // 0x8000_0000 flags a successful response.
        if buffer.words[1] != 0x8000_0000 {
            return None;
        }
        let mut response = [0u32; 2];
        let copy = tag.response_words().min(2);
        response[..copy].copy_from_slice(&buffer.words[5..5 + copy]);
        Some(response)
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        let _ = tag;
        let _ = &PROPERTY_BUFFER;
        None
    }
}

/// ARM memory split: `(base, size)`.
pub fn get_arm_memory() -> Option<(u32, u32)> {
    property_call(PropertyTag::GetArmMemory).map(|r| (r[0], r[1]))
}

/// Video-core memory split: `(base, size)`.
pub fn get_vc_memory() -> Option<(u32, u32)> {
    property_call(PropertyTag::GetVcMemory).map(|r| (r[0], r[1]))
}

/// Rate of the given clock in Hz.
pub fn get_clock_rate(clock: u32) -> Option<u32> {
    property_call(PropertyTag::GetClockRate { clock }).map(|r| r[1])
}
