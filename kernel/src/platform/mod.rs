//! Raspberry Pi platform support
//!
//! The BCM283x peripheral block is identity-addressed during early boot
//! and remapped into the kernel half once the MMU configuration is final;
//! [`mmio_base`] tracks the currently valid base.

pub mod intc;
pub mod mailbox;
pub mod systimer;
pub mod uart;

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::mm::PhysicalAddress;

static MMIO_BASE: AtomicUsize = AtomicUsize::new(crate::config::PERIPHERAL_PHYS_BASE as usize);

/// Current base address of the peripheral block.
pub fn mmio_base() -> usize {
    MMIO_BASE.load(Ordering::Relaxed)
}

/// Switch MMIO access to the kernel-half window. Called right after the
/// kernel context is installed.
pub fn remap_mmio() {
    MMIO_BASE.store(crate::config::PERIPHERAL_VIRT_BASE, Ordering::Relaxed);
}

/// Bring up console, interrupt controller, and timer.
pub fn init() {
    uart::init();
    intc::init();
    systimer::init();
}

/// RAM the firmware keeps for the video core, so the frame allocator can
/// fence it off. Answered by the mailbox; absent on host builds.
pub fn videocore_carveout() -> Option<(PhysicalAddress, usize)> {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        mailbox::get_vc_memory()
            .map(|(base, size)| (PhysicalAddress::new(base as u64), size as usize))
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        None
    }
}

/// Total ARM-visible RAM reported by the firmware; used when the boot
/// data carries no memory description.
pub fn arm_memory_size() -> Option<u64> {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        mailbox::get_arm_memory().map(|(_base, size)| size as u64)
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        None
    }
}
