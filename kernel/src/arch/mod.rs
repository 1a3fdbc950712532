//! Architecture abstraction layer
//!
//! The kernel targets ARMv6/ARMv7. Host builds (for the test harness) get
//! inert fallbacks so the architecture-independent subsystems can be
//! exercised off-target.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod arm;

pub mod context;

pub use context::RegisterContext;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use arm::{
    enable_interrupts, fault_address_data, fault_address_prefetch, halt, interrupts_enabled,
    wait_for_interrupt, without_interrupts,
};

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use arm::cp15::{lpae_supported, physical_bus_bits, tlb_flush_address, tlb_flush_all};

// ---------------------------------------------------------------------------
// Host fallbacks
// ---------------------------------------------------------------------------

/// Run a closure with interrupts masked, restoring the previous mask state
/// afterwards. On the host there is nothing to mask.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn interrupts_enabled() -> bool {
    false
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn enable_interrupts() {}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn wait_for_interrupt() {}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn halt() -> ! {
    panic!("halt() is only meaningful on the target");
}

/// True when the CPU advertises the long (LPAE) descriptor format
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn lpae_supported() -> bool {
    false
}

/// Width of the physical address bus in bits
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn physical_bus_bits() -> u32 {
    32
}

/// Invalidate one virtual address in the TLB
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn tlb_flush_address(_virt: usize) {}

/// Invalidate the whole TLB
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn tlb_flush_all() {}

/// Faulting address of the current data abort
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn fault_address_data() -> usize {
    0
}

/// Faulting address of the current prefetch abort
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn fault_address_prefetch() -> usize {
    0
}

/// Initialize architecture state (exception vectors, fault reporting).
pub fn init() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    arm::exception::init();
}
