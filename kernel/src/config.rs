//! Compile-time kernel configuration
//!
//! Board selection happens through cargo features; everything else that is
//! tunable lives here as a constant so the memory layout can be read in one
//! place.

/// Size of a page / physical frame in bytes
pub const PAGE_SIZE: usize = 4096;

/// First virtual address owned by the kernel. Everything below belongs to
/// user contexts, everything from here up mirrors the single kernel
/// context.
pub const KERNEL_OFFSET: usize = 0x8000_0000;

/// Physical load address of the kernel image on all supported boards
pub const KERNEL_LOAD_PHYS: u64 = 0x8000;

/// Virtual window reserved for the kernel heap
pub const HEAP_START: usize = 0xD000_0000;
/// Kernel heap size
pub const HEAP_SIZE: usize = 8 * 1024 * 1024;

/// Virtual window reserved for temporary mappings while page tables are
/// edited. A bump allocator runs inside this region and resets on context
/// switch.
pub const TEMP_WINDOW_START: usize = 0xF100_0000;
/// Temporary mapping window size
pub const TEMP_WINDOW_SIZE: usize = 16 * 1024 * 1024;

/// Virtual base the peripheral MMIO block is remapped to once the MMU is on
pub const PERIPHERAL_VIRT_BASE: usize = 0xF200_0000;

/// Amount of low physical memory the kernel context maps linearly at
/// `KERNEL_OFFSET`. Page-table frames must come from this region so they
/// stay addressable while being edited.
pub const DIRECT_MAP_SIZE: usize = 64 * 1024 * 1024;

/// Scheduler tick rate in Hz
pub const SCHEDULER_HZ: u32 = 50;

/// Default priority assigned to processes that do not ask for one
pub const DEFAULT_PRIORITY: usize = 2;

/// Number of pages in a thread's user stack
pub const USER_STACK_PAGES: usize = 4;
/// Virtual address just above the top of user stacks; stacks grow down
/// from here, one slot per thread
pub const USER_STACK_TOP: usize = 0x7800_0000;

/// Number of pages in a thread's kernel stack
pub const KERNEL_STACK_PAGES: usize = 1;

/// Upper bound on nested RPC raises per thread
pub const RPC_MAX_DEPTH: usize = 4;

/// Capacity of the kernel event queue; enqueues beyond this are dropped
/// with a diagnostic
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Physical base of the peripheral MMIO block for the selected board
#[cfg(any(feature = "rpi1", feature = "rpi_zero"))]
pub const PERIPHERAL_PHYS_BASE: u64 = 0x2000_0000;
#[cfg(not(any(feature = "rpi1", feature = "rpi_zero")))]
pub const PERIPHERAL_PHYS_BASE: u64 = 0x3F00_0000;

/// Size of the peripheral MMIO block
pub const PERIPHERAL_SIZE: usize = 0x0100_0000;
