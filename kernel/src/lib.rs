//! Carmine kernel library
//!
//! A microkernel for ARMv6/ARMv7 Raspberry Pi boards: address spaces,
//! threads, physical and shared memory, typed messages with response
//! correlation, interrupt forwarding, and a timer. Everything else lives
//! in user-space servers on top of the message plane.
//!
//! The crate also builds for the host so the architecture-independent
//! subsystems run under the standard test harness; hardware access is
//! stubbed there.

#![no_std]

#[cfg(not(target_os = "none"))]
extern crate std;

extern crate alloc;

// Host builds delegate to the system allocator so tests can allocate
// normally; the target allocator lives in `mm::heap`.
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod boot;
pub mod config;
pub mod elf;
pub mod error;
pub mod event;
pub mod ipc;
pub mod irq;
pub mod logger;
pub mod mm;
pub mod platform;
pub mod process;
pub mod sched;
pub mod syscall;
