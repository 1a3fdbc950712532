//! I/O permission syscalls
//!
//! User drivers get MMIO windows mapped into their own space. Grants are
//! restricted to the peripheral block; the whole-block shortcut (`raise`)
//! is reserved for early drivers spawned by init.

use super::{get_parameter, Caller};
use crate::arch::RegisterContext;
use crate::config::{PERIPHERAL_PHYS_BASE, PERIPHERAL_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::mm::virt::{self, MemoryType, PageType, Protection};
use crate::mm::{PhysicalAddress, PAGE_SIZE};
use crate::process::{pcb::IoGrant, table, ProcessId};

fn within_peripheral_block(phys: u64, length: usize) -> bool {
    phys >= PERIPHERAL_PHYS_BASE
        && phys + length as u64 <= PERIPHERAL_PHYS_BASE + PERIPHERAL_SIZE as u64
}

fn map_grant(pid: ProcessId, phys: u64, length: usize) -> KernelResult<u32> {
    table::with_process(pid, |process| {
        let base = virt::find_free_range(&process.space, length, None)
            .ok_or(KernelError::OutOfMemory)?;
        for page in (0..length).step_by(PAGE_SIZE) {
            if let Err(err) = virt::map(
                &mut process.space,
                base.offset(page),
                PhysicalAddress::new(phys + page as u64),
                MemoryType::Device,
                PageType::NonExecutable,
                Protection::READ | Protection::WRITE,
            ) {
                virt::unmap_range(&mut process.space, base, page, false);
                return Err(err);
            }
        }
        process.io_grants.push(IoGrant {
            phys,
            virt: base.as_usize(),
            length,
        });
        Ok(base.as_usize() as u32)
    })
    .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
}

/// `io_acquire(phys_base, length)` -> mapped virtual address
pub fn acquire(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let phys = get_parameter(ctx, 0) as u64;
    let length = get_parameter(ctx, 1) as usize;
    if length == 0 || phys % PAGE_SIZE as u64 != 0 || length % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument { what: "io range" });
    }
    if !within_peripheral_block(phys, length) {
        return Err(KernelError::NotPermitted {
            operation: "io acquire outside the peripheral block",
        });
    }
    map_grant(caller.pid, phys, length)
}

/// `io_release(phys_base, length)`
pub fn release(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let phys = get_parameter(ctx, 0) as u64;
    let length = get_parameter(ctx, 1) as usize;
    table::with_process(caller.pid, |process| {
        let position = process
            .io_grants
            .iter()
            .position(|grant| grant.phys == phys && grant.length == length)
            .ok_or(KernelError::NotFound { resource: "io grant" })?;
        let grant = process.io_grants.remove(position);
        virt::unmap_range(
            &mut process.space,
            crate::mm::VirtualAddress::new(grant.virt),
            grant.length,
            false,
        );
        Ok(0)
    })
    .ok_or(KernelError::ProcessNotFound {
        pid: caller.pid.0,
    })?
}

/// `io_check(phys_base, length)` -> 1 when the range is granted
pub fn check(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let phys = get_parameter(ctx, 0) as u64;
    let length = get_parameter(ctx, 1) as usize;
    let granted = table::with_process(caller.pid, |process| {
        process.io_permitted(phys, length)
    })
    .ok_or(KernelError::ProcessNotFound {
        pid: caller.pid.0,
    })?;
    Ok(granted as u32)
}

/// `io_raise()` -> virtual base of the whole peripheral block
///
/// Only init and its direct children qualify; everyone else acquires
/// specific windows.
pub fn raise(_ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let eligible = table::with_process(caller.pid, |process| {
        process.id == ProcessId(1) || process.parent == ProcessId(1)
    })
    .ok_or(KernelError::ProcessNotFound {
        pid: caller.pid.0,
    })?;
    if !eligible {
        return Err(KernelError::NotPermitted {
            operation: "io raise",
        });
    }
    map_grant(caller.pid, PERIPHERAL_PHYS_BASE, PERIPHERAL_SIZE)
}
