//! Memory syscalls
//!
//! Plain acquire/release plus the shared-memory triple. Protection bits
//! on the wire: read = 1, write = 2, executable = 4, combinable.

use super::{get_parameter, Caller};
use crate::arch::RegisterContext;
use crate::error::{KernelError, KernelResult};
use crate::mm::virt::{self, MemoryType, PageType, Protection};
use crate::mm::{shared, VirtualAddress};
use crate::process::table;

const PROT_READ: u32 = 1;
const PROT_WRITE: u32 = 2;
const PROT_EXEC: u32 = 4;

fn protection_from_bits(bits: u32) -> KernelResult<(Protection, PageType)> {
    if bits & !(PROT_READ | PROT_WRITE | PROT_EXEC) != 0 {
        return Err(KernelError::InvalidArgument {
            what: "protection bits",
        });
    }
    let mut protection = Protection::empty();
    if bits & PROT_READ != 0 {
        protection |= Protection::READ;
    }
    if bits & PROT_WRITE != 0 {
        protection |= Protection::WRITE;
    }
    let page_type = if bits & PROT_EXEC != 0 {
        protection |= Protection::EXECUTE;
        PageType::Executable
    } else {
        PageType::NonExecutable
    };
    Ok((protection, page_type))
}

/// `memory_acquire(address_hint, length, protection)` -> address
///
/// A null hint means "choose"; anything else is a fixed request that must
/// sit page-aligned in the caller's user range.
pub fn acquire(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let hint = get_parameter(ctx, 0) as usize;
    let length = get_parameter(ctx, 1) as usize;
    let bits = get_parameter(ctx, 2);

    if length == 0 {
        return Err(KernelError::InvalidArgument { what: "zero length" });
    }
    let (protection, page_type) = protection_from_bits(bits)?;
    let length = crate::mm::page_round_up(length);

    table::with_process(caller.pid, |process| {
        let base = if hint == 0 {
            virt::find_free_range(&process.space, length, None).ok_or(KernelError::OutOfMemory)?
        } else {
            let fixed = VirtualAddress::new(hint);
            if !fixed.is_page_aligned()
                || hint + length > crate::config::KERNEL_OFFSET
                || virt::is_mapped_range(&process.space, fixed, length)
            {
                return Err(KernelError::InvalidArgument {
                    what: "fixed mapping request",
                });
            }
            fixed
        };
        virt::map_range_random(
            &mut process.space,
            base,
            length,
            MemoryType::Normal,
            page_type,
            protection,
        )?;
        Ok(base.as_usize() as u32)
    })
    .ok_or(KernelError::ProcessNotFound {
        pid: caller.pid.0,
    })?
}

/// `memory_release(address, length)`
pub fn release(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let address = get_parameter(ctx, 0) as usize;
    let length = get_parameter(ctx, 1) as usize;
    if address % crate::mm::PAGE_SIZE != 0 || length == 0 {
        return Err(KernelError::InvalidArgument {
            what: "release range",
        });
    }
    if address + length > crate::config::KERNEL_OFFSET {
        return Err(KernelError::BadUserAccess { address });
    }
    table::with_process(caller.pid, |process| {
        virt::unmap_range(
            &mut process.space,
            VirtualAddress::new(address),
            length,
            true,
        );
    })
    .ok_or(KernelError::ProcessNotFound {
        pid: caller.pid.0,
    })?;
    Ok(0)
}

/// `memory_shared_create(size)` -> segment id
pub fn shared_create(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let size = get_parameter(ctx, 0) as usize;
    shared::create(caller.pid, size)
}

/// `memory_shared_attach(id, address_hint)` -> address
pub fn shared_attach(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let id = get_parameter(ctx, 0);
    let hint = get_parameter(ctx, 1) as usize;
    let hint = if hint == 0 {
        None
    } else {
        Some(VirtualAddress::new(hint))
    };
    table::with_process(caller.pid, |process| {
        shared::attach(caller.pid, &mut process.space, id, hint)
            .map(|address| address.as_usize() as u32)
    })
    .ok_or(KernelError::ProcessNotFound {
        pid: caller.pid.0,
    })?
}

/// `memory_shared_detach(id)`
pub fn shared_detach(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let id = get_parameter(ctx, 0);
    table::with_process(caller.pid, |process| {
        shared::detach(caller.pid, &mut process.space, id)
    })
    .ok_or(KernelError::ProcessNotFound {
        pid: caller.pid.0,
    })??;
    Ok(0)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn protection_bits_decode() {
        let (protection, page_type) =
            protection_from_bits(PROT_READ | PROT_WRITE).expect("rw decodes");
        assert!(protection.contains(Protection::READ | Protection::WRITE));
        assert_eq!(page_type, PageType::NonExecutable);

        let (protection, page_type) =
            protection_from_bits(PROT_READ | PROT_EXEC).expect("rx decodes");
        assert!(protection.contains(Protection::EXECUTE));
        assert_eq!(page_type, PageType::Executable);

        assert!(protection_from_bits(0x8).is_err(), "unknown bits rejected");
    }
}
