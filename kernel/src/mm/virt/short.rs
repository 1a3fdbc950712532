//! Short descriptor format (32-bit, VMSAv6/v7 without LPAE)
//!
//! Two-level tables: a first-level table of 1 MiB entries pointing at
//! coarse second-level tables of 256 small pages. The kernel root is the
//! full 16 KiB table required by TTBR1; user roots cover the low 2 GiB
//! with an 8 KiB table, matching a TTBCR split of N=1.

use super::descriptor::{
    self, copy_page, resolves_executable, table_block_ptr, table_ptr, Driver,
};
use super::{AddressSpace, ContextType, MemoryType, PageType, Protection};
use crate::config::KERNEL_OFFSET;
use crate::error::{KernelError, KernelResult};
use crate::mm::{frame_allocator, PhysicalAddress, VirtualAddress, PAGE_SIZE};

/// Entries in a kernel first-level table (full 4 GiB)
const KERNEL_L1_ENTRIES: usize = 4096;
/// Entries in a user first-level table (low 2 GiB, TTBCR.N = 1)
const USER_L1_ENTRIES: usize = 2048;
/// Entries in a coarse second-level table
const L2_ENTRIES: usize = 256;

/// First-level coarse-table descriptor type bits
const L1_TYPE_COARSE: u32 = 0b01;
/// Second-level small-page type bit
const L2_TYPE_SMALL: u32 = 0b10;
/// Execute-never bit of a small page
const L2_XN: u32 = 0b01;

const L1_TABLE_MASK: u32 = 0xFFFF_FC00;
const L2_PAGE_MASK: u32 = 0xFFFF_F000;

/// Encode the attribute bits of a small-page descriptor.
///
/// TEX/C/B select the memory type, AP[2:0] the access permissions, bit 0
/// the execute-never state. The physical address is OR-ed in by the
/// caller.
pub fn encode_attributes(
    memory: MemoryType,
    executable: bool,
    writable: bool,
    user: bool,
) -> u32 {
    let mut entry = L2_TYPE_SMALL;
    if !executable {
        entry |= L2_XN;
    }

    let (tex, cacheable, bufferable) = match memory {
        MemoryType::DeviceStrong => (0b000, false, false),
        MemoryType::Device => (0b000, false, true),
        MemoryType::Normal => (0b001, true, true),
        MemoryType::NormalNoCache => (0b001, false, false),
    };
    entry |= tex << 6;
    if cacheable {
        entry |= 1 << 3;
    }
    if bufferable {
        entry |= 1 << 2;
    }

    // AP[2] in bit 9, AP[1:0] in bits 5:4.
    let (ap2, ap10) = match (user, writable) {
        (false, true) => (0, 0b01),
        (false, false) => (1, 0b01),
        (true, true) => (0, 0b11),
        (true, false) => (1, 0b10),
    };
    entry |= ap10 << 4;
    entry |= ap2 << 9;

    entry
}

/// Short-format driver singleton
pub struct ShortDriver;

pub static SHORT_DRIVER: ShortDriver = ShortDriver;

impl ShortDriver {
    fn l1_entries(kind: ContextType) -> usize {
        match kind {
            ContextType::Kernel => KERNEL_L1_ENTRIES,
            ContextType::User => USER_L1_ENTRIES,
        }
    }

    fn l1_index(ctx: &AddressSpace, virt: VirtualAddress) -> usize {
        let index = virt.as_usize() >> 20;
        match ctx.kind() {
            ContextType::Kernel => {
                assert!(
                    virt.as_usize() >= KERNEL_OFFSET,
                    "kernel context mapping below the kernel offset"
                );
                index
            }
            ContextType::User => {
                assert!(
                    virt.as_usize() < KERNEL_OFFSET,
                    "user context mapping above the kernel offset"
                );
                index
            }
        }
    }

    fn l1_slice(ctx: &AddressSpace) -> &'static mut [u32] {
        let entries = Self::l1_entries(ctx.kind());
        let ptr = table_block_ptr(ctx.root(), entries * 4) as *mut u32;
        // SAFETY: the root block was allocated with exactly this size and
        // is exclusively owned by the context; mutation runs with
        // interrupts masked under the façade.
        unsafe { core::slice::from_raw_parts_mut(ptr, entries) }
    }

    fn l2_slice(table: PhysicalAddress) -> &'static mut [u32] {
        let ptr = table_ptr(table) as *mut u32;
        // SAFETY: coarse tables live in their own frame; same ownership
        // discipline as the root.
        unsafe { core::slice::from_raw_parts_mut(ptr, L2_ENTRIES) }
    }

    fn l2_of(entry: u32) -> Option<PhysicalAddress> {
        if entry & 0b11 == L1_TYPE_COARSE {
            Some(PhysicalAddress::new((entry & L1_TABLE_MASK) as u64))
        } else {
            None
        }
    }

    /// Coarse table for `virt`, allocating one when `create` is set.
    fn l2_for(
        &self,
        ctx: &AddressSpace,
        virt: VirtualAddress,
        create: bool,
    ) -> KernelResult<Option<PhysicalAddress>> {
        let l1 = Self::l1_slice(ctx);
        let index = Self::l1_index(ctx, virt);
        if let Some(existing) = Self::l2_of(l1[index]) {
            return Ok(Some(existing));
        }
        if !create {
            return Ok(None);
        }
        let table = frame_allocator::allocate_page()?;
        let slice = Self::l2_slice(table);
        slice.fill(0);
        l1[index] = (table.as_u64() as u32 & L1_TABLE_MASK) | L1_TYPE_COARSE;
        Ok(Some(table))
    }

    fn allocate_root(kind: ContextType) -> KernelResult<PhysicalAddress> {
        let bytes = Self::l1_entries(kind) * 4;
        let root = frame_allocator::allocate_range(bytes, bytes)?;
        let ptr = table_block_ptr(root, bytes) as *mut u32;
        // SAFETY: freshly allocated exclusive block of exactly `bytes`.
        unsafe {
            core::slice::from_raw_parts_mut(ptr, bytes / 4).fill(0);
        }
        Ok(root)
    }

    fn release_root(ctx: &AddressSpace) {
        let bytes = Self::l1_entries(ctx.kind()) * 4;
        frame_allocator::with_allocator(|a| {
            a.mark_free(ctx.root(), bytes);
        });
    }
}

impl Driver for ShortDriver {
    fn create_context(&self, kind: ContextType) -> KernelResult<AddressSpace> {
        let root = Self::allocate_root(kind)?;
        Ok(AddressSpace::new(root, kind))
    }

    fn map(
        &self,
        ctx: &AddressSpace,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        memory: MemoryType,
        page: PageType,
        protection: Protection,
    ) -> KernelResult<()> {
        let table = self
            .l2_for(ctx, virt, true)?
            .expect("l2_for with create always yields a table");
        let l2 = Self::l2_slice(table);
        let index = (virt.as_usize() >> 12) & (L2_ENTRIES - 1);
        if l2[index] & 0b11 != 0 {
            return Err(KernelError::AlreadyExists {
                resource: "mapping",
            });
        }
        let executable = resolves_executable(virt, page);
        let writable = descriptor::effective_writable(protection);
        l2[index] = (phys.as_u64() as u32 & L2_PAGE_MASK)
            | encode_attributes(memory, executable, writable, virt.is_user());
        Ok(())
    }

    fn unmap(&self, ctx: &AddressSpace, virt: VirtualAddress, release_physical: bool) {
        let table = match self.l2_for(ctx, virt, false) {
            Ok(Some(table)) => table,
            _ => return,
        };
        let l2 = Self::l2_slice(table);
        let index = (virt.as_usize() >> 12) & (L2_ENTRIES - 1);
        let entry = l2[index];
        if entry & L2_TYPE_SMALL == 0 {
            return;
        }
        l2[index] = 0;
        if release_physical {
            frame_allocator::release_page(PhysicalAddress::new((entry & L2_PAGE_MASK) as u64));
        }
    }

    fn resolve(&self, ctx: &AddressSpace, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let table = self.l2_for(ctx, virt, false).ok()??;
        let l2 = Self::l2_slice(table);
        let entry = l2[(virt.as_usize() >> 12) & (L2_ENTRIES - 1)];
        if entry & L2_TYPE_SMALL != 0 {
            Some(PhysicalAddress::new((entry & L2_PAGE_MASK) as u64))
        } else {
            None
        }
    }

    fn set_context(&self, _ctx: &AddressSpace) {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        {
            crate::arch::arm::cp15::set_ttbr0(_ctx.root().as_u64() as u32);
            crate::arch::arm::cp15::isb();
        }
    }

    fn install_kernel(&self, _ctx: &AddressSpace) {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        {
            use crate::arch::arm::cp15;
            // Domain 0 as client; permissions come from the descriptors.
            cp15::set_dacr(0b01);
            cp15::set_ttbr1(_ctx.root().as_u64() as u32);
            // Split translation at 2 GiB.
            cp15::set_ttbcr(1);
            cp15::isb();
        }
    }

    fn fork_context(&self, src: &AddressSpace) -> KernelResult<AddressSpace> {
        assert_eq!(
            src.kind(),
            ContextType::User,
            "only user contexts are forked"
        );
        let forked = self.create_context(ContextType::User)?;
        let result = (|| -> KernelResult<()> {
            let src_l1 = Self::l1_slice(src);
            for l1_index in 0..USER_L1_ENTRIES {
                let src_table = match Self::l2_of(src_l1[l1_index]) {
                    Some(table) => table,
                    None => continue,
                };
                let src_l2 = Self::l2_slice(src_table);
                for l2_index in 0..L2_ENTRIES {
                    let entry = src_l2[l2_index];
                    if entry & L2_TYPE_SMALL == 0 {
                        continue;
                    }
                    let virt = VirtualAddress::new((l1_index << 20) | (l2_index << 12));
                    let src_frame = PhysicalAddress::new((entry & L2_PAGE_MASK) as u64);
                    let dst_frame = frame_allocator::allocate_page()?;
                    copy_page(dst_frame, src_frame)?;

                    let dst_table = self
                        .l2_for(&forked, virt, true)?
                        .expect("l2_for with create always yields a table");
                    let dst_l2 = Self::l2_slice(dst_table);
                    // Same attribute bits, new frame.
                    dst_l2[l2_index] =
                        (entry & !L2_PAGE_MASK) | (dst_frame.as_u64() as u32 & L2_PAGE_MASK);
                }
            }
            Ok(())
        })();
        match result {
            Ok(()) => Ok(forked),
            Err(err) => {
                self.destroy_context(&forked, true);
                Err(err)
            }
        }
    }

    fn destroy_context(&self, ctx: &AddressSpace, release_frames: bool) {
        let l1 = Self::l1_slice(ctx);
        for l1_index in 0..Self::l1_entries(ctx.kind()) {
            let table = match Self::l2_of(l1[l1_index]) {
                Some(table) => table,
                None => continue,
            };
            if release_frames {
                let l2 = Self::l2_slice(table);
                for entry in l2.iter_mut() {
                    if *entry & L2_TYPE_SMALL != 0 {
                        frame_allocator::release_page(PhysicalAddress::new(
                            (*entry & L2_PAGE_MASK) as u64,
                        ));
                        *entry = 0;
                    }
                }
            }
            frame_allocator::release_page(table);
            l1[l1_index] = 0;
        }
        Self::release_root(ctx);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn memory_type_encoding() {
        // Strongly ordered: TEX=0, C=0, B=0.
        let strong = encode_attributes(MemoryType::DeviceStrong, false, true, false);
        assert_eq!(strong & (0b111 << 6 | 0b11 << 2), 0);
        // Shared device keeps B set.
        let device = encode_attributes(MemoryType::Device, false, true, false);
        assert_eq!(device & (1 << 2), 1 << 2);
        assert_eq!(device & (1 << 3), 0);
        // Normal write-back: TEX=1, C=1, B=1.
        let normal = encode_attributes(MemoryType::Normal, false, true, false);
        assert_eq!(normal & (0b111 << 6), 0b001 << 6);
        assert_eq!(normal & (0b11 << 2), 0b11 << 2);
    }

    #[test]
    fn execute_never_bit() {
        let executable = encode_attributes(MemoryType::Normal, true, true, true);
        let not_executable = encode_attributes(MemoryType::Normal, false, true, true);
        assert_eq!(executable & L2_XN, 0);
        assert_eq!(not_executable & L2_XN, L2_XN);
    }

    #[test]
    fn permission_bits_differ_between_halves() {
        let kernel_rw = encode_attributes(MemoryType::Normal, false, true, false);
        let user_rw = encode_attributes(MemoryType::Normal, false, true, true);
        let user_ro = encode_attributes(MemoryType::Normal, false, false, true);
        assert_eq!((kernel_rw >> 4) & 0b11, 0b01);
        assert_eq!((user_rw >> 4) & 0b11, 0b11);
        assert_eq!((user_ro >> 4) & 0b11, 0b10);
        assert_eq!((user_ro >> 9) & 1, 1, "read-only sets AP[2]");
    }
}
