//! Long descriptor format (LPAE, 64-bit descriptors)
//!
//! Three-level tables over a 2 GiB half per translation base (TTBCR with
//! EAE set, T0SZ = T1SZ = 1): two 1 GiB first-level entries, 512-entry
//! second and third levels. Memory types go through the MAIR indirection
//! registers instead of inline TEX/C/B bits.

use super::descriptor::{
    self, copy_page, resolves_executable, table_ptr, Driver,
};
use super::{AddressSpace, ContextType, MemoryType, PageType, Protection};
use crate::config::KERNEL_OFFSET;
use crate::error::{KernelError, KernelResult};
use crate::mm::{frame_allocator, PhysicalAddress, VirtualAddress};

/// First-level entries per root (1 GiB each over a 2 GiB half)
const L1_ENTRIES: usize = 2;
/// Entries of second- and third-level tables
const TABLE_ENTRIES: usize = 512;

/// Table / page descriptor low bits
const DESC_VALID_TABLE: u64 = 0b11;
/// Access flag; without it the first access faults
const DESC_AF: u64 = 1 << 10;
/// Execute-never for all exception levels
const DESC_XN: u64 = 1 << 54;
/// Privileged execute-never
const DESC_PXN: u64 = 1 << 53;

/// Output address mask (40-bit physical)
const DESC_ADDR_MASK: u64 = 0x0000_00FF_FFFF_F000;

/// MAIR attribute bytes, by index: strongly ordered device, device,
/// normal write-back write-allocate, normal non-cacheable.
pub const MAIR0: u32 = 0x44FF_0400;
/// Upper four attribute slots are unused.
pub const MAIR1: u32 = 0x0000_0000;

fn attr_index(memory: MemoryType) -> u64 {
    match memory {
        MemoryType::DeviceStrong => 0,
        MemoryType::Device => 1,
        MemoryType::Normal => 2,
        MemoryType::NormalNoCache => 3,
    }
}

/// Encode the attribute bits of a third-level page descriptor.
pub fn encode_attributes(
    memory: MemoryType,
    executable: bool,
    writable: bool,
    user: bool,
) -> u64 {
    let mut entry = DESC_VALID_TABLE | DESC_AF | (attr_index(memory) << 2);

    // AP[2:1] in bits 7:6.
    let ap = match (user, writable) {
        (false, true) => 0b00,
        (true, true) => 0b01,
        (false, false) => 0b10,
        (true, false) => 0b11,
    };
    entry |= ap << 6;

    if executable {
        if user {
            // User text must never run privileged.
            entry |= DESC_PXN;
        }
    } else {
        entry |= DESC_XN | DESC_PXN;
    }

    entry
}

/// Long-format driver singleton
pub struct LongDriver;

pub static LONG_DRIVER: LongDriver = LongDriver;

impl LongDriver {
    fn table_slice(table: PhysicalAddress, entries: usize) -> &'static mut [u64] {
        let ptr = table_ptr(table) as *mut u64;
        // SAFETY: tables occupy their own exclusively owned frame; all
        // mutation runs with interrupts masked under the façade.
        unsafe { core::slice::from_raw_parts_mut(ptr, entries) }
    }

    fn l1_index(ctx: &AddressSpace, virt: VirtualAddress) -> usize {
        match ctx.kind() {
            ContextType::Kernel => {
                assert!(
                    virt.as_usize() >= KERNEL_OFFSET,
                    "kernel context mapping below the kernel offset"
                );
                (virt.as_usize() - KERNEL_OFFSET) >> 30
            }
            ContextType::User => {
                assert!(
                    virt.as_usize() < KERNEL_OFFSET,
                    "user context mapping above the kernel offset"
                );
                virt.as_usize() >> 30
            }
        }
    }

    fn table_of(entry: u64) -> Option<PhysicalAddress> {
        if entry & DESC_VALID_TABLE == DESC_VALID_TABLE {
            Some(PhysicalAddress::new(entry & DESC_ADDR_MASK))
        } else {
            None
        }
    }

    fn allocate_table() -> KernelResult<PhysicalAddress> {
        let table = frame_allocator::allocate_page()?;
        Self::table_slice(table, TABLE_ENTRIES).fill(0);
        Ok(table)
    }

    /// Third-level table for `virt`, allocating the intermediate levels
    /// when `create` is set.
    fn l3_for(
        &self,
        ctx: &AddressSpace,
        virt: VirtualAddress,
        create: bool,
    ) -> KernelResult<Option<PhysicalAddress>> {
        let l1 = Self::table_slice(ctx.root(), L1_ENTRIES);
        let l1_index = Self::l1_index(ctx, virt);

        let l2_table = match Self::table_of(l1[l1_index]) {
            Some(table) => table,
            None if create => {
                let table = Self::allocate_table()?;
                l1[l1_index] = table.as_u64() | DESC_VALID_TABLE;
                table
            }
            None => return Ok(None),
        };

        let l2 = Self::table_slice(l2_table, TABLE_ENTRIES);
        let l2_index = (virt.as_usize() >> 21) & (TABLE_ENTRIES - 1);
        let l3_table = match Self::table_of(l2[l2_index]) {
            Some(table) => table,
            None if create => {
                let table = Self::allocate_table()?;
                l2[l2_index] = table.as_u64() | DESC_VALID_TABLE;
                table
            }
            None => return Ok(None),
        };

        Ok(Some(l3_table))
    }
}

impl Driver for LongDriver {
    fn create_context(&self, kind: ContextType) -> KernelResult<AddressSpace> {
        // A two-entry root still gets its own frame; alignment and
        // exclusive ownership come for free.
        let root = Self::allocate_table()?;
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
        let l3_table = self
            .l3_for(ctx, virt, true)?
            .expect("l3_for with create always yields a table");
        let l3 = Self::table_slice(l3_table, TABLE_ENTRIES);
        let index = (virt.as_usize() >> 12) & (TABLE_ENTRIES - 1);
        if l3[index] & DESC_VALID_TABLE != 0 {
            return Err(KernelError::AlreadyExists {
                resource: "mapping",
            });
        }
        let executable = resolves_executable(virt, page);
        let writable = descriptor::effective_writable(protection);
        l3[index] = (phys.as_u64() & DESC_ADDR_MASK)
            | encode_attributes(memory, executable, writable, virt.is_user());
        Ok(())
    }

    fn unmap(&self, ctx: &AddressSpace, virt: VirtualAddress, release_physical: bool) {
        let l3_table = match self.l3_for(ctx, virt, false) {
            Ok(Some(table)) => table,
            _ => return,
        };
        let l3 = Self::table_slice(l3_table, TABLE_ENTRIES);
        let index = (virt.as_usize() >> 12) & (TABLE_ENTRIES - 1);
        let entry = l3[index];
        if entry & DESC_VALID_TABLE == 0 {
            return;
        }
        l3[index] = 0;
        if release_physical {
            frame_allocator::release_page(PhysicalAddress::new(entry & DESC_ADDR_MASK));
        }
    }

    fn resolve(&self, ctx: &AddressSpace, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let l3_table = self.l3_for(ctx, virt, false).ok()??;
        let l3 = Self::table_slice(l3_table, TABLE_ENTRIES);
        let entry = l3[(virt.as_usize() >> 12) & (TABLE_ENTRIES - 1)];
        if entry & DESC_VALID_TABLE != 0 {
            Some(PhysicalAddress::new(entry & DESC_ADDR_MASK))
        } else {
            None
        }
    }

    fn set_context(&self, _ctx: &AddressSpace) {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        {
            crate::arch::arm::cp15::set_ttbr0_long(_ctx.root().as_u64());
            crate::arch::arm::cp15::isb();
        }
    }

    fn install_kernel(&self, _ctx: &AddressSpace) {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        {
            use crate::arch::arm::cp15;
            cp15::set_mair(MAIR0, MAIR1);
            cp15::set_ttbr1_long(_ctx.root().as_u64());
            // EAE plus a 2 GiB / 2 GiB split.
            cp15::set_ttbcr((1 << 31) | (1 << 16) | 1);
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
            let src_l1 = Self::table_slice(src.root(), L1_ENTRIES);
            for l1_index in 0..L1_ENTRIES {
                let src_l2_table = match Self::table_of(src_l1[l1_index]) {
                    Some(table) => table,
                    None => continue,
                };
                let src_l2 = Self::table_slice(src_l2_table, TABLE_ENTRIES);
                for l2_index in 0..TABLE_ENTRIES {
                    let src_l3_table = match Self::table_of(src_l2[l2_index]) {
                        Some(table) => table,
                        None => continue,
                    };
                    let src_l3 = Self::table_slice(src_l3_table, TABLE_ENTRIES);
                    for l3_index in 0..TABLE_ENTRIES {
                        let entry = src_l3[l3_index];
                        if entry & DESC_VALID_TABLE == 0 {
                            continue;
                        }
                        let virt = VirtualAddress::new(
                            (l1_index << 30) | (l2_index << 21) | (l3_index << 12),
                        );
                        let src_frame = PhysicalAddress::new(entry & DESC_ADDR_MASK);
                        let dst_frame = frame_allocator::allocate_page()?;
                        copy_page(dst_frame, src_frame)?;

                        let dst_l3_table = self
                            .l3_for(&forked, virt, true)?
                            .expect("l3_for with create always yields a table");
                        let dst_l3 = Self::table_slice(dst_l3_table, TABLE_ENTRIES);
                        dst_l3[l3_index] =
                            (entry & !DESC_ADDR_MASK) | (dst_frame.as_u64() & DESC_ADDR_MASK);
                    }
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
        let l1 = Self::table_slice(ctx.root(), L1_ENTRIES);
        for l1_index in 0..L1_ENTRIES {
            let l2_table = match Self::table_of(l1[l1_index]) {
                Some(table) => table,
                None => continue,
            };
            let l2 = Self::table_slice(l2_table, TABLE_ENTRIES);
            for l2_index in 0..TABLE_ENTRIES {
                let l3_table = match Self::table_of(l2[l2_index]) {
                    Some(table) => table,
                    None => continue,
                };
                if release_frames {
                    let l3 = Self::table_slice(l3_table, TABLE_ENTRIES);
                    for entry in l3.iter_mut() {
                        if *entry & DESC_VALID_TABLE != 0 {
                            frame_allocator::release_page(PhysicalAddress::new(
                                *entry & DESC_ADDR_MASK,
                            ));
                            *entry = 0;
                        }
                    }
                }
                frame_allocator::release_page(l3_table);
                l2[l2_index] = 0;
            }
            frame_allocator::release_page(l2_table);
            l1[l1_index] = 0;
        }
        frame_allocator::release_page(ctx.root());
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn attribute_indices_match_mair_layout() {
        assert_eq!(attr_index(MemoryType::DeviceStrong), 0);
        assert_eq!(attr_index(MemoryType::Device), 1);
        assert_eq!(attr_index(MemoryType::Normal), 2);
        assert_eq!(attr_index(MemoryType::NormalNoCache), 3);
        // MAIR byte for index 2 must be normal write-back (0xFF).
        assert_eq!((MAIR0 >> 16) & 0xFF, 0xFF);
        // Index 0 must be strongly ordered device (0x00).
        assert_eq!(MAIR0 & 0xFF, 0x00);
    }

    #[test]
    fn execute_never_bits() {
        let data = encode_attributes(MemoryType::Normal, false, true, true);
        assert_eq!(data & DESC_XN, DESC_XN);
        assert_eq!(data & DESC_PXN, DESC_PXN);

        let user_text = encode_attributes(MemoryType::Normal, true, false, true);
        assert_eq!(user_text & DESC_XN, 0);
        assert_eq!(user_text & DESC_PXN, DESC_PXN, "user text stays PXN");

        let kernel_text = encode_attributes(MemoryType::Normal, true, false, false);
        assert_eq!(kernel_text & (DESC_XN | DESC_PXN), 0);
    }

    #[test]
    fn access_permissions() {
        let kernel_rw = encode_attributes(MemoryType::Normal, false, true, false);
        let user_rw = encode_attributes(MemoryType::Normal, false, true, true);
        let user_ro = encode_attributes(MemoryType::Normal, false, false, true);
        assert_eq!((kernel_rw >> 6) & 0b11, 0b00);
        assert_eq!((user_rw >> 6) & 0b11, 0b01);
        assert_eq!((user_ro >> 6) & 0b11, 0b11);
        // Every leaf descriptor needs the access flag.
        assert_eq!(kernel_rw & DESC_AF, DESC_AF);
    }
}
