//! Descriptor-driver interface and table memory access
//!
//! The two format drivers implement [`Driver`]; the façade owns exactly
//! one of them after boot. Table frames are reached through the linear
//! kernel map on target. Host builds back them with an in-memory page
//! store so the drivers stay fully exercisable by the test harness.

use super::{AddressSpace, ContextType, MemoryType, PageType, Protection};
use crate::error::KernelResult;
use crate::mm::{PhysicalAddress, VirtualAddress};

/// Operations every descriptor format must provide.
///
/// TLB maintenance and interrupt masking are the façade's business; the
/// drivers only edit tables.
pub trait Driver: Sync {
    /// Allocate and zero a root table of the right size and alignment.
    fn create_context(&self, kind: ContextType) -> KernelResult<AddressSpace>;

    /// Install a 4 KiB translation for `virt`.
    fn map(
        &self,
        ctx: &AddressSpace,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        memory: MemoryType,
        page: PageType,
        protection: Protection,
    ) -> KernelResult<()>;

    /// Drop the translation for `virt`; optionally release the frame.
    /// Unmapped addresses are ignored.
    fn unmap(&self, ctx: &AddressSpace, virt: VirtualAddress, release_physical: bool);

    /// Physical page backing `virt`, if mapped.
    fn resolve(&self, ctx: &AddressSpace, virt: VirtualAddress) -> Option<PhysicalAddress>;

    /// Make `ctx` the translation source for its half of the address
    /// space.
    fn set_context(&self, ctx: &AddressSpace);

    /// One-time installation of the shared kernel root (upper-half base
    /// register and format configuration).
    fn install_kernel(&self, ctx: &AddressSpace);

    /// Deep-copy `src` into a fresh context of the same kind.
    fn fork_context(&self, src: &AddressSpace) -> KernelResult<AddressSpace>;

    /// Walk and free the whole tree. Data frames only when
    /// `release_frames`; table frames always.
    fn destroy_context(&self, ctx: &AddressSpace, release_frames: bool);
}

/// Whether a mapping at `virt` with the given page type ends up
/// executable. `Auto` resolves by address-space half.
pub fn resolves_executable(virt: VirtualAddress, page: PageType) -> bool {
    match page {
        PageType::Auto => virt.is_user(),
        PageType::Executable => true,
        PageType::NonExecutable => false,
    }
}

/// Write-without-read is promoted to read-write; an empty set reads as
/// read-only.
pub fn effective_writable(protection: Protection) -> bool {
    protection.contains(Protection::WRITE)
}

// ---------------------------------------------------------------------------
// Physical page access
// ---------------------------------------------------------------------------

/// Pointer through which the page at `phys` can be edited.
///
/// On target this relies on the boot-time linear map of low RAM, which is
/// exactly where table frames are allocated from.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) fn table_ptr(phys: PhysicalAddress) -> *mut u8 {
    assert!(
        (phys.as_u64() as usize) < crate::config::DIRECT_MAP_SIZE,
        "table frame outside the linear map"
    );
    (crate::config::KERNEL_OFFSET + phys.as_u64() as usize) as *mut u8
}

/// Host builds: hand out pages from an in-memory store keyed by physical
/// address, so table walks work without hardware.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub(crate) fn table_ptr(phys: PhysicalAddress) -> *mut u8 {
    host_store::block_ptr(phys.page_align_down(), crate::mm::PAGE_SIZE)
}

/// Pointer to a multi-page table block (e.g. a 16 KiB first-level table).
/// The block is contiguous in both worlds.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) fn table_block_ptr(phys: PhysicalAddress, _bytes: usize) -> *mut u8 {
    table_ptr(phys)
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub(crate) fn table_block_ptr(phys: PhysicalAddress, bytes: usize) -> *mut u8 {
    host_store::block_ptr(phys, bytes)
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub(crate) mod host_store {
    extern crate alloc;

    use alloc::collections::BTreeMap;
    use alloc::vec;

    use spin::Mutex;

    static BLOCKS: Mutex<BTreeMap<u64, (usize, usize)>> = Mutex::new(BTreeMap::new());

    use crate::mm::PhysicalAddress;

    /// Stable pointer to a zero-initialized fake physical block.
    pub fn block_ptr(phys: PhysicalAddress, bytes: usize) -> *mut u8 {
        let mut blocks = BLOCKS.lock();
        let entry = blocks.entry(phys.as_u64()).or_insert_with(|| {
            let block = vec![0u8; bytes].into_boxed_slice();
            (alloc::boxed::Box::into_raw(block) as *mut u8 as usize, bytes)
        });
        assert!(entry.1 >= bytes, "host store block reused with larger size");
        entry.0 as *mut u8
    }
}

/// Borrowed window onto arbitrary physical memory, for data pages that
/// live outside the linear map. Unmaps itself on drop.
pub(crate) struct PhysWindow {
    virt: VirtualAddress,
    length: usize,
    temporary: bool,
}

impl PhysWindow {
    /// Open a window of `length` bytes over `phys`.
    pub fn open(phys: PhysicalAddress, length: usize) -> KernelResult<Self> {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        {
            if (phys.as_u64() as usize) < crate::config::DIRECT_MAP_SIZE {
                return Ok(Self {
                    virt: VirtualAddress::new(
                        crate::config::KERNEL_OFFSET + phys.as_u64() as usize,
                    ),
                    length,
                    temporary: false,
                });
            }
            let virt = super::map_temporary(phys, length)?;
            Ok(Self {
                virt,
                length,
                temporary: true,
            })
        }
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        {
            // Host windows are backed page-wise; every in-kernel client
            // stays within one page per window.
            let offset = (phys.as_u64() % crate::mm::PAGE_SIZE as u64) as usize;
            debug_assert!(
                offset + length <= crate::mm::PAGE_SIZE,
                "host windows cover a single page"
            );
            Ok(Self {
                virt: VirtualAddress::new(table_ptr(phys) as usize + offset),
                length,
                temporary: false,
            })
        }
    }

    pub fn ptr(&self) -> *mut u8 {
        self.virt.as_mut_ptr()
    }
}

impl Drop for PhysWindow {
    fn drop(&mut self) {
        if self.temporary {
            super::unmap_temporary(self.virt, self.length);
        }
    }
}

/// Copy one page of physical memory.
pub(crate) fn copy_page(dst: PhysicalAddress, src: PhysicalAddress) -> KernelResult<()> {
    let src_window = PhysWindow::open(src, crate::mm::PAGE_SIZE)?;
    let dst_window = PhysWindow::open(dst, crate::mm::PAGE_SIZE)?;
    // SAFETY: both windows are freshly established, page sized, and
    // distinct frames.
    unsafe {
        core::ptr::copy_nonoverlapping(src_window.ptr(), dst_window.ptr(), crate::mm::PAGE_SIZE);
    }
    Ok(())
}
