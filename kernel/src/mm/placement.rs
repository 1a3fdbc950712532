//! Bootstrap placement allocator
//!
//! Hands out physical memory directly behind the kernel image before the
//! frame bitmap and the heap exist. Allocations can never be returned.
//! Once the heap is initialized any further placement allocation is a
//! kernel bug and panics.

use spin::Mutex;

use super::PhysicalAddress;

/// Placement state; separated from the global so the policy is testable.
pub struct Placement {
    /// Next address to hand out
    next: u64,
    /// Initrd window that must not be overwritten
    initrd: Option<(u64, u64)>,
    /// Set once the heap took over
    retired: bool,
}

impl Placement {
    pub const fn new(start: u64, initrd: Option<(u64, u64)>) -> Self {
        Self {
            next: start,
            initrd,
            retired: false,
        }
    }

    /// Advance to the next `alignment` boundary, skip the initrd window if
    /// the allocation would overlap it, and return the aligned start.
    pub fn alloc(&mut self, alignment: usize, size: usize) -> PhysicalAddress {
        assert!(!self.retired, "placement allocation after heap init");
        assert!(alignment > 0, "placement alignment must be non-zero");

        let align = alignment as u64;
        let mut address = self.next;
        if address % align != 0 {
            address += align - address % align;
        }

        if let Some((initrd_start, initrd_end)) = self.initrd {
            if address < initrd_end && address + size as u64 > initrd_start {
                address = initrd_end;
                if address % align != 0 {
                    address += align - address % align;
                }
            }
        }

        self.next = address + size as u64;
        PhysicalAddress::new(address)
    }

    pub fn current(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.next)
    }

    pub fn retire(&mut self) {
        self.retired = true;
    }
}

static PLACEMENT: Mutex<Placement> = Mutex::new(Placement::new(0, None));

/// Physical end of the kernel image. The linker symbol carries the
/// high-half virtual address; the load address is the difference.
#[cfg(all(target_arch = "arm", target_os = "none"))]
fn kernel_end() -> u64 {
    extern "C" {
        static __kernel_end: u8;
    }
    // SAFETY: the linker script defines the symbol; only its address is
    // taken.
    let virt = unsafe { &__kernel_end as *const u8 as usize };
    (virt - crate::config::KERNEL_OFFSET) as u64
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn kernel_end() -> u64 {
    // Host builds never allocate real physical memory; a fixed value keeps
    // the bookkeeping deterministic.
    0x0010_0000
}

/// Start handing out memory behind the kernel image, avoiding the initrd.
pub fn init(initrd: Option<(PhysicalAddress, usize)>) {
    let initrd = initrd.map(|(start, size)| (start.as_u64(), start.as_u64() + size as u64));
    *PLACEMENT.lock() = Placement::new(kernel_end(), initrd);
}

/// Allocate `size` bytes at `alignment`. If the frame bitmap already
/// exists the consumed range is recorded there as used.
pub fn alloc(alignment: usize, size: usize) -> PhysicalAddress {
    let (address, consumed_until) = {
        let mut placement = PLACEMENT.lock();
        let address = placement.alloc(alignment, size);
        (address, placement.current())
    };
    if let Some(allocator) = super::frame_allocator::FRAME_ALLOCATOR.lock().as_mut() {
        let bytes = (consumed_until.as_u64() - address.as_u64()) as usize;
        allocator.mark_used(address, bytes);
    }
    address
}

/// Current placement pointer.
pub fn current() -> PhysicalAddress {
    PLACEMENT.lock().current()
}

/// Shut the placement allocator down for good; called by heap init.
pub fn retire() {
    PLACEMENT.lock().retire();
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn aligns_and_advances() {
        let mut p = Placement::new(0x1001, None);
        let first = p.alloc(0x100, 0x80);
        assert_eq!(first.as_u64(), 0x1100);
        let second = p.alloc(0x100, 0x10);
        assert_eq!(second.as_u64(), 0x1200);
        assert_eq!(p.current().as_u64(), 0x1210);
    }

    #[test]
    fn jumps_over_initrd() {
        let mut p = Placement::new(0x1000, Some((0x2000, 0x5000)));
        // Fits below the initrd window.
        assert_eq!(p.alloc(0x1000, 0x1000).as_u64(), 0x1000);
        // Would overlap; must continue at initrd end.
        assert_eq!(p.alloc(0x1000, 0x1000).as_u64(), 0x5000);
    }

    #[test]
    #[should_panic(expected = "placement allocation after heap init")]
    fn retired_allocator_panics() {
        let mut p = Placement::new(0, None);
        p.retire();
        let _ = p.alloc(4, 4);
    }
}
