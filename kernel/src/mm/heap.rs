//! Kernel heap
//!
//! A fixed virtual window in the kernel half, backed page by page from the
//! frame allocator and handed to a linked-list allocator. Once the heap is
//! up the placement allocator is retired; any later placement use panics.

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(all(target_arch = "arm", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// True once [`init`] completed.
pub fn initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Back the heap window with fresh frames and activate the allocator.
pub fn init() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        use crate::config::{HEAP_SIZE, HEAP_START};
        use crate::mm::virt;

        virt::with_kernel_context(|kernel| {
            virt::map_range_random(
                kernel,
                crate::mm::VirtualAddress::new(HEAP_START),
                HEAP_SIZE,
                virt::MemoryType::Normal,
                virt::PageType::NonExecutable,
                virt::Protection::READ | virt::Protection::WRITE,
            )
            .expect("heap window mapping cannot fail during bring-up")
        });

        // SAFETY: the window was just mapped read-write and is used by
        // nothing else.
        unsafe {
            ALLOCATOR.lock().init(HEAP_START as *mut u8, HEAP_SIZE);
        }
    }

    super::placement::retire();
    INITIALIZED.store(true, Ordering::Release);
}
