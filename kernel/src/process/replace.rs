//! In-place image replacement
//!
//! The process keeps its pid and name-index entry; everything else is
//! rebuilt: old address space destroyed with frame release, surplus
//! threads reaped, the new executable mapped into a fresh space. Once the
//! old image is gone a failure leaves the process in `Kill` state for the
//! cleanup event, because there is nothing left to resume.

extern crate alloc;

use super::{pcb::StackPool, table, thread, ProcessId, TaskState, ThreadId};
use crate::arch::RegisterContext;
use crate::elf::ElfImage;
use crate::error::{KernelError, KernelResult};
use crate::mm::virt::{self, ContextType};

/// Replace the image of `pid`, resuming `calling_tid` at the new entry
/// point. All other threads of the process are destroyed.
pub fn replace(pid: ProcessId, calling_tid: ThreadId, image: &[u8]) -> KernelResult<()> {
    // Validate before touching the old image; a malformed file must not
    // kill the caller.
    let elf = ElfImage::parse(image)?;

    table::with_table(|table| {
        let process = table
            .get_mut(pid)
            .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;

        // Surplus threads go first; their user stacks die with the
        // address space below.
        let surplus: alloc::vec::Vec<ThreadId> = process
            .threads
            .keys()
            .copied()
            .filter(|tid| *tid != calling_tid)
            .collect();
        for tid in surplus {
            thread::destroy(process, tid, false);
        }

        // Point of no return: the old image is released.
        virt::destroy_context(&mut process.space, true);
        process.stacks = StackPool::new();

        let rebuilt = (|| -> KernelResult<()> {
            process.space = virt::create_context(ContextType::User)?;
            let entry = elf.load(&mut process.space)?;

            let slot = process.stacks.allocate();
            let stack_top = thread::stack_top_for_slot(slot);
            let stack_low = crate::mm::VirtualAddress::new(
                stack_top.as_usize() - crate::config::USER_STACK_PAGES * crate::mm::PAGE_SIZE,
            );
            virt::map_range_random(
                &mut process.space,
                stack_low,
                crate::config::USER_STACK_PAGES * crate::mm::PAGE_SIZE,
                virt::MemoryType::Normal,
                virt::PageType::NonExecutable,
                virt::Protection::READ | virt::Protection::WRITE,
            )?;

            let thread = process
                .threads
                .get_mut(&calling_tid)
                .ok_or(KernelError::NotFound { resource: "thread" })?;
            thread.stack_slot = slot;
            thread.stack_virtual = stack_top;
            thread.context =
                RegisterContext::new_user(entry.as_usize(), stack_top.as_usize());
            thread.state = TaskState::Ready;
            thread.wait = None;
            thread.context_pinned = true;
            Ok(())
        })();

        match rebuilt {
            Ok(()) => {
                // The caller is the running process; activate the new
                // tables before returning to user mode.
                virt::set_context(&process.space);
                log::debug!("replaced image of {}", pid);
                Ok(())
            }
            Err(err) => {
                process.state = TaskState::Kill;
                for thread in process.threads.values_mut() {
                    thread.state = TaskState::Kill;
                }
                crate::event::enqueue(
                    crate::event::EventKind::InterruptCleanup,
                    crate::event::EventOrigin::Kernel,
                    0,
                );
                Err(err)
            }
        }
    })
}
