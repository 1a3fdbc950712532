//! Thread records and stack provisioning
//!
//! A thread belongs to exactly one process for its lifetime. Its saved
//! register context lives inline in the record; the exception plane syncs
//! the live frame in and out around scheduling decisions.

use super::{pcb::Process, ProcessId, TaskState, ThreadId};
use crate::arch::RegisterContext;
use crate::config::{KERNEL_STACK_PAGES, USER_STACK_PAGES, USER_STACK_TOP};
use crate::error::KernelResult;
use crate::ipc::message::MessageId;
use crate::mm::virt::{self, MemoryType, PageType, Protection};
use crate::mm::{frame_allocator, PhysicalAddress, VirtualAddress, PAGE_SIZE};

/// Why a thread is parked in `HaltSwitch`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Blocked in receive, optionally filtered by message type
    Receive { filter: Option<u32> },
    /// Blocked waiting for the response to a sent message
    Response {
        to: MessageId,
        filter: Option<u32>,
    },
}

/// Thread record
pub struct Thread {
    pub id: ThreadId,
    pub process: ProcessId,
    pub priority: super::Priority,
    pub state: TaskState,
    pub context: RegisterContext,
    /// Stack-pool slot backing `stack_virtual`
    pub stack_slot: usize,
    /// Top of the user stack
    pub stack_virtual: VirtualAddress,
    /// Kernel-side stack frame
    pub kernel_stack: PhysicalAddress,
    pub wait: Option<WaitReason>,
    /// Set when `context` was rewritten wholesale (replace); tells the
    /// scheduler to skip the next frame save so the rewrite survives.
    pub context_pinned: bool,
}

/// Bytes each stack slot spans, including one guard page.
const STACK_SLOT_BYTES: usize = (USER_STACK_PAGES + 1) * PAGE_SIZE;

/// Stack top virtual address for a pool slot.
pub fn stack_top_for_slot(slot: usize) -> VirtualAddress {
    VirtualAddress::new(USER_STACK_TOP - slot * STACK_SLOT_BYTES)
}

/// Create a thread in `process`, entering user mode at `entry`. The
/// caller enqueues it with the scheduler once the process is ready.
pub fn create(process: &mut Process, entry: VirtualAddress, priority: super::Priority)
    -> KernelResult<ThreadId>
{
    let slot = process.stacks.allocate();
    let stack_top = stack_top_for_slot(slot);
    let stack_low = VirtualAddress::new(stack_top.as_usize() - USER_STACK_PAGES * PAGE_SIZE);

    let kernel_stack = match frame_allocator::allocate_range(
        KERNEL_STACK_PAGES * PAGE_SIZE,
        PAGE_SIZE,
    ) {
        Ok(frame) => frame,
        Err(err) => {
            process.stacks.release(slot);
            return Err(err);
        }
    };

    if let Err(err) = virt::map_range_random(
        &mut process.space,
        stack_low,
        USER_STACK_PAGES * PAGE_SIZE,
        MemoryType::Normal,
        PageType::NonExecutable,
        Protection::READ | Protection::WRITE,
    ) {
        process.stacks.release(slot);
        frame_allocator::with_allocator(|a| {
            a.mark_free(kernel_stack, KERNEL_STACK_PAGES * PAGE_SIZE)
        });
        return Err(err);
    }

    let id = process.generate_thread_id();
    let thread = Thread {
        id,
        process: process.id,
        priority,
        state: TaskState::Ready,
        context: RegisterContext::new_user(entry.as_usize(), stack_top.as_usize()),
        stack_slot: slot,
        stack_virtual: stack_top,
        kernel_stack,
        wait: None,
        context_pinned: false,
    };
    process.threads.insert(id, thread);
    Ok(id)
}

/// Release a thread's stacks. The user stack pages go back to the frame
/// allocator unless the address space is already gone.
pub fn destroy(process: &mut Process, id: ThreadId, unmap_user_stack: bool) {
    let thread = match process.threads.remove(&id) {
        Some(thread) => thread,
        None => return,
    };
    if unmap_user_stack && !process.space.is_destroyed() {
        let stack_low = VirtualAddress::new(
            thread.stack_virtual.as_usize() - USER_STACK_PAGES * PAGE_SIZE,
        );
        virt::unmap_range(
            &mut process.space,
            stack_low,
            USER_STACK_PAGES * PAGE_SIZE,
            true,
        );
    }
    frame_allocator::with_allocator(|a| {
        a.mark_free(thread.kernel_stack, KERNEL_STACK_PAGES * PAGE_SIZE)
    });
    process.stacks.release(thread.stack_slot);
    crate::sched::remove((process.id, id));
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn stack_slots_grow_downwards_with_guard_gaps() {
        let first = stack_top_for_slot(0);
        let second = stack_top_for_slot(1);
        assert_eq!(first.as_usize(), USER_STACK_TOP);
        assert_eq!(
            first.as_usize() - second.as_usize(),
            (USER_STACK_PAGES + 1) * PAGE_SIZE,
            "one guard page separates adjacent stacks"
        );
    }
}
