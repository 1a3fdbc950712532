//! Process fork
//!
//! Duplicates the process record under a fresh pid, forks the address
//! space (eager frame copy), and clones every thread with a new kernel
//! stack. The user stacks were already duplicated along with the rest of
//! the user half. The calling thread's clone returns 0, the parent gets
//! the child pid.

extern crate alloc;

use alloc::collections::BTreeMap;

use super::{pcb::Process, table, thread::Thread, ProcessId, TaskState, ThreadId};
use crate::config::{KERNEL_STACK_PAGES, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::ipc::message::MessageQueue;
use crate::ipc::rpc::RpcState;
use crate::mm::{frame_allocator, virt};

/// Fork `parent_pid`; `calling_tid` is the thread executing the fork
/// syscall, whose clone must observe a zero return value.
pub fn fork(parent_pid: ProcessId, calling_tid: ThreadId) -> KernelResult<ProcessId> {
    table::with_table(|table| {
        let child_pid = table.generate_pid();
        let parent = table
            .get_mut(parent_pid)
            .ok_or(KernelError::ProcessNotFound {
                pid: parent_pid.0,
            })?;

        let mut space = virt::fork_context(&parent.space)?;

        let mut threads: BTreeMap<ThreadId, Thread> = BTreeMap::new();
        for (tid, thread) in parent.threads.iter() {
            let kernel_stack =
                match frame_allocator::allocate_range(KERNEL_STACK_PAGES * PAGE_SIZE, PAGE_SIZE) {
                    Ok(frame) => frame,
                    Err(err) => {
                        for cloned in threads.values() {
                            frame_allocator::with_allocator(|a| {
                                a.mark_free(cloned.kernel_stack, KERNEL_STACK_PAGES * PAGE_SIZE)
                            });
                        }
                        virt::destroy_context(&mut space, true);
                        return Err(err);
                    }
                };
            let mut context = thread.context;
            if *tid == calling_tid {
                // The child observes fork returning zero.
                context.set_return(0);
            }
            threads.insert(
                *tid,
                Thread {
                    id: *tid,
                    process: child_pid,
                    priority: thread.priority,
                    state: TaskState::Ready,
                    context,
                    stack_slot: thread.stack_slot,
                    stack_virtual: thread.stack_virtual,
                    kernel_stack,
                    wait: thread.wait,
                    context_pinned: false,
                },
            );
        }

        let child = Process {
            id: child_pid,
            parent: parent_pid,
            name: parent.name.clone(),
            priority: parent.priority,
            state: TaskState::Ready,
            space,
            threads,
            next_thread_id: parent.next_thread_id,
            stacks: parent.stacks.clone(),
            // Queues and RPC bindings are not inherited.
            messages: MessageQueue::new(),
            rpc: RpcState::new(),
            io_grants: parent.io_grants.clone(),
        };

        let priorities: alloc::vec::Vec<(ThreadId, super::Priority)> = child
            .threads
            .values()
            .map(|thread| (thread.id, thread.priority))
            .collect();
        table.insert(child);
        for (tid, priority) in priorities {
            crate::sched::enqueue((child_pid, tid), priority);
        }
        log::debug!("forked {} into {}", parent_pid, child_pid);
        Ok(child_pid)
    })
}
