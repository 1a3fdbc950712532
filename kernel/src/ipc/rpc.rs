//! RPC plane
//!
//! A process binds one user-space handler entry point. Raising an RPC
//! into it hijacks one of its threads: the thread's register context is
//! pinned in a backup record, the handler entry is injected, and
//! `rpc_return` restores the backup. Backups survive arbitrary scheduling
//! in between and nest up to a fixed depth.
//!
//! Raises aimed at the thread that is currently on the CPU are queued and
//! injected at the next schedule point, once the live frame has been
//! saved back into the thread record.

extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use super::message::{self, MessageId};
use crate::arch::RegisterContext;
use crate::config::RPC_MAX_DEPTH;
use crate::error::{KernelError, KernelResult};
use crate::mm::VirtualAddress;
use crate::process::{table, Process, ProcessId, TaskState, ThreadId, WaitReason};

/// Message tags above this base carry forwarded interrupt vectors.
pub const INTERRUPT_TAG_BASE: u32 = 0xF000_0000;

/// Kernel-originated raises carry pid 0.
pub const KERNEL_ORIGIN: ProcessId = ProcessId(0);

/// Pinned continuation of an interrupted thread
#[derive(Debug, Clone)]
pub struct RpcBackup {
    pub message_id: MessageId,
    pub origin: ProcessId,
    pub thread: ThreadId,
    pub context: RegisterContext,
    pub state: TaskState,
    pub wait: Option<WaitReason>,
}

/// A raise waiting for its target thread to leave the CPU
#[derive(Debug, Clone)]
struct PendingRaise {
    message_id: MessageId,
    origin: ProcessId,
    thread: ThreadId,
    tag: u32,
    data_len: usize,
}

/// Per-process RPC registry
pub struct RpcState {
    /// User-space handler entry point, if bound
    handler: Option<VirtualAddress>,
    backups: Vec<RpcBackup>,
    pending: VecDeque<PendingRaise>,
    /// Raise payloads, fetched by the handler via `rpc_get_data`
    data: BTreeMap<u32, Vec<u8>>,
}

impl RpcState {
    pub const fn new() -> Self {
        Self {
            handler: None,
            backups: Vec::new(),
            pending: VecDeque::new(),
            data: BTreeMap::new(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.handler.is_some()
    }
}

impl Default for RpcState {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the handler entry point for `pid`.
pub fn bind(pid: ProcessId, handler: VirtualAddress) -> KernelResult<()> {
    table::with_process(pid, |process| {
        if process.rpc.handler.is_some() {
            return Err(KernelError::AlreadyExists {
                resource: "rpc handler",
            });
        }
        process.rpc.handler = Some(handler);
        Ok(())
    })
    .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
}

/// Drop the handler binding.
pub fn unbind(pid: ProcessId) -> KernelResult<()> {
    table::with_process(pid, |process| {
        process.rpc.handler = None;
    })
    .ok_or(KernelError::ProcessNotFound { pid: pid.0 })
}

/// Rewrite `thread`'s saved context so it enters the handler next time it
/// runs, pinning the interrupted state first.
fn inject(
    process: &mut Process,
    thread_id: ThreadId,
    handler: VirtualAddress,
    message_id: MessageId,
    origin: ProcessId,
    tag: u32,
    data_len: usize,
) {
    let thread = match process.threads.get_mut(&thread_id) {
        Some(thread) => thread,
        None => return,
    };
    process.rpc.backups.push(RpcBackup {
        message_id,
        origin,
        thread: thread_id,
        context: thread.context,
        state: thread.state,
        wait: thread.wait,
    });
    // Handler ABI: r0 = type tag, r1 = origin pid, r2 = data id,
    // r3 = payload length. The handler runs on the thread's own stack.
    thread.context.pc = handler.as_usize() as u32;
    thread.context.gpr[0] = tag;
    thread.context.gpr[1] = origin.0;
    thread.context.gpr[2] = message_id.0;
    thread.context.gpr[3] = data_len as u32;
    thread.state = TaskState::Ready;
    thread.wait = None;
}

/// Raise an RPC into `target`. Returns the id correlating the eventual
/// response.
pub fn raise(
    origin: ProcessId,
    target: ProcessId,
    tag: u32,
    data: Vec<u8>,
) -> KernelResult<MessageId> {
    let current = crate::sched::current();
    table::with_table(|table| {
        let process = table
            .get_mut(target)
            .filter(|process| process.is_alive())
            .ok_or(KernelError::ProcessNotFound { pid: target.0 })?;
        let handler = process.rpc.handler.ok_or(KernelError::NotPermitted {
            operation: "rpc raise without bound handler",
        })?;
        if process.rpc.backups.len() + process.rpc.pending.len() >= RPC_MAX_DEPTH {
            return Err(KernelError::Again {
                operation: "rpc raise",
            });
        }
        let thread_id = *process
            .threads
            .keys()
            .next()
            .ok_or(KernelError::NotFound { resource: "thread" })?;

        let message_id = message::generate_id();
        let data_len = data.len();
        process.rpc.data.insert(message_id.0, data);

        if current == Some((target, thread_id)) {
            // The live frame still belongs to this thread; defer until it
            // is saved at the next schedule point.
            process.rpc.pending.push_back(PendingRaise {
                message_id,
                origin,
                thread: thread_id,
                tag,
                data_len,
            });
        } else {
            inject(
                process, thread_id, handler, message_id, origin, tag, data_len,
            );
        }
        Ok(message_id)
    })
}

/// Forward a hardware interrupt as an RPC from the kernel.
pub fn raise_interrupt(pid: ProcessId, vector: u32) -> KernelResult<MessageId> {
    raise(
        KERNEL_ORIGIN,
        pid,
        INTERRUPT_TAG_BASE + vector,
        Vec::new(),
    )
}

/// Deliver raises deferred while `tid` was on the CPU. Runs at the
/// schedule point, after the live frame has been saved.
pub fn deliver_pending(process: &mut Process, tid: ThreadId) {
    let handler = match process.rpc.handler {
        Some(handler) => handler,
        None => return,
    };
    while let Some(position) = process
        .rpc
        .pending
        .iter()
        .position(|pending| pending.thread == tid)
    {
        let pending = process
            .rpc
            .pending
            .remove(position)
            .expect("position comes from a fresh scan");
        inject(
            process,
            pending.thread,
            handler,
            pending.message_id,
            pending.origin,
            pending.tag,
            pending.data_len,
        );
    }
}

/// Return from the innermost handler on `(pid, tid)`: restore the pinned
/// context and answer the origin with `data`.
pub fn rpc_return(pid: ProcessId, tid: ThreadId, tag: u32, data: Vec<u8>) -> KernelResult<()> {
    let backup = table::with_process(pid, |process| {
        let position = process
            .rpc
            .backups
            .iter()
            .rposition(|backup| backup.thread == tid)
            .ok_or(KernelError::NotFound {
                resource: "rpc backup",
            })?;
        let backup = process.rpc.backups.remove(position);
        if let Some(thread) = process.threads.get_mut(&tid) {
            thread.context = backup.context;
            thread.state = backup.state;
            thread.wait = backup.wait;
            // The caller is the handler thread itself; the restored
            // record must win over its trap frame.
            thread.context_pinned = true;
        }
        process.rpc.data.remove(&backup.message_id.0);
        Ok(backup)
    })
    .ok_or(KernelError::ProcessNotFound { pid: pid.0 })??;

    // Answer the raiser; a dead origin discards the response silently.
    if backup.origin != KERNEL_ORIGIN {
        let _ = message::send_by_pid(pid, backup.origin, tag, data, Some(backup.message_id));
    }
    Ok(())
}

/// Copy out a raise payload; single use.
pub fn take_data(pid: ProcessId, data_id: u32) -> KernelResult<Vec<u8>> {
    table::with_process(pid, |process| {
        process.rpc.data.remove(&data_id).ok_or(KernelError::IoError {
            operation: "rpc_get_data",
        })
    })
    .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
}

/// Size of a raise payload without consuming it.
pub fn data_size(pid: ProcessId, data_id: u32) -> KernelResult<usize> {
    table::with_process(pid, |process| {
        process
            .rpc
            .data
            .get(&data_id)
            .map(|data| data.len())
            .ok_or(KernelError::IoError {
                operation: "rpc_get_data_size",
            })
    })
    .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
}
