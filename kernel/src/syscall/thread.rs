//! Thread syscalls

use super::{get_parameter, Caller};
use crate::arch::RegisterContext;
use crate::error::{KernelError, KernelResult};
use crate::event::{EventKind, EventOrigin};
use crate::mm::VirtualAddress;
use crate::process::{table, thread};

/// `thread_create(entry, priority)` -> tid
pub fn create(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let entry = get_parameter(ctx, 0) as usize;
    let priority = get_parameter(ctx, 1) as usize;
    if entry == 0 || entry >= crate::config::KERNEL_OFFSET {
        return Err(KernelError::InvalidArgument {
            what: "thread entry point",
        });
    }

    let tid = table::with_process(caller.pid, |process| {
        let priority = if priority == 0 {
            process.priority
        } else {
            priority
        };
        thread::create(process, VirtualAddress::new(entry), priority)
    })
    .ok_or(KernelError::ProcessNotFound {
        pid: caller.pid.0,
    })??;

    let priority = table::with_process(caller.pid, |process| {
        process
            .threads
            .get(&tid)
            .map(|thread| thread.priority)
            .unwrap_or(process.priority)
    })
    .unwrap_or(crate::config::DEFAULT_PRIORITY);
    crate::sched::enqueue((caller.pid, tid), priority);
    Ok(tid.0)
}

/// `thread_exit()`; the stacks are reclaimed at the next cleanup event.
pub fn exit(caller: Caller) -> KernelResult<u32> {
    crate::process::exit::kill_thread(caller.pid, caller.tid);
    crate::event::enqueue(EventKind::InterruptCleanup, EventOrigin::User, caller.pid.0);
    crate::event::enqueue(EventKind::Process, EventOrigin::User, 0);
    Ok(0)
}

/// `thread_id()` -> tid
pub fn id(caller: Caller) -> KernelResult<u32> {
    Ok(caller.tid.0)
}
