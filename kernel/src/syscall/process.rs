//! Process syscalls

extern crate alloc;

use super::{get_parameter, userspace, Caller};
use crate::arch::RegisterContext;
use crate::error::{KernelError, KernelResult};
use crate::event::{EventKind, EventOrigin};
use crate::process::{fork as process_fork, replace as process_replace};

/// Upper bound on executable images accepted over the syscall boundary
const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

/// `process_create(image_ptr, image_len, name_ptr, priority)` -> pid
///
/// Builds a process from an ELF image in the caller's memory and
/// schedules its initial thread.
pub fn create(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let image_ptr = get_parameter(ctx, 0) as usize;
    let image_len = get_parameter(ctx, 1) as usize;
    let name_ptr = get_parameter(ctx, 2) as usize;
    let priority = get_parameter(ctx, 3) as usize;

    if image_len == 0 || image_len > MAX_IMAGE_BYTES {
        return Err(KernelError::InvalidArgument {
            what: "image length",
        });
    }
    let image = userspace::copy_from_user(caller.pid, image_ptr, image_len)?;
    let name = userspace::read_user_string(caller.pid, name_ptr, 256)?;

    let pid = crate::boot::spawn(&image, &name, priority, caller.pid)?;
    Ok(pid.0)
}

/// `process_exit(code)`; the record is reaped by the cleanup event.
pub fn exit(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let code = get_parameter(ctx, 0);
    log::debug!("process {} exits with {}", caller.pid, code);
    crate::process::exit::kill_process(caller.pid);
    crate::event::enqueue(EventKind::InterruptCleanup, EventOrigin::User, caller.pid.0);
    crate::event::enqueue(EventKind::Process, EventOrigin::User, 0);
    Ok(0)
}

/// `process_id()` -> pid
pub fn id(caller: Caller) -> KernelResult<u32> {
    Ok(caller.pid.0)
}

/// `process_fork()` -> child pid for the parent, 0 for the child
pub fn fork(caller: Caller) -> KernelResult<u32> {
    let child = process_fork::fork(caller.pid, caller.tid)?;
    // Fork is a schedule point.
    crate::event::enqueue(EventKind::Process, EventOrigin::User, 0);
    Ok(child.0)
}

/// `process_replace(image_ptr, image_len)`; resumes at the new entry
pub fn replace(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let image_ptr = get_parameter(ctx, 0) as usize;
    let image_len = get_parameter(ctx, 1) as usize;
    if image_len == 0 || image_len > MAX_IMAGE_BYTES {
        return Err(KernelError::InvalidArgument {
            what: "image length",
        });
    }
    // The image must be captured before its mapping is destroyed.
    let image = userspace::copy_from_user(caller.pid, image_ptr, image_len)?;
    process_replace::replace(caller.pid, caller.tid, &image)?;
    crate::event::enqueue(EventKind::Process, EventOrigin::User, 0);
    Ok(0)
}
