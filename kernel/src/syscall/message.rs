//! Message syscalls

extern crate alloc;

use super::{get_parameter, userspace, Caller};
use crate::arch::RegisterContext;
use crate::error::{KernelError, KernelResult};
use crate::ipc::message::{self, MessageId};
use crate::process::{table, ProcessId};

/// Upper bound on one message body
const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// `message_create()`; the queue exists from process creation, so this
/// only confirms it.
pub fn create(_caller: Caller) -> KernelResult<u32> {
    Ok(0)
}

/// `message_destroy()`; drops everything still queued.
pub fn destroy(caller: Caller) -> KernelResult<u32> {
    table::with_process(caller.pid, |process| process.messages.drain())
        .ok_or(KernelError::ProcessNotFound {
            pid: caller.pid.0,
        })?;
    Ok(0)
}

fn copy_body(caller: Caller, pointer: usize, length: usize) -> KernelResult<alloc::vec::Vec<u8>> {
    if length > MAX_MESSAGE_BYTES {
        return Err(KernelError::InvalidArgument {
            what: "message length",
        });
    }
    if length == 0 {
        return Ok(alloc::vec::Vec::new());
    }
    userspace::copy_from_user(caller.pid, pointer, length)
}

/// `message_send_by_pid(target, type, data, length, responds_to)` -> id
pub fn send_by_pid(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let target = ProcessId(get_parameter(ctx, 0));
    let tag = get_parameter(ctx, 1);
    let pointer = get_parameter(ctx, 2) as usize;
    let length = get_parameter(ctx, 3) as usize;
    let responds_to = match get_parameter(ctx, 4) {
        0 => None,
        id => Some(MessageId(id)),
    };
    let body = copy_body(caller, pointer, length)?;
    let id = message::send_by_pid(caller.pid, target, tag, body, responds_to)?;
    Ok(id.0)
}

/// `message_send_by_name(name, type, data, length)` -> id of the first
/// delivery (broadcast to every process sharing the name)
pub fn send_by_name(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let name_ptr = get_parameter(ctx, 0) as usize;
    let tag = get_parameter(ctx, 1);
    let pointer = get_parameter(ctx, 2) as usize;
    let length = get_parameter(ctx, 3) as usize;

    let name = userspace::read_user_string(caller.pid, name_ptr, 256)?;
    let body = copy_body(caller, pointer, length)?;
    let id = message::send_by_name(caller.pid, &name, tag, body)?;
    Ok(id.0)
}

/// Deliver a popped message into the caller's buffer. Returns the
/// message id; the sender pid is stored through `sender_out` when given.
fn deliver(
    caller: Caller,
    message: message::Message,
    buffer: usize,
    buffer_len: usize,
    sender_out: usize,
) -> KernelResult<u32> {
    if message.body.len() > buffer_len {
        return Err(KernelError::NoBuffer);
    }
    if !message.body.is_empty() {
        userspace::copy_to_user(caller.pid, buffer, &message.body)?;
    }
    if sender_out != 0 {
        userspace::copy_to_user(caller.pid, sender_out, &message.sender.0.to_le_bytes())?;
    }
    Ok(message.id.0)
}

/// `message_receive(buffer, length, sender_out[, type])` -> id
pub fn receive(ctx: &RegisterContext, caller: Caller, typed: bool) -> KernelResult<u32> {
    let buffer = get_parameter(ctx, 0) as usize;
    let buffer_len = get_parameter(ctx, 1) as usize;
    let sender_out = get_parameter(ctx, 2) as usize;
    let filter = if typed {
        Some(get_parameter(ctx, 3))
    } else {
        None
    };
    let popped = message::receive(caller.pid, caller.tid, filter)?;
    deliver(caller, popped, buffer, buffer_len, sender_out)
}

/// `message_wait_for_response(buffer, length, message_id[, type])` -> id
pub fn wait_for_response(
    ctx: &RegisterContext,
    caller: Caller,
    typed: bool,
) -> KernelResult<u32> {
    let buffer = get_parameter(ctx, 0) as usize;
    let buffer_len = get_parameter(ctx, 1) as usize;
    let to = MessageId(get_parameter(ctx, 2));
    let filter = if typed {
        Some(get_parameter(ctx, 3))
    } else {
        None
    };
    let popped = message::wait_for_response(caller.pid, caller.tid, to, filter)?;
    deliver(caller, popped, buffer, buffer_len, 0)
}

/// `message_has_by_name(name)` -> 1 when a live receiver exists
pub fn has_by_name(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let name_ptr = get_parameter(ctx, 0) as usize;
    let name = userspace::read_user_string(caller.pid, name_ptr, 256)?;
    Ok(message::has_receiver_by_name(&name) as u32)
}
