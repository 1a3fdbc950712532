//! RPC syscalls
//!
//! Binding installs the process-wide handler entry point; raise targets a
//! pid; return restores the interrupted thread and answers the origin.
//! Payloads are exchanged through kernel-held buffers addressed by the
//! raise's message id.

extern crate alloc;

use super::{get_parameter, userspace, Caller};
use crate::arch::RegisterContext;
use crate::error::{KernelError, KernelResult};
use crate::ipc::rpc;
use crate::mm::VirtualAddress;
use crate::process::ProcessId;

/// Upper bound on one RPC payload
const MAX_RPC_BYTES: usize = 64 * 1024;

/// `rpc_bind(handler_entry)`
pub fn bind(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let entry = get_parameter(ctx, 0) as usize;
    if entry == 0 || entry >= crate::config::KERNEL_OFFSET {
        return Err(KernelError::InvalidArgument {
            what: "rpc handler entry",
        });
    }
    rpc::bind(caller.pid, VirtualAddress::new(entry))?;
    Ok(0)
}

/// `rpc_unbind()`
pub fn unbind(caller: Caller) -> KernelResult<u32> {
    rpc::unbind(caller.pid)?;
    Ok(0)
}

/// `rpc_raise(target, type, data, length)` -> message id
pub fn raise(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let target = ProcessId(get_parameter(ctx, 0));
    let tag = get_parameter(ctx, 1);
    let pointer = get_parameter(ctx, 2) as usize;
    let length = get_parameter(ctx, 3) as usize;
    if length > MAX_RPC_BYTES {
        return Err(KernelError::InvalidArgument {
            what: "rpc payload length",
        });
    }
    let data = if length == 0 {
        alloc::vec::Vec::new()
    } else {
        userspace::copy_from_user(caller.pid, pointer, length)?
    };
    let id = rpc::raise(caller.pid, target, tag, data)?;
    Ok(id.0)
}

/// `rpc_return(type, data, length)`; restores the pinned context
pub fn rpc_return(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let tag = get_parameter(ctx, 0);
    let pointer = get_parameter(ctx, 1) as usize;
    let length = get_parameter(ctx, 2) as usize;
    if length > MAX_RPC_BYTES {
        return Err(KernelError::InvalidArgument {
            what: "rpc payload length",
        });
    }
    let data = if length == 0 {
        alloc::vec::Vec::new()
    } else {
        userspace::copy_from_user(caller.pid, pointer, length)?
    };
    rpc::rpc_return(caller.pid, caller.tid, tag, data)?;
    // The restored context wins over this frame at the next schedule
    // point.
    crate::event::enqueue(
        crate::event::EventKind::Process,
        crate::event::EventOrigin::User,
        0,
    );
    Ok(0)
}

/// `rpc_get_data(buffer, length, data_id)` -> copied byte count
pub fn get_data(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let buffer = get_parameter(ctx, 0) as usize;
    let length = get_parameter(ctx, 1) as usize;
    let data_id = get_parameter(ctx, 2);
    let data = rpc::take_data(caller.pid, data_id)?;
    if data.len() > length {
        return Err(KernelError::NoBuffer);
    }
    if !data.is_empty() {
        userspace::copy_to_user(caller.pid, buffer, &data)?;
    }
    Ok(data.len() as u32)
}

/// `rpc_get_data_size(data_id)` -> payload size
pub fn get_data_size(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let data_id = get_parameter(ctx, 0);
    Ok(rpc::data_size(caller.pid, data_id)? as u32)
}
