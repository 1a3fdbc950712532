//! Interrupt forwarding syscalls
//!
//! Acquisition requires a bound RPC handler: a fired vector is delivered
//! as an RPC raise, so without a handler there is nowhere to deliver.

use super::{get_parameter, Caller};
use crate::arch::RegisterContext;
use crate::error::{KernelError, KernelResult};
use crate::irq::IrqNumber;
use crate::process::table;

fn rpc_bound(caller: Caller) -> KernelResult<bool> {
    table::with_process(caller.pid, |process| process.rpc.is_bound()).ok_or(
        KernelError::ProcessNotFound {
            pid: caller.pid.0,
        },
    )
}

/// `interrupt_acquire(vector)`
pub fn acquire(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let vector = get_parameter(ctx, 0);
    if !rpc_bound(caller)? {
        return Err(KernelError::NotPermitted {
            operation: "interrupt acquire without rpc handler",
        });
    }
    crate::irq::acquire(IrqNumber::new(vector), caller.pid)?;
    Ok(0)
}

/// `interrupt_release(vector)`
pub fn release(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let vector = get_parameter(ctx, 0);
    if !rpc_bound(caller)? {
        // Nothing can be bound without a handler; releasing is a no-op.
        return Ok(0);
    }
    crate::irq::release(IrqNumber::new(vector), caller.pid)?;
    Ok(0)
}
