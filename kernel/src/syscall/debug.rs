//! Kernel-output syscalls, debug builds only in spirit: they bypass the
//! console server and write straight to the UART.

use super::{get_parameter, userspace, Caller};
use crate::arch::RegisterContext;
use crate::error::{KernelError, KernelResult};

/// `putc(character)`
pub fn putc(ctx: &RegisterContext) -> KernelResult<u32> {
    let character = get_parameter(ctx, 0);
    match char::from_u32(character) {
        Some(c) => {
            crate::print!("{}", c);
            Ok(0)
        }
        None => Err(KernelError::InvalidArgument {
            what: "not a character",
        }),
    }
}

/// `puts(pointer, length)` -> bytes written
pub fn puts(ctx: &RegisterContext, caller: Caller) -> KernelResult<u32> {
    let pointer = get_parameter(ctx, 0) as usize;
    let length = get_parameter(ctx, 1) as usize;
    if length == 0 || length > 4096 {
        return Err(KernelError::InvalidArgument {
            what: "puts length",
        });
    }
    let bytes = userspace::copy_from_user(caller.pid, pointer, length)?;
    let text = core::str::from_utf8(&bytes).map_err(|_| KernelError::InvalidArgument {
        what: "puts payload is not utf-8",
    })?;
    crate::print!("{}", text);
    Ok(length as u32)
}
