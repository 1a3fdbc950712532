//! User-pointer discipline
//!
//! Every syscall taking a user pointer funnels through these helpers.
//! Instead of trusting the active translation, ranges are bounds-checked
//! against the user half and resolved page by page through the caller's
//! address space; a hole surfaces as `BadUserAccess` instead of a kernel
//! data abort.

extern crate alloc;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::KERNEL_OFFSET;
use crate::error::{KernelError, KernelResult};
use crate::mm::virt::descriptor::PhysWindow;
use crate::mm::{virt, PhysicalAddress, VirtualAddress, PAGE_SIZE};
use crate::process::{table, ProcessId};

/// Reject ranges that are empty, wrap around, or poke into the kernel
/// half.
fn check_range(pointer: usize, length: usize) -> KernelResult<()> {
    if pointer == 0 {
        return Err(KernelError::InvalidArgument {
            what: "null user pointer",
        });
    }
    let end = pointer
        .checked_add(length)
        .ok_or(KernelError::BadUserAccess { address: pointer })?;
    if end > KERNEL_OFFSET {
        return Err(KernelError::BadUserAccess { address: pointer });
    }
    Ok(())
}

/// Run `f` over each (physical window, user offset, chunk length) of the
/// user range, resolving through `pid`'s address space.
fn for_each_chunk(
    pid: ProcessId,
    pointer: usize,
    length: usize,
    mut f: impl FnMut(&PhysWindow, usize, usize) -> KernelResult<()>,
) -> KernelResult<()> {
    check_range(pointer, length)?;
    table::with_process(pid, |process| {
        let mut done = 0;
        while done < length {
            let virt = VirtualAddress::new(pointer + done);
            let page = virt.page_align_down();
            let page_offset = virt.as_usize() - page.as_usize();
            let chunk = (PAGE_SIZE - page_offset).min(length - done);

            let phys = virt::resolve(&process.space, page)
                .ok_or(KernelError::BadUserAccess {
                    address: virt.as_usize(),
                })?;
            let window =
                PhysWindow::open(PhysicalAddress::new(phys.as_u64() + page_offset as u64), chunk)?;
            f(&window, done, chunk)?;
            done += chunk;
        }
        Ok(())
    })
    .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
}

/// Copy `length` bytes out of `pid`'s user range.
pub fn copy_from_user(pid: ProcessId, pointer: usize, length: usize) -> KernelResult<Vec<u8>> {
    let mut buffer = vec![0u8; length];
    for_each_chunk(pid, pointer, length, |window, done, chunk| {
        // SAFETY: the window spans `chunk` readable bytes and the buffer
        // slice is exactly as large.
        unsafe {
            core::ptr::copy_nonoverlapping(window.ptr(), buffer[done..].as_mut_ptr(), chunk);
        }
        Ok(())
    })?;
    Ok(buffer)
}

/// Copy `data` into `pid`'s user range at `pointer`.
pub fn copy_to_user(pid: ProcessId, pointer: usize, data: &[u8]) -> KernelResult<()> {
    for_each_chunk(pid, pointer, data.len(), |window, done, chunk| {
        // SAFETY: the window spans `chunk` writable bytes of the resolved
        // user page.
        unsafe {
            core::ptr::copy_nonoverlapping(data[done..].as_ptr(), window.ptr(), chunk);
        }
        Ok(())
    })
}

/// Read a NUL-terminated string of at most `max` bytes. Pages are copied
/// one at a time so a string ending before an unmapped page still reads
/// cleanly.
pub fn read_user_string(pid: ProcessId, pointer: usize, max: usize) -> KernelResult<String> {
    let mut collected: Vec<u8> = Vec::new();
    let mut offset = 0;
    while offset < max {
        let position = pointer + offset;
        let chunk_len = (PAGE_SIZE - position % PAGE_SIZE).min(max - offset);
        let chunk = copy_from_user(pid, position, chunk_len)?;
        if let Some(terminator) = chunk.iter().position(|byte| *byte == 0) {
            collected.extend_from_slice(&chunk[..terminator]);
            return finish_string(collected);
        }
        collected.extend_from_slice(&chunk);
        offset += chunk_len;
    }
    finish_string(collected)
}

fn finish_string(raw: Vec<u8>) -> KernelResult<String> {
    String::from_utf8(raw).map_err(|_| KernelError::InvalidArgument {
        what: "user string is not utf-8",
    })
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn null_and_kernel_half_pointers_are_rejected() {
        assert!(check_range(0, 16).is_err());
        assert!(check_range(KERNEL_OFFSET, 1).is_err());
        assert!(check_range(KERNEL_OFFSET - 8, 16).is_err());
        assert!(check_range(usize::MAX - 4, 16).is_err());
        assert!(check_range(0x1000, 16).is_ok());
    }
}
