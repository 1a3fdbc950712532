//! Boot orchestration
//!
//! The loader hands over `{zero, machine_id, atag_or_fdt_pointer}`. The
//! pointed-to block is probed as either an ATAG list or a flattened
//! device tree; both yield total RAM, the initrd window, and the command
//! line. The first user process is unpacked from the initrd, which makes
//! a missing initrd fatal.

pub mod atag;
pub mod fdt;
pub mod initrd;

extern crate alloc;

use alloc::string::String;

use crate::error::{KernelError, KernelResult};
use crate::mm::PhysicalAddress;
use crate::process::{pcb::Process, table, thread, ProcessId, TaskState};

/// Register block handed over by the loader
#[derive(Debug, Clone, Copy)]
pub struct BootParams {
    pub zero: u32,
    pub machine: u32,
    pub tags: u32,
}

/// Everything the rest of bring-up needs to know
#[derive(Debug, Clone)]
pub struct BootInfo {
    pub machine: u32,
    pub total_ram: u64,
    pub initrd: Option<(u64, usize)>,
    cmdline: [u8; 256],
    cmdline_len: usize,
}

impl BootInfo {
    pub fn cmdline(&self) -> Option<&str> {
        if self.cmdline_len == 0 {
            return None;
        }
        core::str::from_utf8(&self.cmdline[..self.cmdline_len]).ok()
    }

    pub fn initrd_range(&self) -> Option<(PhysicalAddress, usize)> {
        self.initrd
            .map(|(start, size)| (PhysicalAddress::new(start), size))
    }
}

/// Probe the boot block. Must run before the MMU switch retires the
/// identity mapping the pointer relies on.
///
/// # Safety
///
/// `params.tags` must point at a readable ATAG list or FDT blob.
pub unsafe fn probe(params: BootParams) -> KernelResult<BootInfo> {
    let pointer = params.tags as usize;
    if pointer == 0 {
        return Err(KernelError::InvalidArgument {
            what: "boot tag pointer",
        });
    }

    // SAFETY: per the function contract the loader block is readable;
    // four bytes suffice to discriminate the format.
    let head = unsafe { core::slice::from_raw_parts(pointer as *const u8, 4) };

    let (total_ram, initrd_raw, cmdline, cmdline_len) = if fdt::is_fdt(head) {
        // SAFETY: magic matched; the fdt crate bounds itself using the
        // embedded total-size field.
        let tree = unsafe { ::fdt::Fdt::from_ptr(pointer as *const u8) }.map_err(|_| {
            KernelError::InvalidArgument {
                what: "device tree blob",
            }
        })?;
        let info = fdt::parse(&tree);
        (info.total_ram, info.initrd, info.cmdline, info.cmdline_len)
    } else {
        // SAFETY: an ATAG list fits comfortably in one page of words;
        // the walk stops at the NONE terminator or the slice end.
        let words = unsafe { core::slice::from_raw_parts(pointer as *const u32, 1024) };
        if !atag::is_atag_list(words) {
            return Err(KernelError::InvalidArgument {
                what: "boot block is neither atag nor fdt",
            });
        }
        let info = atag::parse_words(words);
        (info.total_ram, info.initrd, info.cmdline, info.cmdline_len)
    };

    let total_ram = if total_ram != 0 {
        total_ram
    } else {
        crate::platform::arm_memory_size().unwrap_or(0)
    };
    if total_ram == 0 {
        return Err(KernelError::InvalidArgument {
            what: "no memory description in boot data",
        });
    }

    Ok(BootInfo {
        machine: params.machine,
        total_ram,
        initrd: initrd_raw,
        cmdline,
        cmdline_len,
    })
}

/// Create a process from an ELF image and schedule its first thread.
pub fn spawn(
    image: &[u8],
    name: &str,
    priority: usize,
    parent: ProcessId,
) -> KernelResult<ProcessId> {
    let elf = crate::elf::ElfImage::parse(image)?;
    let priority = if priority == 0 {
        crate::config::DEFAULT_PRIORITY
    } else {
        priority
    };

    table::with_table(|table| {
        let pid = table.generate_pid();
        let mut process = Process::create(pid, parent, String::from(name), priority)?;
        let entry = match elf.load(&mut process.space) {
            Ok(entry) => entry,
            Err(err) => {
                crate::mm::virt::destroy_context(&mut process.space, true);
                return Err(err);
            }
        };
        let tid = match thread::create(&mut process, entry, priority) {
            Ok(tid) => tid,
            Err(err) => {
                crate::mm::virt::destroy_context(&mut process.space, true);
                return Err(err);
            }
        };
        process.state = TaskState::Ready;
        table.insert(process);
        crate::sched::enqueue((pid, tid), priority);
        log::info!("spawned {} as pid {}", name, pid);
        Ok(pid)
    })
}

/// Unpack the initrd and start `init`. The initrd frames are handed back
/// to the allocator afterwards.
pub fn load_init(info: &BootInfo) -> KernelResult<ProcessId> {
    let (start, size) = info.initrd_range().ok_or(KernelError::NotFound {
        resource: "initrd",
    })?;

    let init_image = {
        let window = crate::mm::virt::descriptor::PhysWindow::open(start, size)?;
        // SAFETY: the window spans the whole initrd, which the frame
        // allocator keeps reserved until the extraction below finishes.
        let bytes = unsafe { core::slice::from_raw_parts(window.ptr() as *const u8, size) };
        initrd::extract_init(bytes)?
    };

    let pid = spawn(&init_image, "init", crate::config::DEFAULT_PRIORITY, ProcessId(0))?;

    // The compressed archive has served its purpose.
    crate::mm::frame_allocator::with_allocator(|allocator| {
        allocator.mark_free(start, size);
    });
    Ok(pid)
}
