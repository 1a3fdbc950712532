//! ELF32 loader for user program execution
//!
//! Validates the identification the boot contract demands (32-bit,
//! little-endian, ARM) and maps `PT_LOAD` segments into a user context
//! with permissions derived from the segment flags.

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::mm::virt::{self, AddressSpace, MemoryType, PageType, Protection};
use crate::mm::{PhysicalAddress, VirtualAddress, PAGE_SIZE};

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELF_CLASS_32: u8 = 1;
const ELF_DATA_2LSB: u8 = 1;
/// Machine tag for 32-bit ARM
const EM_ARM: u16 = 0x28;
const PT_LOAD: u32 = 1;

const PF_X: u32 = 0x1;
const PF_W: u32 = 0x2;
const PF_R: u32 = 0x4;

/// Byte size of the ELF32 file header
const EHDR_SIZE: usize = 52;
/// Byte size of one ELF32 program header
const PHDR_SIZE: usize = 32;

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// A loadable segment
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: usize,
    pub offset: usize,
    pub file_size: usize,
    pub memory_size: usize,
    pub flags: u32,
}

impl Segment {
    pub fn protection(&self) -> Protection {
        let mut protection = Protection::empty();
        if self.flags & PF_R != 0 {
            protection |= Protection::READ;
        }
        if self.flags & PF_W != 0 {
            protection |= Protection::WRITE;
        }
        if self.flags & PF_X != 0 {
            protection |= Protection::EXECUTE;
        }
        protection
    }

    pub fn page_type(&self) -> PageType {
        if self.flags & PF_X != 0 {
            PageType::Executable
        } else {
            PageType::NonExecutable
        }
    }
}

/// Parsed view of an ELF executable
pub struct ElfImage<'a> {
    data: &'a [u8],
    pub entry: VirtualAddress,
    segments: Vec<Segment>,
}

impl<'a> ElfImage<'a> {
    /// Validate the identification and collect the load segments.
    pub fn parse(data: &'a [u8]) -> KernelResult<Self> {
        if data.len() < EHDR_SIZE {
            return Err(KernelError::InvalidArgument {
                what: "elf image too small",
            });
        }
        if data[0..4] != ELF_MAGIC {
            return Err(KernelError::InvalidArgument { what: "elf magic" });
        }
        if data[4] != ELF_CLASS_32 {
            return Err(KernelError::InvalidArgument {
                what: "elf class, expected 32-bit",
            });
        }
        if data[5] != ELF_DATA_2LSB {
            return Err(KernelError::InvalidArgument {
                what: "elf byte order, expected little-endian",
            });
        }
        if read_u16(data, 18) != EM_ARM {
            return Err(KernelError::InvalidArgument {
                what: "elf machine, expected ARM",
            });
        }

        let entry = read_u32(data, 24) as usize;
        let phoff = read_u32(data, 28) as usize;
        let phentsize = read_u16(data, 42) as usize;
        let phnum = read_u16(data, 44) as usize;

        if phentsize < PHDR_SIZE
            || phoff
                .checked_add(phentsize * phnum)
                .map(|end| end > data.len())
                .unwrap_or(true)
        {
            return Err(KernelError::InvalidArgument {
                what: "elf program headers out of bounds",
            });
        }

        let mut segments = Vec::new();
        for index in 0..phnum {
            let base = phoff + index * phentsize;
            if read_u32(data, base) != PT_LOAD {
                continue;
            }
            let segment = Segment {
                offset: read_u32(data, base + 4) as usize,
                vaddr: read_u32(data, base + 8) as usize,
                file_size: read_u32(data, base + 16) as usize,
                memory_size: read_u32(data, base + 20) as usize,
                flags: read_u32(data, base + 24),
            };
            let file_end = segment.offset.checked_add(segment.file_size);
            let memory_end = segment.vaddr.checked_add(segment.memory_size);
            if file_end.map(|end| end > data.len()).unwrap_or(true)
                || segment.file_size > segment.memory_size
                || memory_end
                    .map(|end| end >= crate::config::KERNEL_OFFSET)
                    .unwrap_or(true)
            {
                return Err(KernelError::InvalidArgument {
                    what: "elf segment out of bounds",
                });
            }
            segments.push(segment);
        }

        Ok(Self {
            data,
            entry: VirtualAddress::new(entry),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Map every load segment into `space` and copy its contents in.
    /// Returns the entry point.
    pub fn load(&self, space: &mut AddressSpace) -> KernelResult<VirtualAddress> {
        for segment in &self.segments {
            let start = VirtualAddress::new(segment.vaddr).page_align_down();
            let span = segment.vaddr + segment.memory_size - start.as_usize();
            virt::map_range_random(
                space,
                start,
                span,
                MemoryType::Normal,
                segment.page_type(),
                segment.protection(),
            )?;
            self.copy_segment(space, segment)?;
        }
        Ok(self.entry)
    }

    /// Copy segment bytes page by page through the physical windows of
    /// the freshly mapped frames; the `.bss` tail stays zero because the
    /// frames were never written before.
    fn copy_segment(&self, space: &mut AddressSpace, segment: &Segment) -> KernelResult<()> {
        let mut copied = 0;
        while copied < segment.file_size {
            let virt = VirtualAddress::new(segment.vaddr + copied);
            let page = virt.page_align_down();
            let page_offset = virt.as_usize() - page.as_usize();
            let chunk = (PAGE_SIZE - page_offset).min(segment.file_size - copied);

            let phys = virt::resolve(space, page).ok_or(KernelError::InvalidArgument {
                what: "segment page vanished during load",
            })?;
            let window = virt::descriptor::PhysWindow::open(
                PhysicalAddress::new(phys.as_u64() + page_offset as u64),
                chunk,
            )?;
            // SAFETY: the window spans `chunk` writable bytes and the
            // source range was bounds-checked at parse time.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    self.data[segment.offset + copied..].as_ptr(),
                    window.ptr(),
                    chunk,
                );
            }
            copied += chunk;
        }
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate alloc;

    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    /// Minimal valid ELF32 header for ARM with one load segment.
    pub(crate) fn sample_image(entry: u32, body: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; EHDR_SIZE + PHDR_SIZE];
        image[0..4].copy_from_slice(&ELF_MAGIC);
        image[4] = ELF_CLASS_32;
        image[5] = ELF_DATA_2LSB;
        image[6] = 1; // version
        image[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        image[18..20].copy_from_slice(&(EM_ARM as u16).to_le_bytes());
        image[24..28].copy_from_slice(&entry.to_le_bytes());
        image[28..32].copy_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // phoff
        image[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        image[44..46].copy_from_slice(&1u16.to_le_bytes()); // phnum

        let body_offset = image.len();
        let phdr = EHDR_SIZE;
        image[phdr..phdr + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        image[phdr + 4..phdr + 8].copy_from_slice(&(body_offset as u32).to_le_bytes());
        image[phdr + 8..phdr + 12].copy_from_slice(&0x8000u32.to_le_bytes()); // vaddr
        image[phdr + 16..phdr + 20].copy_from_slice(&(body.len() as u32).to_le_bytes());
        image[phdr + 20..phdr + 24].copy_from_slice(&(body.len() as u32 + 16).to_le_bytes());
        image[phdr + 24..phdr + 28].copy_from_slice(&(PF_R | PF_X).to_le_bytes());
        image.extend_from_slice(body);
        image
    }

    #[test]
    fn accepts_a_valid_arm_executable() {
        let image = sample_image(0x8000, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let parsed = ElfImage::parse(&image).expect("well-formed image must parse");
        assert_eq!(parsed.entry.as_usize(), 0x8000);
        assert_eq!(parsed.segments().len(), 1);
        let segment = parsed.segments()[0];
        assert!(segment.protection().contains(Protection::READ));
        assert!(segment.protection().contains(Protection::EXECUTE));
        assert!(!segment.protection().contains(Protection::WRITE));
        assert_eq!(segment.page_type(), PageType::Executable);
    }

    #[test]
    fn rejects_wrong_magic_class_and_machine() {
        let image = sample_image(0x8000, &[0x00]);

        let mut bad_magic = image.clone();
        bad_magic[0] = 0x7E;
        assert!(ElfImage::parse(&bad_magic).is_err());

        let mut bad_class = image.clone();
        bad_class[4] = 2; // 64-bit
        assert!(ElfImage::parse(&bad_class).is_err());

        let mut bad_machine = image.clone();
        bad_machine[18..20].copy_from_slice(&0x3Eu16.to_le_bytes()); // x86_64
        assert!(ElfImage::parse(&bad_machine).is_err());
    }

    #[test]
    fn rejects_truncated_segments() {
        let mut image = sample_image(0x8000, &[0xAA; 8]);
        let len = image.len();
        image.truncate(len - 4);
        assert!(
            ElfImage::parse(&image).is_err(),
            "file size beyond the end of the image must be rejected"
        );
    }
}
