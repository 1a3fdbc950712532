//! Shared test environment
//!
//! The kernel's globals (frame allocator, memory engine, process table)
//! are process-wide, so every test takes the environment lock and the
//! engine is brought up exactly once per test binary.

#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, Once};

use carmine_kernel::mm::frame_allocator::{FrameBitmap, FRAME_ALLOCATOR};

static LOCK: Mutex<()> = Mutex::new(());
static SETUP: Once = Once::new();

/// Acquire the environment: allocator plus memory engine, serialized.
pub fn env() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    SETUP.call_once(|| {
        // Frames covering 4 GiB of pretend RAM; host pages materialize
        // only when touched.
        let words = 32768;
        let bitmap = Box::leak(vec![0u32; words].into_boxed_slice());
        let check = Box::leak(vec![0u32; words].into_boxed_slice());
        *FRAME_ALLOCATOR.lock() = Some(FrameBitmap::with_storage(bitmap, check));
        carmine_kernel::mm::virt::init();
    });
    guard
}

/// Free pages currently in the global allocator.
pub fn free_pages() -> usize {
    carmine_kernel::mm::frame_allocator::with_allocator(|a| a.free_pages())
}

/// Minimal ELF32/ARM executable with one read-execute load segment at
/// `vaddr`.
pub fn sample_elf(entry: u32, vaddr: u32, body: &[u8]) -> Vec<u8> {
    const EHDR: usize = 52;
    const PHDR: usize = 32;

    let mut image = vec![0u8; EHDR + PHDR];
    image[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    image[4] = 1; // 32-bit
    image[5] = 1; // little-endian
    image[6] = 1; // version
    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    image[18..20].copy_from_slice(&0x28u16.to_le_bytes()); // ARM
    image[24..28].copy_from_slice(&entry.to_le_bytes());
    image[28..32].copy_from_slice(&(EHDR as u32).to_le_bytes());
    image[42..44].copy_from_slice(&(PHDR as u16).to_le_bytes());
    image[44..46].copy_from_slice(&1u16.to_le_bytes());

    let body_offset = image.len() as u32;
    let p = EHDR;
    image[p..p + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    image[p + 4..p + 8].copy_from_slice(&body_offset.to_le_bytes());
    image[p + 8..p + 12].copy_from_slice(&vaddr.to_le_bytes());
    image[p + 16..p + 20].copy_from_slice(&(body.len() as u32).to_le_bytes());
    image[p + 20..p + 24].copy_from_slice(&(body.len() as u32).to_le_bytes());
    image[p + 24..p + 28].copy_from_slice(&5u32.to_le_bytes()); // R+X
    image.extend_from_slice(body);
    image
}
