//! Shared-memory registry
//!
//! Segments are page-multiple collections of frames keyed by a numeric id.
//! Attachment maps the frames into a caller's address space; the last
//! detach combined with the creator's release destroys the segment and
//! returns its frames.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use super::virt::{self, AddressSpace, MemoryType, PageType, Protection};
use super::{frame_allocator, PhysicalAddress, VirtualAddress, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::process::ProcessId;

/// Shared segment id, handed to userspace as-is
pub type SegmentId = u32;

/// One shared-memory segment
struct Segment {
    size: usize,
    frames: Vec<PhysicalAddress>,
    owner: ProcessId,
    /// Set once the creator released its handle
    owner_released: bool,
    attachments: BTreeMap<ProcessId, VirtualAddress>,
}

struct Registry {
    segments: BTreeMap<SegmentId, Segment>,
    next_id: SegmentId,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    segments: BTreeMap::new(),
    next_id: 1,
});

/// Create a segment of `size` bytes (rounded up to pages) and reserve its
/// frames. The new id is returned; nothing is mapped yet.
pub fn create(owner: ProcessId, size: usize) -> KernelResult<SegmentId> {
    if size == 0 {
        return Err(KernelError::InvalidArgument { what: "zero size" });
    }
    let size = super::page_round_up(size);
    let pages = size / PAGE_SIZE;

    let mut frames = Vec::with_capacity(pages);
    for _ in 0..pages {
        match frame_allocator::allocate_page() {
            Ok(frame) => frames.push(frame),
            Err(err) => {
                for frame in frames {
                    frame_allocator::release_page(frame);
                }
                return Err(err);
            }
        }
    }
    for frame in &frames {
        zero_frame(*frame)?;
    }

    let mut registry = REGISTRY.lock();
    let id = registry.next_id;
    registry.next_id += 1;
    registry.segments.insert(
        id,
        Segment {
            size,
            frames,
            owner,
            owner_released: false,
            attachments: BTreeMap::new(),
        },
    );
    Ok(id)
}

/// Map segment `id` into `space` for `pid`. A repeated attach returns the
/// existing address. `hint` is honored when the range is free.
pub fn attach(
    pid: ProcessId,
    space: &mut AddressSpace,
    id: SegmentId,
    hint: Option<VirtualAddress>,
) -> KernelResult<VirtualAddress> {
    let mut registry = REGISTRY.lock();
    let segment = registry
        .segments
        .get_mut(&id)
        .ok_or(KernelError::NotFound {
            resource: "shared segment",
        })?;

    if let Some(existing) = segment.attachments.get(&pid) {
        return Ok(*existing);
    }

    let base = virt::find_free_range(space, segment.size, hint).ok_or(KernelError::OutOfMemory)?;
    for (index, frame) in segment.frames.iter().enumerate() {
        if let Err(err) = virt::map(
            space,
            base.offset(index * PAGE_SIZE),
            *frame,
            MemoryType::Normal,
            PageType::NonExecutable,
            Protection::READ | Protection::WRITE,
        ) {
            // Roll back without touching the segment's frames.
            for undo in 0..index {
                virt::unmap(space, base.offset(undo * PAGE_SIZE), false);
            }
            return Err(err);
        }
    }

    segment.attachments.insert(pid, base);
    Ok(base)
}

/// Unmap segment `id` from `space`. When the caller is the creator this
/// also counts as the creator release. Destroys the segment once nobody
/// holds it anymore.
pub fn detach(pid: ProcessId, space: &mut AddressSpace, id: SegmentId) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    let segment = registry
        .segments
        .get_mut(&id)
        .ok_or(KernelError::NotFound {
            resource: "shared segment",
        })?;

    if let Some(base) = segment.attachments.remove(&pid) {
        // The frames stay owned by the segment; never release here.
        virt::unmap_range(space, base, segment.size, false);
    }
    if segment.owner == pid {
        segment.owner_released = true;
    }

    destroy_if_unused(&mut registry, id);
    Ok(())
}

/// Detach every segment `pid` holds; used by process cleanup. Segments
/// created by `pid` are released as well.
pub fn detach_all(pid: ProcessId, space: &mut AddressSpace) {
    let ids: Vec<SegmentId> = {
        let registry = REGISTRY.lock();
        registry
            .segments
            .iter()
            .filter(|(_, segment)| {
                segment.attachments.contains_key(&pid) || segment.owner == pid
            })
            .map(|(id, _)| *id)
            .collect()
    };
    for id in ids {
        let _ = detach(pid, space, id);
    }
}

/// Size of a segment, if it exists.
pub fn size_of(id: SegmentId) -> Option<usize> {
    REGISTRY.lock().segments.get(&id).map(|segment| segment.size)
}

fn destroy_if_unused(registry: &mut Registry, id: SegmentId) {
    let unused = registry
        .segments
        .get(&id)
        .map(|segment| segment.attachments.is_empty() && segment.owner_released)
        .unwrap_or(false);
    if unused {
        if let Some(segment) = registry.segments.remove(&id) {
            for frame in segment.frames {
                frame_allocator::release_page(frame);
            }
        }
    }
}

fn zero_frame(frame: PhysicalAddress) -> KernelResult<()> {
    let window = super::virt::descriptor::PhysWindow::open(frame, PAGE_SIZE)?;
    // SAFETY: the window covers exactly one freshly reserved frame.
    unsafe {
        core::ptr::write_bytes(window.ptr(), 0, PAGE_SIZE);
    }
    Ok(())
}
