//! Shared memory: creation, attachment, frame identity, destruction

#![cfg(not(target_os = "none"))]

mod common;

use carmine_kernel::mm::{shared, virt, PAGE_SIZE};
use carmine_kernel::process::{table, ProcessId};

fn spawn(name: &str) -> ProcessId {
    let image = common::sample_elf(0x8000, 0x8000, &[0x00; 8]);
    carmine_kernel::boot::spawn(&image, name, 0, ProcessId(0))
        .expect("spawning from a well-formed image succeeds")
}

#[test]
fn segments_share_frames_between_attachments() {
    let _env = common::env();
    let creator = spawn("shm-creator");
    let peer = spawn("shm-peer");

    let id = shared::create(creator, PAGE_SIZE).expect("segment allocates");
    assert_eq!(shared::size_of(id), Some(PAGE_SIZE));

    let at_creator = table::with_process(creator, |p| {
        shared::attach(creator, &mut p.space, id, None).expect("creator attaches")
    })
    .expect("creator exists");
    let at_peer = table::with_process(peer, |p| {
        shared::attach(peer, &mut p.space, id, None).expect("peer attaches")
    })
    .expect("peer exists");

    // Both mappings alias the same physical frame: a write through one
    // is a write through the other.
    let creator_frame = table::with_process(creator, |p| virt::resolve(&p.space, at_creator))
        .expect("creator exists")
        .expect("attachment is mapped");
    let peer_frame = table::with_process(peer, |p| virt::resolve(&p.space, at_peer))
        .expect("peer exists")
        .expect("attachment is mapped");
    assert_eq!(creator_frame, peer_frame);

    // Re-attaching returns the existing address instead of remapping.
    let again = table::with_process(peer, |p| {
        shared::attach(peer, &mut p.space, id, None).expect("repeat attach")
    })
    .expect("peer exists");
    assert_eq!(again, at_peer);
}

#[test]
fn last_detach_plus_creator_release_destroys() {
    let _env = common::env();
    let creator = spawn("shm-owner");
    let peer = spawn("shm-borrower");
    let baseline = common::free_pages();

    let id = shared::create(creator, 2 * PAGE_SIZE).expect("segment allocates");
    assert_eq!(common::free_pages(), baseline - 2);

    let at_peer = table::with_process(peer, |p| {
        shared::attach(peer, &mut p.space, id, None).expect("peer attaches")
    })
    .expect("peer exists");

    // The peer letting go does not destroy: the creator still holds it.
    table::with_process(peer, |p| {
        shared::detach(peer, &mut p.space, id).expect("peer detaches")
    })
    .expect("peer exists");
    assert!(shared::size_of(id).is_some(), "creator release is still pending");
    table::with_process(peer, |p| {
        assert!(!virt::is_mapped(&p.space, at_peer), "detach unmapped the range");
    })
    .expect("peer exists");

    // Creator release with nobody attached destroys and frees.
    table::with_process(creator, |p| {
        shared::detach(creator, &mut p.space, id).expect("creator releases")
    })
    .expect("creator exists");
    assert!(shared::size_of(id).is_none(), "segment is gone");
    assert_eq!(common::free_pages(), baseline, "segment frames returned");

    let stale = table::with_process(peer, |p| shared::detach(peer, &mut p.space, id))
        .expect("peer exists");
    assert!(stale.is_err(), "detaching a destroyed segment reports NotFound");
}

#[test]
fn attach_honors_hints_when_free() {
    let _env = common::env();
    let owner = spawn("shm-hinter");
    let id = shared::create(owner, PAGE_SIZE).expect("segment allocates");

    let hint = carmine_kernel::mm::VirtualAddress::new(0x1000_0000);
    let got = table::with_process(owner, |p| {
        shared::attach(owner, &mut p.space, id, Some(hint)).expect("attach with hint")
    })
    .expect("owner exists");
    assert_eq!(got, hint, "a free hinted range is used as-is");
}

#[test]
fn process_cleanup_detaches_shared_segments() {
    let _env = common::env();
    let owner = spawn("shm-leaker");
    let baseline = common::free_pages();

    let id = shared::create(owner, PAGE_SIZE).expect("segment allocates");
    table::with_process(owner, |p| {
        shared::attach(owner, &mut p.space, id, None).expect("attach")
    })
    .expect("owner exists");

    carmine_kernel::process::exit::kill_process(owner);
    carmine_kernel::process::exit::cleanup();

    assert!(shared::size_of(id).is_none(), "cleanup released the segment");
    assert!(common::free_pages() >= baseline, "no shared frame leaked");
}
