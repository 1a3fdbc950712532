//! Process lifecycle: spawn, fork, replace, exit-and-reap

#![cfg(not(target_os = "none"))]

mod common;

use carmine_kernel::process::{exit, fork, replace, table, ProcessId, TaskState};

#[test]
fn spawn_creates_a_ready_process() {
    let _env = common::env();
    let image = common::sample_elf(0x8000, 0x8000, &[0xFE, 0xDE, 0xFF, 0xE7]);
    let pid = boot_spawn(&image, "init-test");

    table::with_process(pid, |process| {
        assert_eq!(process.name, "init-test");
        assert_eq!(process.state, TaskState::Ready);
        assert_eq!(process.threads.len(), 1);
        let thread = process.threads.values().next().expect("one thread");
        assert_eq!(thread.context.pc, 0x8000, "thread enters at the elf entry");
        assert_eq!(thread.state, TaskState::Ready);
        assert!(thread.context.from_user_mode());
    })
    .expect("spawned process is in the table");
}

#[test]
fn fork_clones_threads_and_isolates_spaces() {
    let _env = common::env();
    let image = common::sample_elf(0x8000, 0x8000, &[0x00; 16]);
    let parent = boot_spawn(&image, "forker");
    let tid = first_tid(parent);

    let child = fork::fork(parent, tid).expect("fork succeeds");
    assert_ne!(child, parent);

    let parent_root = table::with_process(parent, |p| p.space.root()).expect("parent exists");
    table::with_process(child, |process| {
        assert_eq!(process.parent, parent);
        assert_eq!(process.name, "forker", "forked workers share the name");
        assert_ne!(process.space.root(), parent_root, "spaces are distinct");
        let thread = process.threads.get(&tid).expect("threads are cloned");
        assert_eq!(
            thread.context.return_value(),
            0,
            "the child observes fork returning zero"
        );
        assert_eq!(thread.state, TaskState::Ready);
    })
    .expect("child is in the table");

    // Both answer to the shared name.
    let named = table::with_table(|t| t.find_by_name("forker"));
    assert!(named.contains(&parent) && named.contains(&child));
}

#[test]
fn exit_and_cleanup_return_every_frame() {
    let _env = common::env();
    let baseline = common::free_pages();

    let image = common::sample_elf(0x8000, 0x8000, &[0x55; 64]);
    let pid = boot_spawn(&image, "short-lived");
    assert!(common::free_pages() < baseline, "a live process holds frames");

    exit::kill_process(pid);
    exit::cleanup();

    assert!(
        table::with_process(pid, |_| ()).is_none(),
        "the record is gone after cleanup"
    );
    assert!(
        table::with_table(|t| t.find_by_name("short-lived")).is_empty(),
        "the name index entry is gone"
    );
    assert_eq!(
        common::free_pages(),
        baseline,
        "every previously used frame is free again"
    );
}

#[test]
fn replace_keeps_pid_and_swaps_the_image() {
    let _env = common::env();
    let image = common::sample_elf(0x8000, 0x8000, &[0x11; 32]);
    let pid = boot_spawn(&image, "replacer");
    let tid = first_tid(pid);

    let next = common::sample_elf(0x2_0000, 0x2_0000, &[0x22; 32]);
    replace::replace(pid, tid, &next).expect("replace succeeds");

    table::with_process(pid, |process| {
        assert_eq!(process.name, "replacer", "the name index entry survives");
        assert_eq!(process.threads.len(), 1, "only the calling thread remains");
        let thread = process.threads.get(&tid).expect("caller survives");
        assert_eq!(
            thread.context.pc, 0x2_0000,
            "execution resumes at the new entry point"
        );
    })
    .expect("pid is unchanged");
}

#[test]
fn replace_with_garbage_leaves_the_old_image_running() {
    let _env = common::env();
    let image = common::sample_elf(0x8000, 0x8000, &[0x33; 32]);
    let pid = boot_spawn(&image, "survivor");
    let tid = first_tid(pid);

    let result = replace::replace(pid, tid, b"definitely not an elf");
    assert!(result.is_err(), "malformed images are rejected up front");

    table::with_process(pid, |process| {
        assert_eq!(process.state, TaskState::Ready, "validation happens before teardown");
        let thread = process.threads.get(&tid).expect("thread untouched");
        assert_eq!(thread.context.pc, 0x8000);
    })
    .expect("process survives a rejected replace");
}

fn boot_spawn(image: &[u8], name: &str) -> ProcessId {
    carmine_kernel::boot::spawn(image, name, 0, ProcessId(0))
        .expect("spawning from a well-formed image succeeds")
}

fn first_tid(pid: ProcessId) -> carmine_kernel::process::ThreadId {
    table::with_process(pid, |p| *p.threads.keys().next().expect("a thread exists"))
        .expect("process exists")
}
