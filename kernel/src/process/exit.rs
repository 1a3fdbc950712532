//! Death and reaping
//!
//! Nothing is freed at kill time; records merely enter `Kill` state and
//! the `InterruptCleanup` event does the teardown at a safe point: drain
//! the message queue, detach shared segments, release interrupt vectors,
//! destroy the address space with frame release, and drop the record from
//! the id and name indexes.

extern crate alloc;

use alloc::vec::Vec;

use super::{table, thread, ProcessId, TaskState, ThreadId};
use crate::mm::virt;

/// Mark the process owning the current thread as dead.
pub fn kill_current() {
    if let Some((pid, _)) = crate::sched::current() {
        kill_process(pid);
    }
}

/// Put `pid` and all its threads into `Kill` state.
pub fn kill_process(pid: ProcessId) {
    table::with_process(pid, |process| {
        process.state = TaskState::Kill;
        for thread in process.threads.values_mut() {
            thread.state = TaskState::Kill;
        }
    });
}

/// Put a single thread into `Kill` state.
pub fn kill_thread(pid: ProcessId, tid: ThreadId) {
    table::with_process(pid, |process| {
        if let Some(thread) = process.threads.get_mut(&tid) {
            thread.state = TaskState::Kill;
        }
    });
}

/// Reap everything in `Kill` state. Runs from the `InterruptCleanup`
/// event with scheduler privilege.
pub fn cleanup() {
    // Dead processes: pull them out of the table first so no other path
    // can reach them, then tear down outside the table lock.
    let dead: Vec<ProcessId> = table::with_table(|table| {
        table
            .pids()
            .into_iter()
            .filter(|pid| {
                table
                    .get(*pid)
                    .map(|process| process.state == TaskState::Kill)
                    .unwrap_or(false)
            })
            .collect()
    });

    for pid in dead {
        let process = table::with_table(|table| table.remove(pid));
        let mut process = match process {
            Some(process) => process,
            None => continue,
        };
        log::debug!("reaping process {} ({})", pid, process.name);

        process.messages.drain();
        crate::mm::shared::detach_all(pid, &mut process.space);
        crate::irq::release_all(pid);

        let tids: Vec<ThreadId> = process.threads.keys().copied().collect();
        for tid in tids {
            // The address space is torn down wholesale below.
            thread::destroy(&mut process, tid, false);
        }
        virt::destroy_context(&mut process.space, true);
    }

    // Dead threads inside living processes only lose their own footprint.
    let victims: Vec<(ProcessId, ThreadId)> = table::with_table(|table| {
        let mut found = Vec::new();
        for pid in table.pids() {
            if let Some(process) = table.get(pid) {
                for thread in process.threads.values() {
                    if thread.state == TaskState::Kill {
                        found.push((pid, thread.id));
                    }
                }
            }
        }
        found
    });

    for (pid, tid) in victims {
        table::with_process(pid, |process| {
            thread::destroy(process, tid, true);
            // A process with no threads left cannot make progress.
            if process.threads.is_empty() {
                process.state = TaskState::Kill;
            }
        });
    }
}
