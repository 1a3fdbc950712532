//! Global process table and name index
//!
//! All structural mutation runs with interrupts masked. Access is
//! closure-based; nothing hands out references that outlive the lock.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use super::{pcb::Process, ProcessId};

pub struct ProcessTable {
    processes: BTreeMap<ProcessId, Process>,
    /// name -> every process carrying it (forked workers share names)
    names: BTreeMap<String, Vec<ProcessId>>,
    next_pid: u32,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            names: BTreeMap::new(),
            next_pid: 1,
        }
    }

    pub fn generate_pid(&mut self) -> ProcessId {
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        pid
    }

    pub fn insert(&mut self, process: Process) -> ProcessId {
        let pid = process.id;
        self.names
            .entry(process.name.clone())
            .or_default()
            .push(pid);
        self.processes.insert(pid, process);
        pid
    }

    pub fn remove(&mut self, pid: ProcessId) -> Option<Process> {
        let process = self.processes.remove(&pid)?;
        if let Some(bucket) = self.names.get_mut(&process.name) {
            bucket.retain(|entry| *entry != pid);
            if bucket.is_empty() {
                self.names.remove(&process.name);
            }
        }
        Some(process)
    }

    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    /// Every process registered under `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<ProcessId> {
        self.names.get(name).cloned().unwrap_or_default()
    }

    pub fn pids(&self) -> Vec<ProcessId> {
        self.processes.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.processes.len()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

static TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Run `f` against the table with interrupts masked.
pub fn with_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    crate::arch::without_interrupts(|| f(&mut TABLE.lock()))
}

/// Run `f` against one process; `None` when the pid is unknown.
pub fn with_process<R>(pid: ProcessId, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    with_table(|table| table.get_mut(pid).map(f))
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate alloc;

    use alloc::string::ToString;

    use super::*;
    use crate::mm::virt::{AddressSpace, ContextType};
    use crate::mm::PhysicalAddress;

    fn bare_process(table: &mut ProcessTable, name: &str) -> ProcessId {
        let pid = table.generate_pid();
        // Hand-built record; the address space root is never dereferenced
        // by table operations.
        let process = Process {
            id: pid,
            parent: ProcessId(0),
            name: name.to_string(),
            priority: 2,
            state: super::super::TaskState::Init,
            space: AddressSpace::new(PhysicalAddress::new(0x4000), ContextType::User),
            threads: alloc::collections::BTreeMap::new(),
            next_thread_id: 1,
            stacks: super::super::pcb::StackPool::new(),
            messages: crate::ipc::message::MessageQueue::new(),
            rpc: crate::ipc::rpc::RpcState::new(),
            io_grants: alloc::vec::Vec::new(),
        };
        table.insert(process)
    }

    #[test]
    fn pids_are_monotonic_from_one() {
        let mut table = ProcessTable::new();
        assert_eq!(table.generate_pid(), ProcessId(1));
        assert_eq!(table.generate_pid(), ProcessId(2));
    }

    #[test]
    fn name_index_tracks_shared_names() {
        let mut table = ProcessTable::new();
        let first = bare_process(&mut table, "worker");
        let second = bare_process(&mut table, "worker");
        let other = bare_process(&mut table, "vfs");

        assert_eq!(table.find_by_name("worker"), alloc::vec![first, second]);
        assert_eq!(table.find_by_name("vfs"), alloc::vec![other]);

        table.remove(first);
        assert_eq!(table.find_by_name("worker"), alloc::vec![second]);
        table.remove(second);
        assert!(table.find_by_name("worker").is_empty());
    }
}
