//! Process record
//!
//! One [`Process`] owns its address space, its threads, its message
//! queue, its RPC state, and its stack pool. Everything is reachable from
//! the global table in `table.rs`.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::{ProcessId, ThreadId};
use crate::ipc::message::MessageQueue;
use crate::ipc::rpc::RpcState;
use crate::mm::virt::{self, AddressSpace, ContextType};
use crate::error::KernelResult;

/// Scheduling priority; higher runs first
pub type Priority = usize;

/// Lifecycle state shared by processes and threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Being constructed, not schedulable yet
    Init,
    /// Runnable
    Ready,
    /// Currently on the CPU
    Active,
    /// Parked; rescheduling replays the blocking operation
    HaltSwitch,
    /// Dead, waiting for the cleanup event
    Kill,
}

impl TaskState {
    /// States the scheduler may hand the CPU to.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::HaltSwitch)
    }
}

/// Slot-based bookkeeping for user stack placement. Slot `n` puts the
/// stack top at `USER_STACK_TOP - n * (pages + guard) * PAGE_SIZE`.
#[derive(Debug, Default, Clone)]
pub struct StackPool {
    used: Vec<bool>,
}

impl StackPool {
    pub const fn new() -> Self {
        Self { used: Vec::new() }
    }

    pub fn allocate(&mut self) -> usize {
        if let Some(slot) = self.used.iter().position(|used| !used) {
            self.used[slot] = true;
            slot
        } else {
            self.used.push(true);
            self.used.len() - 1
        }
    }

    pub fn release(&mut self, slot: usize) {
        if let Some(flag) = self.used.get_mut(slot) {
            *flag = false;
        }
    }
}

/// One granted MMIO window
#[derive(Debug, Clone, Copy)]
pub struct IoGrant {
    /// Physical base of the device registers
    pub phys: u64,
    /// Where they are mapped in the grantee's space
    pub virt: usize,
    pub length: usize,
}

/// Process control block
pub struct Process {
    pub id: ProcessId,
    pub parent: ProcessId,
    pub name: String,
    pub priority: Priority,
    pub state: TaskState,
    /// The user half of this process's world
    pub space: AddressSpace,
    pub threads: BTreeMap<ThreadId, super::Thread>,
    pub next_thread_id: u32,
    pub stacks: StackPool,
    pub messages: MessageQueue,
    pub rpc: RpcState,
    /// MMIO ranges this process was granted access to
    pub io_grants: Vec<IoGrant>,
}

impl Process {
    /// Allocate the address space and an empty record in `Init` state.
    pub fn create(
        id: ProcessId,
        parent: ProcessId,
        name: String,
        priority: Priority,
    ) -> KernelResult<Self> {
        let space = virt::create_context(ContextType::User)?;
        Ok(Self {
            id,
            parent,
            name,
            priority,
            state: TaskState::Init,
            space,
            threads: BTreeMap::new(),
            next_thread_id: 1,
            stacks: StackPool::new(),
            messages: MessageQueue::new(),
            rpc: RpcState::new(),
            io_grants: Vec::new(),
        })
    }

    /// Next thread id for this process.
    pub fn generate_thread_id(&mut self) -> ThreadId {
        let id = ThreadId(self.next_thread_id);
        self.next_thread_id += 1;
        id
    }

    /// True while the record should be scheduled and receive messages.
    pub fn is_alive(&self) -> bool {
        self.state != TaskState::Kill
    }

    /// Whether an MMIO range was granted to this process.
    pub fn io_permitted(&self, phys_base: u64, length: usize) -> bool {
        self.io_grants.iter().any(|grant| {
            phys_base >= grant.phys && phys_base + length as u64 <= grant.phys + grant.length as u64
        })
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn stack_pool_reuses_released_slots() {
        let mut pool = StackPool::new();
        assert_eq!(pool.allocate(), 0);
        assert_eq!(pool.allocate(), 1);
        pool.release(0);
        assert_eq!(pool.allocate(), 0, "released slot is handed out again");
        assert_eq!(pool.allocate(), 2);
    }

    #[test]
    fn runnable_states() {
        assert!(TaskState::Ready.is_runnable());
        assert!(TaskState::HaltSwitch.is_runnable());
        assert!(!TaskState::Active.is_runnable());
        assert!(!TaskState::Kill.is_runnable());
        assert!(!TaskState::Init.is_runnable());
    }
}
