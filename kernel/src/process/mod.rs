//! Processes and threads
//!
//! Records live in id-indexed tables and reference each other by id, never
//! by pointer: threads name their process by pid, the name index holds
//! pids, the scheduler queues `(pid, tid)` pairs.

pub mod exit;
pub mod fork;
pub mod pcb;
pub mod replace;
pub mod table;
pub mod thread;

pub use pcb::{Process, Priority, TaskState};
pub use thread::{Thread, WaitReason};

use core::fmt;

/// Process id; monotonic, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread id; monotonic within its process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scheduler-addressable thread
pub type TaskRef = (ProcessId, ThreadId);
