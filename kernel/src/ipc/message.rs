//! Typed message plane
//!
//! Every process owns a FIFO queue. Ids are monotonic across the whole
//! system so responses can be correlated. Blocking receives park the
//! calling thread in `HaltSwitch`; the syscall layer replays the trapped
//! instruction when the thread runs again.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{KernelError, KernelResult};
use crate::process::{table, ProcessId, TaskState, ThreadId, WaitReason};

/// Message id; monotonic, system-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_MESSAGE_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) fn generate_id() -> MessageId {
    MessageId(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
}

/// One queued message
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub tag: u32,
    pub sender: ProcessId,
    pub receiver: ProcessId,
    pub body: Vec<u8>,
    /// Set when this message answers an earlier one
    pub responds_to: Option<MessageId>,
}

/// Per-process FIFO queue
#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: VecDeque<Message>,
}

impl MessageQueue {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.entries.push_back(message);
    }

    /// Oldest plain message matching `filter`. Responses are left for
    /// [`MessageQueue::pop_response`] so correlation cannot be stolen.
    pub fn pop_matching(&mut self, filter: Option<u32>) -> Option<Message> {
        let position = self.entries.iter().position(|message| {
            message.responds_to.is_none()
                && filter.map(|tag| tag == message.tag).unwrap_or(true)
        })?;
        self.entries.remove(position)
    }

    /// Oldest response to `to`, optionally filtered by type.
    pub fn pop_response(&mut self, to: MessageId, filter: Option<u32>) -> Option<Message> {
        let position = self.entries.iter().position(|message| {
            message.responds_to == Some(to)
                && filter.map(|tag| tag == message.tag).unwrap_or(true)
        })?;
        self.entries.remove(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything; used when the owning process dies.
    pub fn drain(&mut self) {
        self.entries.clear();
    }
}

/// Wake parked threads whose wait condition the new message satisfies.
fn wake_waiters(process: &mut crate::process::Process, message: &Message) {
    for thread in process.threads.values_mut() {
        if thread.state != TaskState::HaltSwitch {
            continue;
        }
        let woken = match thread.wait {
            Some(WaitReason::Receive { filter }) => {
                message.responds_to.is_none()
                    && filter.map(|tag| tag == message.tag).unwrap_or(true)
            }
            Some(WaitReason::Response { to, filter }) => {
                message.responds_to == Some(to)
                    && filter.map(|tag| tag == message.tag).unwrap_or(true)
            }
            None => false,
        };
        if woken {
            thread.state = TaskState::Ready;
        }
    }
}

/// Enqueue a message to `target`. Returns the fresh id.
pub fn send_by_pid(
    sender: ProcessId,
    target: ProcessId,
    tag: u32,
    body: Vec<u8>,
    responds_to: Option<MessageId>,
) -> KernelResult<MessageId> {
    table::with_table(|table| {
        let process = table
            .get_mut(target)
            .filter(|process| process.is_alive())
            .ok_or(KernelError::ProcessNotFound { pid: target.0 })?;
        let message = Message {
            id: generate_id(),
            tag,
            sender,
            receiver: target,
            body,
            responds_to,
        };
        let id = message.id;
        wake_waiters(process, &message);
        process.messages.push(message);
        Ok(id)
    })
}

/// Broadcast to every process registered under `name`. Returns the id of
/// the first delivery.
pub fn send_by_name(
    sender: ProcessId,
    name: &str,
    tag: u32,
    body: Vec<u8>,
) -> KernelResult<MessageId> {
    let receivers = table::with_table(|table| table.find_by_name(name));
    if receivers.is_empty() {
        return Err(KernelError::NotFound {
            resource: "process name",
        });
    }
    let mut first = None;
    for target in receivers {
        if let Ok(id) = send_by_pid(sender, target, tag, body.clone(), None) {
            first.get_or_insert(id);
        }
    }
    first.ok_or(KernelError::IoError {
        operation: "send_by_name",
    })
}

/// True when at least one live process answers to `name`.
pub fn has_receiver_by_name(name: &str) -> bool {
    table::with_table(|table| {
        table
            .find_by_name(name)
            .iter()
            .any(|pid| table.get(*pid).map(|p| p.is_alive()).unwrap_or(false))
    })
}

/// Pop the oldest matching message for `(pid, tid)`. With nothing there
/// the thread parks and the caller sees `WouldBlock`.
pub fn receive(
    pid: ProcessId,
    tid: ThreadId,
    filter: Option<u32>,
) -> KernelResult<Message> {
    table::with_table(|table| {
        let process = table
            .get_mut(pid)
            .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
        if let Some(message) = process.messages.pop_matching(filter) {
            if let Some(thread) = process.threads.get_mut(&tid) {
                thread.wait = None;
            }
            return Ok(message);
        }
        if let Some(thread) = process.threads.get_mut(&tid) {
            thread.state = TaskState::HaltSwitch;
            thread.wait = Some(WaitReason::Receive { filter });
        }
        Err(KernelError::WouldBlock)
    })
}

/// Pop the response to message `to`; parks like [`receive`].
pub fn wait_for_response(
    pid: ProcessId,
    tid: ThreadId,
    to: MessageId,
    filter: Option<u32>,
) -> KernelResult<Message> {
    table::with_table(|table| {
        let process = table
            .get_mut(pid)
            .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
        if let Some(message) = process.messages.pop_response(to, filter) {
            if let Some(thread) = process.threads.get_mut(&tid) {
                thread.wait = None;
            }
            return Ok(message);
        }
        if let Some(thread) = process.threads.get_mut(&tid) {
            thread.state = TaskState::HaltSwitch;
            thread.wait = Some(WaitReason::Response { to, filter });
        }
        Err(KernelError::WouldBlock)
    })
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate alloc;

    use alloc::vec;

    use super::*;

    fn message(id: u32, tag: u32, responds_to: Option<MessageId>) -> Message {
        Message {
            id: MessageId(id),
            tag,
            sender: ProcessId(1),
            receiver: ProcessId(2),
            body: vec![id as u8],
            responds_to,
        }
    }

    #[test]
    fn fifo_within_one_receiver() {
        let mut queue = MessageQueue::new();
        queue.push(message(1, 7, None));
        queue.push(message(2, 7, None));
        let first = queue.pop_matching(None).expect("two messages queued");
        let second = queue.pop_matching(None).expect("one message left");
        assert_eq!(first.id, MessageId(1), "send order is delivery order");
        assert_eq!(second.id, MessageId(2));
    }

    #[test]
    fn type_filter_skips_other_tags() {
        let mut queue = MessageQueue::new();
        queue.push(message(1, 7, None));
        queue.push(message(2, 9, None));
        let got = queue
            .pop_matching(Some(9))
            .expect("tag 9 message is queued");
        assert_eq!(got.id, MessageId(2));
        assert_eq!(queue.len(), 1, "non-matching message stays queued");
    }

    #[test]
    fn responses_only_surface_through_correlation() {
        let mut queue = MessageQueue::new();
        queue.push(message(5, 7, Some(MessageId(3))));
        queue.push(message(6, 7, None));
        // A plain receive must not steal the response.
        let plain = queue.pop_matching(None).expect("plain message queued");
        assert_eq!(plain.id, MessageId(6));
        // Correlation returns exactly the right response.
        assert!(queue.pop_response(MessageId(4), None).is_none());
        let response = queue
            .pop_response(MessageId(3), None)
            .expect("response to id 3 is queued");
        assert_eq!(response.id, MessageId(5));
    }
}
