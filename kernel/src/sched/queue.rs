//! Per-priority run queues
//!
//! Each priority level keeps an ordered list of task references plus two
//! cursors: `current` (the task last handed out) and `last_handled` (the
//! round-robin resume point). The pick algorithm walks forward from
//! `last_handled`, treating a cursor at the tail as "this level is done
//! for the round".

extern crate alloc;

use alloc::vec::Vec;

use crate::process::{TaskRef, TaskState};

/// Ordered queue of one priority level
#[derive(Debug, Default)]
pub struct RunQueue {
    entries: Vec<TaskRef>,
    current: Option<TaskRef>,
    last_handled: Option<TaskRef>,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            last_handled: None,
        }
    }

    pub fn push(&mut self, task: TaskRef) {
        if !self.entries.contains(&task) {
            self.entries.push(task);
        }
    }

    pub fn remove(&mut self, task: TaskRef) {
        self.entries.retain(|entry| *entry != task);
        if self.current == Some(task) {
            self.current = None;
        }
        if self.last_handled == Some(task) {
            // Resume from the head next round rather than pointing at a
            // task that no longer exists.
            self.last_handled = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, task: TaskRef) -> bool {
        self.entries.contains(&task)
    }

    /// Reset the round-robin cursor; done when every level ran dry.
    pub fn reset_round(&mut self) {
        self.last_handled = None;
    }

    /// Next runnable task after `last_handled`, per the queue discipline:
    /// a cursor resting on the tail exhausts the level for this round.
    pub fn next_runnable(
        &mut self,
        state_of: &dyn Fn(TaskRef) -> Option<TaskState>,
    ) -> Option<TaskRef> {
        let tail = self.entries.last().copied();
        if self.last_handled.is_some() && self.last_handled == tail {
            return None;
        }
        let start = self
            .last_handled
            .and_then(|cursor| self.entries.iter().position(|entry| *entry == cursor))
            .map(|index| index + 1)
            .unwrap_or(0);
        for index in start..self.entries.len() {
            let task = self.entries[index];
            if state_of(task).map(|state| state.is_runnable()).unwrap_or(false) {
                self.current = Some(task);
                self.last_handled = Some(task);
                return Some(task);
            }
        }
        // Nothing runnable behind the cursor; the level is exhausted.
        self.last_handled = tail;
        None
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate alloc;

    use alloc::collections::BTreeMap;

    use super::*;
    use crate::process::{ProcessId, ThreadId};

    fn task(tid: u32) -> TaskRef {
        (ProcessId(1), ThreadId(tid))
    }

    fn all_ready(states: &[TaskRef]) -> BTreeMap<TaskRef, TaskState> {
        states.iter().map(|t| (*t, TaskState::Ready)).collect()
    }

    #[test]
    fn round_robin_visits_everyone() {
        let mut queue = RunQueue::new();
        for tid in 1..=3 {
            queue.push(task(tid));
        }
        let states = all_ready(&[task(1), task(2), task(3)]);
        let state_of = |t: TaskRef| states.get(&t).copied();

        assert_eq!(queue.next_runnable(&state_of), Some(task(1)));
        assert_eq!(queue.next_runnable(&state_of), Some(task(2)));
        assert_eq!(queue.next_runnable(&state_of), Some(task(3)));
        // Cursor sits on the tail: level exhausted until the round resets.
        assert_eq!(queue.next_runnable(&state_of), None);
        queue.reset_round();
        assert_eq!(queue.next_runnable(&state_of), Some(task(1)));
    }

    #[test]
    fn blocked_tasks_are_skipped() {
        let mut queue = RunQueue::new();
        for tid in 1..=3 {
            queue.push(task(tid));
        }
        let mut states = all_ready(&[task(1), task(2), task(3)]);
        states.insert(task(1), TaskState::Kill);
        states.insert(task(2), TaskState::Active);
        let state_of = |t: TaskRef| states.get(&t).copied();

        assert_eq!(
            queue.next_runnable(&state_of),
            Some(task(3)),
            "only the ready task may run"
        );
    }

    #[test]
    fn halt_switch_counts_as_runnable() {
        let mut queue = RunQueue::new();
        queue.push(task(1));
        let state_of = |_: TaskRef| Some(TaskState::HaltSwitch);
        assert_eq!(
            queue.next_runnable(&state_of),
            Some(task(1)),
            "parked threads replay their blocking call"
        );
    }

    #[test]
    fn removal_clears_cursors() {
        let mut queue = RunQueue::new();
        queue.push(task(1));
        queue.push(task(2));
        let states = all_ready(&[task(1), task(2)]);
        let state_of = |t: TaskRef| states.get(&t).copied();

        assert_eq!(queue.next_runnable(&state_of), Some(task(1)));
        queue.remove(task(1));
        // Cursor fell back to the head.
        assert_eq!(queue.next_runnable(&state_of), Some(task(2)));
    }
}
