//! Scheduler core
//!
//! The scheduler owns the priority-indexed run queues and the notion of
//! the current task. Context switching means copying register contexts
//! between thread records and the live exception frame; the exception
//! exit path restores whatever the frame contains.

extern crate alloc;

use alloc::collections::BTreeMap;

use spin::Mutex;

use super::queue::RunQueue;
use crate::arch::RegisterContext;
use crate::process::{table, Priority, TaskRef, TaskState};

pub struct Scheduler {
    /// Run queues keyed by priority; higher priorities win
    queues: BTreeMap<Priority, RunQueue>,
    current: Option<TaskRef>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            queues: BTreeMap::new(),
            current: None,
        }
    }

    pub fn enqueue(&mut self, task: TaskRef, priority: Priority) {
        self.queues.entry(priority).or_default().push(task);
    }

    pub fn remove(&mut self, task: TaskRef) {
        for queue in self.queues.values_mut() {
            queue.remove(task);
        }
        if self.current == Some(task) {
            self.current = None;
        }
    }

    /// Pick the next task: highest non-exhausted priority level first,
    /// round-robin inside a level. When every level ran dry, reset the
    /// cursors and retry once; `None` means idle.
    pub fn pick_next(
        &mut self,
        state_of: &dyn Fn(TaskRef) -> Option<TaskState>,
    ) -> Option<TaskRef> {
        for pass in 0..2 {
            for queue in self.queues.values_mut().rev() {
                if let Some(task) = queue.next_runnable(state_of) {
                    return Some(task);
                }
            }
            if pass == 0 {
                for queue in self.queues.values_mut() {
                    queue.reset_round();
                }
            }
        }
        None
    }
}

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// Add a task at the given priority.
pub fn enqueue(task: TaskRef, priority: Priority) {
    crate::arch::without_interrupts(|| SCHEDULER.lock().enqueue(task, priority));
}

/// Drop a task from every queue.
pub fn remove(task: TaskRef) {
    crate::arch::without_interrupts(|| SCHEDULER.lock().remove(task));
}

/// The task currently on the CPU.
pub fn current() -> Option<TaskRef> {
    SCHEDULER.lock().current
}

/// Timer tick: one schedule point.
pub fn timer_tick(ctx: &mut RegisterContext) {
    schedule(ctx);
}

/// Run one scheduling decision against the live exception frame.
pub fn schedule(ctx: &mut RegisterContext) {
    table::with_table(|table| {
        let mut scheduler = SCHEDULER.lock();

        // Save the live frame into the outgoing thread and deliver RPC
        // raises that had to wait for exactly this moment.
        if let Some((pid, tid)) = scheduler.current {
            if let Some(process) = table.get_mut(pid) {
                if let Some(thread) = process.threads.get_mut(&tid) {
                    if thread.context_pinned {
                        // The record was rewritten wholesale (replace);
                        // the stale frame must not win.
                        thread.context_pinned = false;
                    } else {
                        thread.context = *ctx;
                    }
                    if thread.state == TaskState::Active {
                        thread.state = TaskState::Ready;
                    }
                }
                crate::ipc::rpc::deliver_pending(process, tid);
            }
        }

        let next = {
            let lookup = &*table;
            let state_of = |task: TaskRef| -> Option<TaskState> {
                lookup
                    .get(task.0)
                    .filter(|process| process.is_alive())
                    .and_then(|process| process.threads.get(&task.1))
                    .map(|thread| thread.state)
            };
            scheduler.pick_next(&state_of)
        };

        match next {
            Some((pid, tid)) => {
                let switching = scheduler.current != Some((pid, tid));
                if let Some(process) = table.get_mut(pid) {
                    if switching {
                        crate::mm::virt::set_context(&process.space);
                        process.state = TaskState::Active;
                    }
                    if let Some(thread) = process.threads.get_mut(&tid) {
                        thread.state = TaskState::Active;
                        *ctx = thread.context;
                    }
                }
                scheduler.current = Some((pid, tid));
            }
            None => {
                scheduler.current = None;
                *ctx = idle_context();
            }
        }
    });
}

/// Enter the first scheduled thread. Only returns on the host, where
/// there is no frame to jump into.
pub fn start() -> ! {
    let mut frame = RegisterContext::default();
    schedule(&mut frame);
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        // SAFETY: `schedule` filled the frame from a ready thread whose
        // address space is installed.
        unsafe { crate::arch::arm::exception::enter_frame(&frame) }
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        panic!("scheduler start is only meaningful on the target");
    }
}

// ---------------------------------------------------------------------------
// Idle
// ---------------------------------------------------------------------------

/// CPSR for the idle loop: SVC mode, IRQs enabled
const CPSR_SVC_IRQ_ON: u32 = 0x13;

#[repr(align(16))]
struct IdleStack([u8; 4096]);

static mut IDLE_STACK: IdleStack = IdleStack([0; 4096]);

extern "C" fn idle_thread() -> ! {
    loop {
        crate::arch::wait_for_interrupt();
    }
}

fn idle_context() -> RegisterContext {
    // SAFETY: only the address of the stack is taken; the idle loop is
    // the sole user of this memory.
    let stack_top = unsafe {
        core::ptr::addr_of_mut!(IDLE_STACK).add(1) as usize
    };
    RegisterContext {
        gpr: [0; 13],
        sp: stack_top as u32,
        lr: 0,
        pc: idle_thread as usize as u32,
        cpsr: CPSR_SVC_IRQ_ON,
    }
}
