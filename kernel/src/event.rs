//! Kernel event plane
//!
//! Exception handlers record what they observed as tagged events; the
//! queue is drained after every interrupt return and at the tail of every
//! syscall. Draining runs with scheduler privilege and is the only place
//! context switches happen.

use spin::Mutex;

use crate::arch::RegisterContext;
use crate::config::EVENT_QUEUE_CAPACITY;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Scheduler tick
    Timer,
    /// Device interrupt; payload carries the vector number
    Irq,
    /// Explicit reschedule request
    Process,
    /// UART receive
    Serial,
    /// Debug exception
    Debug,
    /// Deferred per-interrupt work and Kill-state reaping
    InterruptCleanup,
}

/// Where the interrupted execution came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    Kernel,
    User,
}

/// A queued event
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub origin: EventOrigin,
    pub payload: u32,
}

/// Fixed-capacity ring; enqueue never allocates because it runs from
/// interrupt context.
pub struct EventQueue {
    slots: [Option<Event>; EVENT_QUEUE_CAPACITY],
    head: usize,
    tail: usize,
    count: usize,
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            slots: [None; EVENT_QUEUE_CAPACITY],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Append; returns false when the queue is full.
    pub fn push(&mut self, event: Event) -> bool {
        if self.count == EVENT_QUEUE_CAPACITY {
            return false;
        }
        self.slots[self.tail] = Some(event);
        self.tail = (self.tail + 1) % EVENT_QUEUE_CAPACITY;
        self.count += 1;
        true
    }

    /// Oldest event, if any.
    pub fn pop(&mut self) -> Option<Event> {
        if self.count == 0 {
            return None;
        }
        let event = self.slots[self.head].take();
        self.head = (self.head + 1) % EVENT_QUEUE_CAPACITY;
        self.count -= 1;
        event
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

static QUEUE: Mutex<EventQueue> = Mutex::new(EventQueue::new());

/// Post an event. Safe from interrupt context; a full queue drops the
/// event with a diagnostic rather than blocking.
pub fn enqueue(kind: EventKind, origin: EventOrigin, payload: u32) {
    crate::arch::without_interrupts(|| {
        if !QUEUE.lock().push(Event {
            kind,
            origin,
            payload,
        }) {
            log::error!("event queue full, dropping {:?}", kind);
        }
    });
}

/// Drain all pending events. `ctx` is the live exception frame; the
/// scheduler rewrites it when a switch is due.
pub fn drain(ctx: &mut RegisterContext, origin: EventOrigin) {
    loop {
        let event = crate::arch::without_interrupts(|| QUEUE.lock().pop());
        let event = match event {
            Some(event) => event,
            None => break,
        };
        match event.kind {
            EventKind::Timer => crate::sched::timer_tick(ctx),
            EventKind::Irq => crate::irq::dispatch(event.payload),
            EventKind::Process => crate::sched::schedule(ctx),
            EventKind::Serial => crate::platform::uart::handle_receive(),
            EventKind::Debug => {
                log::debug!("debug event from {:?}, payload {:#x}", origin, event.payload)
            }
            EventKind::InterruptCleanup => {
                crate::process::exit::cleanup();
                // Reaping may have taken the running thread with it.
                crate::sched::schedule(ctx);
            }
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn event(payload: u32) -> Event {
        Event {
            kind: EventKind::Irq,
            origin: EventOrigin::Kernel,
            payload,
        }
    }

    #[test]
    fn fifo_order() {
        let mut queue = EventQueue::new();
        assert!(queue.push(event(1)));
        assert!(queue.push(event(2)));
        assert!(queue.push(event(3)));
        assert_eq!(queue.pop().expect("queue holds three events").payload, 1);
        assert_eq!(queue.pop().expect("queue holds two events").payload, 2);
        assert_eq!(queue.pop().expect("queue holds one event").payload, 3);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn capacity_is_bounded() {
        let mut queue = EventQueue::new();
        for index in 0..EVENT_QUEUE_CAPACITY {
            assert!(queue.push(event(index as u32)), "queue fills to capacity");
        }
        assert!(!queue.push(event(999)), "overflow must be rejected");
        assert_eq!(queue.len(), EVENT_QUEUE_CAPACITY);
        // Wrap around: consume two, append two.
        assert_eq!(queue.pop().expect("pop after fill").payload, 0);
        assert_eq!(queue.pop().expect("pop after fill").payload, 1);
        assert!(queue.push(event(1000)));
        assert!(queue.push(event(1001)));
        assert!(!queue.push(event(1002)));
    }
}
