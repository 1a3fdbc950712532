//! Interrupt forwarding
//!
//! User drivers acquire an interrupt vector; when it fires, the kernel
//! raises an RPC into the owning process. Ownership requires a bound RPC
//! handler and is exclusive per vector.

extern crate alloc;

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::process::ProcessId;

/// Interrupt vector number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    pub const fn new(vector: u32) -> Self {
        Self(vector)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

static HANDLERS: Mutex<BTreeMap<IrqNumber, ProcessId>> = Mutex::new(BTreeMap::new());

/// Bind `vector` to `pid`. The caller has already verified the process
/// carries an RPC handler.
pub fn acquire(vector: IrqNumber, pid: ProcessId) -> KernelResult<()> {
    if !crate::platform::intc::valid_vector(vector.as_u32()) {
        return Err(KernelError::InvalidArgument {
            what: "interrupt vector",
        });
    }
    let mut handlers = HANDLERS.lock();
    match handlers.get(&vector) {
        Some(owner) if *owner != pid => Err(KernelError::AlreadyExists {
            resource: "interrupt vector",
        }),
        _ => {
            handlers.insert(vector, pid);
            crate::platform::intc::enable_vector(vector.as_u32());
            Ok(())
        }
    }
}

/// Unbind `vector` from `pid`.
pub fn release(vector: IrqNumber, pid: ProcessId) -> KernelResult<()> {
    if !crate::platform::intc::valid_vector(vector.as_u32()) {
        return Err(KernelError::InvalidArgument {
            what: "interrupt vector",
        });
    }
    let mut handlers = HANDLERS.lock();
    match handlers.get(&vector) {
        Some(owner) if *owner == pid => {
            handlers.remove(&vector);
            crate::platform::intc::disable_vector(vector.as_u32());
            Ok(())
        }
        Some(_) => Err(KernelError::NotPermitted {
            operation: "interrupt release",
        }),
        None => Ok(()),
    }
}

/// Drop every vector owned by `pid`; part of process cleanup.
pub fn release_all(pid: ProcessId) {
    let mut handlers = HANDLERS.lock();
    let owned: alloc::vec::Vec<IrqNumber> = handlers
        .iter()
        .filter(|(_, owner)| **owner == pid)
        .map(|(vector, _)| *vector)
        .collect();
    for vector in owned {
        handlers.remove(&vector);
        crate::platform::intc::disable_vector(vector.as_u32());
    }
}

/// Forward a fired vector to its owner, if any. Called from the event
/// drain, not from the exception handler itself.
pub fn dispatch(vector: u32) {
    let owner = HANDLERS.lock().get(&IrqNumber::new(vector)).copied();
    match owner {
        Some(pid) => {
            if let Err(err) = crate::ipc::rpc::raise_interrupt(pid, vector) {
                log::warn!("interrupt {} delivery to {} failed: {}", vector, pid, err);
            }
        }
        None => log::debug!("unclaimed interrupt vector {}", vector),
    }
}
