//! System call surface
//!
//! The dispatcher reads the call number from the trapped context, decodes
//! it, and routes to a handler which reads typed parameters out of the
//! saved registers. Results travel back through the same context: a
//! non-negative value for success, a negated errno for failure. Blocking
//! calls rewind the saved pc so the trap replays when the thread is
//! scheduled again.

mod debug;
mod interrupt;
mod io;
mod memory;
mod message;
mod process;
mod rpc;
mod thread;
pub mod userspace;

use crate::arch::RegisterContext;
use crate::error::{KernelError, KernelResult};
use crate::process::{table, ProcessId, ThreadId};

/// System call numbers, grouped by subsystem range.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    // Process management (1-9)
    ProcessCreate = 1,
    ProcessExit = 2,
    ProcessId = 3,
    ProcessFork = 4,
    ProcessReplace = 5,

    // Thread management (11-19)
    ThreadCreate = 11,
    ThreadExit = 12,
    ThreadId = 13,

    // Memory (21-29)
    MemoryAcquire = 21,
    MemoryRelease = 22,
    MemorySharedCreate = 23,
    MemorySharedAttach = 24,
    MemorySharedDetach = 25,

    // Messages (31-39)
    MessageCreate = 31,
    MessageDestroy = 32,
    MessageSendByPid = 33,
    MessageSendByName = 34,
    MessageReceive = 35,
    MessageReceiveType = 36,
    MessageWaitForResponse = 37,
    MessageWaitForResponseType = 38,
    MessageHasByName = 39,

    // I/O permission (41-49)
    IoAcquire = 41,
    IoRelease = 42,
    IoCheck = 43,
    IoRaise = 44,

    // Interrupt forwarding (51-59)
    InterruptAcquire = 51,
    InterruptRelease = 52,

    // RPC (61-69)
    RpcBind = 61,
    RpcUnbind = 62,
    RpcRaise = 63,
    RpcReturn = 64,
    RpcGetData = 65,
    RpcGetDataSize = 66,

    // Kernel output, debug builds only (101-102)
    DummyPutc = 101,
    DummyPuts = 102,
}

impl TryFrom<u32> for Syscall {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Syscall::ProcessCreate),
            2 => Ok(Syscall::ProcessExit),
            3 => Ok(Syscall::ProcessId),
            4 => Ok(Syscall::ProcessFork),
            5 => Ok(Syscall::ProcessReplace),

            11 => Ok(Syscall::ThreadCreate),
            12 => Ok(Syscall::ThreadExit),
            13 => Ok(Syscall::ThreadId),

            21 => Ok(Syscall::MemoryAcquire),
            22 => Ok(Syscall::MemoryRelease),
            23 => Ok(Syscall::MemorySharedCreate),
            24 => Ok(Syscall::MemorySharedAttach),
            25 => Ok(Syscall::MemorySharedDetach),

            31 => Ok(Syscall::MessageCreate),
            32 => Ok(Syscall::MessageDestroy),
            33 => Ok(Syscall::MessageSendByPid),
            34 => Ok(Syscall::MessageSendByName),
            35 => Ok(Syscall::MessageReceive),
            36 => Ok(Syscall::MessageReceiveType),
            37 => Ok(Syscall::MessageWaitForResponse),
            38 => Ok(Syscall::MessageWaitForResponseType),
            39 => Ok(Syscall::MessageHasByName),

            41 => Ok(Syscall::IoAcquire),
            42 => Ok(Syscall::IoRelease),
            43 => Ok(Syscall::IoCheck),
            44 => Ok(Syscall::IoRaise),

            51 => Ok(Syscall::InterruptAcquire),
            52 => Ok(Syscall::InterruptRelease),

            61 => Ok(Syscall::RpcBind),
            62 => Ok(Syscall::RpcUnbind),
            63 => Ok(Syscall::RpcRaise),
            64 => Ok(Syscall::RpcReturn),
            65 => Ok(Syscall::RpcGetData),
            66 => Ok(Syscall::RpcGetDataSize),

            101 => Ok(Syscall::DummyPutc),
            102 => Ok(Syscall::DummyPuts),

            _ => Err(()),
        }
    }
}

/// Deliver a success value through the saved context.
pub fn populate_success(ctx: &mut RegisterContext, value: u32) {
    ctx.set_return(value);
}

/// Deliver a negated errno through the saved context.
pub fn populate_error(ctx: &mut RegisterContext, error: KernelError) {
    ctx.set_return(error.to_errno() as u32);
}

/// Read parameter `index` of the trapped call.
pub fn get_parameter(ctx: &RegisterContext, index: usize) -> u32 {
    ctx.parameter(index)
}

/// Identity of the thread that trapped.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub pid: ProcessId,
    pub tid: ThreadId,
}

/// Entry from the `svc` exception path.
pub fn dispatch(ctx: &mut RegisterContext) {
    let (pid, tid) = match crate::sched::current() {
        Some(current) => current,
        None => {
            log::error!("syscall trap without a current thread");
            return;
        }
    };
    let caller = Caller { pid, tid };

    // Keep the thread record in sync with the live frame; fork clones
    // from the record.
    table::with_process(pid, |process| {
        if let Some(thread) = process.threads.get_mut(&tid) {
            thread.context = *ctx;
        }
    });

    let number = ctx.syscall_number();
    let result = match Syscall::try_from(number) {
        Ok(call) => handle(call, ctx, caller),
        Err(()) => {
            log::warn!("unknown syscall {} from {}", number, pid);
            Err(KernelError::InvalidArgument {
                what: "syscall number",
            })
        }
    };

    match result {
        Ok(value) => populate_success(ctx, value),
        Err(KernelError::WouldBlock) => {
            // Replay the trap when the thread is scheduled again; the
            // blocking subsystem already parked it.
            ctx.rewind_syscall();
            table::with_process(pid, |process| {
                if let Some(thread) = process.threads.get_mut(&tid) {
                    thread.context = *ctx;
                }
            });
            // Hand the CPU to someone who can make progress.
            crate::event::enqueue(
                crate::event::EventKind::Process,
                crate::event::EventOrigin::User,
                0,
            );
        }
        Err(error) => populate_error(ctx, error),
    }
}

fn handle(call: Syscall, ctx: &mut RegisterContext, caller: Caller) -> KernelResult<u32> {
    match call {
        Syscall::ProcessCreate => process::create(ctx, caller),
        Syscall::ProcessExit => process::exit(ctx, caller),
        Syscall::ProcessId => process::id(caller),
        Syscall::ProcessFork => process::fork(caller),
        Syscall::ProcessReplace => process::replace(ctx, caller),

        Syscall::ThreadCreate => thread::create(ctx, caller),
        Syscall::ThreadExit => thread::exit(caller),
        Syscall::ThreadId => thread::id(caller),

        Syscall::MemoryAcquire => memory::acquire(ctx, caller),
        Syscall::MemoryRelease => memory::release(ctx, caller),
        Syscall::MemorySharedCreate => memory::shared_create(ctx, caller),
        Syscall::MemorySharedAttach => memory::shared_attach(ctx, caller),
        Syscall::MemorySharedDetach => memory::shared_detach(ctx, caller),

        Syscall::MessageCreate => message::create(caller),
        Syscall::MessageDestroy => message::destroy(caller),
        Syscall::MessageSendByPid => message::send_by_pid(ctx, caller),
        Syscall::MessageSendByName => message::send_by_name(ctx, caller),
        Syscall::MessageReceive => message::receive(ctx, caller, false),
        Syscall::MessageReceiveType => message::receive(ctx, caller, true),
        Syscall::MessageWaitForResponse => message::wait_for_response(ctx, caller, false),
        Syscall::MessageWaitForResponseType => message::wait_for_response(ctx, caller, true),
        Syscall::MessageHasByName => message::has_by_name(ctx, caller),

        Syscall::IoAcquire => io::acquire(ctx, caller),
        Syscall::IoRelease => io::release(ctx, caller),
        Syscall::IoCheck => io::check(ctx, caller),
        Syscall::IoRaise => io::raise(ctx, caller),

        Syscall::InterruptAcquire => interrupt::acquire(ctx, caller),
        Syscall::InterruptRelease => interrupt::release(ctx, caller),

        Syscall::RpcBind => rpc::bind(ctx, caller),
        Syscall::RpcUnbind => rpc::unbind(caller),
        Syscall::RpcRaise => rpc::raise(ctx, caller),
        Syscall::RpcReturn => rpc::rpc_return(ctx, caller),
        Syscall::RpcGetData => rpc::get_data(ctx, caller),
        Syscall::RpcGetDataSize => rpc::get_data_size(ctx, caller),

        Syscall::DummyPutc => debug::putc(ctx),
        Syscall::DummyPuts => debug::puts(ctx, caller),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::error::errno;

    #[test]
    fn numbers_decode_into_their_ranges() {
        assert_eq!(Syscall::try_from(1), Ok(Syscall::ProcessCreate));
        assert_eq!(Syscall::try_from(4), Ok(Syscall::ProcessFork));
        assert_eq!(Syscall::try_from(13), Ok(Syscall::ThreadId));
        assert_eq!(Syscall::try_from(25), Ok(Syscall::MemorySharedDetach));
        assert_eq!(Syscall::try_from(39), Ok(Syscall::MessageHasByName));
        assert_eq!(Syscall::try_from(44), Ok(Syscall::IoRaise));
        assert_eq!(Syscall::try_from(52), Ok(Syscall::InterruptRelease));
        assert_eq!(Syscall::try_from(102), Ok(Syscall::DummyPuts));
        assert!(Syscall::try_from(0).is_err());
        assert!(Syscall::try_from(6).is_err());
        assert!(Syscall::try_from(53).is_err());
        assert!(Syscall::try_from(103).is_err());
    }

    #[test]
    fn populate_writes_into_r0() {
        let mut ctx = RegisterContext::default();
        populate_success(&mut ctx, 42);
        assert_eq!(ctx.return_value(), 42);
        populate_error(&mut ctx, KernelError::OutOfMemory);
        assert_eq!(ctx.return_value() as i32, -errno::ENOMEM);
    }
}
