//! RPC plane: handler injection, backup restore, interrupt forwarding

#![cfg(not(target_os = "none"))]

mod common;

use carmine_kernel::config::RPC_MAX_DEPTH;
use carmine_kernel::error::KernelError;
use carmine_kernel::ipc::{message, rpc};
use carmine_kernel::irq::{self, IrqNumber};
use carmine_kernel::mm::VirtualAddress;
use carmine_kernel::process::{table, ProcessId, TaskState, ThreadId};

fn spawn(name: &str) -> (ProcessId, ThreadId) {
    let image = common::sample_elf(0x8000, 0x8000, &[0x00; 8]);
    let pid = carmine_kernel::boot::spawn(&image, name, 0, ProcessId(0))
        .expect("spawning from a well-formed image succeeds");
    let tid = table::with_process(pid, |p| *p.threads.keys().next().expect("thread"))
        .expect("process exists");
    (pid, tid)
}

#[test]
fn raise_injects_the_handler_and_return_restores() {
    let _env = common::env();
    let (client, ctid) = spawn("rpc-caller");
    let (server, stid) = spawn("rpc-servant");

    rpc::bind(server, VirtualAddress::new(0x8800)).expect("binding succeeds");
    let before = table::with_process(server, |p| p.threads[&stid].context)
        .expect("server exists");

    let id = rpc::raise(client, server, 0x77, vec![1, 2, 3]).expect("raise succeeds");

    table::with_process(server, |p| {
        let thread = &p.threads[&stid];
        assert_eq!(thread.context.pc, 0x8800, "handler entry was injected");
        assert_eq!(thread.context.gpr[0], 0x77, "r0 carries the type tag");
        assert_eq!(thread.context.gpr[1], client.0, "r1 carries the origin");
        assert_eq!(thread.context.gpr[2], id.0, "r2 carries the data id");
        assert_eq!(thread.context.gpr[3], 3, "r3 carries the payload length");
        assert_eq!(thread.state, TaskState::Ready);
    })
    .expect("server exists");

    assert_eq!(rpc::data_size(server, id.0).expect("payload exists"), 3);
    assert_eq!(
        rpc::take_data(server, id.0).expect("payload fetches"),
        vec![1, 2, 3]
    );
    assert!(
        rpc::take_data(server, id.0).is_err(),
        "payloads are single-use"
    );

    rpc::rpc_return(server, stid, 0x78, vec![9]).expect("return succeeds");
    table::with_process(server, |p| {
        let thread = &p.threads[&stid];
        assert_eq!(thread.context, before, "the pinned context came back");
        assert!(thread.context_pinned, "the restore wins over the trap frame");
    })
    .expect("server exists");

    let response = message::wait_for_response(client, ctid, id, None)
        .expect("the return answered the raise");
    assert_eq!(response.tag, 0x78);
    assert_eq!(response.body, vec![9]);
    assert_eq!(response.responds_to, Some(id));
}

#[test]
fn raise_without_a_handler_is_rejected() {
    let _env = common::env();
    let (client, _) = spawn("rpc-hopeful");
    let (server, _) = spawn("rpc-deaf");

    let result = rpc::raise(client, server, 1, vec![]);
    assert!(matches!(
        result.unwrap_err(),
        KernelError::NotPermitted { .. }
    ));
}

#[test]
fn nesting_is_bounded() {
    let _env = common::env();
    let (client, _) = spawn("rpc-flooder");
    let (server, _) = spawn("rpc-flooded");
    rpc::bind(server, VirtualAddress::new(0x8800)).expect("binding succeeds");

    for _ in 0..RPC_MAX_DEPTH {
        rpc::raise(client, server, 2, vec![]).expect("raise below the depth cap");
    }
    let over = rpc::raise(client, server, 2, vec![]);
    assert!(
        matches!(over.unwrap_err(), KernelError::Again { .. }),
        "the cap reports a transient failure"
    );
}

#[test]
fn interrupts_are_forwarded_as_rpc_raises() {
    let _env = common::env();
    let (driver, dtid) = spawn("uart-driver");
    rpc::bind(driver, VirtualAddress::new(0x9000)).expect("binding succeeds");

    irq::acquire(IrqNumber::new(57), driver).expect("vector is free");
    // Exclusive ownership per vector.
    let (rival, _) = spawn("rival-driver");
    rpc::bind(rival, VirtualAddress::new(0x9000)).expect("binding succeeds");
    assert!(irq::acquire(IrqNumber::new(57), rival).is_err());
    assert!(irq::acquire(IrqNumber::new(9999), driver).is_err());

    irq::dispatch(57);
    table::with_process(driver, |p| {
        let thread = &p.threads[&dtid];
        assert_eq!(thread.context.pc, 0x9000, "the vector raised the handler");
        assert_eq!(
            thread.context.gpr[0],
            rpc::INTERRUPT_TAG_BASE + 57,
            "interrupt raises carry the vector in the tag"
        );
        assert_eq!(thread.context.gpr[1], 0, "the kernel is the origin");
    })
    .expect("driver exists");

    irq::release(IrqNumber::new(57), driver).expect("owner may release");
}
