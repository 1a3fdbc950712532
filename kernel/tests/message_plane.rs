//! Message plane: FIFO delivery, response correlation, broadcast,
//! blocking receive

#![cfg(not(target_os = "none"))]

mod common;

use carmine_kernel::error::KernelError;
use carmine_kernel::ipc::message;
use carmine_kernel::process::{table, ProcessId, TaskState, ThreadId, WaitReason};

fn spawn(name: &str) -> (ProcessId, ThreadId) {
    let image = common::sample_elf(0x8000, 0x8000, &[0x00; 8]);
    let pid = carmine_kernel::boot::spawn(&image, name, 0, ProcessId(0))
        .expect("spawning from a well-formed image succeeds");
    let tid = table::with_process(pid, |p| *p.threads.keys().next().expect("thread"))
        .expect("process exists");
    (pid, tid)
}

#[test]
fn delivery_is_fifo_per_receiver() {
    let _env = common::env();
    let (sender, _) = spawn("fifo-sender");
    let (receiver, rtid) = spawn("fifo-receiver");

    let first = message::send_by_pid(sender, receiver, 7, vec![1], None).expect("send");
    let second = message::send_by_pid(sender, receiver, 7, vec![2], None).expect("send");
    assert!(second > first, "ids are monotonic");

    let got_first = message::receive(receiver, rtid, None).expect("first receive");
    let got_second = message::receive(receiver, rtid, None).expect("second receive");
    assert_eq!(got_first.id, first, "send order is delivery order");
    assert_eq!(got_second.id, second);
    assert_eq!(got_first.body, vec![1]);
    assert_eq!(got_first.sender, sender);
}

#[test]
fn responses_correlate_exactly() {
    let _env = common::env();
    let (client, ctid) = spawn("rpc-client");
    let (server, stid) = spawn("rpc-server");

    let request = message::send_by_pid(client, server, 40, vec![0xAB], None).expect("request");
    let served = message::receive(server, stid, Some(40)).expect("server receives");
    assert_eq!(served.id, request);

    // An unrelated message must not satisfy the correlation.
    message::send_by_pid(server, client, 41, vec![0x00], None).expect("noise");
    let reply = message::send_by_pid(server, client, 42, vec![0xCD], Some(request))
        .expect("reply");

    let got = message::wait_for_response(client, ctid, request, None)
        .expect("response is already queued");
    assert_eq!(got.id, reply);
    assert_eq!(got.responds_to, Some(request));
    assert_eq!(got.body, vec![0xCD]);

    // The noise message is still there for a plain receive.
    let noise = message::receive(client, ctid, None).expect("noise remains");
    assert_eq!(noise.tag, 41);
}

#[test]
fn blocked_receivers_park_and_wake() {
    let _env = common::env();
    let (sender, _) = spawn("wake-sender");
    let (receiver, rtid) = spawn("wake-receiver");

    // Nothing queued: the thread parks and the call reports WouldBlock
    // so the dispatcher can replay it.
    let blocked = message::receive(receiver, rtid, Some(9));
    assert_eq!(blocked.unwrap_err(), KernelError::WouldBlock);
    table::with_process(receiver, |p| {
        let thread = p.threads.get(&rtid).expect("thread");
        assert_eq!(thread.state, TaskState::HaltSwitch);
        assert_eq!(thread.wait, Some(WaitReason::Receive { filter: Some(9) }));
    })
    .expect("receiver exists");

    // A non-matching tag leaves the thread parked.
    message::send_by_pid(sender, receiver, 8, vec![], None).expect("send");
    table::with_process(receiver, |p| {
        assert_eq!(
            p.threads.get(&rtid).expect("thread").state,
            TaskState::HaltSwitch
        );
    })
    .expect("receiver exists");

    // The matching tag wakes it.
    message::send_by_pid(sender, receiver, 9, vec![0x01], None).expect("send");
    table::with_process(receiver, |p| {
        assert_eq!(p.threads.get(&rtid).expect("thread").state, TaskState::Ready);
    })
    .expect("receiver exists");

    // The replayed call now succeeds.
    let got = message::receive(receiver, rtid, Some(9)).expect("replay succeeds");
    assert_eq!(got.tag, 9);
}

#[test]
fn broadcast_reaches_every_process_with_the_name() {
    let _env = common::env();
    let (sender, _) = spawn("broadcaster");
    let (first, ftid) = spawn("pool-worker");
    let (second, stid) = spawn("pool-worker");

    assert!(message::has_receiver_by_name("pool-worker"));
    assert!(!message::has_receiver_by_name("nobody-home"));

    message::send_by_name(sender, "pool-worker", 5, vec![0xEE]).expect("broadcast");
    let at_first = message::receive(first, ftid, None).expect("first copy");
    let at_second = message::receive(second, stid, None).expect("second copy");
    assert_eq!(at_first.tag, 5);
    assert_eq!(at_second.tag, 5);
    assert_eq!(at_first.body, at_second.body);

    let missing = message::send_by_name(sender, "nobody-home", 5, vec![]);
    assert!(missing.is_err(), "no receiver resolves to an error");
}

#[test]
fn dead_receivers_drop_messages_silently() {
    let _env = common::env();
    let (sender, _) = spawn("necro-sender");
    let (receiver, _) = spawn("doomed-receiver");

    message::send_by_pid(sender, receiver, 1, vec![], None).expect("send to live process");
    carmine_kernel::process::exit::kill_process(receiver);

    // A dead process takes no further messages.
    let late = message::send_by_pid(sender, receiver, 2, vec![], None);
    assert!(late.is_err());

    carmine_kernel::process::exit::cleanup();
    assert!(
        table::with_process(receiver, |_| ()).is_none(),
        "cleanup drained the queue along with the record"
    );
}
