//! Exception vectors and entry stubs
//!
//! Every exception funnels through a stub that materializes a
//! [`RegisterContext`] on the SVC stack and hands a pointer to the Rust
//! handler. Handlers may rewrite the frame (syscall results, context
//! switch); the exit path restores whatever the frame contains.

use core::arch::global_asm;

use super::cp15;
use crate::arch::RegisterContext;
use crate::event::{self, EventKind, EventOrigin};

global_asm!(
    r#"
    .section .text.vectors
    .align 5
    .global _exception_vectors
_exception_vectors:
    ldr pc, =_stub_reset
    ldr pc, =_stub_undefined
    ldr pc, =_stub_svc
    ldr pc, =_stub_prefetch
    ldr pc, =_stub_data
    nop
    ldr pc, =_stub_irq
    ldr pc, =_stub_fiq

    /* Build a RegisterContext on the SVC stack: r0-r12, user sp/lr, pc,
       cpsr (ascending). srsdb already ran in the per-stub prologue. */
    .macro save_frame
    sub   sp, sp, #8
    push  {{r0-r12}}
    add   r0, sp, #52
    stmia r0, {{sp, lr}}^
    mov   r0, sp
    .endm

    .macro restore_frame
    add   r0, sp, #52
    ldmia r0, {{sp, lr}}^
    pop   {{r0-r12}}
    add   sp, sp, #8
    rfeia sp!
    .endm

_stub_reset:
    b _stub_reset

_stub_undefined:
    srsdb sp!, #0x13
    cps   #0x13
    save_frame
    bl    exception_undefined
    restore_frame

_stub_svc:
    srsdb sp!, #0x13
    save_frame
    bl    exception_syscall
    restore_frame

_stub_prefetch:
    sub   lr, lr, #4
    srsdb sp!, #0x13
    cps   #0x13
    save_frame
    bl    exception_prefetch_abort
    restore_frame

_stub_data:
    sub   lr, lr, #8
    srsdb sp!, #0x13
    cps   #0x13
    save_frame
    bl    exception_data_abort
    restore_frame

_stub_irq:
    sub   lr, lr, #4
    srsdb sp!, #0x13
    cps   #0x13
    save_frame
    bl    exception_irq
    restore_frame

_stub_fiq:
    b _stub_fiq

    /* Jump into a prepared frame; used once to start the first thread. */
    .global _enter_frame
_enter_frame:
    mov   sp, r0
    restore_frame
"#
);

extern "C" {
    static _exception_vectors: u8;
    fn _enter_frame(frame: *const RegisterContext) -> !;
}

/// Install the vector base address.
pub fn init() {
    // SAFETY: the vector table above is 32-byte aligned by the .align
    // directive and lives in the kernel image.
    let base = unsafe { &_exception_vectors as *const u8 as usize };
    cp15::set_vbar(base);
}

/// Enter the frame of the first scheduled thread. Never returns.
///
/// # Safety
///
/// `frame` must point to a fully initialized register context whose pc and
/// sp are valid in the currently installed address space.
pub unsafe fn enter_frame(frame: *const RegisterContext) -> ! {
    // SAFETY: delegated to the caller per the function contract.
    unsafe { _enter_frame(frame) }
}

fn origin_of(ctx: &RegisterContext) -> EventOrigin {
    if ctx.from_user_mode() {
        EventOrigin::User
    } else {
        EventOrigin::Kernel
    }
}

#[no_mangle]
extern "C" fn exception_syscall(ctx: *mut RegisterContext) {
    // SAFETY: the entry stub passes the frame it built on the SVC stack.
    let ctx = unsafe { &mut *ctx };
    crate::syscall::dispatch(ctx);
    event::drain(ctx, origin_of(ctx));
}

#[no_mangle]
extern "C" fn exception_irq(ctx: *mut RegisterContext) {
    // SAFETY: the entry stub passes the frame it built on the SVC stack.
    let ctx = unsafe { &mut *ctx };
    crate::platform::intc::handle_pending();
    event::drain(ctx, EventOrigin::Kernel);
}

#[no_mangle]
extern "C" fn exception_data_abort(ctx: *mut RegisterContext) {
    // SAFETY: the entry stub passes the frame it built on the SVC stack.
    let ctx = unsafe { &mut *ctx };
    let fault = cp15::dfar();
    if ctx.from_user_mode() {
        log::warn!(
            "data abort in user mode at {:#x}, pc {:#x}; killing process",
            fault,
            ctx.pc
        );
        crate::process::exit::kill_current();
        event::enqueue(EventKind::InterruptCleanup, EventOrigin::Kernel, 0);
        event::drain(ctx, EventOrigin::User);
    } else {
        panic!("data abort in kernel mode at {:#x}, pc {:#x}", fault, ctx.pc);
    }
}

#[no_mangle]
extern "C" fn exception_prefetch_abort(ctx: *mut RegisterContext) {
    // SAFETY: the entry stub passes the frame it built on the SVC stack.
    let ctx = unsafe { &mut *ctx };
    let fault = cp15::ifar();
    if ctx.from_user_mode() {
        log::warn!(
            "prefetch abort in user mode at {:#x}; killing process",
            fault
        );
        crate::process::exit::kill_current();
        event::enqueue(EventKind::InterruptCleanup, EventOrigin::Kernel, 0);
        event::drain(ctx, EventOrigin::User);
    } else {
        panic!("prefetch abort in kernel mode at {:#x}", fault);
    }
}

#[no_mangle]
extern "C" fn exception_undefined(ctx: *mut RegisterContext) {
    // SAFETY: the entry stub passes the frame it built on the SVC stack.
    let ctx = unsafe { &mut *ctx };
    if ctx.from_user_mode() {
        log::warn!("undefined instruction at {:#x}; killing process", ctx.pc);
        crate::process::exit::kill_current();
        event::enqueue(EventKind::InterruptCleanup, EventOrigin::Kernel, 0);
        event::drain(ctx, EventOrigin::User);
    } else {
        panic!("undefined instruction in kernel mode at {:#x}", ctx.pc);
    }
}
