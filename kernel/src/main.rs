//! Kernel binary: boot shim and bring-up sequence
//!
//! `_start` runs at the physical load address with the MMU off. It
//! builds a section-granular boot table (identity plus the kernel-half
//! alias of low RAM and the peripheral block), turns the MMU on, and
//! jumps to `kernel_main` at its linked (high-half) address. The real
//! page tables replace the boot table during `mm::init`.

#![no_std]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
use core::arch::global_asm;

#[cfg(all(target_arch = "arm", target_os = "none"))]
use carmine_kernel::config;
#[cfg(not(target_os = "none"))]
use carmine_kernel::process;
use carmine_kernel::{boot, logger, mm, platform, sched};

#[cfg(all(target_arch = "arm", target_os = "none"))]
global_asm!(
    r#"
    .section .text.boot
    .global _start
_start:
    cpsid if

    /* Keep the loader block {{zero, machine, tags}}. */
    mov   r8, r0
    mov   r9, r1
    mov   r10, r2

    /* Physical address of the boot table (symbols link high). */
    ldr   r4, =__boot_page_table
    ldr   r5, ={kernel_offset}
    sub   r4, r4, r5

    /* Zero all 4096 section entries. */
    mov   r0, r4
    mov   r1, #0
    mov   r2, #4096
1:  str   r1, [r0], #4
    subs  r2, r2, #1
    bne   1b

    /* Low RAM: identity plus the kernel-half alias, 64 sections of
       normal write-back memory. */
    mov   r2, #0
    ldr   r3, =0x140E
2:  lsl   r0, r2, #20
    orr   r1, r0, r3
    str   r1, [r4, r2, lsl #2]
    add   r6, r2, #2048
    str   r1, [r4, r6, lsl #2]
    add   r2, r2, #1
    cmp   r2, #64
    blt   2b

    /* Peripheral block: identity and the kernel-half window, device
       attributes. */
    mov   r2, #0
    ldr   r3, =0x0406
3:  ldr   r0, ={periph_sect}
    add   r0, r0, r2
    lsl   r1, r0, #20
    orr   r1, r1, r3
    str   r1, [r4, r0, lsl #2]
    ldr   r6, ={periph_virt_sect}
    add   r6, r6, r2
    str   r1, [r4, r6, lsl #2]
    add   r2, r2, #1
    cmp   r2, #16
    blt   3b

    /* Install the table and switch on MMU, caches, branch prediction. */
    mcr   p15, 0, r4, c2, c0, 0
    mcr   p15, 0, r4, c2, c0, 1
    mov   r0, #0
    mcr   p15, 0, r0, c2, c0, 2
    mov   r0, #1
    mcr   p15, 0, r0, c3, c0, 0
    mcr   p15, 0, r0, c8, c7, 0
    dsb
    isb
    mrc   p15, 0, r0, c1, c0, 0
    ldr   r1, =0x1805
    orr   r0, r0, r1
    mcr   p15, 0, r0, c1, c0, 0
    isb

    /* High-half stack, then the Rust entry with the loader block. */
    ldr   sp, =__boot_stack_top
    mov   r0, r8
    mov   r1, r9
    mov   r2, r10
    ldr   r3, =kernel_main
    bx    r3

    .section .bss.boot, "aw", %nobits
    .align 14
    .global __boot_page_table
__boot_page_table:
    .skip 16384
    .align 12
__boot_stack:
    .skip 16384
    .global __boot_stack_top
__boot_stack_top:
"#,
    kernel_offset = const config::KERNEL_OFFSET,
    periph_sect = const (config::PERIPHERAL_PHYS_BASE as usize >> 20),
    periph_virt_sect = const (config::PERIPHERAL_VIRT_BASE >> 20),
);

/// Rust-side bring-up, entered from the boot shim with the MMU on.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[no_mangle]
pub extern "C" fn kernel_main(zero: u32, machine: u32, tags: u32) -> ! {
    platform::uart::init();
    logger::init();
    carmine_kernel::println!(
        "carmine kernel v{} on machine {:#x}",
        env!("CARGO_PKG_VERSION"),
        machine
    );

    let params = boot::BootParams {
        zero,
        machine,
        tags,
    };
    // SAFETY: the loader block pointer was just handed over by firmware
    // and the identity mapping of low RAM is still in place.
    let info = match unsafe { boot::probe(params) } {
        Ok(info) => info,
        Err(err) => panic!("boot data unusable: {}", err),
    };
    if info.initrd.is_none() {
        panic!("no initrd; the first user process cannot exist");
    }
    if let Some(cmdline) = info.cmdline() {
        log::info!("cmdline: {}", cmdline);
    }

    carmine_kernel::arch::init();
    mm::init(&info);
    platform::init();

    match boot::load_init(&info) {
        Ok(pid) => log::info!("init is pid {}", pid),
        Err(err) => panic!("initrd extraction failed: {}", err),
    }

    // Idle until the first tick if nothing is ready yet, then never
    // come back.
    sched::start()
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    carmine_kernel::println!("[KERNEL PANIC] {}", info);
    carmine_kernel::arch::halt()
}

// Host stub so the workspace builds everywhere; the kernel only ever
// runs on the target.
#[cfg(not(target_os = "none"))]
fn main() {
    let _ = (
        boot::BootParams {
            zero: 0,
            machine: 0,
            tags: 0,
        },
        logger::init,
        mm::PAGE_SIZE,
        platform::mmio_base,
        process::ProcessId(0),
        sched::current,
    );
    std::eprintln!("carmine-kernel is a bare-metal image; build for the ARM target");
}

#[cfg(not(target_os = "none"))]
extern crate std;
