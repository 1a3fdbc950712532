//! Virtual-memory engine
//!
//! One architecture-neutral façade over two descriptor-format drivers: the
//! short 32-bit format and the long (LPAE) 64-bit format. The format is
//! probed once at boot and frozen; after that every operation goes through
//! a `&'static dyn Driver` with no per-call format branching.
//!
//! Page-table frames always come from the linearly mapped low region so
//! they can be edited directly; data pages are reached through the
//! temporary window instead.

pub mod descriptor;
pub mod long;
pub mod short;

use spin::{Mutex, Once};

use super::{PhysicalAddress, VirtualAddress, PAGE_SIZE};
use crate::config::{KERNEL_OFFSET, TEMP_WINDOW_SIZE, TEMP_WINDOW_START};
use crate::error::{KernelError, KernelResult};
use descriptor::Driver;

/// Kind of an address-space context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    /// Spans `KERNEL_OFFSET..` and is shared by every process
    Kernel,
    /// Spans the low half; one per process
    User,
}

/// Cacheability / ordering class of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// MMIO: no caching, no speculation
    Device,
    /// As `Device` but additionally ordered against other such accesses
    DeviceStrong,
    /// Write-back write-allocate cacheable RAM
    Normal,
    /// Uncached RAM for DMA-visible buffers
    NormalNoCache,
}

/// Execute-permission class of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Executable iff the virtual address is in user space
    Auto,
    /// Force executable for the region's privilege level
    Executable,
    /// Never executable
    NonExecutable,
}

bitflags::bitflags! {
    /// Access permission set of a mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// Lifecycle of an address-space context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Created,
    Populated,
    Destroyed,
}

/// An address-space context: the root translation table plus metadata.
/// The unit of memory isolation.
#[derive(Debug)]
pub struct AddressSpace {
    root: PhysicalAddress,
    kind: ContextType,
    state: ContextState,
}

impl AddressSpace {
    pub(crate) fn new(root: PhysicalAddress, kind: ContextType) -> Self {
        Self {
            root,
            kind,
            state: ContextState::Created,
        }
    }

    /// Physical address of the root translation table; the architecture
    /// handle of this context.
    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    pub fn kind(&self) -> ContextType {
        self.kind
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == ContextState::Destroyed
    }
}

static DRIVER: Once<&'static dyn Driver> = Once::new();

fn driver() -> &'static dyn Driver {
    *DRIVER
        .get()
        .expect("virtual memory engine used before init")
}

/// The shared kernel context
static KERNEL_CONTEXT: Mutex<Option<AddressSpace>> = Mutex::new(None);

/// Root table of the currently installed context
static ACTIVE_ROOT: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

fn affects_active(ctx: &AddressSpace) -> bool {
    // Kernel mappings are visible through every installed context.
    ctx.kind == ContextType::Kernel
        || ctx.root.as_u64() == ACTIVE_ROOT.load(core::sync::atomic::Ordering::Relaxed)
}

fn flush_if_active(ctx: &AddressSpace, virt: VirtualAddress) {
    if affects_active(ctx) {
        crate::arch::tlb_flush_address(virt.as_usize());
    }
}

/// Pick the descriptor format, build the kernel context, and install it.
pub fn init() {
    let selected: &'static dyn Driver =
        if crate::arch::lpae_supported() && crate::arch::physical_bus_bits() >= 36 {
            &long::LONG_DRIVER
        } else {
            &short::SHORT_DRIVER
        };
    DRIVER.call_once(|| selected);

    let mut kernel = selected
        .create_context(ContextType::Kernel)
        .expect("kernel context allocation cannot fail this early");

    // Linear map of low RAM: this is where page-table frames live.
    for page in (0..crate::config::DIRECT_MAP_SIZE).step_by(PAGE_SIZE) {
        map(
            &mut kernel,
            VirtualAddress::new(KERNEL_OFFSET + page),
            PhysicalAddress::new(page as u64),
            MemoryType::Normal,
            PageType::Executable,
            Protection::READ | Protection::WRITE | Protection::EXECUTE,
        )
        .expect("direct map construction cannot collide");
    }

    // Peripheral MMIO block.
    for page in (0..crate::config::PERIPHERAL_SIZE).step_by(PAGE_SIZE) {
        map(
            &mut kernel,
            VirtualAddress::new(crate::config::PERIPHERAL_VIRT_BASE + page),
            PhysicalAddress::new(crate::config::PERIPHERAL_PHYS_BASE + page as u64),
            MemoryType::Device,
            PageType::NonExecutable,
            Protection::READ | Protection::WRITE,
        )
        .expect("peripheral map construction cannot collide");
    }

    selected.install_kernel(&kernel);
    set_context(&kernel);
    *KERNEL_CONTEXT.lock() = Some(kernel);
    log::info!(
        "virtual memory online, {} descriptor format",
        if crate::arch::lpae_supported() {
            "long"
        } else {
            "short"
        }
    );
}

/// Run `f` with the kernel context borrowed.
pub fn with_kernel_context<R>(f: impl FnOnce(&mut AddressSpace) -> R) -> R {
    let mut guard = KERNEL_CONTEXT.lock();
    let ctx = guard.as_mut().expect("kernel context not yet created");
    f(ctx)
}

/// Create a fresh context. For `User`, the kernel upper half is reached
/// through the shared kernel root; nothing needs copying.
pub fn create_context(kind: ContextType) -> KernelResult<AddressSpace> {
    driver().create_context(kind)
}

/// Map `virt` to `phys` in `ctx`. Fails with `AlreadyExists` when the page
/// is mapped and with `OutOfMemory` when an intermediate table cannot be
/// allocated.
pub fn map(
    ctx: &mut AddressSpace,
    virt: VirtualAddress,
    phys: PhysicalAddress,
    memory: MemoryType,
    page: PageType,
    protection: Protection,
) -> KernelResult<()> {
    assert!(virt.is_page_aligned(), "map: misaligned virtual address");
    assert!(phys.is_page_aligned(), "map: misaligned physical address");
    assert!(!ctx.is_destroyed(), "map into destroyed context");

    crate::arch::without_interrupts(|| {
        driver().map(ctx, virt, phys, memory, page, protection)?;
        if ctx.state == ContextState::Created {
            ctx.state = ContextState::Populated;
        }
        flush_if_active(ctx, virt);
        Ok(())
    })
}

/// Map `virt` to a freshly allocated frame.
pub fn map_random(
    ctx: &mut AddressSpace,
    virt: VirtualAddress,
    memory: MemoryType,
    page: PageType,
    protection: Protection,
) -> KernelResult<()> {
    let frame = super::frame_allocator::allocate_page()?;
    match map(ctx, virt, frame, memory, page, protection) {
        Ok(()) => Ok(()),
        Err(err) => {
            super::frame_allocator::release_page(frame);
            Err(err)
        }
    }
}

/// Map a whole range to fresh frames; either every page succeeds or the
/// range is rolled back untouched.
pub fn map_range_random(
    ctx: &mut AddressSpace,
    virt: VirtualAddress,
    length: usize,
    memory: MemoryType,
    page: PageType,
    protection: Protection,
) -> KernelResult<()> {
    assert!(virt.is_page_aligned(), "map_range: misaligned start");
    let pages = super::page_round_up(length) / PAGE_SIZE;
    for index in 0..pages {
        let va = virt.offset(index * PAGE_SIZE);
        if let Err(err) = map_random(ctx, va, memory, page, protection) {
            for undo in 0..index {
                unmap(ctx, virt.offset(undo * PAGE_SIZE), true);
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Remove the mapping at `virt`. Unmapping a never-mapped page is a
/// success no-op. With `release_physical` the frame goes back to the
/// allocator (unless the check bitmap protects it).
pub fn unmap(ctx: &mut AddressSpace, virt: VirtualAddress, release_physical: bool) {
    assert!(virt.is_page_aligned(), "unmap: misaligned virtual address");
    crate::arch::without_interrupts(|| {
        driver().unmap(ctx, virt, release_physical);
        flush_if_active(ctx, virt);
    });
}

/// Unmap every mapped page of the range; holes are skipped.
pub fn unmap_range(
    ctx: &mut AddressSpace,
    virt: VirtualAddress,
    length: usize,
    release_physical: bool,
) {
    let pages = super::page_round_up(length) / PAGE_SIZE;
    for index in 0..pages {
        unmap(ctx, virt.offset(index * PAGE_SIZE), release_physical);
    }
}

/// Pure query: is `virt` mapped in `ctx`?
pub fn is_mapped(ctx: &AddressSpace, virt: VirtualAddress) -> bool {
    driver().resolve(ctx, virt.page_align_down()).is_some()
}

/// True iff every page of the range is mapped.
pub fn is_mapped_range(ctx: &AddressSpace, virt: VirtualAddress, length: usize) -> bool {
    let pages = super::page_round_up(length) / PAGE_SIZE;
    (0..pages).all(|index| is_mapped(ctx, virt.page_align_down().offset(index * PAGE_SIZE)))
}

/// Translate `virt` in `ctx` to its physical page address.
pub fn resolve(ctx: &AddressSpace, virt: VirtualAddress) -> Option<PhysicalAddress> {
    driver().resolve(ctx, virt.page_align_down())
}

/// Find `length` bytes of unmapped user-range address space in `ctx`,
/// starting at `hint` when feasible. Returns `None` when nothing fits.
pub fn find_free_range(
    ctx: &AddressSpace,
    length: usize,
    hint: Option<VirtualAddress>,
) -> Option<VirtualAddress> {
    let pages = super::page_round_up(length) / PAGE_SIZE;
    if pages == 0 {
        return None;
    }
    let start = hint
        .map(|address| address.page_align_down().as_usize())
        .filter(|&address| address != 0 && address < KERNEL_OFFSET)
        .unwrap_or(PAGE_SIZE);

    // Two passes: from the hint upwards, then from the bottom.
    for base in [start, PAGE_SIZE] {
        let mut candidate = base;
        'search: while candidate + pages * PAGE_SIZE <= KERNEL_OFFSET {
            for index in 0..pages {
                let va = VirtualAddress::new(candidate + index * PAGE_SIZE);
                if is_mapped(ctx, va) {
                    candidate = va.as_usize() + PAGE_SIZE;
                    continue 'search;
                }
            }
            return Some(VirtualAddress::new(candidate));
        }
    }
    None
}

/// Install `ctx` as the active address space and flush the TLB.
pub fn set_context(ctx: &AddressSpace) {
    assert!(!ctx.is_destroyed(), "installing a destroyed context");
    crate::arch::without_interrupts(|| {
        driver().set_context(ctx);
        ACTIVE_ROOT.store(
            ctx.root.as_u64(),
            core::sync::atomic::Ordering::Relaxed,
        );
        reset_temporary();
        crate::arch::tlb_flush_all();
    });
}

/// Duplicate `src` into a fresh context. Reads behave identically; writes
/// in either context stay invisible to the other (eager frame copy).
pub fn fork_context(src: &AddressSpace) -> KernelResult<AddressSpace> {
    let forked = crate::arch::without_interrupts(|| driver().fork_context(src))?;
    crate::arch::tlb_flush_all();
    Ok(forked)
}

/// Tear a context down. Data frames are released when `release_frames`;
/// page-table frames always are.
pub fn destroy_context(ctx: &mut AddressSpace, release_frames: bool) {
    if ctx.is_destroyed() {
        return;
    }
    crate::arch::without_interrupts(|| {
        driver().destroy_context(ctx, release_frames);
    });
    ctx.state = ContextState::Destroyed;
}

// ---------------------------------------------------------------------------
// Temporary window
// ---------------------------------------------------------------------------

struct TempWindow {
    next: usize,
    outstanding: usize,
}

static TEMP_WINDOW: Mutex<TempWindow> = Mutex::new(TempWindow {
    next: TEMP_WINDOW_START,
    outstanding: 0,
});

/// Map `length` bytes starting at the physical page of `phys` into the
/// kernel-side temporary window. Valid until the matching
/// [`unmap_temporary`]; the window resets wholesale at context switch.
pub fn map_temporary(phys: PhysicalAddress, length: usize) -> KernelResult<VirtualAddress> {
    let aligned = phys.page_align_down();
    let offset = (phys.as_u64() - aligned.as_u64()) as usize;
    let pages = super::page_round_up(length + offset) / PAGE_SIZE;

    let base = {
        let mut window = TEMP_WINDOW.lock();
        if window.next + pages * PAGE_SIZE > TEMP_WINDOW_START + TEMP_WINDOW_SIZE {
            return Err(KernelError::OutOfMemory);
        }
        let base = window.next;
        window.next += pages * PAGE_SIZE;
        window.outstanding += 1;
        base
    };

    with_kernel_context(|kernel| {
        for index in 0..pages {
            map(
                kernel,
                VirtualAddress::new(base + index * PAGE_SIZE),
                aligned.offset((index * PAGE_SIZE) as u64),
                MemoryType::Normal,
                PageType::NonExecutable,
                Protection::READ | Protection::WRITE,
            )?;
        }
        Ok(())
    })?;

    Ok(VirtualAddress::new(base + offset))
}

/// Release a temporary mapping established by [`map_temporary`].
pub fn unmap_temporary(virt: VirtualAddress, length: usize) {
    let aligned = virt.page_align_down();
    let offset = virt.as_usize() - aligned.as_usize();
    let pages = super::page_round_up(length + offset) / PAGE_SIZE;

    with_kernel_context(|kernel| {
        for index in 0..pages {
            unmap(kernel, aligned.offset(index * PAGE_SIZE), false);
        }
    });

    let mut window = TEMP_WINDOW.lock();
    window.outstanding = window.outstanding.saturating_sub(1);
    if window.outstanding == 0 {
        window.next = TEMP_WINDOW_START;
    }
}

fn reset_temporary() {
    let mut window = TEMP_WINDOW.lock();
    window.next = TEMP_WINDOW_START;
    window.outstanding = 0;
}

/// Faulting address of the pending data abort.
pub fn fault_address_data() -> usize {
    crate::arch::fault_address_data()
}

/// Faulting address of the pending prefetch abort.
pub fn fault_address_prefetch() -> usize {
    crate::arch::fault_address_prefetch()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate alloc;

    use alloc::vec;

    use super::*;
    use crate::mm::frame_allocator::{FrameBitmap, FRAME_ALLOCATOR};

    /// The engine's globals are process-wide; tests that touch them run
    /// one at a time behind this lock, and the engine is brought up once.
    static ENGINE: spin::Mutex<()> = spin::Mutex::new(());
    static SETUP: spin::Once<()> = spin::Once::new();

    fn engine() -> spin::MutexGuard<'static, ()> {
        let guard = ENGINE.lock();
        SETUP.call_once(|| {
            // 4 GiB of fake frames; storage only materializes on touch.
            let words = 32768;
            let bitmap = alloc::boxed::Box::leak(vec![0u32; words].into_boxed_slice());
            let check = alloc::boxed::Box::leak(vec![0u32; words].into_boxed_slice());
            *FRAME_ALLOCATOR.lock() = Some(FrameBitmap::with_storage(bitmap, check));
            init();
        });
        guard
    }

    fn free_pages() -> usize {
        crate::mm::frame_allocator::with_allocator(|a| a.free_pages())
    }

    fn read_byte(ctx: &AddressSpace, virt: VirtualAddress) -> u8 {
        let phys = resolve(ctx, virt.page_align_down()).expect("address must be mapped");
        let window = descriptor::PhysWindow::open(phys, PAGE_SIZE).expect("window opens");
        // SAFETY: the window covers one mapped page.
        unsafe { *window.ptr().add(virt.as_usize() % PAGE_SIZE) }
    }

    fn write_byte(ctx: &AddressSpace, virt: VirtualAddress, value: u8) {
        let phys = resolve(ctx, virt.page_align_down()).expect("address must be mapped");
        let window = descriptor::PhysWindow::open(phys, PAGE_SIZE).expect("window opens");
        // SAFETY: the window covers one mapped page.
        unsafe {
            *window.ptr().add(virt.as_usize() % PAGE_SIZE) = value;
        }
    }

    #[test]
    fn mapping_round_trip() {
        let _guard = engine();
        let mut ctx = create_context(ContextType::User).expect("context allocates");
        let virt = VirtualAddress::new(0x40_0000);
        let phys = crate::mm::frame_allocator::allocate_page().expect("frame allocates");

        map(
            &mut ctx,
            virt,
            phys,
            MemoryType::Normal,
            PageType::Auto,
            Protection::READ | Protection::WRITE,
        )
        .expect("fresh mapping succeeds");
        assert!(is_mapped(&ctx, virt));
        assert_eq!(resolve(&ctx, virt), Some(phys));

        // Mapping the same page again must collide.
        let collision = map(
            &mut ctx,
            virt,
            phys,
            MemoryType::Normal,
            PageType::Auto,
            Protection::READ,
        );
        assert!(collision.is_err(), "double map must report AlreadyExists");

        unmap(&mut ctx, virt, true);
        assert!(!is_mapped(&ctx, virt));
        destroy_context(&mut ctx, true);
    }

    #[test]
    fn double_unmap_is_idempotent_and_frees_once() {
        let _guard = engine();
        let mut ctx = create_context(ContextType::User).expect("context allocates");
        let virt = VirtualAddress::new(0x80_0000);

        map_random(
            &mut ctx,
            virt,
            MemoryType::Normal,
            PageType::Auto,
            Protection::READ | Protection::WRITE,
        )
        .expect("random mapping succeeds");

        let before_first = free_pages();
        unmap(&mut ctx, virt, true);
        let after_first = free_pages();
        assert_eq!(after_first, before_first + 1, "release returns the frame");

        // The second release must be a no-op, not a double free.
        unmap(&mut ctx, virt, true);
        assert_eq!(free_pages(), after_first);
        destroy_context(&mut ctx, true);
    }

    #[test]
    fn fork_isolates_writes() {
        let _guard = engine();
        let mut src = create_context(ContextType::User).expect("context allocates");
        let virt = VirtualAddress::new(0x120_0000);

        map_random(
            &mut src,
            virt,
            MemoryType::Normal,
            PageType::Auto,
            Protection::READ | Protection::WRITE,
        )
        .expect("random mapping succeeds");
        write_byte(&src, virt, 0xAA);

        let mut dst = fork_context(&src).expect("fork succeeds");
        assert!(is_mapped(&dst, virt), "fork duplicates every mapping");
        assert_ne!(
            resolve(&src, virt),
            resolve(&dst, virt),
            "eager copy backs the child with a distinct frame"
        );
        assert_eq!(read_byte(&dst, virt), 0xAA, "contents were copied");

        write_byte(&dst, virt, 0xBB);
        assert_eq!(read_byte(&src, virt), 0xAA, "parent is unaffected");
        assert_eq!(read_byte(&dst, virt), 0xBB);

        destroy_context(&mut dst, true);
        assert_eq!(read_byte(&src, virt), 0xAA, "destroying the child leaves the parent");
        destroy_context(&mut src, true);
    }

    #[test]
    fn unmap_with_release_never_double_returns() {
        let _guard = engine();
        let mut ctx = create_context(ContextType::User).expect("context allocates");
        let virt = VirtualAddress::new(0x200_0000);

        map_random(
            &mut ctx,
            virt,
            MemoryType::Normal,
            PageType::Auto,
            Protection::READ | Protection::WRITE,
        )
        .expect("random mapping succeeds");
        assert!(resolve(&ctx, virt).is_some());

        unmap(&mut ctx, virt, true);
        let baseline = free_pages();

        map_random(
            &mut ctx,
            virt,
            MemoryType::Normal,
            PageType::Auto,
            Protection::READ | Protection::WRITE,
        )
        .expect("remapping the same address succeeds");
        assert!(resolve(&ctx, virt).is_some());
        // The allocator may reuse the released frame or pick another;
        // either way exactly one frame leaves the pool.
        assert_eq!(free_pages(), baseline - 1);

        unmap(&mut ctx, virt, true);
        assert_eq!(free_pages(), baseline);
        destroy_context(&mut ctx, true);
    }

    #[test]
    fn find_free_range_skips_mapped_pages() {
        let _guard = engine();
        let mut ctx = create_context(ContextType::User).expect("context allocates");
        let hint = VirtualAddress::new(0x300_0000);

        map_random(
            &mut ctx,
            hint,
            MemoryType::Normal,
            PageType::Auto,
            Protection::READ | Protection::WRITE,
        )
        .expect("random mapping succeeds");

        let found = find_free_range(&ctx, 2 * PAGE_SIZE, Some(hint))
            .expect("plenty of space after the mapped page");
        assert!(found.as_usize() > hint.as_usize());
        assert!(!is_mapped(&ctx, found));
        assert!(!is_mapped(&ctx, found.offset(PAGE_SIZE)));
        destroy_context(&mut ctx, true);
    }

    #[test]
    fn destroy_context_returns_all_frames() {
        let _guard = engine();
        let baseline = free_pages();
        let mut ctx = create_context(ContextType::User).expect("context allocates");
        for index in 0..8 {
            map_random(
                &mut ctx,
                VirtualAddress::new(0x500_0000 + index * PAGE_SIZE),
                MemoryType::Normal,
                PageType::Auto,
                Protection::READ | Protection::WRITE,
            )
            .expect("random mapping succeeds");
        }
        assert!(free_pages() < baseline);
        destroy_context(&mut ctx, true);
        assert_eq!(
            free_pages(),
            baseline,
            "data frames, table frames, and the root all return"
        );
        assert!(ctx.is_destroyed());
    }
}
