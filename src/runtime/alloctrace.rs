//! Allocation tracer.
//!
//! `TracingAllocator` wraps another global allocator. While a tracer guard is
//! alive on a thread, every allocation made by that thread is charged to the
//! call site most recently entered by the call-graph layer. All bookkeeping
//! lives in const-initialized thread locals so the hook never allocates.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Call sites with an id at or above this bound are charged to slot 0.
pub const MAX_SITES: usize = 512;

static INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
    static PAUSED: Cell<bool> = const { Cell::new(false) };
    static CURRENT_SITE: Cell<usize> = const { Cell::new(0) };
    static SITE_BYTES: [Cell<u64>; MAX_SITES] = const { [const { Cell::new(0) }; MAX_SITES] };
    static SITE_COUNTS: [Cell<u64>; MAX_SITES] = const { [const { Cell::new(0) }; MAX_SITES] };
}

pub struct TracingAllocator<A = System> {
    inner: A,
}

impl<A> TracingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TracingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() {
            record(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let next = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !next.is_null() && new_size > layout.size() {
            record(new_size - layout.size());
        }
        next
    }
}

fn record(bytes: usize) {
    if !INSTALLED.load(Ordering::Relaxed) {
        INSTALLED.store(true, Ordering::Relaxed);
    }
    let traced = ACTIVE
        .try_with(|active| active.get() && !PAUSED.try_with(Cell::get).unwrap_or(true))
        .unwrap_or(false);
    if !traced {
        return;
    }
    let site = CURRENT_SITE.try_with(Cell::get).unwrap_or(0);
    let slot = if site < MAX_SITES { site } else { 0 };
    let _ = SITE_BYTES.try_with(|sites| {
        let cell = &sites[slot];
        cell.set(cell.get().saturating_add(bytes as u64));
    });
    let _ = SITE_COUNTS.try_with(|sites| {
        let cell = &sites[slot];
        cell.set(cell.get().saturating_add(1));
    });
}

/// Whether a `TracingAllocator` has served at least one allocation in this
/// process, i.e. whether it is the global allocator.
pub fn tracer_installed() -> bool {
    INSTALLED.load(Ordering::Relaxed)
}

/// Charge subsequent allocations on this thread to `site`.
pub fn set_current_site(site: usize) {
    let _ = CURRENT_SITE.try_with(|c| c.set(site));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteAllocation {
    pub site: usize,
    pub bytes: u64,
    pub count: u64,
}

/// Handle for an active tracer on the current thread. Dropping it stops the
/// tracer.
#[derive(Debug)]
pub struct TracerGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Reset the per-site counters and start tracing on the current thread.
pub fn start() -> TracerGuard {
    let _ = SITE_BYTES.try_with(|sites| sites.iter().for_each(|c| c.set(0)));
    let _ = SITE_COUNTS.try_with(|sites| sites.iter().for_each(|c| c.set(0)));
    set_current_site(0);
    let _ = ACTIVE.try_with(|a| a.set(true));
    TracerGuard {
        _not_send: std::marker::PhantomData,
    }
}

impl TracerGuard {
    /// Per-site totals for every site that allocated at least once.
    pub fn snapshot(&self) -> Vec<SiteAllocation> {
        let _pause = pause();
        let bytes: Vec<u64> = SITE_BYTES
            .try_with(|sites| sites.iter().map(Cell::get).collect())
            .unwrap_or_default();
        let counts: Vec<u64> = SITE_COUNTS
            .try_with(|sites| sites.iter().map(Cell::get).collect())
            .unwrap_or_default();
        bytes
            .into_iter()
            .zip(counts)
            .enumerate()
            .filter(|(_, (_, count))| *count > 0)
            .map(|(site, (bytes, count))| SiteAllocation { site, bytes, count })
            .collect()
    }
}

impl Drop for TracerGuard {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|a| a.set(false));
        set_current_site(0);
    }
}

/// Suspends tracing on this thread until the returned guard drops. Used by the
/// profiler's own bookkeeping.
pub fn pause() -> PauseGuard {
    let previous = PAUSED.try_with(|p| p.replace(true)).unwrap_or(false);
    PauseGuard { previous }
}

#[derive(Debug)]
pub struct PauseGuard {
    previous: bool,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        let _ = PAUSED.try_with(|p| p.set(self.previous));
    }
}

/// Allocation entry points handed to dynamically loaded targets.
///
/// A library linked with its own allocator would bypass the tracer. Libraries
/// exporting [`HOST_ALLOCATOR_HOOK`] receive a pointer to this table and route
/// their global allocator through it, so their allocations land in the host's
/// global allocator on the calling thread. The table lives for the whole
/// process. Memory a library allocated before the hook was installed is freed
/// through the same table, which is sound as long as the host's global
/// allocator is backed by `System`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostAllocator {
    pub alloc: unsafe extern "C" fn(size: usize, align: usize) -> *mut u8,
    pub alloc_zeroed: unsafe extern "C" fn(size: usize, align: usize) -> *mut u8,
    pub dealloc: unsafe extern "C" fn(ptr: *mut u8, size: usize, align: usize),
    pub realloc:
        unsafe extern "C" fn(ptr: *mut u8, size: usize, align: usize, new_size: usize) -> *mut u8,
}

/// Symbol a library exports to receive the [`HostAllocator`] table.
pub const HOST_ALLOCATOR_HOOK: &str = "perfassess_install_allocator";

pub type InstallAllocator = unsafe extern "C" fn(host: *const HostAllocator);

pub static HOST_ALLOCATOR: HostAllocator = HostAllocator {
    alloc: host_alloc,
    alloc_zeroed: host_alloc_zeroed,
    dealloc: host_dealloc,
    realloc: host_realloc,
};

unsafe extern "C" fn host_alloc(size: usize, align: usize) -> *mut u8 {
    match Layout::from_size_align(size, align) {
        // SAFETY: the caller upholds the `GlobalAlloc::alloc` contract.
        Ok(layout) if size > 0 => unsafe { std::alloc::alloc(layout) },
        _ => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn host_alloc_zeroed(size: usize, align: usize) -> *mut u8 {
    match Layout::from_size_align(size, align) {
        // SAFETY: as for `host_alloc`.
        Ok(layout) if size > 0 => unsafe { std::alloc::alloc_zeroed(layout) },
        _ => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn host_dealloc(ptr: *mut u8, size: usize, align: usize) {
    if let Ok(layout) = Layout::from_size_align(size, align) {
        // SAFETY: `ptr` was allocated with `layout` through this table or `System`.
        unsafe { std::alloc::dealloc(ptr, layout) }
    }
}

unsafe extern "C" fn host_realloc(
    ptr: *mut u8,
    size: usize,
    align: usize,
    new_size: usize,
) -> *mut u8 {
    match Layout::from_size_align(size, align) {
        // SAFETY: the caller upholds the `GlobalAlloc::realloc` contract.
        Ok(layout) if new_size > 0 => unsafe { std::alloc::realloc(ptr, layout, new_size) },
        _ => std::ptr::null_mut(),
    }
}
