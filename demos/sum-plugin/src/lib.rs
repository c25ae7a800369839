//! Sample target for `perfassess`: sums `value` after adding `to_add` to each
//! element.
//!
//! ```text
//! cargo build -p sum-plugin
//! perfassess -s target/debug/libsum_plugin.so -o out -f testor -a demos/sum-plugin/args.yml
//! ```
//!
//! The library routes its global allocator through the table the host hands
//! to `perfassess_install_allocator`, so its allocations show up in the
//! memory chart. Until the hook runs it allocates from `System`.

use serde_json::{Map, Value};

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Mirror of the host's `#[repr(C)]` allocator table.
#[repr(C)]
pub struct HostAllocator {
    alloc: unsafe extern "C" fn(size: usize, align: usize) -> *mut u8,
    alloc_zeroed: unsafe extern "C" fn(size: usize, align: usize) -> *mut u8,
    dealloc: unsafe extern "C" fn(ptr: *mut u8, size: usize, align: usize),
    realloc:
        unsafe extern "C" fn(ptr: *mut u8, size: usize, align: usize, new_size: usize) -> *mut u8,
}

static HOST: AtomicPtr<HostAllocator> = AtomicPtr::new(null_mut());

struct Forwarding;

unsafe impl GlobalAlloc for Forwarding {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let host = HOST.load(Ordering::Acquire);
        if host.is_null() {
            return unsafe { System.alloc(layout) };
        }
        unsafe { ((*host).alloc)(layout.size(), layout.align()) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let host = HOST.load(Ordering::Acquire);
        if host.is_null() {
            return unsafe { System.alloc_zeroed(layout) };
        }
        unsafe { ((*host).alloc_zeroed)(layout.size(), layout.align()) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let host = HOST.load(Ordering::Acquire);
        if host.is_null() {
            return unsafe { System.dealloc(ptr, layout) };
        }
        unsafe { ((*host).dealloc)(ptr, layout.size(), layout.align()) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let host = HOST.load(Ordering::Acquire);
        if host.is_null() {
            return unsafe { System.realloc(ptr, layout, new_size) };
        }
        unsafe { ((*host).realloc)(ptr, layout.size(), layout.align(), new_size) }
    }
}

#[global_allocator]
static GLOBAL: Forwarding = Forwarding;

/// # Safety
///
/// `host` must point to a table that outlives the library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn perfassess_install_allocator(host: *const HostAllocator) {
    HOST.store(host.cast_mut(), Ordering::Release);
}

/// # Safety
///
/// `kwargs_json` must point to `kwargs_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn testor(kwargs_json: *const u8, kwargs_len: usize) -> i32 {
    if kwargs_json.is_null() {
        return 1;
    }
    // SAFETY: guaranteed by the caller.
    let bytes = unsafe { std::slice::from_raw_parts(kwargs_json, kwargs_len) };
    let Ok(kwargs) = serde_json::from_slice::<Map<String, Value>>(bytes) else {
        return 2;
    };
    let Some(values) = kwargs.get("value").and_then(Value::as_array) else {
        return 3;
    };
    let to_add = kwargs.get("to_add").and_then(Value::as_f64).unwrap_or(1.0);

    let shifted: Vec<f64> = values
        .iter()
        .filter_map(Value::as_f64)
        .map(|v| v + to_add)
        .collect();
    let total: f64 = shifted.iter().sum();
    std::hint::black_box(total);
    0
}
