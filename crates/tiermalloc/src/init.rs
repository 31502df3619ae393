//! One-shot initialization gate for the process-wide instance.

use crate::api::Allocator;
use crate::config;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
const FAILED: u8 = 3;

static INIT_STATE: AtomicU8 = AtomicU8::new(UNINIT);

struct AllocatorHolder(UnsafeCell<Allocator>);
unsafe impl Sync for AllocatorHolder {}

static ALLOCATOR: AllocatorHolder = AllocatorHolder(UnsafeCell::new(Allocator::new()));

/// Initialize the singleton if needed and return it. Panics never;
/// returns the instance even if a racing initializer is mid-flight
/// (callers spin on the gate).
pub fn global() -> &'static Allocator {
    ensure_initialized();
    unsafe { &*ALLOCATOR.0.get() }
}

/// The singleton, only if initialization already completed.
pub fn try_global() -> Option<&'static Allocator> {
    if INIT_STATE.load(Ordering::Acquire) == READY {
        Some(unsafe { &*ALLOCATOR.0.get() })
    } else {
        None
    }
}

#[cold]
fn ensure_initialized() {
    match INIT_STATE.compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {}
        Err(INITIALIZING) => {
            while INIT_STATE.load(Ordering::Acquire) == INITIALIZING {
                core::hint::spin_loop();
            }
            return;
        }
        Err(_) => return,
    }

    unsafe {
        config::read_config();
    }
    let alloc = unsafe { &*ALLOCATOR.0.get() };
    if !alloc.init() {
        INIT_STATE.store(FAILED, Ordering::Release);
        return;
    }
    if !alloc.cpu_cache().active() {
        alloc.enable_thread_cache();
    }
    INIT_STATE.store(READY, Ordering::Release);
}
