//! Allocator API behavior tests.
//!
//! These exercise the allocate/deallocate contract through a private
//! `Allocator` instance, so nothing here depends on process-global
//! state or the per-CPU fast path being available.

use std::collections::HashSet;
use tiermalloc::api::Allocator;
use tiermalloc::size_class;

fn fresh() -> Allocator {
    let alloc = Allocator::new();
    assert!(alloc.init());
    alloc
}

#[test]
fn small_allocations_are_distinct_and_writable() {
    let alloc = fresh();
    let mut seen = HashSet::new();
    let mut ptrs = Vec::new();
    for i in 0..4096usize {
        let size = 1 + (i % 512);
        let ptr = alloc.allocate(size);
        assert!(!ptr.is_null(), "allocate({}) failed", size);
        assert!(seen.insert(ptr as usize), "pointer returned twice");
        unsafe {
            ptr.write_bytes(0xA5, size);
        }
        ptrs.push(ptr);
    }
    for ptr in ptrs {
        unsafe { alloc.deallocate(ptr) };
    }
}

#[test]
fn usable_size_covers_request() {
    let alloc = fresh();
    for size in [1, 7, 8, 64, 100, 1024, 4096, 100_000, 262_144, 300_000] {
        let ptr = alloc.allocate(size);
        assert!(!ptr.is_null());
        let usable = unsafe { alloc.usable_size(ptr) };
        assert!(usable >= size, "usable {} < requested {}", usable, size);
        unsafe { alloc.deallocate(ptr) };
    }
}

#[test]
fn aligned_allocations_are_aligned() {
    let alloc = fresh();
    for align_shift in 3..22 {
        let align = 1usize << align_shift;
        for size in [1, align / 2 + 1, align, align * 3] {
            let ptr = alloc.allocate_aligned(size, align);
            assert!(!ptr.is_null(), "allocate_aligned({}, {})", size, align);
            assert_eq!(
                ptr as usize % align,
                0,
                "misaligned for align {}",
                align
            );
            let usable = unsafe { alloc.usable_size(ptr) };
            assert!(usable >= size);
            unsafe { alloc.deallocate(ptr) };
        }
    }
}

#[test]
fn sized_deallocate_matches_plain() {
    let alloc = fresh();
    for size in [8, 56, 1024, 16 * 1024, 512 * 1024] {
        let a = alloc.allocate(size);
        let b = alloc.allocate(size);
        assert!(!a.is_null() && !b.is_null());
        unsafe {
            alloc.deallocate(a);
            alloc.deallocate_sized(b, size);
        }
    }
}

#[test]
fn zero_size_allocates() {
    let alloc = fresh();
    let ptr = alloc.allocate(0);
    assert!(!ptr.is_null());
    unsafe { alloc.deallocate(ptr) };
}

#[test]
fn large_allocations_round_trip() {
    let alloc = fresh();
    // Above the largest size class, spans come straight off the page
    // heap.
    let size = size_class::MAX_SIZE + 1;
    let ptr = alloc.allocate(size);
    assert!(!ptr.is_null());
    unsafe {
        ptr.write_bytes(0x77, size);
        assert_eq!(ptr.add(size - 1).read(), 0x77);
        assert!(alloc.usable_size(ptr) >= size);
        alloc.deallocate(ptr);
    }

    // Multi-huge-page allocation exercises tail donation.
    let big = 5 * 1024 * 1024;
    let ptr = alloc.allocate(big);
    assert!(!ptr.is_null());
    unsafe {
        ptr.write_bytes(1, big);
        alloc.deallocate(ptr);
    }
}

#[test]
fn reuse_after_free() {
    let alloc = fresh();
    let first = alloc.allocate(128);
    assert!(!first.is_null());
    unsafe { alloc.deallocate(first) };
    // With no concurrent traffic the front hands the object back.
    let mut found = false;
    for _ in 0..64 {
        let p = alloc.allocate(128);
        assert!(!p.is_null());
        if p == first {
            found = true;
        }
        unsafe { alloc.deallocate(p) };
        if found {
            break;
        }
    }
    assert!(found, "freed object never recycled");
}

#[test]
fn oom_handler_sees_failures() {
    use std::sync::atomic::{AtomicU64, Ordering};
    static CALLS: AtomicU64 = AtomicU64::new(0);

    fn counting_handler(_size: usize) -> *mut u8 {
        CALLS.fetch_add(1, Ordering::Relaxed);
        std::ptr::null_mut()
    }

    let alloc = fresh();
    alloc.set_oom_handler(counting_handler);
    // An impossible request (half the address space) must fail cleanly.
    let ptr = alloc.allocate(1usize << 46);
    assert!(ptr.is_null());
    assert!(CALLS.load(Ordering::Relaxed) >= 1);
    assert!(alloc.oom_count() >= 1);
}

#[test]
fn release_memory_is_advisory() {
    let alloc = fresh();
    let mut ptrs = Vec::new();
    for _ in 0..512 {
        ptrs.push(alloc.allocate(32 * 1024));
    }
    for ptr in ptrs {
        unsafe { alloc.deallocate(ptr) };
    }
    // Whatever the exact figure, the call must not lie about releasing
    // more than the heap holds.
    let released = alloc.release_memory_to_system(1 << 20);
    let stats = alloc.page_heap().stats();
    assert!(released as u64 <= stats.system_bytes);
}
