//! Multi-threaded stress tests: heavy concurrent allocate/free traffic
//! must never hand the same object to two owners or corrupt user data.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use tiermalloc::api::Allocator;

fn stress_alloc_free(num_threads: usize, iterations: usize, size: usize) {
    let alloc = Allocator::new();
    assert!(alloc.init());
    let barrier = Barrier::new(num_threads);

    std::thread::scope(|scope| {
        for t in 0..num_threads {
            let alloc = &alloc;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                let mut held: Vec<*mut u8> = Vec::with_capacity(16);
                for i in 0..iterations {
                    let ptr = alloc.allocate(size);
                    assert!(!ptr.is_null());
                    // Stamp our identity; a shared object would show a
                    // foreign stamp before we free it.
                    unsafe {
                        (ptr as *mut usize).write(t * iterations + i);
                    }
                    held.push(ptr);
                    if held.len() >= 16 {
                        for ptr in held.drain(..) {
                            let stamp = unsafe { (ptr as *const usize).read() };
                            // Still our stamp: nobody else wrote here.
                            assert_eq!(stamp / iterations, t, "object shared across threads");
                            unsafe { alloc.deallocate(ptr) };
                        }
                    }
                }
                for ptr in held {
                    unsafe { alloc.deallocate(ptr) };
                }
            });
        }
    });
}

#[test]
fn four_threads_small_objects() {
    stress_alloc_free(4, 20_000, 64);
}

#[test]
fn eight_threads_mixed_class() {
    stress_alloc_free(8, 10_000, 1024);
}

#[test]
fn producer_consumer_handoff() {
    // Objects allocated on one thread and freed on another must flow
    // back through the tiers without loss.
    let alloc = Allocator::new();
    assert!(alloc.init());
    let (tx, rx) = std::sync::mpsc::sync_channel::<usize>(1024);
    const COUNT: usize = 50_000;

    std::thread::scope(|scope| {
        let alloc_ref = &alloc;
        scope.spawn(move || {
            for i in 0..COUNT {
                let ptr = alloc_ref.allocate(96);
                assert!(!ptr.is_null());
                unsafe { (ptr as *mut usize).write(i) };
                tx.send(ptr as usize).unwrap();
            }
        });
        scope.spawn(move || {
            let mut sum = 0usize;
            for _ in 0..COUNT {
                let addr = rx.recv().unwrap();
                let ptr = addr as *mut u8;
                sum = sum.wrapping_add(unsafe { (ptr as *const usize).read() });
                unsafe { alloc_ref.deallocate(ptr) };
            }
            assert_eq!(sum, (0..COUNT).sum());
        });
    });
}

#[test]
fn no_pointer_served_twice_concurrently() {
    // Every live pointer must be unique across threads at any moment.
    // Threads publish allocations into a claim table; a collision means
    // two owners.
    const SLOTS: usize = 1 << 16;
    let claims: Vec<AtomicUsize> = (0..SLOTS).map(|_| AtomicUsize::new(0)).collect();
    let alloc = Allocator::new();
    assert!(alloc.init());

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let alloc = &alloc;
            let claims = &claims;
            scope.spawn(move || {
                for _ in 0..20_000 {
                    let ptr = alloc.allocate(48);
                    assert!(!ptr.is_null());
                    let slot = (ptr as usize >> 4) % SLOTS;
                    let prev = claims[slot].swap(ptr as usize, Ordering::SeqCst);
                    assert_ne!(
                        prev, ptr as usize,
                        "object handed to two concurrent owners"
                    );
                    claims[slot].store(0, Ordering::SeqCst);
                    unsafe { alloc.deallocate(ptr) };
                }
            });
        }
    });
}
