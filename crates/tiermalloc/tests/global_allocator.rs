#![cfg(feature = "global-allocator")]

use tiermalloc::TierMalloc;

#[global_allocator]
static GLOBAL: TierMalloc = TierMalloc;

#[test]
fn basic_alloc_and_free() {
    let b = Box::new(42u64);
    assert_eq!(*b, 42);
    drop(b);

    let mut v: Vec<u32> = Vec::new();
    for i in 0..1000 {
        v.push(i);
    }
    assert_eq!(v.len(), 1000);
    assert_eq!(v[999], 999);
    drop(v);

    let s = String::from("hello, tiermalloc global allocator!");
    assert!(s.contains("tiermalloc"));
}

#[test]
fn growth_and_shrink() {
    let mut v: Vec<u64> = Vec::with_capacity(4);
    for i in 0..100_000u64 {
        v.push(i);
    }
    v.truncate(10);
    v.shrink_to_fit();
    assert_eq!(v[9], 9);
}

#[test]
fn many_threads_through_global() {
    let handles: Vec<_> = (0..8)
        .map(|t| {
            std::thread::spawn(move || {
                let mut bufs: Vec<Vec<u8>> = Vec::new();
                for i in 0..1000usize {
                    bufs.push(vec![t as u8; 1 + (i % 2048)]);
                    if bufs.len() > 16 {
                        let old = bufs.remove(0);
                        assert!(old.iter().all(|&b| b == t as u8));
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn numeric_properties_respond() {
    let _keep = vec![0u8; 1 << 20];
    let alloc = tiermalloc::init::global();
    let heap = tiermalloc::get_numeric_property(alloc, "generic.heap_size").unwrap();
    assert!(heap > 0);
    let active = tiermalloc::get_numeric_property(alloc, "tcmalloc.per_cpu_caches_active");
    assert!(active.is_some());
}
