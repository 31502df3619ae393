use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tiermalloc::api::Allocator;

const OPS: u64 = 100_000;

fn tiermalloc_alloc_free(alloc: &Allocator, size: usize) {
    for _ in 0..OPS {
        let ptr = alloc.allocate(size);
        black_box(ptr);
        unsafe { alloc.deallocate(ptr) };
    }
}

fn libc_malloc_free(size: usize) {
    for _ in 0..OPS {
        unsafe {
            let ptr = libc::malloc(size);
            black_box(ptr);
            libc::free(ptr);
        }
    }
}

fn benchmark_alloc_throughput(c: &mut Criterion) {
    let alloc = Allocator::new();
    assert!(alloc.init());

    let mut group = c.benchmark_group("alloc_throughput");
    for size in [16, 64, 256, 1024, 4096, 32768] {
        group.throughput(Throughput::Elements(OPS));

        group.bench_with_input(BenchmarkId::new("tiermalloc", size), &size, |b, &size| {
            b.iter(|| tiermalloc_alloc_free(&alloc, size))
        });

        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
            b.iter(|| libc_malloc_free(size))
        });
    }
    group.finish();
}

fn benchmark_batch_churn(c: &mut Criterion) {
    let alloc = Allocator::new();
    assert!(alloc.init());

    // Larson-style: hold a window of live objects, replace one per op.
    let mut group = c.benchmark_group("batch_churn");
    group.throughput(Throughput::Elements(OPS));
    group.bench_function("window_1024_size_64", |b| {
        b.iter(|| {
            let mut window: Vec<*mut u8> = (0..1024).map(|_| alloc.allocate(64)).collect();
            for i in 0..OPS as usize {
                let slot = i % window.len();
                unsafe { alloc.deallocate(window[slot]) };
                window[slot] = alloc.allocate(64);
            }
            for ptr in window {
                unsafe { alloc.deallocate(ptr) };
            }
        })
    });
    group.finish();
}

criterion_group!(benches, benchmark_alloc_throughput, benchmark_batch_churn);
criterion_main!(benches);
