//! Page heap and filler scenarios driven through a private instance.

use tiermalloc::api::Allocator;
use tiermalloc::util::{PAGES_PER_HUGE_PAGE, PAGE_SIZE};

/// Deterministic xorshift; tests must not depend on ambient entropy.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

#[test]
fn span_round_trip_and_stats() {
    let alloc = Allocator::new();
    assert!(alloc.init());
    let heap = alloc.page_heap();

    let before = heap.stats();
    let span = heap.new_span(alloc.arena(), alloc.page_map(), 4, 0);
    assert!(!span.is_null());
    let during = heap.stats();
    assert!(during.system_bytes >= before.system_bytes);

    unsafe {
        heap.delete_span(alloc.page_map(), span);
    }
    let after = heap.stats();
    assert!(after.free_bytes + after.unmapped_bytes >= before.free_bytes);
}

#[test]
fn filler_stays_dense_under_churn() {
    let alloc = Allocator::new();
    assert!(alloc.init());
    let heap = alloc.page_heap();
    let pm = alloc.page_map();
    let arena = alloc.arena();

    // Fill 64 huge pages' worth of single-page spans.
    let total = 64 * PAGES_PER_HUGE_PAGE;
    let mut live: Vec<*mut tiermalloc::pages::span::Span> = Vec::with_capacity(total);
    for _ in 0..total {
        let span = heap.new_span(arena, pm, 1, 0);
        assert!(!span.is_null());
        live.push(span);
    }

    // Randomly delete half.
    let mut rng = Rng(0x9E3779B97F4A7C15);
    let mut i = 0;
    while i < live.len() {
        if rng.next() & 1 == 0 {
            let span = live.swap_remove(i);
            unsafe { heap.delete_span(pm, span) };
        } else {
            i += 1;
        }
    }

    // Churn: allocate one page, free one random live page.
    for _ in 0..6 * total {
        let span = heap.new_span(arena, pm, 1, 0);
        assert!(!span.is_null());
        live.push(span);
        let victim = (rng.next() as usize) % live.len();
        let span = live.swap_remove(victim);
        unsafe { heap.delete_span(pm, span) };
    }

    // Best-fit packing must have compacted the population: no more
    // than one partially-used huge page beyond the minimum.
    let min_pages = live.len().div_ceil(PAGES_PER_HUGE_PAGE);
    let filler_pages = heap.filler_size();
    assert!(
        filler_pages <= min_pages + 1,
        "filler holds {} huge pages for {} live pages (min {})",
        filler_pages,
        live.len(),
        min_pages
    );

    for span in live {
        unsafe { heap.delete_span(pm, span) };
    }
}

#[test]
fn release_at_least_accounts_exactly() {
    let alloc = Allocator::new();
    assert!(alloc.init());
    let heap = alloc.page_heap();
    let pm = alloc.page_map();
    let arena = alloc.arena();

    // Interleave in-use and free spans so releasable ranges sit next
    // to live ones.
    let mut keep = Vec::new();
    let mut free = Vec::new();
    for i in 0..32 {
        let span = heap.new_span(arena, pm, 8, 0);
        assert!(!span.is_null());
        if i % 2 == 0 {
            keep.push(span);
        } else {
            free.push(span);
        }
    }
    for span in free {
        unsafe { heap.delete_span(pm, span) };
    }

    // The subrelease skip window would otherwise protect just-freed
    // ranges for a minute.
    tiermalloc::config::set_filler_skip_subrelease_interval_ns(0);
    let before = heap.stats();
    let released = heap.release_at_least(64);
    let after = heap.stats();

    // Either the target was met or everything releasable went.
    assert!(
        released >= 64 || after.free_bytes < 8 * PAGE_SIZE as u64,
        "released only {} pages with {} free bytes left",
        released,
        after.free_bytes
    );
    assert_eq!(
        after.unmapped_bytes,
        before.unmapped_bytes + (released * PAGE_SIZE) as u64
    );

    // Reusing released ranges refaults them and shrinks the unmapped
    // total again.
    let span = heap.new_span(arena, pm, 8, 0);
    assert!(!span.is_null());
    let reused = heap.stats();
    assert!(reused.unmapped_bytes <= after.unmapped_bytes);

    unsafe { heap.delete_span(pm, span) };
    for span in keep {
        unsafe { heap.delete_span(pm, span) };
    }
}

#[test]
fn aligned_spans_are_aligned() {
    let alloc = Allocator::new();
    assert!(alloc.init());
    let heap = alloc.page_heap();

    for align_pages in [2usize, 16, 256] {
        let span = heap.new_span_aligned(alloc.arena(), alloc.page_map(), 8, align_pages);
        assert!(!span.is_null());
        unsafe {
            assert_eq!((*span).first_page.0 % align_pages, 0);
            heap.delete_span(alloc.page_map(), span);
        }
    }
}

#[test]
fn limit_hits_recorded_on_soft_limit() {
    let alloc = Allocator::new();
    assert!(alloc.init());
    tiermalloc::config::set_desired_usage_limit_bytes(PAGE_SIZE as u64);
    let ptr = alloc.allocate(1 << 20);
    assert!(!ptr.is_null());
    assert!(alloc.page_heap().limit_hits() >= 1);
    tiermalloc::config::set_desired_usage_limit_bytes(0);
    unsafe { alloc.deallocate(ptr) };
}
