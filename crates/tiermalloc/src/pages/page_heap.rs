//! Page-level allocator: huge-page filler for small spans, classic
//! free lists with eager coalescing for large ones.
//!
//! One process-wide spin lock guards everything here. The slow parts
//! (madvise) run with the lock dropped: the span under release is simply
//! absent from every list while the kernel works.

use crate::arena::Arena;
use crate::config;
use crate::pages::filler::{Filler, FillerStats, PutOutcome};
use crate::pages::page_map::PageMap;
use crate::pages::span::{PageId, Span, SpanList, SpanLocation, SpanPool};
use crate::pages::tracker::{PageTracker, TrackerKind};
use crate::platform;
use crate::sync::SpinLock;
use crate::util::{
    HUGE_PAGE_SIZE, MAX_SMALL_SPAN_PAGES, PAGES_PER_HUGE_PAGE, PAGE_SIZE, sat_sub,
};
use core::cell::UnsafeCell;
use core::ptr;

/// Span lengths below this use the indexed free lists; longer spans go
/// to the large lists.
pub const MAX_PAGES: usize = MAX_SMALL_SPAN_PAGES;

/// Scavenge cadence: pages freed before one incremental release.
const DEFAULT_RELEASE_DELAY: i64 = 1 << 18;
const MAX_RELEASE_DELAY: i64 = 1 << 20;

/// System/free/unmapped byte totals.
#[derive(Clone, Copy, Default, Debug)]
pub struct BackingStats {
    pub system_bytes: u64,
    pub free_bytes: u64,
    pub unmapped_bytes: u64,
}

/// Free span counts by length, split backed/unbacked.
#[derive(Clone, Copy)]
pub struct SmallSpanStats {
    pub normal_length: [usize; MAX_PAGES],
    pub returned_length: [usize; MAX_PAGES],
}

impl Default for SmallSpanStats {
    fn default() -> Self {
        SmallSpanStats {
            normal_length: [0; MAX_PAGES],
            returned_length: [0; MAX_PAGES],
        }
    }
}

/// Aggregate over all free spans of at least `MAX_PAGES` pages.
#[derive(Clone, Copy, Default, Debug)]
pub struct LargeSpanStats {
    pub spans: usize,
    pub normal_pages: usize,
    pub returned_pages: usize,
}

struct SpanListPair {
    normal: SpanList,
    returned: SpanList,
}

impl SpanListPair {
    const fn new() -> Self {
        SpanListPair {
            normal: SpanList::new(),
            returned: SpanList::new(),
        }
    }
}

struct PageHeapInner {
    span_pool: SpanPool,
    /// Recycled tracker metadata.
    tracker_pool: *mut PageTracker,
    filler: Filler,
    /// Leftover fragments shorter than MAX_PAGES, by length.
    free_lists: [SpanListPair; MAX_PAGES],
    large: SpanListPair,
    system_bytes: u64,
    /// Free bytes on the span lists (normal side).
    list_free_bytes: u64,
    /// Unmapped bytes on the span lists (returned side).
    list_unmapped_bytes: u64,
    scavenge_counter: i64,
    /// Round-robin position for incremental and advisory release.
    release_index: usize,
    /// madvise failures on the span-list side.
    release_failures: u64,
    /// Times the soft usage limit forced an extra release pass.
    limit_hits: u64,
}

unsafe impl Send for PageHeapInner {}

/// The page heap. Allocates and frees spans; owns the filler.
pub struct PageHeap {
    lock: SpinLock,
    inner: UnsafeCell<PageHeapInner>,
}

unsafe impl Send for PageHeap {}
unsafe impl Sync for PageHeap {}

impl PageHeap {
    pub const fn new() -> Self {
        const PAIR: SpanListPair = SpanListPair::new();
        PageHeap {
            lock: SpinLock::new(),
            inner: UnsafeCell::new(PageHeapInner {
                span_pool: SpanPool::new(),
                tracker_pool: ptr::null_mut(),
                filler: Filler::new(),
                free_lists: [PAIR; MAX_PAGES],
                large: SpanListPair::new(),
                system_bytes: 0,
                list_free_bytes: 0,
                list_unmapped_bytes: 0,
                scavenge_counter: DEFAULT_RELEASE_DELAY,
                release_index: 0,
                release_failures: 0,
                limit_hits: 0,
            }),
        }
    }

    /// Allocate a span of exactly `n` pages for `class` (0 for large
    /// object spans). Returns null when the OS is out of memory.
    pub fn new_span(&self, arena: &Arena, pm: &PageMap, n: usize, class: u8) -> *mut Span {
        debug_assert!(n >= 1);
        self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };
        let span = if n < MAX_PAGES {
            inner.new_small(arena, pm, n, class)
        } else {
            inner.new_large(arena, pm, n, class)
        };
        self.lock.unlock();
        span
    }

    /// As `new_span`, but the first page is aligned to `align` pages.
    pub fn new_span_aligned(&self, arena: &Arena, pm: &PageMap, n: usize, align: usize) -> *mut Span {
        debug_assert!(align.is_power_of_two());
        if align <= 1 {
            return self.new_span(arena, pm, n, 0);
        }
        self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };
        let span = inner.new_aligned(arena, pm, n, align);
        self.lock.unlock();
        span
    }

    /// Return a span to the heap. The span must have come from
    /// `new_span`/`new_span_aligned` and hold no live objects.
    ///
    /// # Safety
    /// `span` must be exclusively owned by the caller.
    pub unsafe fn delete_span(&self, pm: &PageMap, span: *mut Span) {
        self.lock.lock();
        let inner = &mut *self.inner.get();
        if (*span).num_pages < MAX_PAGES && !(*span).tracker::<PageTracker>().is_null() {
            inner.delete_small(pm, span);
        } else {
            inner.delete_large(pm, span);
        }
        self.lock.unlock();
    }

    /// Advise the OS to drop at least `n` pages of free memory. Returns
    /// pages actually released (possibly more than asked, or fewer if
    /// that is all there is).
    pub fn release_at_least(&self, n: usize) -> usize {
        let mut released = 0usize;

        // Span-list side first: whole spans, advised with the lock
        // dropped.
        loop {
            if released >= n {
                return released;
            }
            self.lock.lock();
            let inner = unsafe { &mut *self.inner.get() };
            let span = inner.pop_release_candidate();
            self.lock.unlock();
            let Some(span) = span else { break };
            released += self.release_span(span);
        }

        // Filler subrelease for the remainder.
        self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };
        let skip = config::filler_skip_subrelease_interval_ns();
        released += inner
            .filler
            .release_pages(n - released, skip, platform::monotonic_nanos());
        self.lock.unlock();
        released
    }

    /// Advise one already-popped span and file it on the returned list
    /// (or back on normal if the advise call failed).
    fn release_span(&self, span: *mut Span) -> usize {
        let (addr, bytes, pages) = unsafe {
            (
                (*span).first_page.addr() as *mut u8,
                (*span).bytes(),
                (*span).num_pages,
            )
        };
        let ok = unsafe { platform::advise_free(addr, bytes) };
        if ok && config::madvise_cold_regions_nohugepage() {
            unsafe { platform::advise_nohugepage(addr, bytes) };
        }
        self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };
        unsafe {
            if ok {
                (*span).location = SpanLocation::OnReturnedList;
                inner.list_unmapped_bytes += bytes as u64;
                inner.file_free_span(span);
            } else {
                inner.release_failures += 1;
                (*span).location = SpanLocation::OnNormalList;
                inner.list_free_bytes += bytes as u64;
                inner.file_free_span(span);
            }
        }
        self.lock.unlock();
        if ok {
            pages
        } else {
            0
        }
    }

    pub fn stats(&self) -> BackingStats {
        self.lock.lock();
        let inner = unsafe { &*self.inner.get() };
        let s = BackingStats {
            system_bytes: inner.system_bytes,
            free_bytes: inner.list_free_bytes
                + (inner.filler.free_backed_pages() * PAGE_SIZE) as u64,
            unmapped_bytes: inner.list_unmapped_bytes
                + (inner.filler.unmapped_pages() * PAGE_SIZE) as u64,
        };
        self.lock.unlock();
        s
    }

    pub fn small_span_stats(&self) -> SmallSpanStats {
        self.lock.lock();
        let inner = unsafe { &*self.inner.get() };
        let mut s = SmallSpanStats::default();
        for n in 1..MAX_PAGES {
            s.normal_length[n] = inner.free_lists[n].normal.len();
            s.returned_length[n] = inner.free_lists[n].returned.len();
        }
        self.lock.unlock();
        s
    }

    pub fn large_span_stats(&self) -> LargeSpanStats {
        self.lock.lock();
        let inner = unsafe { &*self.inner.get() };
        let mut s = LargeSpanStats::default();
        unsafe {
            inner.large.normal.for_each(|sp| {
                s.spans += 1;
                s.normal_pages += sp.num_pages;
            });
            inner.large.returned.for_each(|sp| {
                s.spans += 1;
                s.returned_pages += sp.num_pages;
            });
        }
        self.lock.unlock();
        s
    }

    pub fn filler_stats(&self) -> FillerStats {
        self.lock.lock();
        let inner = unsafe { &*self.inner.get() };
        let s = inner.filler.stats(platform::monotonic_nanos());
        self.lock.unlock();
        s
    }

    /// Number of huge pages the filler manages.
    pub fn filler_size(&self) -> usize {
        self.lock.lock();
        let n = unsafe { &*self.inner.get() }.filler.size();
        self.lock.unlock();
        n
    }

    pub fn release_failures(&self) -> u64 {
        self.lock.lock();
        let inner = unsafe { &*self.inner.get() };
        let n = inner.release_failures + inner.filler.release_failures;
        self.lock.unlock();
        n
    }

    pub fn limit_hits(&self) -> u64 {
        self.lock.lock();
        let n = unsafe { &*self.inner.get() }.limit_hits;
        self.lock.unlock();
        n
    }
}

impl PageHeapInner {
    fn alloc_tracker(&mut self, arena: &Arena) -> *mut PageTracker {
        if self.tracker_pool.is_null() {
            arena.alloc_or_die(
                core::mem::size_of::<PageTracker>(),
                core::mem::align_of::<PageTracker>(),
            ) as *mut PageTracker
        } else {
            let t = self.tracker_pool;
            self.tracker_pool = unsafe { (*t).next_in_list() };
            t
        }
    }

    unsafe fn recycle_tracker(&mut self, t: *mut PageTracker) {
        // Reuse the intrusive next link for the pool chain.
        (*t).init(PageId(0), TrackerKind::Regular);
        (*t).set_pool_next(self.tracker_pool);
        self.tracker_pool = t;
    }

    /// Check the configured usage limits before growing the heap by
    /// `add` bytes. The hard limit aborts; crossing the soft limit
    /// records a hit so the caller can schedule an extra release pass.
    fn check_limits(&mut self, add: u64) {
        let next = self.system_bytes + add;
        let hard = config::hard_usage_limit_bytes();
        if hard != 0 && next > hard {
            crate::util::fatal("tiermalloc: hard heap limit exceeded\n");
        }
        let soft = config::desired_usage_limit_bytes();
        if soft != 0 && next > soft {
            self.limit_hits += 1;
            // One extra subrelease pass before the heap grows past the
            // soft cap; growth proceeds either way.
            let over_pages = ((next - soft) as usize).div_ceil(PAGE_SIZE);
            self.filler
                .release_pages(over_pages, 0, platform::monotonic_nanos());
        }
    }

    fn new_small(&mut self, arena: &Arena, pm: &PageMap, n: usize, class: u8) -> *mut Span {
        let got = match self.filler.get(n) {
            Some(got) => got,
            None => {
                if !self.grow_filler(arena) {
                    return ptr::null_mut();
                }
                match self.filler.get(n) {
                    Some(got) => got,
                    None => return ptr::null_mut(),
                }
            }
        };
        let (tracker, first, _unbacked) = got;
        let span = self.span_pool.alloc(arena, first, n);
        unsafe {
            (*span).set_tracker(tracker);
            (*span).size_class = class;
            if !pm.set_range(first, n, span, class) {
                // Radix node allocation failed: undo and report OOM.
                match self.filler.put(tracker, first, n) {
                    PutOutcome::Emptied(t) => self.unmap_huge_page(t),
                    PutOutcome::Kept => {}
                }
                self.span_pool.free(span);
                return ptr::null_mut();
            }
        }
        span
    }

    fn grow_filler(&mut self, arena: &Arena) -> bool {
        self.check_limits(HUGE_PAGE_SIZE as u64);
        let mem = unsafe { platform::map_aligned(HUGE_PAGE_SIZE, HUGE_PAGE_SIZE) };
        if mem.is_null() {
            return false;
        }
        self.system_bytes += HUGE_PAGE_SIZE as u64;
        let t = self.alloc_tracker(arena);
        unsafe {
            (*t).init(PageId::from_addr(mem as usize), TrackerKind::Regular);
            self.filler.contribute(t);
        }
        true
    }

    unsafe fn unmap_huge_page(&mut self, t: *mut PageTracker) {
        let addr = (*t).first_page.addr() as *mut u8;
        platform::unmap(addr, HUGE_PAGE_SIZE);
        self.system_bytes -= HUGE_PAGE_SIZE as u64;
        self.recycle_tracker(t);
    }

    fn delete_small(&mut self, pm: &PageMap, span: *mut Span) {
        unsafe {
            let first = (*span).first_page;
            let n = (*span).num_pages;
            let tracker: *mut PageTracker = (*span).tracker();
            pm.clear_range(first, n);
            match self.filler.put(tracker, first, n) {
                PutOutcome::Emptied(t) => self.unmap_huge_page(t),
                PutOutcome::Kept => {}
            }
            self.span_pool.free(span);
        }
    }

    fn new_large(&mut self, arena: &Arena, pm: &PageMap, n: usize, class: u8) -> *mut Span {
        let span = match self.search_free_lists(n) {
            Some(span) => self.carve(arena, pm, span, n),
            None => self.grow_heap(arena, n),
        };
        if span.is_null() {
            return span;
        }
        unsafe {
            (*span).size_class = class;
            (*span).location = SpanLocation::InUse;
            if !pm.set_range((*span).first_page, n, span, class) {
                return ptr::null_mut();
            }
        }
        span
    }

    fn new_aligned(&mut self, arena: &Arena, pm: &PageMap, n: usize, align: usize) -> *mut Span {
        // Aligned requests bypass the free lists; a fresh trimmed
        // mapping is already aligned and leaves no fragments.
        let bytes = n * PAGE_SIZE;
        self.check_limits(bytes as u64);
        let mem = unsafe { platform::map_aligned(bytes, align * PAGE_SIZE) };
        if mem.is_null() {
            return ptr::null_mut();
        }
        self.system_bytes += bytes as u64;
        let span = self.span_pool.alloc(arena, PageId::from_addr(mem as usize), n);
        unsafe {
            if !pm.set_range((*span).first_page, n, span, 0) {
                return ptr::null_mut();
            }
        }
        span
    }

    /// Best-fit search over the indexed lists, then the large lists.
    /// Normal spans are preferred over returned (refault-free).
    fn search_free_lists(&mut self, n: usize) -> Option<*mut Span> {
        for len in n..MAX_PAGES {
            if !self.free_lists[len].normal.is_empty() {
                return Some(self.pop_free(len, false));
            }
            if !self.free_lists[len].returned.is_empty() {
                return Some(self.pop_free(len, true));
            }
        }
        // Large lists: best fit by length, normal preferred on ties.
        let mut best: *mut Span = ptr::null_mut();
        let mut best_len = usize::MAX;
        let mut best_returned = true;
        unsafe {
            self.large.normal.for_each(|sp| {
                if sp.num_pages >= n
                    && (sp.num_pages < best_len || (sp.num_pages == best_len && best_returned))
                {
                    best = sp as *const Span as *mut Span;
                    best_len = sp.num_pages;
                    best_returned = false;
                }
            });
            self.large.returned.for_each(|sp| {
                if sp.num_pages >= n && sp.num_pages < best_len {
                    best = sp as *const Span as *mut Span;
                    best_len = sp.num_pages;
                    best_returned = true;
                }
            });
            if best.is_null() {
                return None;
            }
            self.unfile_free_span(best);
        }
        Some(best)
    }

    fn pop_free(&mut self, len: usize, returned: bool) -> *mut Span {
        let list = if returned {
            &mut self.free_lists[len].returned
        } else {
            &mut self.free_lists[len].normal
        };
        let span = list.pop_front();
        unsafe {
            if returned {
                self.list_unmapped_bytes -= (*span).bytes() as u64;
            } else {
                self.list_free_bytes -= (*span).bytes() as u64;
            }
        }
        span
    }

    /// Remove a free span from whichever list holds it and adjust byte
    /// accounting.
    ///
    /// # Safety
    /// `span` must be filed on one of the free lists.
    unsafe fn unfile_free_span(&mut self, span: *mut Span) {
        let len = (*span).num_pages;
        let returned = (*span).location == SpanLocation::OnReturnedList;
        let pair = if len < MAX_PAGES {
            &mut self.free_lists[len]
        } else {
            &mut self.large
        };
        if returned {
            pair.returned.remove(span);
            self.list_unmapped_bytes -= (*span).bytes() as u64;
        } else {
            pair.normal.remove(span);
            self.list_free_bytes -= (*span).bytes() as u64;
        }
    }

    /// File a free span on the list matching its length and location.
    ///
    /// # Safety
    /// `span` must not be on any list; its location must be set.
    unsafe fn file_free_span(&mut self, span: *mut Span) {
        let len = (*span).num_pages;
        let pair = if len < MAX_PAGES {
            &mut self.free_lists[len]
        } else {
            &mut self.large
        };
        (*span).freelist_added_ns = platform::monotonic_nanos();
        if (*span).location == SpanLocation::OnReturnedList {
            pair.returned.push_front(span);
        } else {
            pair.normal.push_front(span);
        }
    }

    /// Trim `span` (already off every list) to exactly `n` pages,
    /// refiling the remainder.
    fn carve(&mut self, arena: &Arena, pm: &PageMap, span: *mut Span, n: usize) -> *mut Span {
        unsafe {
            let was_returned = (*span).location == SpanLocation::OnReturnedList;
            let extra = (*span).num_pages - n;
            if extra > 0 {
                let rest = self
                    .span_pool
                    .alloc(arena, (*span).first_page.offset(n), extra);
                (*rest).location = (*span).location;
                pm.set_range((*rest).first_page, extra, rest, 0);
                if was_returned {
                    self.list_unmapped_bytes += (*rest).bytes() as u64;
                } else {
                    self.list_free_bytes += (*rest).bytes() as u64;
                }
                self.file_free_span(rest);
                (*span).num_pages = n;
            }
            // Returned pages being handed out will refault on first
            // touch; they leave the unmapped total now.
            (*span).location = SpanLocation::InUse;
        }
        span
    }

    /// Map fresh memory for an `n`-page span, rounded up to whole huge
    /// pages. A nonempty tail becomes a donated filler tracker.
    fn grow_heap(&mut self, arena: &Arena, n: usize) -> *mut Span {
        let ask_pages = crate::util::align_up(n, PAGES_PER_HUGE_PAGE);
        let bytes = ask_pages * PAGE_SIZE;
        self.check_limits(bytes as u64);
        let mem = unsafe { platform::map_aligned(bytes, HUGE_PAGE_SIZE) };
        if mem.is_null() {
            return ptr::null_mut();
        }
        self.system_bytes += bytes as u64;
        let first = PageId::from_addr(mem as usize);
        let span = self.span_pool.alloc(arena, first, n);

        let tail = ask_pages - n;
        if tail > 0 {
            let t = self.alloc_tracker(arena);
            unsafe {
                (*t).init(
                    PageId(first.0 + ask_pages - PAGES_PER_HUGE_PAGE),
                    TrackerKind::Donated,
                );
                self.filler.donate(t, tail);
                (*span).donated_tail = true;
                (*span).set_tracker(t);
            }
        }
        span
    }

    fn delete_large(&mut self, pm: &PageMap, span: *mut Span) {
        unsafe {
            if (*span).donated_tail {
                let t: *mut PageTracker = (*span).tracker();
                // Pages of the donor inside the shared huge page.
                let donor_prefix =
                    (*span).first_page.0 + (*span).num_pages - (*t).first_page.0;
                if (*t).used_pages() == donor_prefix {
                    // Tail never carved (or carved and fully freed):
                    // reclaim the whole original mapping.
                    self.filler.withdraw(t);
                    let total = (*t).first_page.0 + PAGES_PER_HUGE_PAGE - (*span).first_page.0;
                    pm.clear_range((*span).first_page, (*span).num_pages);
                    platform::unmap((*span).first_page.addr() as *mut u8, total * PAGE_SIZE);
                    self.system_bytes -= (total * PAGE_SIZE) as u64;
                    self.recycle_tracker(t);
                    self.span_pool.free(span);
                    return;
                }
                // Tail is live: the tracker becomes a standalone huge
                // page and the donor's pages merge into the free lists.
                self.filler.reclassify_donated(t);
                (*span).donated_tail = false;
                (*span).set_tracker(ptr::null_mut::<PageTracker>());
            }
            self.merge_into_free_lists(pm, span);
            self.incremental_scavenge();
        }
    }

    /// Coalesce with same-location neighbors, then file.
    ///
    /// # Safety
    /// `span` must be in use and off every list.
    unsafe fn merge_into_free_lists(&mut self, pm: &PageMap, span: *mut Span) {
        let n = (*span).num_pages;
        (*span).location = SpanLocation::OnNormalList;

        // Left neighbor.
        if let Some((prev, _)) = pm.lookup(PageId((*span).first_page.0.wrapping_sub(1))) {
            if (*prev).location == SpanLocation::OnNormalList
                && (*prev).last_page().0 + 1 == (*span).first_page.0
            {
                self.unfile_free_span(prev);
                (*span).first_page = (*prev).first_page;
                (*span).num_pages += (*prev).num_pages;
                self.span_pool.free(prev);
            }
        }
        // Right neighbor.
        if let Some((next, _)) = pm.lookup(PageId((*span).first_page.0 + (*span).num_pages)) {
            if (*next).location == SpanLocation::OnNormalList
                && (*next).first_page.0 == (*span).first_page.0 + (*span).num_pages
            {
                self.unfile_free_span(next);
                (*span).num_pages += (*next).num_pages;
                self.span_pool.free(next);
            }
        }

        pm.set_range((*span).first_page, (*span).num_pages, span, 0);
        self.list_free_bytes += (*span).bytes() as u64;
        self.file_free_span(span);
        self.scavenge_counter -= n as i64;
    }

    /// Release one span after enough frees have accumulated.
    fn incremental_scavenge(&mut self) {
        if self.scavenge_counter >= 0 {
            return;
        }
        if let Some(span) = self.pop_release_candidate() {
            // Advising under the lock: incremental scavenge runs on the
            // delete path, where dropping the lock would let the span's
            // neighbors move underneath us.
            let ok = unsafe {
                platform::advise_free((*span).first_page.addr() as *mut u8, (*span).bytes())
            };
            unsafe {
                if ok {
                    (*span).location = SpanLocation::OnReturnedList;
                    self.list_unmapped_bytes += (*span).bytes() as u64;
                } else {
                    self.release_failures += 1;
                    (*span).location = SpanLocation::OnNormalList;
                    self.list_free_bytes += (*span).bytes() as u64;
                }
                self.file_free_span(span);
            }
            self.scavenge_counter = DEFAULT_RELEASE_DELAY.min(MAX_RELEASE_DELAY);
        } else {
            // Nothing releasable; wait for more frees before rescanning.
            self.scavenge_counter = DEFAULT_RELEASE_DELAY;
        }
    }

    /// Round-robin over the normal lists: pop the oldest span of the
    /// next nonempty slot. Returns the span removed from all lists and
    /// all byte accounting; the caller advises and refiles it.
    fn pop_release_candidate(&mut self) -> Option<*mut Span> {
        let slots = MAX_PAGES + 1;
        for probe in 0..slots {
            let idx = (self.release_index + probe) % slots;
            let list = if idx == MAX_PAGES {
                &mut self.large.normal
            } else {
                &mut self.free_lists[idx].normal
            };
            let span = list.last();
            if !span.is_null() {
                unsafe {
                    list.remove(span);
                    self.list_free_bytes -= (*span).bytes() as u64;
                    // While unlisted the span must not look mergeable to
                    // a concurrent delete walking the page map.
                    (*span).location = SpanLocation::InUse;
                }
                self.release_index = (idx + 1) % slots;
                return Some(span);
            }
        }
        None
    }
}

/// Derived quantity helper: heap bytes actually backing live data.
pub fn backed_bytes(stats: &BackingStats) -> u64 {
    sat_sub(stats.system_bytes, stats.unmapped_bytes)
}
