//! Per-huge-page accounting for the filler.
//!
//! A `PageTracker` bitmaps the 256 pages of one 2 MiB huge page: which
//! are handed out, which have been advise-discarded, and the length of
//! the longest free run. The longest-free-range value is recomputed on
//! every mutation so filler placement decisions never see a stale value.

use crate::pages::span::PageId;
use crate::platform;
use crate::util::{PAGES_PER_HUGE_PAGE, PAGE_SIZE};
use core::ptr;

const WORDS: usize = PAGES_PER_HUGE_PAGE / 64;

/// How a tracker entered the filler.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrackerKind {
    /// Standard partially used huge page.
    Regular,
    /// Tail of a large allocation, donated to the filler. Carved from
    /// only when nothing else fits, so the donor can reclaim wholesale.
    Donated,
}

/// Tracker for a single huge page.
#[repr(C)]
pub struct PageTracker {
    prev: *mut PageTracker,
    next: *mut PageTracker,
    /// First page of the huge page. 256-page aligned.
    pub first_page: PageId,
    /// 1 = allocated.
    alloc_bits: [u64; WORDS],
    /// 1 = currently advise-discarded.
    released_bits: [u64; WORDS],
    longest_free: u16,
    used_pages: u16,
    released_pages: u16,
    pub kind: TrackerKind,
    /// Set once the first sub-range of this huge page is released.
    pub ever_released: bool,
    /// Monotonic timestamp of the last free; feeds age histograms and
    /// the subrelease skip window.
    pub last_free_ns: u64,
}

impl PageTracker {
    pub fn init(&mut self, first_page: PageId, kind: TrackerKind) {
        self.prev = ptr::null_mut();
        self.next = ptr::null_mut();
        self.first_page = first_page;
        self.alloc_bits = [0; WORDS];
        self.released_bits = [0; WORDS];
        self.longest_free = PAGES_PER_HUGE_PAGE as u16;
        self.used_pages = 0;
        self.released_pages = 0;
        self.kind = kind;
        self.ever_released = false;
        self.last_free_ns = 0;
    }

    /// Mark `[index, index+n)` allocated without going through `get`.
    /// Used for donated tails whose head is owned by the donor span.
    pub fn mark_prefix_used(&mut self, n: usize) {
        for i in 0..n {
            self.set_bit(i);
        }
        self.used_pages = n as u16;
        self.recompute_longest();
    }

    #[inline]
    fn bit(&self, i: usize) -> bool {
        self.alloc_bits[i / 64] >> (i % 64) & 1 != 0
    }

    #[inline]
    fn set_bit(&mut self, i: usize) {
        self.alloc_bits[i / 64] |= 1 << (i % 64);
    }

    #[inline]
    fn clear_bit(&mut self, i: usize) {
        self.alloc_bits[i / 64] &= !(1 << (i % 64));
    }

    #[inline]
    fn released_bit(&self, i: usize) -> bool {
        self.released_bits[i / 64] >> (i % 64) & 1 != 0
    }

    pub fn longest_free_range(&self) -> usize {
        self.longest_free as usize
    }

    pub fn used_pages(&self) -> usize {
        self.used_pages as usize
    }

    pub fn free_pages(&self) -> usize {
        PAGES_PER_HUGE_PAGE - self.used_pages as usize
    }

    pub fn released_pages(&self) -> usize {
        self.released_pages as usize
    }

    pub fn empty(&self) -> bool {
        self.used_pages == 0
    }

    /// Successor on whatever [`TrackerList`] this tracker is linked into.
    #[inline]
    pub fn next_in_list(&self) -> *mut PageTracker {
        self.next
    }

    /// Chain trackers through the `next` link while pooled for reuse.
    #[inline]
    pub fn set_pool_next(&mut self, next: *mut PageTracker) {
        self.next = next;
    }

    /// Reclassify a donated tracker whose donor span has been freed.
    #[inline]
    pub fn set_kind_regular(&mut self) {
        self.kind = TrackerKind::Regular;
    }

    pub fn full(&self) -> bool {
        self.longest_free == 0
    }

    fn recompute_longest(&mut self) {
        let mut longest = 0usize;
        let mut run = 0usize;
        for i in 0..PAGES_PER_HUGE_PAGE {
            if self.bit(i) {
                run = 0;
            } else {
                run += 1;
                if run > longest {
                    longest = run;
                }
            }
        }
        self.longest_free = longest as u16;
    }

    /// Find the first free run of `n` pages, mark it allocated, and
    /// return its page index plus the count of previously-released pages
    /// now being reused (those refault and leave the unmapped total).
    pub fn get(&mut self, n: usize) -> Option<(usize, usize)> {
        debug_assert!(n >= 1);
        if (self.longest_free as usize) < n {
            return None;
        }
        let mut run = 0usize;
        let mut start = 0usize;
        for i in 0..PAGES_PER_HUGE_PAGE {
            if self.bit(i) {
                run = 0;
                start = i + 1;
            } else {
                run += 1;
                if run == n {
                    let mut unbacked = 0usize;
                    for j in start..start + n {
                        self.set_bit(j);
                        if self.released_bit(j) {
                            self.released_bits[j / 64] &= !(1 << (j % 64));
                            unbacked += 1;
                        }
                    }
                    self.used_pages += n as u16;
                    self.released_pages -= unbacked as u16;
                    self.recompute_longest();
                    return Some((start, unbacked));
                }
            }
        }
        // longest_free said this fits.
        debug_assert!(false, "longest_free_range out of sync");
        None
    }

    /// Return `[index, index+n)` to the tracker.
    pub fn put(&mut self, index: usize, n: usize) {
        debug_assert!(index + n <= PAGES_PER_HUGE_PAGE);
        for i in index..index + n {
            debug_assert!(self.bit(i), "freeing free page {}", i);
            self.clear_bit(i);
        }
        self.used_pages -= n as u16;
        self.last_free_ns = platform::monotonic_nanos();
        self.recompute_longest();
    }

    /// Advise the OS to discard every free, still-backed run. Returns
    /// pages newly released. Ranges whose advise call fails stay backed
    /// and are reported through `failures`.
    ///
    /// # Safety
    /// The huge page must be mapped at `first_page`.
    pub unsafe fn release_free(&mut self, failures: &mut u64) -> usize {
        let mut released = 0usize;
        let mut i = 0usize;
        while i < PAGES_PER_HUGE_PAGE {
            if self.bit(i) || self.released_bit(i) {
                i += 1;
                continue;
            }
            let start = i;
            while i < PAGES_PER_HUGE_PAGE && !self.bit(i) && !self.released_bit(i) {
                i += 1;
            }
            released += self.release_range(start, i - start, failures);
        }
        released
    }

    /// Advise the OS to discard `[index, index+n)`, which must be free.
    /// Returns pages released (0 when the advise call failed).
    ///
    /// # Safety
    /// The huge page must be mapped at `first_page` and the range free.
    pub unsafe fn release_range(&mut self, index: usize, n: usize, failures: &mut u64) -> usize {
        let addr = self.first_page.offset(index).addr();
        if !platform::advise_free(addr as *mut u8, n * PAGE_SIZE) {
            *failures += 1;
            return 0;
        }
        if crate::config::madvise_cold_regions_nohugepage() {
            platform::advise_nohugepage(addr as *mut u8, n * PAGE_SIZE);
        }
        for j in index..index + n {
            debug_assert!(!self.bit(j));
            if !self.released_bit(j) {
                self.released_bits[j / 64] |= 1 << (j % 64);
                self.released_pages += 1;
            }
        }
        self.ever_released = true;
        n
    }

    /// Whether `[index, index+n)` touches only released or allocated
    /// neighbors, i.e. releasing it keeps the huge page in a coherent
    /// mostly-released state.
    pub fn surrounded_by_released(&self, index: usize, n: usize) -> bool {
        let left_ok = index == 0 || self.bit(index - 1) || self.released_bit(index - 1);
        let end = index + n;
        let right_ok = end == PAGES_PER_HUGE_PAGE || self.bit(end) || self.released_bit(end);
        left_ok && right_ok
    }

    /// Free-range lengths, bucketed for stats: (backed ranges by length,
    /// released ranges by length). Lengths clamp at 64.
    pub fn range_histogram(&self, backed: &mut [usize; 64], released: &mut [usize; 64]) {
        let mut i = 0usize;
        while i < PAGES_PER_HUGE_PAGE {
            if self.bit(i) {
                i += 1;
                continue;
            }
            let rel = self.released_bit(i);
            let start = i;
            while i < PAGES_PER_HUGE_PAGE && !self.bit(i) && self.released_bit(i) == rel {
                i += 1;
            }
            let bucket = (i - start - 1).min(63);
            if rel {
                released[bucket] += 1;
            } else {
                backed[bucket] += 1;
            }
        }
    }
}

/// Intrusive doubly-linked list of trackers.
pub struct TrackerList {
    head: *mut PageTracker,
    len: usize,
}

impl TrackerList {
    pub const fn new() -> Self {
        TrackerList {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn first(&self) -> *mut PageTracker {
        self.head
    }

    /// # Safety
    /// `t` must not be on any list.
    pub unsafe fn push_front(&mut self, t: *mut PageTracker) {
        debug_assert!((*t).prev.is_null() && (*t).next.is_null());
        (*t).next = self.head;
        if !self.head.is_null() {
            (*self.head).prev = t;
        }
        self.head = t;
        self.len += 1;
    }

    /// # Safety
    /// `t` must be on this list.
    pub unsafe fn remove(&mut self, t: *mut PageTracker) {
        let prev = (*t).prev;
        let next = (*t).next;
        if prev.is_null() {
            self.head = next;
        } else {
            (*prev).next = next;
        }
        if !next.is_null() {
            (*next).prev = prev;
        }
        (*t).prev = ptr::null_mut();
        (*t).next = ptr::null_mut();
        self.len -= 1;
    }

    /// Walk trackers; the callback must not mutate the list.
    ///
    /// # Safety
    /// List membership must be stable for the duration of the walk.
    pub unsafe fn for_each(&self, mut f: impl FnMut(*mut PageTracker)) {
        let mut cur = self.head;
        while !cur.is_null() {
            let next = (*cur).next;
            f(cur);
            cur = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::util::HUGE_PAGE_SIZE;

    fn fresh_tracker(arena: &Arena) -> (*mut PageTracker, *mut u8) {
        let mem = unsafe { platform::map_aligned(HUGE_PAGE_SIZE, HUGE_PAGE_SIZE) };
        assert!(!mem.is_null());
        let t = arena.alloc_or_die(
            core::mem::size_of::<PageTracker>(),
            core::mem::align_of::<PageTracker>(),
        ) as *mut PageTracker;
        unsafe {
            (*t).init(PageId::from_addr(mem as usize), TrackerKind::Regular);
        }
        (t, mem)
    }

    #[test]
    fn get_put_invariants() {
        let arena = Arena::new();
        let (t, _mem) = fresh_tracker(&arena);
        let t = unsafe { &mut *t };

        assert!(t.empty());
        assert_eq!(t.longest_free_range(), PAGES_PER_HUGE_PAGE);

        let (a, unbacked) = t.get(10).unwrap();
        assert_eq!(a, 0);
        assert_eq!(unbacked, 0);
        assert_eq!(t.used_pages(), 10);
        assert_eq!(t.longest_free_range(), PAGES_PER_HUGE_PAGE - 10);
        assert!(t.longest_free_range() + t.used_pages() <= PAGES_PER_HUGE_PAGE);

        let (b, _) = t.get(20).unwrap();
        assert_eq!(b, 10);

        t.put(a, 10);
        assert_eq!(t.used_pages(), 20);
        // Freeing the head leaves a 10-page hole; the tail run is longer.
        assert_eq!(t.longest_free_range(), PAGES_PER_HUGE_PAGE - 30);

        t.put(b, 20);
        assert!(t.empty());
        assert_eq!(t.longest_free_range(), PAGES_PER_HUGE_PAGE);
    }

    #[test]
    fn get_prefers_first_fit() {
        let arena = Arena::new();
        let (t, _mem) = fresh_tracker(&arena);
        let t = unsafe { &mut *t };

        let (a, _) = t.get(4).unwrap();
        let (b, _) = t.get(4).unwrap();
        let (_c, _) = t.get(4).unwrap();
        t.put(a, 4);
        t.put(b, 4);
        // The coalesced [0,8) hole is first in page order.
        let (d, _) = t.get(6).unwrap();
        assert_eq!(d, 0);
    }

    #[test]
    fn release_exact_ranges() {
        let arena = Arena::new();
        let (t, mem) = fresh_tracker(&arena);
        let t = unsafe { &mut *t };
        let k = PAGES_PER_HUGE_PAGE / 4;

        // [a1: k-3][a2: k][a3: k+1][a4: k+2] fills the huge page.
        let (a1, _) = t.get(k - 3).unwrap();
        let (a2, _) = t.get(k).unwrap();
        let (a3, _) = t.get(k + 1).unwrap();
        let (a4, _) = t.get(k + 2).unwrap();
        assert!(t.full());

        unsafe {
            // Dirty everything so released pages are observable.
            mem.write_bytes(0xEE, HUGE_PAGE_SIZE);
        }

        t.put(a2, k);
        t.put(a4, k + 2);
        let mut failures = 0u64;
        let released = unsafe { t.release_free(&mut failures) };
        assert_eq!(released, k + k + 2);
        assert_eq!(failures, 0);
        assert_eq!(t.released_pages(), k + k + 2);
        assert!(t.ever_released);

        unsafe {
            // a2's range was discarded; a3's was not.
            assert_eq!(mem.add(a2 * PAGE_SIZE).read(), 0);
            assert_eq!(mem.add(a3 * PAGE_SIZE).read(), 0xEE);
        }

        // Free a1; it now sits between the start and a2's released
        // range, so releasing it keeps the page coherent.
        t.put(a1, k - 3);
        assert!(t.surrounded_by_released(a1, k - 3));
        let mut failures = 0u64;
        let released = unsafe { t.release_range(a1, k - 3, &mut failures) };
        assert_eq!(released, k - 3);
        unsafe {
            assert_eq!(mem.add(a1 * PAGE_SIZE).read(), 0);
        }
    }

    #[test]
    fn reuse_of_released_counts_unbacked() {
        let arena = Arena::new();
        let (t, _mem) = fresh_tracker(&arena);
        let t = unsafe { &mut *t };

        let (a, _) = t.get(8).unwrap();
        t.put(a, 8);
        let mut failures = 0u64;
        unsafe { t.release_free(&mut failures) };
        assert_eq!(t.released_pages(), PAGES_PER_HUGE_PAGE);

        let (b, unbacked) = t.get(8).unwrap();
        assert_eq!(b, 0);
        assert_eq!(unbacked, 8);
        assert_eq!(t.released_pages(), PAGES_PER_HUGE_PAGE - 8);
    }

    #[test]
    fn empty_tracker_has_full_range() {
        let arena = Arena::new();
        let (t, _mem) = fresh_tracker(&arena);
        let t = unsafe { &mut *t };
        let (a, _) = t.get(37).unwrap();
        t.put(a, 37);
        assert!(t.empty());
        assert_eq!(t.longest_free_range(), PAGES_PER_HUGE_PAGE);
    }
}
