//! The huge-page filler: packs small spans into partially used huge
//! pages.
//!
//! Trackers are binned by longest free range, separately for regular and
//! previously-released huge pages. Placement prefers the fullest regular
//! page that still fits (smallest sufficient free range), then released
//! pages (reuse costs a refault), then donated tails, and only then does
//! the page heap map a fresh huge page.

use crate::pages::span::PageId;
use crate::pages::tracker::{PageTracker, TrackerKind, TrackerList};
use crate::util::PAGES_PER_HUGE_PAGE;

const NUM_LISTS: usize = PAGES_PER_HUGE_PAGE + 1;

/// Aggregate filler statistics, taken under the page-heap lock.
#[derive(Clone, Copy)]
pub struct FillerStats {
    pub total_huge_pages: usize,
    pub donated_huge_pages: usize,
    pub released_huge_pages: usize,
    pub used_pages: usize,
    pub free_backed_pages: usize,
    pub unmapped_pages: usize,
    /// Free-range counts by length bucket, backed and released.
    pub backed_ranges: [usize; 64],
    pub released_ranges: [usize; 64],
    /// Tracker counts by age of last free: <1s, <10s, <100s, older.
    pub age_buckets: [usize; 4],
}

impl Default for FillerStats {
    fn default() -> Self {
        FillerStats {
            total_huge_pages: 0,
            donated_huge_pages: 0,
            released_huge_pages: 0,
            used_pages: 0,
            free_backed_pages: 0,
            unmapped_pages: 0,
            backed_ranges: [0; 64],
            released_ranges: [0; 64],
            age_buckets: [0; 4],
        }
    }
}

/// Result of returning pages to the filler.
pub enum PutOutcome {
    /// Tracker still holds live pages.
    Kept,
    /// The huge page became empty; the caller owns the tracker again and
    /// decides whether to unmap.
    Emptied(*mut PageTracker),
}

pub struct Filler {
    /// Partially used huge pages, by longest free range.
    regular: [TrackerList; NUM_LISTS],
    /// Huge pages that have been advise-discarded at least once.
    released: [TrackerList; NUM_LISTS],
    /// Donated tails of large allocations. Carved from last.
    donated: TrackerList,
    huge_pages: usize,
    used_pages: usize,
    unmapped_pages: usize,
    /// madvise failures observed while subreleasing.
    pub release_failures: u64,
}

unsafe impl Send for Filler {}

impl Filler {
    pub const fn new() -> Self {
        const EMPTY: TrackerList = TrackerList::new();
        Filler {
            regular: [EMPTY; NUM_LISTS],
            released: [EMPTY; NUM_LISTS],
            donated: TrackerList::new(),
            huge_pages: 0,
            used_pages: 0,
            unmapped_pages: 0,
            release_failures: 0,
        }
    }

    /// Number of huge pages the filler currently manages.
    pub fn size(&self) -> usize {
        self.huge_pages
    }

    pub fn used_pages(&self) -> usize {
        self.used_pages
    }

    pub fn free_backed_pages(&self) -> usize {
        self.huge_pages * PAGES_PER_HUGE_PAGE - self.used_pages - self.unmapped_pages
    }

    pub fn unmapped_pages(&self) -> usize {
        self.unmapped_pages
    }

    unsafe fn list_for(&mut self, t: *mut PageTracker) -> &mut TrackerList {
        if (*t).kind == TrackerKind::Donated {
            &mut self.donated
        } else if (*t).ever_released {
            &mut self.released[(*t).longest_free_range()]
        } else {
            &mut self.regular[(*t).longest_free_range()]
        }
    }

    /// Accept a brand-new huge page (already mapped, fully free).
    ///
    /// # Safety
    /// `t` must be initialized over a mapped huge page and not on any
    /// list.
    pub unsafe fn contribute(&mut self, t: *mut PageTracker) {
        self.huge_pages += 1;
        self.list_for(t).push_front(t);
    }

    /// Accept the tail of a large allocation. The first
    /// `PAGES_PER_HUGE_PAGE - tail_len` pages belong to the donor.
    ///
    /// # Safety
    /// As `contribute`; the prefix must genuinely be owned by the donor.
    pub unsafe fn donate(&mut self, t: *mut PageTracker, tail_len: usize) {
        (*t).mark_prefix_used(PAGES_PER_HUGE_PAGE - tail_len);
        self.huge_pages += 1;
        self.used_pages += (*t).used_pages();
        self.donated.push_front(t);
    }

    /// Rebin a donated tracker as a standalone regular huge page after
    /// its donor span was freed without reclaiming the tail.
    ///
    /// # Safety
    /// `t` must be on the donated list.
    pub unsafe fn reclassify_donated(&mut self, t: *mut PageTracker) {
        self.donated.remove(t);
        (*t).set_kind_regular();
        self.list_for(t).push_front(t);
    }

    /// Remove a tracker the caller owns (e.g. the donor span is being
    /// freed and reclaims its tail wholesale).
    ///
    /// # Safety
    /// `t` must be in the filler.
    pub unsafe fn withdraw(&mut self, t: *mut PageTracker) {
        self.list_for(t).remove(t);
        self.huge_pages -= 1;
        self.used_pages -= (*t).used_pages();
        self.unmapped_pages -= (*t).released_pages();
    }

    /// Allocate `n` pages. Returns the tracker, the first page, and how
    /// many previously-released pages the caller must count as refaulted.
    pub fn get(&mut self, n: usize) -> Option<(*mut PageTracker, PageId, usize)> {
        debug_assert!(n >= 1 && n < PAGES_PER_HUGE_PAGE);

        let t = self.pick(n)?;
        unsafe {
            self.list_for(t).remove(t);
            let (index, unbacked) = match (*t).get(n) {
                Some(got) => got,
                None => {
                    self.list_for(t).push_front(t);
                    return None;
                }
            };
            self.used_pages += n;
            self.unmapped_pages -= unbacked;
            self.list_for(t).push_front(t);
            Some((t, (*t).first_page.offset(index), unbacked))
        }
    }

    fn pick(&mut self, n: usize) -> Option<*mut PageTracker> {
        // Fullest regular page that still fits.
        for lfr in n..NUM_LISTS {
            if !self.regular[lfr].is_empty() {
                return Some(self.regular[lfr].first());
            }
        }
        // Released pages next: correct, but reuse refaults.
        for lfr in n..NUM_LISTS {
            if !self.released[lfr].is_empty() {
                return Some(self.released[lfr].first());
            }
        }
        // Donated tails only when nothing else fits.
        let mut found: *mut PageTracker = core::ptr::null_mut();
        unsafe {
            self.donated.for_each(|t| {
                if found.is_null() && (*t).longest_free_range() >= n {
                    found = t;
                }
            });
        }
        if found.is_null() {
            None
        } else {
            Some(found)
        }
    }

    /// Return `n` pages at `page` to tracker `t`. When the huge page is
    /// already partially released and the freed range sits between
    /// released or allocated neighbors, it is released as well, keeping
    /// the page in one coherent state.
    ///
    /// # Safety
    /// `t` must be in the filler and own `[page, page+n)`.
    pub unsafe fn put(&mut self, t: *mut PageTracker, page: PageId, n: usize) -> PutOutcome {
        let index = page.0 - (*t).first_page.0;
        self.list_for(t).remove(t);
        (*t).put(index, n);
        self.used_pages -= n;

        if (*t).ever_released && (*t).surrounded_by_released(index, n) {
            let released = (*t).release_range(index, n, &mut self.release_failures);
            self.unmapped_pages += released;
        }

        if (*t).empty() && (*t).kind == TrackerKind::Regular {
            self.huge_pages -= 1;
            self.unmapped_pages -= (*t).released_pages();
            return PutOutcome::Emptied(t);
        }

        self.list_for(t).push_front(t);
        PutOutcome::Kept
    }

    /// Advise free ranges until at least `target_pages` pages have been
    /// released, preferring the emptiest huge pages. Trackers whose last
    /// free is within `skip_window_ns` of `now_ns` are left alone.
    pub fn release_pages(&mut self, target_pages: usize, skip_window_ns: u64, now_ns: u64) -> usize {
        let mut released = 0usize;
        // Emptiest first: long free ranges release the most per advise.
        let mut lfr = NUM_LISTS;
        while lfr > 1 && released < target_pages {
            lfr -= 1;
            let mut t = self.regular[lfr].first();
            while !t.is_null() && released < target_pages {
                unsafe {
                    // A released tracker moves to the released lists, so
                    // the captured successor stays on this list.
                    let next = (*t).next_in_list();
                    if skip_window_ns == 0
                        || now_ns.saturating_sub((*t).last_free_ns) >= skip_window_ns
                    {
                        self.regular[lfr].remove(t);
                        let got = (*t).release_free(&mut self.release_failures);
                        released += got;
                        self.unmapped_pages += got;
                        self.list_for(t).push_front(t);
                    }
                    t = next;
                }
            }
        }
        // Second pass: already-released huge pages that have grown new
        // backed free ranges since.
        let mut lfr = NUM_LISTS;
        while lfr > 1 && released < target_pages {
            lfr -= 1;
            let mut t = self.released[lfr].first();
            while !t.is_null() && released < target_pages {
                unsafe {
                    let next = (*t).next_in_list();
                    if (*t).free_pages() > (*t).released_pages()
                        && (skip_window_ns == 0
                            || now_ns.saturating_sub((*t).last_free_ns) >= skip_window_ns)
                    {
                        self.released[lfr].remove(t);
                        let got = (*t).release_free(&mut self.release_failures);
                        released += got;
                        self.unmapped_pages += got;
                        self.list_for(t).push_front(t);
                    }
                    t = next;
                }
            }
        }
        released
    }

    /// Gather stats across every tracker.
    pub fn stats(&self, now_ns: u64) -> FillerStats {
        let mut s = FillerStats {
            total_huge_pages: self.huge_pages,
            used_pages: self.used_pages,
            unmapped_pages: self.unmapped_pages,
            free_backed_pages: self.free_backed_pages(),
            ..Default::default()
        };
        let mut visit = |t: *mut PageTracker| unsafe {
            (*t).range_histogram(&mut s.backed_ranges, &mut s.released_ranges);
            if (*t).ever_released {
                s.released_huge_pages += 1;
            }
            if (*t).kind == TrackerKind::Donated {
                s.donated_huge_pages += 1;
            }
            let age = now_ns.saturating_sub((*t).last_free_ns);
            let bucket = if age < 1_000_000_000 {
                0
            } else if age < 10_000_000_000 {
                1
            } else if age < 100_000_000_000 {
                2
            } else {
                3
            };
            s.age_buckets[bucket] += 1;
        };
        for list in self.regular.iter().chain(self.released.iter()) {
            unsafe { list.for_each(&mut visit) };
        }
        unsafe { self.donated.for_each(&mut visit) };
        s
    }
}
