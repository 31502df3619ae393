//! Per-class transfer caches: bounded stashes of free objects between
//! the per-CPU/per-thread fronts and the central lists.
//!
//! Two wire formats, chosen once at startup:
//!
//! - **Classic**: an array stack moving whole batches only. Anything
//!   that does not fit (or is not a full batch) falls through to the
//!   central list and counts as a miss.
//! - **Ring**: a wrapping ring with free-running 32-bit indices. Partial
//!   batches are absorbed; when the ring is at capacity the oldest batch
//!   is evicted to the central list to make room.
//!
//! Capacity moves between classes in one-batch steps: a resize
//! controller grows the classes missing the most, paid for by classes
//! with spare headroom. A low-water mark drives `plunder`, returning
//! objects that sat unused for a whole epoch.

use crate::arena::Arena;
use crate::caches::central::CentralFreeList;
use crate::config;
use crate::pages::page_heap::PageHeap;
use crate::pages::page_map::PageMap;
use crate::size_class::{batch_size, class_to_size, NUM_CLASSES};
use crate::sync::Mutex;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Initial capacity, in batches.
const INITIAL_BATCHES: usize = 16;
/// Hard per-class ceiling, in batches.
const MAX_BATCHES: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Variant {
    Classic,
    Ring,
}

struct TcInner {
    class: usize,
    batch: usize,
    variant: Variant,
    /// Slot storage; power-of-two length for the ring variant.
    slots: *mut *mut u8,
    slot_mask: usize,
    /// Ring cursors, free-running. `head - tail` is the live count.
    head: u32,
    tail: u32,
    /// Objects the cache may hold right now (<= max_capacity).
    capacity: usize,
    /// Smallest live count observed since the last plunder.
    low_water: usize,
}

unsafe impl Send for TcInner {}

/// Monotone operation counters, readable without the lock.
#[derive(Default)]
pub struct TransferStats {
    pub insert_hits: AtomicU64,
    pub insert_misses: AtomicU64,
    pub insert_non_batch_misses: AtomicU64,
    pub remove_hits: AtomicU64,
    pub remove_misses: AtomicU64,
    pub remove_non_batch_misses: AtomicU64,
}

/// Transfer cache for one size class.
pub struct TransferCache {
    inner: Mutex<TcInner>,
    pub stats: TransferStats,
    /// Mirrors for concurrent readers; may momentarily disagree with
    /// the locked state.
    used_objects: AtomicUsize,
    capacity_objects: AtomicUsize,
    max_capacity_objects: AtomicUsize,
}

impl TcInner {
    #[inline]
    fn len(&self) -> usize {
        (self.head.wrapping_sub(self.tail)) as usize
    }

    #[inline]
    unsafe fn slot(&self, idx: u32) -> *mut *mut u8 {
        self.slots.add(idx as usize & self.slot_mask)
    }

    fn note_len(&mut self) {
        if self.len() < self.low_water {
            self.low_water = self.len();
        }
    }
}

impl TransferCache {
    pub const fn new() -> Self {
        TransferCache {
            inner: Mutex::new(TcInner {
                class: 0,
                batch: 0,
                variant: Variant::Classic,
                slots: core::ptr::null_mut(),
                slot_mask: 0,
                head: 0,
                tail: 0,
                capacity: 0,
                low_water: 0,
            }),
            stats: TransferStats {
                insert_hits: AtomicU64::new(0),
                insert_misses: AtomicU64::new(0),
                insert_non_batch_misses: AtomicU64::new(0),
                remove_hits: AtomicU64::new(0),
                remove_misses: AtomicU64::new(0),
                remove_non_batch_misses: AtomicU64::new(0),
            },
            used_objects: AtomicUsize::new(0),
            capacity_objects: AtomicUsize::new(0),
            max_capacity_objects: AtomicUsize::new(0),
        }
    }

    /// Bind to a class and allocate slot storage. The variant is fixed
    /// here from the `partial_transfer_cache` tunable.
    pub fn init(&self, arena: &Arena, class: usize) {
        let mut inner = self.inner.lock();
        let batch = batch_size(class);
        let max_objects = MAX_BATCHES * batch;
        let slot_count = max_objects.next_power_of_two();
        inner.class = class;
        inner.batch = batch;
        inner.variant = if config::partial_transfer_cache() {
            Variant::Ring
        } else {
            Variant::Classic
        };
        inner.slots = arena.alloc_or_die(
            slot_count * core::mem::size_of::<*mut u8>(),
            core::mem::align_of::<*mut u8>(),
        ) as *mut *mut u8;
        inner.slot_mask = slot_count - 1;
        inner.capacity = INITIAL_BATCHES * batch;
        self.capacity_objects.store(inner.capacity, Ordering::Relaxed);
        self.max_capacity_objects.store(max_objects, Ordering::Relaxed);
    }

    pub fn used(&self) -> usize {
        self.used_objects.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity_objects.load(Ordering::Relaxed)
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity_objects.load(Ordering::Relaxed)
    }

    pub fn free_bytes(&self) -> usize {
        let class = self.inner.lock().class;
        self.used() * class_to_size(class)
    }

    /// Insert `batch` pointers. Whatever the cache cannot keep goes to
    /// the central list.
    pub fn insert_range(
        &self,
        pm: &PageMap,
        page_heap: &PageHeap,
        central: &CentralFreeList,
        batch: &[*mut u8],
    ) {
        {
            let mut inner = self.inner.lock();
            match inner.variant {
                Variant::Classic => {
                    if batch.len() == inner.batch && inner.len() + batch.len() <= inner.capacity {
                        unsafe { self.push_all(&mut inner, batch) };
                        self.stats.insert_hits.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    self.stats.insert_misses.fetch_add(1, Ordering::Relaxed);
                }
                Variant::Ring => {
                    // Evict oldest batches until the whole insert fits
                    // within capacity.
                    if batch.len() <= inner.capacity {
                        while inner.len() + batch.len() > inner.capacity {
                            let evict = inner.batch.min(inner.len());
                            self.evict_to_central(&mut inner, pm, page_heap, central, evict);
                        }
                        unsafe { self.push_all(&mut inner, batch) };
                        if batch.len() == inner.batch {
                            self.stats.insert_hits.fetch_add(1, Ordering::Relaxed);
                        } else {
                            self.stats
                                .insert_non_batch_misses
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        return;
                    }
                    self.stats.insert_misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        central.insert_range(pm, page_heap, batch);
    }

    /// Remove up to `dst.len()` pointers; misses fall through to the
    /// central list, so a short count means the heap is exhausted.
    pub fn remove_range(
        &self,
        arena: &Arena,
        pm: &PageMap,
        page_heap: &PageHeap,
        central: &CentralFreeList,
        dst: &mut [*mut u8],
    ) -> usize {
        {
            let mut inner = self.inner.lock();
            match inner.variant {
                Variant::Classic => {
                    if dst.len() == inner.batch && inner.len() >= inner.batch {
                        let n = dst.len();
                        unsafe { self.pop_some(&mut inner, dst, n) };
                        self.stats.remove_hits.fetch_add(1, Ordering::Relaxed);
                        return n;
                    }
                    self.stats.remove_misses.fetch_add(1, Ordering::Relaxed);
                }
                Variant::Ring => {
                    let take = inner.len().min(dst.len());
                    if take > 0 {
                        unsafe { self.pop_some(&mut inner, dst, take) };
                        if take == dst.len() {
                            self.stats.remove_hits.fetch_add(1, Ordering::Relaxed);
                        } else {
                            self.stats
                                .remove_non_batch_misses
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        if take == dst.len() {
                            return take;
                        }
                        // Partial: top up from central below.
                        let more =
                            central.remove_range(arena, pm, page_heap, &mut dst[take..]);
                        return take + more;
                    }
                    self.stats.remove_misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        central.remove_range(arena, pm, page_heap, dst)
    }

    /// Return the objects that sat below the low-water mark for the
    /// whole epoch to the central list.
    pub fn plunder(
        &self,
        pm: &PageMap,
        page_heap: &PageHeap,
        central: &CentralFreeList,
    ) {
        loop {
            let mut buf = [core::ptr::null_mut::<u8>(); 64];
            let take;
            {
                let mut inner = self.inner.lock();
                let target = inner.low_water.min(inner.len());
                take = target.min(buf.len());
                if take == 0 {
                    inner.low_water = inner.len();
                    self.used_objects.store(inner.len(), Ordering::Relaxed);
                    return;
                }
                // Oldest first: the bottom of the ring is by definition
                // the part that went unused.
                for slot in buf.iter_mut().take(take) {
                    unsafe {
                        *slot = *inner.slot(inner.tail);
                    }
                    inner.tail = inner.tail.wrapping_add(1);
                }
                inner.low_water -= take;
                self.used_objects.store(inner.len(), Ordering::Relaxed);
            }
            central.insert_range(pm, page_heap, &buf[..take]);
        }
    }

    /// Add one batch of capacity, paid for by `donor` (which must have
    /// spare headroom). Returns false when either side cannot move.
    pub fn grow_cache(&self, donor: &TransferCache) -> bool {
        {
            let inner = self.inner.lock();
            if inner.capacity + inner.batch > self.max_capacity() {
                return false;
            }
        }
        // Donor gives up one of its own batches.
        let donor_batch = donor.inner.lock().batch;
        if !donor.shrink_cache(donor_batch) {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.capacity += inner.batch;
        self.capacity_objects.store(inner.capacity, Ordering::Relaxed);
        true
    }

    /// Drop `objects` of capacity if that leaves every cached object a
    /// slot. Returns false when the cache is too full to shrink.
    pub fn shrink_cache(&self, objects: usize) -> bool {
        let mut inner = self.inner.lock();
        if objects == 0 || inner.capacity < objects || inner.len() > inner.capacity - objects {
            return false;
        }
        inner.capacity -= objects;
        self.capacity_objects.store(inner.capacity, Ordering::Relaxed);
        true
    }

    pub fn has_spare_capacity(&self) -> bool {
        let inner = self.inner.lock();
        inner.capacity >= inner.len() + inner.batch
    }

    /// Start the ring cursors just below the 32-bit boundary so tests
    /// cover index overflow without four billion operations.
    #[cfg(test)]
    pub(crate) fn force_cursors_near_wrap(&self) {
        let mut inner = self.inner.lock();
        assert_eq!(inner.len(), 0, "cursors move only on an empty cache");
        inner.head = u32::MAX - 100;
        inner.tail = u32::MAX - 100;
    }

    /// # Safety
    /// Caller holds the inner lock and verified room.
    unsafe fn push_all(&self, inner: &mut TcInner, batch: &[*mut u8]) {
        for &ptr in batch {
            *inner.slot(inner.head) = ptr;
            inner.head = inner.head.wrapping_add(1);
        }
        inner.note_len();
        self.used_objects.store(inner.len(), Ordering::Relaxed);
    }

    /// # Safety
    /// Caller holds the inner lock; `n <= inner.len()`.
    unsafe fn pop_some(&self, inner: &mut TcInner, dst: &mut [*mut u8], n: usize) {
        for slot in dst.iter_mut().take(n) {
            inner.head = inner.head.wrapping_sub(1);
            *slot = *inner.slot(inner.head);
        }
        inner.note_len();
        self.used_objects.store(inner.len(), Ordering::Relaxed);
    }

    fn evict_to_central(
        &self,
        inner: &mut TcInner,
        pm: &PageMap,
        page_heap: &PageHeap,
        central: &CentralFreeList,
        n: usize,
    ) {
        let mut buf = [core::ptr::null_mut::<u8>(); 64];
        let mut left = n;
        while left > 0 {
            let step = left.min(buf.len()).min(inner.len());
            if step == 0 {
                break;
            }
            for slot in buf.iter_mut().take(step) {
                unsafe {
                    *slot = *inner.slot(inner.tail);
                }
                inner.tail = inner.tail.wrapping_add(1);
            }
            inner.note_len();
            central.insert_range(pm, page_heap, &buf[..step]);
            left -= step;
        }
        self.used_objects.store(inner.len(), Ordering::Relaxed);
    }
}

/// All transfer caches plus the capacity resize controller.
pub struct TransferCaches {
    caches: [TransferCache; NUM_CLASSES],
    /// Miss totals at the previous resize cycle, per class.
    prev_misses: [AtomicU64; NUM_CLASSES],
}

impl TransferCaches {
    pub const fn new() -> Self {
        const TC: TransferCache = TransferCache::new();
        const ZERO: AtomicU64 = AtomicU64::new(0);
        TransferCaches {
            caches: [TC; NUM_CLASSES],
            prev_misses: [ZERO; NUM_CLASSES],
        }
    }

    pub fn init(&self, arena: &Arena) {
        for class in 1..NUM_CLASSES {
            self.caches[class].init(arena, class);
        }
    }

    #[inline]
    pub fn get(&self, class: usize) -> &TransferCache {
        &self.caches[class]
    }

    pub fn free_bytes(&self) -> usize {
        let mut total = 0;
        for class in 1..NUM_CLASSES {
            total += self.caches[class].free_bytes();
        }
        total
    }

    fn misses_of(&self, class: usize) -> u64 {
        let s = &self.caches[class].stats;
        s.insert_misses.load(Ordering::Relaxed) + s.remove_misses.load(Ordering::Relaxed)
    }

    /// One resize cycle: grow the two classes whose misses grew the
    /// most, stealing capacity from classes with spare headroom.
    pub fn try_resizing(&self) {
        let mut best = [(0u64, 0usize); 2];
        for class in 1..NUM_CLASSES {
            let total = self.misses_of(class);
            let prev = self.prev_misses[class].swap(total, Ordering::Relaxed);
            let delta = total.saturating_sub(prev);
            if delta > best[0].0 {
                best[1] = best[0];
                best[0] = (delta, class);
            } else if delta > best[1].0 {
                best[1] = (delta, class);
            }
        }
        for &(delta, grower) in &best {
            if delta == 0 {
                continue;
            }
            // First donor with spare headroom pays.
            for donor in 1..NUM_CLASSES {
                if donor == grower {
                    continue;
                }
                if self.caches[donor].has_spare_capacity()
                    && self.caches[grower].grow_cache(&self.caches[donor])
                {
                    break;
                }
            }
        }
    }

    /// Plunder every class on the background cadence.
    pub fn plunder_all(
        &self,
        pm: &PageMap,
        page_heap: &PageHeap,
        central: &[CentralFreeList; NUM_CLASSES],
    ) {
        for class in 1..NUM_CLASSES {
            self.caches[class].plunder(pm, page_heap, &central[class]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Allocator;
    use std::collections::HashSet;

    const CLASS: usize = 2;

    /// Fetch `n` real objects of CLASS out of a fresh instance.
    fn fetch_objects(alloc: &Allocator, n: usize) -> Vec<*mut u8> {
        let t = alloc.tiers();
        let mut out = Vec::with_capacity(n);
        let mut buf = [core::ptr::null_mut::<u8>(); 64];
        while out.len() < n {
            let want = (n - out.len()).min(buf.len());
            let got = t.fetch_transfer(CLASS, &mut buf[..want]);
            assert!(got > 0, "heap refused to grow");
            out.extend_from_slice(&buf[..got]);
        }
        out
    }

    #[test]
    fn plunder_without_traffic_is_idempotent() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        let t = alloc.tiers();
        let tc = alloc.transfer().get(CLASS);
        let batch = batch_size(CLASS);

        let objs = fetch_objects(&alloc, 2 * batch);
        tc.insert_range(t.pm, t.page_heap, &t.central[CLASS], &objs[..batch]);
        tc.insert_range(t.pm, t.page_heap, &t.central[CLASS], &objs[batch..]);
        assert_eq!(tc.used(), 2 * batch);

        // The cache was empty at the last epoch boundary: first call
        // only starts a new epoch.
        tc.plunder(t.pm, t.page_heap, &t.central[CLASS]);
        assert_eq!(tc.used(), 2 * batch);
        // Now the whole content sat unused for an epoch.
        tc.plunder(t.pm, t.page_heap, &t.central[CLASS]);
        assert_eq!(tc.used(), 0);
        // Empty epoch: nothing to do, twice in a row.
        tc.plunder(t.pm, t.page_heap, &t.central[CLASS]);
        assert_eq!(tc.used(), 0);
        tc.plunder(t.pm, t.page_heap, &t.central[CLASS]);
        assert_eq!(tc.used(), 0);
    }

    #[test]
    fn low_water_tracks_minimum() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        let t = alloc.tiers();
        let tc = alloc.transfer().get(CLASS);
        let batch = batch_size(CLASS);

        let objs = fetch_objects(&alloc, 2 * batch);
        tc.insert_range(t.pm, t.page_heap, &t.central[CLASS], &objs[..batch]);
        tc.insert_range(t.pm, t.page_heap, &t.central[CLASS], &objs[batch..]);
        tc.plunder(t.pm, t.page_heap, &t.central[CLASS]);

        // Dip to one batch and refill: the dip is the low water.
        let mut buf = vec![core::ptr::null_mut::<u8>(); batch];
        let got = tc.remove_range(t.arena, t.pm, t.page_heap, &t.central[CLASS], &mut buf);
        assert_eq!(got, batch);
        tc.insert_range(t.pm, t.page_heap, &t.central[CLASS], &buf);
        assert_eq!(tc.used(), 2 * batch);

        tc.plunder(t.pm, t.page_heap, &t.central[CLASS]);
        assert_eq!(tc.used(), batch);
    }

    #[test]
    fn ring_wraparound_loses_nothing() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        let t = alloc.tiers();
        let tc = alloc.transfer().get(CLASS);
        tc.force_cursors_near_wrap();

        let capacity = tc.capacity();
        // Odd step: coprime with both the power-of-two slot count and
        // 2^32, so every slot position gets exercised.
        let step = 31usize;
        let total = capacity + 4 * step;
        let objs = fetch_objects(&alloc, total);
        let mut owned: HashSet<usize> = objs.iter().map(|p| *p as usize).collect();
        assert_eq!(owned.len(), total);

        // Prime the ring to capacity; the excess evicts to central.
        let mut advanced = 0usize;
        let mut idx = 0usize;
        while idx < total {
            let end = (idx + step).min(total);
            tc.insert_range(t.pm, t.page_heap, &t.central[CLASS], &objs[idx..end]);
            advanced += end - idx;
            idx = end;
        }

        // March the cursors across the 32-bit boundary and around the
        // ring twice: evicted objects drop to central, get pulled back
        // out behind the ring's back, and go in again.
        let slot_count = tc.max_capacity().next_power_of_two();
        let target = 2 * slot_count + 200;
        let mut buf = [core::ptr::null_mut::<u8>(); 64];
        while advanced < target {
            let got = t.central[CLASS].remove_range(t.arena, t.pm, t.page_heap, &mut buf[..step]);
            assert!(got > 0);
            for &p in &buf[..got] {
                owned.insert(p as usize);
            }
            tc.insert_range(t.pm, t.page_heap, &t.central[CLASS], &buf[..got]);
            advanced += got;
        }
        let total = owned.len();

        // Drain until every owned pointer resurfaces. Span siblings we
        // never fetched may interleave; what matters is that nothing
        // ever comes out twice and nothing of ours is lost.
        let mut recovered = HashSet::new();
        let mut owned_seen = 0usize;
        let mut buf = [core::ptr::null_mut::<u8>(); 64];
        let mut guard = 0usize;
        while owned_seen < total {
            guard += 1;
            assert!(guard < 100 * total, "owned pointers lost in the ring");
            let got =
                tc.remove_range(t.arena, t.pm, t.page_heap, &t.central[CLASS], &mut buf);
            assert!(got > 0);
            for &p in &buf[..got] {
                assert!(recovered.insert(p as usize), "pointer duplicated");
                if owned.contains(&(p as usize)) {
                    owned_seen += 1;
                }
            }
        }
    }

    #[test]
    fn stats_are_monotone() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        let t = alloc.tiers();
        let tc = alloc.transfer().get(CLASS);
        let batch = batch_size(CLASS);
        let objs = fetch_objects(&alloc, batch);

        let mut last = (0u64, 0u64, 0u64, 0u64);
        for _ in 0..16 {
            tc.insert_range(t.pm, t.page_heap, &t.central[CLASS], &objs);
            let mut buf = vec![core::ptr::null_mut::<u8>(); batch];
            tc.remove_range(t.arena, t.pm, t.page_heap, &t.central[CLASS], &mut buf);
            let now = (
                tc.stats.insert_hits.load(Ordering::Relaxed),
                tc.stats.insert_misses.load(Ordering::Relaxed),
                tc.stats.remove_hits.load(Ordering::Relaxed),
                tc.stats.remove_misses.load(Ordering::Relaxed),
            );
            assert!(now.0 >= last.0 && now.1 >= last.1 && now.2 >= last.2 && now.3 >= last.3);
            last = now;
        }
    }

    #[test]
    fn capacity_moves_between_classes() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        let grower = alloc.transfer().get(CLASS);
        let donor = alloc.transfer().get(CLASS + 1);

        let grower_before = grower.capacity();
        let donor_before = donor.capacity();
        assert!(grower.grow_cache(donor));
        assert_eq!(grower.capacity(), grower_before + batch_size(CLASS));
        assert_eq!(donor.capacity(), donor_before - batch_size(CLASS + 1));
    }
}
