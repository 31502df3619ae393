//! Per-class central free lists.
//!
//! The central list owns every free object of its class process-wide,
//! organized by owning span. Spans whose objects are all free go back to
//! the page heap; spans whose objects are all live are unlinked and
//! resurface when an object returns.
//!
//! With `prioritize_spans` on, draws prefer spans with the fewest free
//! objects. That drives spans toward fully-used or fully-free, which is
//! what lets the filler release whole ranges downstream.

use crate::arena::Arena;
use crate::config;
use crate::pages::page_heap::PageHeap;
use crate::pages::page_map::PageMap;
use crate::pages::span::{Span, SpanList};
use crate::size_class::{class_to_pages, class_to_size, objects_per_span};
use crate::sync::Mutex;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Nonempty spans are binned by how many free objects they hold.
const NUM_BUCKETS: usize = 8;

struct CentralInner {
    class: usize,
    nonempty: [SpanList; NUM_BUCKETS],
}

unsafe impl Send for CentralInner {}

/// Central free list for one size class.
pub struct CentralFreeList {
    inner: Mutex<CentralInner>,
    /// Mirrors for lock-free stats readers.
    num_spans: AtomicUsize,
    num_free_objects: AtomicUsize,
}

impl CentralFreeList {
    pub const fn new() -> Self {
        const EMPTY: SpanList = SpanList::new();
        CentralFreeList {
            inner: Mutex::new(CentralInner {
                class: 0,
                nonempty: [EMPTY; NUM_BUCKETS],
            }),
            num_spans: AtomicUsize::new(0),
            num_free_objects: AtomicUsize::new(0),
        }
    }

    /// Bind the list to its class. Runs once during allocator init.
    pub fn init(&self, class: usize) {
        self.inner.lock().class = class;
    }

    /// Spans currently owned by this class.
    pub fn span_count(&self) -> usize {
        self.num_spans.load(Ordering::Relaxed)
    }

    /// Free objects currently parked here.
    pub fn free_object_count(&self) -> usize {
        self.num_free_objects.load(Ordering::Relaxed)
    }

    /// Free bytes parked here.
    pub fn free_bytes(&self) -> usize {
        let class = self.inner.lock().class;
        self.free_object_count() * class_to_size(class)
    }

    /// Fetch up to `dst.len()` objects. A short count means the page
    /// heap could not grow the heap.
    pub fn remove_range(
        &self,
        arena: &Arena,
        pm: &PageMap,
        page_heap: &PageHeap,
        dst: &mut [*mut u8],
    ) -> usize {
        let mut inner = self.inner.lock();
        let class = inner.class;
        let prioritized = config::prioritize_spans();
        let mut got = 0usize;

        while got < dst.len() {
            let span = match inner.pick_span() {
                Some(span) => span,
                None => {
                    let span = page_heap.new_span(arena, pm, class_to_pages(class), class as u8);
                    if span.is_null() {
                        break;
                    }
                    unsafe {
                        let built = (*span).build_freelist(class_to_size(class));
                        self.num_free_objects
                            .fetch_add(built as usize, Ordering::Relaxed);
                        inner.link(span, prioritized);
                    }
                    self.num_spans.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            unsafe {
                inner.unlink(span);
                while got < dst.len() {
                    let obj = (*span).pop_object();
                    if obj.is_null() {
                        break;
                    }
                    dst[got] = obj;
                    got += 1;
                }
                if (*span).free_objects > 0 {
                    inner.link(span, prioritized);
                }
                // Fully drawn-down spans stay unlinked; the pagemap
                // still finds them when their objects come back.
            }
        }

        self.num_free_objects.fetch_sub(got, Ordering::Relaxed);
        got
    }

    /// Accept objects previously drawn from this class. Spans that
    /// become fully free return to the page heap.
    pub fn insert_range(&self, pm: &PageMap, page_heap: &PageHeap, batch: &[*mut u8]) {
        let mut inner = self.inner.lock();
        let prioritized = config::prioritize_spans();
        let class = inner.class;
        let per_span = objects_per_span(class);
        let mut freed_spans = 0usize;
        // Objects on spans handed back to the page heap are gone; only
        // the rest count as parked.
        let mut parked_delta = 0isize;

        for &ptr in batch {
            let (span, _) = match pm.lookup_addr(ptr as usize) {
                Some(found) => found,
                // Not ours: invalid deallocate is undefined behavior in
                // release builds; drop the pointer on the floor.
                None => {
                    debug_assert!(false, "insert_range: unknown pointer");
                    continue;
                }
            };
            unsafe {
                let was_empty = (*span).free_objects == 0;
                (*span).push_object(ptr);
                parked_delta += 1;

                if (*span).free_objects as usize == per_span {
                    if !was_empty {
                        inner.unlink(span);
                    }
                    freed_spans += 1;
                    parked_delta -= per_span as isize;
                    page_heap.delete_span(pm, span);
                    continue;
                }

                if was_empty {
                    inner.link(span, prioritized);
                } else if prioritized {
                    let new_bucket =
                        bucket_for((*span).free_objects as usize, per_span, prioritized);
                    if new_bucket != (*span).cache_bucket as usize {
                        inner.unlink(span);
                        inner.link(span, prioritized);
                    }
                }
            }
        }

        if freed_spans > 0 {
            self.num_spans.fetch_sub(freed_spans, Ordering::Relaxed);
        }
        if parked_delta >= 0 {
            self.num_free_objects
                .fetch_add(parked_delta as usize, Ordering::Relaxed);
        } else {
            self.num_free_objects
                .fetch_sub((-parked_delta) as usize, Ordering::Relaxed);
        }
    }
}

#[inline]
fn bucket_for(free_objects: usize, per_span: usize, prioritized: bool) -> usize {
    if !prioritized {
        return 0;
    }
    (free_objects * NUM_BUCKETS / per_span).min(NUM_BUCKETS - 1)
}

impl CentralInner {
    /// Span to draw from next: fewest free objects first when
    /// prioritized, plain LIFO otherwise (everything bins to bucket 0).
    fn pick_span(&mut self) -> Option<*mut Span> {
        for bucket in self.nonempty.iter() {
            if !bucket.is_empty() {
                return Some(bucket.first());
            }
        }
        None
    }

    /// # Safety
    /// `span` must not be on any list.
    unsafe fn link(&mut self, span: *mut Span, prioritized: bool) {
        let per_span = objects_per_span(self.class);
        let b = bucket_for((*span).free_objects as usize, per_span, prioritized);
        (*span).cache_bucket = b as u8;
        self.nonempty[b].push_front(span);
    }

    /// # Safety
    /// `span` must be on the nonempty list recorded in `cache_bucket`.
    unsafe fn unlink(&mut self, span: *mut Span) {
        self.nonempty[(*span).cache_bucket as usize].remove(span);
    }
}
