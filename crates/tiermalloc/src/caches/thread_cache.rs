//! Per-thread cache: the legacy front for platforms without a usable
//! restartable-sequence primitive, and the fallback whenever
//! `per_cpu_caches` is off.
//!
//! Each thread keeps small intrusive freelists per class. List length
//! limits adapt to traffic; crossing the per-thread byte budget
//! scavenges half of every list back down the tiers.

use crate::caches::Tiers;
use crate::config;
use crate::pages::span::FreeObject;
use crate::size_class::{batch_size, class_to_size, NUM_CLASSES};
use core::ptr;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Bytes cached across every live thread cache.
static TOTAL_BYTES: AtomicUsize = AtomicUsize::new(0);
/// Live thread caches.
static THREAD_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn total_thread_cache_bytes() -> usize {
    TOTAL_BYTES.load(Ordering::Relaxed)
}

pub fn thread_cache_count() -> u64 {
    THREAD_COUNT.load(Ordering::Relaxed)
}

struct FreeList {
    head: *mut FreeObject,
    length: u32,
    /// Lists grow toward their batch size as they keep missing.
    max_length: u32,
}

impl FreeList {
    const fn new() -> Self {
        FreeList {
            head: ptr::null_mut(),
            length: 0,
            max_length: 1,
        }
    }

    #[inline]
    fn pop(&mut self) -> *mut FreeObject {
        let obj = self.head;
        if !obj.is_null() {
            self.head = unsafe { (*obj).next };
            self.length -= 1;
        }
        obj
    }

    #[inline]
    fn push(&mut self, obj: *mut FreeObject) {
        unsafe { (*obj).next = self.head };
        self.head = obj;
        self.length += 1;
    }
}

/// One thread's cache. The TLS plumbing lives with the global
/// allocator; the struct itself works against any [`Tiers`].
pub struct ThreadCache {
    lists: [FreeList; NUM_CLASSES],
    total_bytes: usize,
    max_bytes: usize,
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCache {
    pub fn new() -> Self {
        THREAD_COUNT.fetch_add(1, Ordering::Relaxed);
        let threads = THREAD_COUNT.load(Ordering::Relaxed).max(1) as usize;
        ThreadCache {
            lists: [const { FreeList::new() }; NUM_CLASSES],
            total_bytes: 0,
            max_bytes: (config::max_total_thread_cache_bytes() / threads).max(64 * 1024),
        }
    }

    pub fn cached_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Allocate one object of `class`. Null when the heap is exhausted.
    pub fn allocate(&mut self, t: &Tiers, class: usize) -> *mut u8 {
        let list = &mut self.lists[class];
        let obj = list.pop();
        if !obj.is_null() {
            let size = class_to_size(class);
            self.total_bytes -= size;
            TOTAL_BYTES.fetch_sub(size, Ordering::Relaxed);
            return obj as *mut u8;
        }
        self.fetch(t, class)
    }

    /// Return one object of `class`.
    pub fn deallocate(&mut self, t: &Tiers, class: usize, ptr: *mut u8) {
        let size = class_to_size(class);
        let list = &mut self.lists[class];
        list.push(ptr as *mut FreeObject);
        self.total_bytes += size;
        TOTAL_BYTES.fetch_add(size, Ordering::Relaxed);

        if list.length > list.max_length {
            self.release_half(t, class);
        }
        if self.total_bytes > self.max_bytes {
            self.scavenge(t);
        }
    }

    #[cold]
    fn fetch(&mut self, t: &Tiers, class: usize) -> *mut u8 {
        let batch = batch_size(class);
        let mut buf = [ptr::null_mut::<u8>(); 64];
        let got = t.fetch(class, &mut buf[..batch]);
        if got == 0 {
            return ptr::null_mut();
        }

        let result = buf[0];
        let size = class_to_size(class);
        let list = &mut self.lists[class];
        for &obj in buf.iter().take(got).skip(1) {
            list.push(obj as *mut FreeObject);
        }
        let kept = (got - 1) * size;
        self.total_bytes += kept;
        TOTAL_BYTES.fetch_add(kept, Ordering::Relaxed);

        // Let the list hold the batch we just fetched, so the next few
        // frees stay local.
        if (list.max_length as usize) < got {
            list.max_length = got as u32;
        }
        result
    }

    fn release_half(&mut self, t: &Tiers, class: usize) {
        let list = &mut self.lists[class];
        let drop_count = (list.length / 2) as usize;
        if drop_count == 0 {
            return;
        }
        let mut buf = [ptr::null_mut::<u8>(); 64];
        let mut released = 0usize;
        while released < drop_count {
            let step = (drop_count - released).min(buf.len());
            let mut taken = 0usize;
            while taken < step {
                let obj = list.pop();
                if obj.is_null() {
                    break;
                }
                buf[taken] = obj as *mut u8;
                taken += 1;
            }
            if taken == 0 {
                break;
            }
            t.stash(class, &buf[..taken]);
            released += taken;
        }
        let bytes = released * class_to_size(class);
        self.total_bytes -= bytes;
        TOTAL_BYTES.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Bring the cache under half its budget, emptiest-first not
    /// required: every class gives up half.
    #[cold]
    fn scavenge(&mut self, t: &Tiers) {
        let target = self.max_bytes / 2;
        for class in 1..NUM_CLASSES {
            if self.total_bytes <= target {
                break;
            }
            if self.lists[class].length > 0 {
                self.release_half(t, class);
            }
        }
    }

    /// Return everything. Called at thread exit.
    pub fn drain_all(&mut self, t: &Tiers) {
        for class in 1..NUM_CLASSES {
            while self.lists[class].length > 0 {
                self.release_half(t, class);
                if self.lists[class].length == 1 {
                    let obj = self.lists[class].pop();
                    t.stash(class, &[obj as *mut u8]);
                    let size = class_to_size(class);
                    self.total_bytes -= size;
                    TOTAL_BYTES.fetch_sub(size, Ordering::Relaxed);
                }
            }
        }
    }
}

impl Drop for ThreadCache {
    fn drop(&mut self) {
        THREAD_COUNT.fetch_sub(1, Ordering::Relaxed);
        // Any remaining cached bytes were drained by the TLS wrapper;
        // correct the global count for whatever is left regardless.
        TOTAL_BYTES.fetch_sub(self.total_bytes, Ordering::Relaxed);
    }
}
