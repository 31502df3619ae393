//! The allocator instance and its client-facing operations.
//!
//! `Allocator` owns every tier. The process-wide singleton lives in
//! [`crate::init`]; tests build private instances and drive them
//! directly.

use crate::arena::Arena;
use crate::caches::central::CentralFreeList;
use crate::caches::cpu_cache::CpuCache;
use crate::caches::sharded::ShardedTransferCache;
use crate::caches::thread_cache::ThreadCache;
use crate::caches::transfer::TransferCaches;
use crate::caches::Tiers;
use crate::config;
use crate::pages::page_heap::PageHeap;
use crate::pages::page_map::PageMap;
use crate::size_class::{class_to_size, size_to_class, NUM_CLASSES};
use crate::util::{MIN_ALIGN, PAGE_SIZE};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Installable out-of-memory handler. Receives the request size and may
/// return a replacement pointer (the default returns null).
pub type OomHandler = fn(usize) -> *mut u8;

fn default_oom_handler(_size: usize) -> *mut u8 {
    core::ptr::null_mut()
}

/// A complete allocator: arena, page map, page heap, central lists,
/// transfer tiers, and the per-CPU front.
pub struct Allocator {
    arena: Arena,
    page_map: UnsafeCell<PageMap>,
    page_heap: PageHeap,
    central: [CentralFreeList; NUM_CLASSES],
    transfer: TransferCaches,
    sharded: ShardedTransferCache,
    cpu_cache: CpuCache,
    initialized: AtomicBool,
    /// Only the process singleton routes through thread-local caches;
    /// private instances would otherwise share TLS state.
    use_thread_cache: AtomicBool,
    oom_handler: AtomicUsize,
    oom_count: AtomicU64,
}

unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    pub const fn new() -> Self {
        const CFL: CentralFreeList = CentralFreeList::new();
        Allocator {
            arena: Arena::new(),
            page_map: UnsafeCell::new(PageMap::new()),
            page_heap: PageHeap::new(),
            central: [CFL; NUM_CLASSES],
            transfer: TransferCaches::new(),
            sharded: ShardedTransferCache::new(),
            cpu_cache: CpuCache::new(),
            initialized: AtomicBool::new(false),
            use_thread_cache: AtomicBool::new(false),
            oom_handler: AtomicUsize::new(0),
            oom_count: AtomicU64::new(0),
        }
    }

    /// Bring the instance up. Idempotent; returns false when the page
    /// map cannot be mapped.
    pub fn init(&self) -> bool {
        if self.initialized.load(Ordering::Acquire) {
            return true;
        }
        unsafe {
            if !(*self.page_map.get()).init() {
                return false;
            }
        }
        self.transfer.init(&self.arena);
        for class in 1..NUM_CLASSES {
            self.central[class].init(class);
        }
        self.sharded.init();
        if config::per_cpu_caches() {
            // Best-effort: platforms without rseq fall back to the
            // thread-cache front.
            self.cpu_cache.activate(&self.arena);
        }
        self.initialized.store(true, Ordering::Release);
        true
    }

    /// Route this instance's small-object traffic through thread-local
    /// caches when the per-CPU front is unavailable. Only the process
    /// singleton may do this.
    pub(crate) fn enable_thread_cache(&self) {
        self.use_thread_cache.store(true, Ordering::Relaxed);
    }

    #[inline]
    fn pm(&self) -> &PageMap {
        unsafe { &*self.page_map.get() }
    }

    #[inline]
    pub fn tiers(&self) -> Tiers<'_> {
        Tiers {
            arena: &self.arena,
            pm: self.pm(),
            page_heap: &self.page_heap,
            central: &self.central,
            transfer: &self.transfer,
            sharded: Some(&self.sharded),
        }
    }

    // ── allocation ───────────────────────────────────────────────────

    /// Allocate `size` bytes at the platform minimum alignment.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        match size_to_class(size) {
            Some(class) => self.allocate_small(class, size),
            None => self.allocate_large(size.div_ceil(PAGE_SIZE), size),
        }
    }

    /// Allocate `size` bytes whose address is a multiple of `align`
    /// (a power of two).
    pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two());
        if align <= MIN_ALIGN {
            return self.allocate(size);
        }
        if align <= PAGE_SIZE {
            // Any class whose size is a multiple of `align` yields
            // aligned objects: spans are page-aligned and objects are
            // packed at multiples of the object size.
            for class in 1..NUM_CLASSES {
                let s = class_to_size(class);
                if s >= size && s % align == 0 {
                    return self.allocate_small(class, size);
                }
            }
            return self.allocate_large(size.max(1).div_ceil(PAGE_SIZE), size);
        }
        let pages = size.max(1).div_ceil(PAGE_SIZE);
        let span = self
            .page_heap
            .new_span_aligned(&self.arena, self.pm(), pages, align / PAGE_SIZE);
        if span.is_null() {
            return self.handle_oom(size);
        }
        unsafe { (*span).first_page.addr() as *mut u8 }
    }

    fn allocate_small(&self, class: usize, size: usize) -> *mut u8 {
        let t = self.tiers();
        let ptr = if self.cpu_cache.active() {
            self.cpu_cache.allocate(&t, class)
        } else if self.use_thread_cache.load(Ordering::Relaxed) {
            with_thread_cache(|tc| tc.allocate(&t, class))
                .unwrap_or_else(|| self.direct_allocate(class))
        } else {
            self.direct_allocate(class)
        };
        if ptr.is_null() {
            return self.handle_oom(size);
        }
        ptr
    }

    fn direct_allocate(&self, class: usize) -> *mut u8 {
        let t = self.tiers();
        let mut buf = [core::ptr::null_mut::<u8>(); 1];
        if t.fetch(class, &mut buf) == 0 {
            return core::ptr::null_mut();
        }
        buf[0]
    }

    fn allocate_large(&self, pages: usize, size: usize) -> *mut u8 {
        let span = self
            .page_heap
            .new_span(&self.arena, self.pm(), pages.max(1), 0);
        if span.is_null() {
            return self.handle_oom(size);
        }
        unsafe { (*span).first_page.addr() as *mut u8 }
    }

    #[cold]
    fn handle_oom(&self, size: usize) -> *mut u8 {
        self.oom_count.fetch_add(1, Ordering::Relaxed);
        let raw = self.oom_handler.load(Ordering::Relaxed);
        let handler: OomHandler = if raw == 0 {
            default_oom_handler
        } else {
            unsafe { core::mem::transmute::<usize, OomHandler>(raw) }
        };
        handler(size)
    }

    /// Install a replacement OOM handler.
    pub fn set_oom_handler(&self, handler: OomHandler) {
        self.oom_handler.store(handler as usize, Ordering::Relaxed);
    }

    pub fn oom_count(&self) -> u64 {
        self.oom_count.load(Ordering::Relaxed)
    }

    // ── deallocation ─────────────────────────────────────────────────

    /// Return an allocation.
    ///
    /// # Safety
    /// `ptr` must have come from this instance and not been freed
    /// since. Violations are undefined behavior in release builds.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        let Some((span, class)) = self.pm().lookup_addr(ptr as usize) else {
            debug_assert!(false, "deallocate: unknown pointer");
            return;
        };
        if class == 0 {
            self.page_heap.delete_span(self.pm(), span);
            return;
        }
        self.deallocate_small(class as usize, ptr);
    }

    /// As [`Allocator::deallocate`], with the original request size as
    /// a hint. Behavior is identical; the size skips the page-map
    /// lookup for class routing.
    ///
    /// # Safety
    /// As [`Allocator::deallocate`]; `size` must match the original
    /// request, and the pointer must not come from
    /// [`Allocator::allocate_aligned`] with an over-minimum alignment
    /// (alignment can promote the allocation to a different class than
    /// the size alone implies).
    pub unsafe fn deallocate_sized(&self, ptr: *mut u8, size: usize) {
        match size_to_class(size) {
            Some(class) => self.deallocate_small(class, ptr),
            None => self.deallocate(ptr),
        }
    }

    unsafe fn deallocate_small(&self, class: usize, ptr: *mut u8) {
        let t = self.tiers();
        if self.cpu_cache.active() {
            self.cpu_cache.deallocate(&t, class, ptr);
        } else if self.use_thread_cache.load(Ordering::Relaxed) {
            if with_thread_cache(|tc| tc.deallocate(&t, class, ptr)).is_none() {
                t.stash(class, &[ptr]);
            }
        } else {
            t.stash(class, &[ptr]);
        }
    }

    /// Usable bytes behind an allocation.
    ///
    /// # Safety
    /// `ptr` must be a live allocation from this instance.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        match self.pm().lookup_addr(ptr as usize) {
            Some((_, class)) if class != 0 => class_to_size(class as usize),
            Some((span, _)) => (*span).num_pages * PAGE_SIZE,
            None => 0,
        }
    }

    /// Advise the OS to reclaim at least `bytes` of free memory.
    /// Returns bytes actually released.
    pub fn release_memory_to_system(&self, bytes: usize) -> usize {
        let pages = bytes.div_ceil(PAGE_SIZE).max(1);
        self.page_heap.release_at_least(pages) * PAGE_SIZE
    }

    // ── component access for stats and the background task ───────────

    pub fn page_heap(&self) -> &PageHeap {
        &self.page_heap
    }

    pub fn page_map(&self) -> &PageMap {
        self.pm()
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn cpu_cache(&self) -> &CpuCache {
        &self.cpu_cache
    }

    pub fn transfer(&self) -> &TransferCaches {
        &self.transfer
    }

    pub fn sharded(&self) -> &ShardedTransferCache {
        &self.sharded
    }

    pub fn central(&self) -> &[CentralFreeList; NUM_CLASSES] {
        &self.central
    }

    pub(crate) fn central_free_bytes(&self) -> usize {
        let mut total = 0;
        for class in 1..NUM_CLASSES {
            total += self.central[class].free_bytes();
        }
        total
    }
}

// ── thread-local front plumbing (process singleton only) ─────────────

struct TlsCache(ThreadCache);

impl Drop for TlsCache {
    fn drop(&mut self) {
        // Objects must not die with the thread; hand them back through
        // the singleton's tiers.
        if let Some(alloc) = crate::init::try_global() {
            self.0.drain_all(&alloc.tiers());
        }
    }
}

std::thread_local! {
    static THREAD_CACHE: core::cell::RefCell<Option<TlsCache>> =
        const { core::cell::RefCell::new(None) };
}

/// Run `f` against the calling thread's cache. `None` during TLS
/// teardown or reentrancy; callers fall back to the direct path.
fn with_thread_cache<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> Option<R> {
    THREAD_CACHE
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            let cache = slot.get_or_insert_with(|| TlsCache(ThreadCache::new()));
            Some(f(&mut cache.0))
        })
        .ok()
        .flatten()
}
