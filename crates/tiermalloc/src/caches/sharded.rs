//! Sharded transfer cache: one transfer cache per last-level-cache
//! shard, for large classes whose batches are small enough that the
//! global per-class lock becomes the bottleneck.
//!
//! Shards materialize lazily: until the first push from a CPU in a
//! shard, `should_use` answers false for that CPU and traffic stays on
//! the regular transfer tier.

use crate::arena::Arena;
use crate::caches::Tiers;
use crate::config;
use crate::platform;
use crate::size_class::{batch_size, class_to_size, NUM_CLASSES};
use crate::sync::Mutex;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Upper bound on supported shards; actual count comes from the CPU
/// topology at init.
const MAX_SHARDS: usize = 64;

/// CPUs sharing one L3 shard. Injected topology would refine this; the
/// default mirrors common 8-cores-per-CCX parts.
const CPUS_PER_SHARD: usize = 8;

/// Slots per eligible class within a shard, in batches.
const SHARD_BATCHES: usize = 16;

struct ClassStack {
    slots: *mut *mut u8,
    used: usize,
    capacity: usize,
}

struct Shard {
    caches: [Mutex<ClassStack>; NUM_CLASSES],
}

unsafe impl Send for ClassStack {}

pub struct ShardedTransferCache {
    shards: [AtomicPtr<Shard>; MAX_SHARDS],
    num_shards: AtomicUsize,
}

impl ShardedTransferCache {
    pub const fn new() -> Self {
        const NULL: AtomicPtr<Shard> = AtomicPtr::new(core::ptr::null_mut());
        ShardedTransferCache {
            shards: [NULL; MAX_SHARDS],
            num_shards: AtomicUsize::new(0),
        }
    }

    pub fn init(&self) {
        let shards = platform::num_cpus().div_ceil(CPUS_PER_SHARD).min(MAX_SHARDS);
        self.num_shards.store(shards, Ordering::Relaxed);
    }

    #[inline]
    fn shard_for_cpu(cpu: usize) -> usize {
        (cpu / CPUS_PER_SHARD).min(MAX_SHARDS - 1)
    }

    #[inline]
    fn eligible(class: usize) -> bool {
        class_to_size(class) >= config::sharded_transfer_cache_min_size()
    }

    /// Whether `class` belongs on the sharded path at all. Pushes for
    /// eligible classes materialize the calling CPU's shard.
    pub fn eligible_class(&self, class: usize) -> bool {
        self.num_shards.load(Ordering::Relaxed) != 0 && Self::eligible(class)
    }

    /// Whether the sharded path serves `class` for the calling CPU.
    /// False until the owning shard has been materialized by a push.
    pub fn should_use(&self, class: usize) -> bool {
        if !self.eligible_class(class) {
            return false;
        }
        let shard = Self::shard_for_cpu(platform::current_cpu());
        !self.shards[shard].load(Ordering::Acquire).is_null()
    }

    #[cold]
    fn materialize(&self, arena: &Arena, shard: usize) -> *mut Shard {
        let new = arena.alloc_or_die(
            core::mem::size_of::<Shard>(),
            core::mem::align_of::<Shard>(),
        ) as *mut Shard;
        unsafe {
            for class in 0..NUM_CLASSES {
                let (slots, capacity) = if class > 0 && Self::eligible(class) {
                    let cap = SHARD_BATCHES * batch_size(class);
                    let slots = arena.alloc_or_die(
                        cap * core::mem::size_of::<*mut u8>(),
                        core::mem::align_of::<*mut u8>(),
                    ) as *mut *mut u8;
                    (slots, cap)
                } else {
                    (core::ptr::null_mut(), 0)
                };
                core::ptr::addr_of_mut!((*new).caches[class]).write(Mutex::new(ClassStack {
                    slots,
                    used: 0,
                    capacity,
                }));
            }
        }
        match self.shards[shard].compare_exchange(
            core::ptr::null_mut(),
            new,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => new,
            // Raced with another materialization; the arena bytes are
            // bump-allocated and simply go unused.
            Err(existing) => existing,
        }
    }

    /// Push a batch into the calling CPU's shard, materializing it on
    /// first use. Overflow falls through to the regular transfer tier.
    pub fn insert_range(&self, t: &Tiers, class: usize, batch: &[*mut u8]) {
        if self.num_shards.load(Ordering::Relaxed) == 0 || !Self::eligible(class) {
            t.stash_transfer(class, batch);
            return;
        }
        let shard_idx = Self::shard_for_cpu(platform::current_cpu());
        let mut shard = self.shards[shard_idx].load(Ordering::Acquire);
        if shard.is_null() {
            shard = self.materialize(t.arena, shard_idx);
        }
        let mut kept = 0usize;
        {
            let mut stack = unsafe { (*shard).caches[class].lock() };
            while kept < batch.len() && stack.used < stack.capacity {
                unsafe {
                    *stack.slots.add(stack.used) = batch[kept];
                }
                stack.used += 1;
                kept += 1;
            }
        }
        if kept < batch.len() {
            t.stash_transfer(class, &batch[kept..]);
        }
    }

    /// Pop up to `dst.len()` objects from the calling CPU's shard;
    /// misses fall through to the regular transfer tier.
    pub fn remove_range(&self, t: &Tiers, class: usize, dst: &mut [*mut u8]) -> usize {
        let shard_idx = Self::shard_for_cpu(platform::current_cpu());
        let shard = self.shards[shard_idx].load(Ordering::Acquire);
        let mut got = 0usize;
        if !shard.is_null() {
            let mut stack = unsafe { (*shard).caches[class].lock() };
            while got < dst.len() && stack.used > 0 {
                stack.used -= 1;
                unsafe {
                    dst[got] = *stack.slots.add(stack.used);
                }
                got += 1;
            }
        }
        if got < dst.len() {
            got += t.fetch_transfer(class, &mut dst[got..]);
        }
        got
    }

    /// Bytes parked across all shards.
    pub fn free_bytes(&self) -> usize {
        let mut total = 0usize;
        for shard in self.shards.iter() {
            let shard = shard.load(Ordering::Acquire);
            if shard.is_null() {
                continue;
            }
            for class in 1..NUM_CLASSES {
                if Self::eligible(class) {
                    let stack = unsafe { (*shard).caches[class].lock() };
                    total += stack.used * class_to_size(class);
                }
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Allocator;
    use crate::size_class::size_to_class;

    #[test]
    fn push_materializes_and_serves() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        let t = alloc.tiers();
        let sharded = alloc.sharded();
        let class = size_to_class(8192).unwrap();
        assert!(sharded.eligible_class(class));
        assert_eq!(sharded.free_bytes(), 0);

        let mut buf = [core::ptr::null_mut::<u8>(); 1];
        assert_eq!(t.fetch_transfer(class, &mut buf), 1);
        sharded.insert_range(&t, class, &buf);
        assert!(sharded.free_bytes() >= class_to_size(class));

        let mut out = [core::ptr::null_mut::<u8>(); 1];
        assert_eq!(sharded.remove_range(&t, class, &mut out), 1);
    }

    #[test]
    fn small_classes_stay_off_the_sharded_path() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        let sharded = alloc.sharded();
        let class = size_to_class(64).unwrap();
        assert!(!sharded.eligible_class(class));
        assert!(!sharded.should_use(class));
    }
}
