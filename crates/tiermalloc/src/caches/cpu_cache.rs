//! Per-CPU cache policy: capacity budgets, miss accounting, and the
//! shuffle/reclaim machinery over the [`PerCpuSlab`] primitive.
//!
//! Every CPU owns a byte budget (`capacity`), of which some is granted
//! to class slot arrays (`allocated`) and the rest is headroom
//! (`unallocated`). Underflows and overflows grow the hungry class,
//! paying first from headroom, then by shrinking a sibling class on the
//! same CPU, and periodically by stealing whole budget from colder
//! CPUs.

use crate::caches::percpu::{PerCpuSlab, SLAB_SHIFT};
use crate::caches::Tiers;
use crate::config;
use crate::platform;
use crate::size_class::{batch_size, class_to_size, NUM_CLASSES};
use crate::sync::RawMutex;
use crate::util::sat_sub;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Fraction of `max_per_cpu_cache_size` below which shuffle stops
/// draining a cold CPU.
pub const CACHE_CAPACITY_THRESHOLD: f64 = 0.20;

/// Budget moved per shuffle step: 5% of the per-CPU maximum.
const SHUFFLE_STEAL_FRACTION: usize = 20;

/// Which consumer an interval miss window belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MissConsumer {
    Shuffle,
    Reclaim,
    Resize,
}

/// Underflow/overflow counts, total or per interval window.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct MissStats {
    pub underflows: u64,
    pub overflows: u64,
}

impl MissStats {
    pub fn total(&self) -> u64 {
        self.underflows + self.overflows
    }
}

struct PerCpuState {
    /// Serializes capacity changes and remote drains for this CPU.
    resize_lock: RawMutex,
    /// Byte budget for this CPU's cache.
    capacity_bytes: AtomicUsize,
    /// Bytes granted to class slot arrays.
    allocated_bytes: AtomicUsize,
    underflows: AtomicU64,
    overflows: AtomicU64,
    /// Interval snapshots: [underflows, overflows] per consumer.
    snapshots: [[AtomicU64; 2]; 3],
    populated: AtomicBool,
    num_reclaims: AtomicU64,
    last_reclaim_epoch: AtomicU64,
    /// Round-robin cursor for same-CPU capacity stealing.
    next_steal_class: AtomicUsize,
}

impl PerCpuState {
    const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        const PAIR: [AtomicU64; 2] = [ZERO, ZERO];
        PerCpuState {
            resize_lock: RawMutex::new(),
            capacity_bytes: AtomicUsize::new(0),
            allocated_bytes: AtomicUsize::new(0),
            underflows: ZERO,
            overflows: ZERO,
            snapshots: [PAIR, PAIR, PAIR],
            populated: AtomicBool::new(false),
            num_reclaims: ZERO,
            last_reclaim_epoch: ZERO,
            next_steal_class: AtomicUsize::new(1),
        }
    }
}

/// Metadata footprint of the slab region.
#[derive(Clone, Copy, Default, Debug)]
pub struct SlabMetadata {
    pub virtual_size: usize,
    pub resident_size: usize,
}

pub struct CpuCache {
    slab: UnsafeCell<PerCpuSlab>,
    /// Arena array, one state per CPU. Set once at activation.
    states: UnsafeCell<*mut PerCpuState>,
    region: UnsafeCell<*mut u8>,
    region_bytes: AtomicUsize,
    num_cpus: AtomicUsize,
    active: AtomicBool,
    reclaim_epoch: AtomicU64,
}

unsafe impl Send for CpuCache {}
unsafe impl Sync for CpuCache {}

impl CpuCache {
    pub const fn new() -> Self {
        CpuCache {
            slab: UnsafeCell::new(PerCpuSlab::empty()),
            states: UnsafeCell::new(core::ptr::null_mut()),
            region: UnsafeCell::new(core::ptr::null_mut()),
            region_bytes: AtomicUsize::new(0),
            num_cpus: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            reclaim_epoch: AtomicU64::new(0),
        }
    }

    fn slab(&self) -> &PerCpuSlab {
        unsafe { &*self.slab.get() }
    }

    fn state(&self, cpu: usize) -> &PerCpuState {
        unsafe { &*(*self.states.get()).add(cpu) }
    }

    /// Whether the fast paths are live. Loaded before any per-CPU
    /// access.
    #[inline(always)]
    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
    fn platform_supported() -> bool {
        crate::platform::rseq::rseq_ptr().is_some() && crate::platform::rseq::register_fence()
    }

    #[cfg(not(all(target_os = "linux", target_arch = "x86_64", feature = "percpu")))]
    fn platform_supported() -> bool {
        false
    }

    /// Map the slab region and arm the fast paths. One-way edge from
    /// the inactive state; idempotent once active. Returns false when
    /// the platform cannot support per-CPU operation (no rseq, no rseq
    /// fence) or mapping fails.
    pub fn activate(&self, arena: &crate::arena::Arena) -> bool {
        if self.active() {
            return true;
        }
        if !Self::platform_supported() {
            return false;
        }
        let cpus = platform::num_cpus();
        let bytes = cpus << SLAB_SHIFT;
        let region = unsafe { platform::map_anonymous(bytes) };
        if region.is_null() {
            return false;
        }
        unsafe {
            if !(*self.slab.get()).init(region, cpus as u32) {
                platform::unmap(region, bytes);
                return false;
            }
            let states = arena.alloc_or_die(
                cpus * core::mem::size_of::<PerCpuState>(),
                core::mem::align_of::<PerCpuState>(),
            ) as *mut PerCpuState;
            for i in 0..cpus {
                // Capacity is granted when a CPU first populates, so
                // idle CPUs hold no stealable budget.
                states.add(i).write(PerCpuState::new());
            }
            *self.states.get() = states;
            *self.region.get() = region;
        }
        self.region_bytes.store(bytes, Ordering::Relaxed);
        self.num_cpus.store(cpus, Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
        true
    }

    /// Drain every CPU and disarm the fast paths.
    pub fn deactivate(&self, t: &Tiers) {
        if !self.active() {
            return;
        }
        self.active.store(false, Ordering::Release);
        for cpu in 0..self.num_cpus.load(Ordering::Relaxed) {
            self.reclaim(t, cpu);
        }
    }

    // ── fast paths ───────────────────────────────────────────────────

    /// Allocate one object of `class`. Null only when the heap itself
    /// is exhausted.
    #[inline]
    pub fn allocate(&self, t: &Tiers, class: usize) -> *mut u8 {
        #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
        {
            if let Some(rseq) = crate::platform::rseq::rseq_ptr() {
                unsafe {
                    if let Some(ptr) = self.slab().pop(rseq, class) {
                        return ptr;
                    }
                    // One retry distinguishes migration aborts from a
                    // genuinely empty class.
                    if let Some(ptr) = self.slab().pop(rseq, class) {
                        return ptr;
                    }
                }
                return self.underflow(t, class, rseq);
            }
        }
        self.fallback_allocate(t, class)
    }

    /// Return one object of `class`.
    #[inline]
    pub fn deallocate(&self, t: &Tiers, class: usize, ptr: *mut u8) {
        #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
        {
            if let Some(rseq) = crate::platform::rseq::rseq_ptr() {
                unsafe {
                    if self.slab().push(rseq, class, ptr).is_some() {
                        return;
                    }
                    if self.slab().push(rseq, class, ptr).is_some() {
                        return;
                    }
                }
                self.overflow(t, class, ptr, rseq);
                return;
            }
        }
        self.fallback_deallocate(t, class, ptr);
    }

    #[cold]
    fn fallback_allocate(&self, t: &Tiers, class: usize) -> *mut u8 {
        let mut buf = [core::ptr::null_mut::<u8>(); 1];
        if t.fetch(class, &mut buf) == 0 {
            return core::ptr::null_mut();
        }
        buf[0]
    }

    #[cold]
    fn fallback_deallocate(&self, t: &Tiers, class: usize, ptr: *mut u8) {
        t.stash(class, &[ptr]);
    }

    // ── slow paths ───────────────────────────────────────────────────

    #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
    #[cold]
    fn underflow(
        &self,
        t: &Tiers,
        class: usize,
        rseq: *mut crate::platform::rseq::Rseq,
    ) -> *mut u8 {
        let cpu = platform::current_cpu().min(self.num_cpus.load(Ordering::Relaxed) - 1);
        let state = self.state(cpu);
        state.underflows.fetch_add(1, Ordering::Relaxed);
        self.populate(cpu);

        state.resize_lock.lock();
        // Make room for a batch if the class has none. The two header
        // reads can straddle a remote shrink, so subtract saturating.
        let slab = self.slab();
        let batch = batch_size(class);
        let room = slab
            .capacity(cpu as u32, class)
            .saturating_sub(slab.length(cpu as u32, class));
        if room < batch {
            self.grow_class(cpu, class, (batch - room) as u16);
        }

        let room = slab
            .capacity(cpu as u32, class)
            .saturating_sub(slab.length(cpu as u32, class));
        let want = batch.min(room.max(1)).min(64);
        let mut buf = [core::ptr::null_mut::<u8>(); 64];
        let got = t.fetch(class, &mut buf[..want]);
        state.resize_lock.unlock();
        if got == 0 {
            return core::ptr::null_mut();
        }

        let result = buf[0];
        // Cache the remainder; aborts retry, a full class (capacity
        // stolen underneath us) sends the leftovers back down.
        let mut idx = 1;
        while idx < got {
            let mut pushed = false;
            for _ in 0..2 {
                if unsafe { slab.push(rseq, class, buf[idx]) }.is_some() {
                    pushed = true;
                    break;
                }
            }
            if !pushed {
                break;
            }
            idx += 1;
        }
        if idx < got {
            t.stash(class, &buf[idx..got]);
        }
        result
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
    #[cold]
    fn overflow(
        &self,
        t: &Tiers,
        class: usize,
        ptr: *mut u8,
        rseq: *mut crate::platform::rseq::Rseq,
    ) {
        let cpu = platform::current_cpu().min(self.num_cpus.load(Ordering::Relaxed) - 1);
        let state = self.state(cpu);
        state.overflows.fetch_add(1, Ordering::Relaxed);
        self.populate(cpu);

        let slab = self.slab();
        let batch = batch_size(class);

        // Growing beats draining while the class is under its ceiling.
        state.resize_lock.lock();
        let grown = self.grow_class(cpu, class, batch as u16);
        state.resize_lock.unlock();
        if grown > 0 {
            for _ in 0..2 {
                if unsafe { slab.push(rseq, class, ptr) }.is_some() {
                    return;
                }
            }
        }

        // Drain one batch plus the overflowing object.
        let mut buf = [core::ptr::null_mut::<u8>(); 65];
        let mut got = 0usize;
        while got < batch {
            let popped = unsafe { slab.pop(rseq, class) }
                .or_else(|| unsafe { slab.pop(rseq, class) });
            match popped {
                Some(p) => {
                    buf[got] = p;
                    got += 1;
                }
                None => break,
            }
        }
        buf[got] = ptr;
        got += 1;
        t.stash(class, &buf[..got]);
    }

    /// First miss on a CPU grants it the full byte budget.
    fn populate(&self, cpu: usize) {
        let state = self.state(cpu);
        if !state.populated.swap(true, Ordering::Relaxed) {
            state
                .capacity_bytes
                .store(config::max_per_cpu_cache_size(), Ordering::Relaxed);
        }
    }

    /// Grow `class` on `cpu` by up to `want` slots, paying from the
    /// CPU's headroom and then from sibling classes. Returns slots
    /// granted. Caller holds the CPU's resize lock.
    fn grow_class(&self, cpu: usize, class: usize, want: u16) -> u16 {
        let state = self.state(cpu);
        let size = class_to_size(class);
        let want_bytes = want as usize * size;

        let capacity = state.capacity_bytes.load(Ordering::Relaxed);
        let allocated = state.allocated_bytes.load(Ordering::Relaxed);
        let mut headroom = capacity.saturating_sub(allocated);
        if headroom < want_bytes {
            self.steal_from_siblings(cpu, class, want_bytes - headroom);
            let allocated = state.allocated_bytes.load(Ordering::Relaxed);
            headroom = capacity.saturating_sub(allocated);
        }

        let grant = (headroom / size).min(want as usize) as u16;
        if grant == 0 {
            return 0;
        }
        let granted = self.slab().grow_end(cpu as u32, class, grant);
        state
            .allocated_bytes
            .fetch_add(granted as usize * size, Ordering::Relaxed);
        granted
    }

    /// Round-robin over sibling classes on the same CPU, shrinking
    /// unused slot capacity until `bytes_needed` is freed. Caller holds
    /// the CPU's resize lock.
    fn steal_from_siblings(&self, cpu: usize, skip_class: usize, bytes_needed: usize) {
        let state = self.state(cpu);
        let slab = self.slab();
        let mut freed = 0usize;
        let start = state.next_steal_class.load(Ordering::Relaxed);

        for i in 0..NUM_CLASSES - 1 {
            if freed >= bytes_needed {
                break;
            }
            let class = 1 + (start + i - 1) % (NUM_CLASSES - 1);
            if class == skip_class {
                continue;
            }
            let size = class_to_size(class);
            let (cur, end) = slab.lock_header(cpu as u32, class);
            #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
            crate::platform::rseq::fence();
            let slack = end - cur;
            if slack == 0 {
                slab.unlock_header(cpu as u32, class, cur, end);
                continue;
            }
            let need_slots = (bytes_needed - freed).div_ceil(size).min(slack as usize) as u16;
            slab.unlock_header(cpu as u32, class, cur, end - need_slots);
            let bytes = need_slots as usize * size;
            state.allocated_bytes.fetch_sub(bytes, Ordering::Relaxed);
            freed += bytes;
            state
                .next_steal_class
                .store(1 + class % (NUM_CLASSES - 1), Ordering::Relaxed);
        }
    }

    // ── shuffle / reclaim ────────────────────────────────────────────

    /// Move budget from the coldest CPUs to the one missing hardest.
    /// Total capacity across CPUs is preserved.
    pub fn shuffle(&self) {
        if !self.active() {
            return;
        }
        let cpus = self.num_cpus.load(Ordering::Relaxed);
        let max_size = config::max_per_cpu_cache_size();
        let floor = (max_size as f64 * CACHE_CAPACITY_THRESHOLD) as usize;

        let mut thief = usize::MAX;
        let mut thief_delta = 0u64;
        for cpu in 0..cpus {
            let delta = self.interval_miss_stats(cpu, MissConsumer::Shuffle).total();
            if delta > thief_delta {
                thief_delta = delta;
                thief = cpu;
            }
        }

        if thief != usize::MAX {
            let to_steal = max_size / SHUFFLE_STEAL_FRACTION;
            let mut stolen = 0usize;
            // Coldest victims first.
            while stolen < to_steal {
                let mut victim = usize::MAX;
                let mut victim_delta = u64::MAX;
                for cpu in 0..cpus {
                    if cpu == thief {
                        continue;
                    }
                    let cap = self.state(cpu).capacity_bytes.load(Ordering::Relaxed);
                    if cap <= floor {
                        continue;
                    }
                    let delta = self.interval_miss_stats(cpu, MissConsumer::Shuffle).total();
                    if delta < victim_delta && delta < thief_delta {
                        victim_delta = delta;
                        victim = cpu;
                    }
                }
                if victim == usize::MAX {
                    break;
                }
                let taken = self.move_budget(victim, thief, to_steal - stolen, floor);
                if taken == 0 {
                    break;
                }
                stolen += taken;
            }
        }

        for cpu in 0..cpus {
            self.update_interval(cpu, MissConsumer::Shuffle);
        }
    }

    /// Transfer up to `bytes` of budget, leaving the victim at least
    /// `floor`. Shrinks the victim's unused slot grants to fit the new
    /// budget.
    fn move_budget(&self, victim: usize, thief: usize, bytes: usize, floor: usize) -> usize {
        let vstate = self.state(victim);
        vstate.resize_lock.lock();
        let cap = vstate.capacity_bytes.load(Ordering::Relaxed);
        let take = bytes.min(cap.saturating_sub(floor));
        if take == 0 {
            vstate.resize_lock.unlock();
            return 0;
        }
        vstate.capacity_bytes.fetch_sub(take, Ordering::Relaxed);
        // Trim slot grants that no longer fit the budget.
        let new_cap = cap - take;
        let allocated = vstate.allocated_bytes.load(Ordering::Relaxed);
        if allocated > new_cap {
            self.steal_from_siblings(victim, 0, allocated - new_cap);
        }
        vstate.resize_lock.unlock();

        self.state(thief)
            .capacity_bytes
            .fetch_add(take, Ordering::Relaxed);
        take
    }

    /// Drain CPUs that had zero misses but hold objects. A CPU
    /// reclaimed in the previous interval is skipped to avoid
    /// thrashing.
    pub fn try_reclaiming(&self, t: &Tiers) {
        if !self.active() {
            return;
        }
        let epoch = self.reclaim_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        for cpu in 0..self.num_cpus.load(Ordering::Relaxed) {
            let state = self.state(cpu);
            if !state.populated.load(Ordering::Relaxed) {
                continue;
            }
            let misses = self.interval_miss_stats(cpu, MissConsumer::Reclaim);
            self.update_interval(cpu, MissConsumer::Reclaim);
            if misses.total() != 0 || self.used_bytes(cpu) == 0 {
                continue;
            }
            if state.last_reclaim_epoch.load(Ordering::Relaxed) + 1 == epoch {
                continue;
            }
            self.reclaim(t, cpu);
            state.last_reclaim_epoch.store(epoch, Ordering::Relaxed);
        }
    }

    /// Drain every cached object of `cpu` back down the tiers, keeping
    /// the CPU's capacity.
    pub fn reclaim(&self, t: &Tiers, cpu: usize) {
        let state = self.state(cpu);
        let slab = self.slab();
        state.resize_lock.lock();

        let mut saved = [(0u16, 0u16); NUM_CLASSES];
        for class in 1..NUM_CLASSES {
            saved[class] = slab.lock_header(cpu as u32, class);
        }
        #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
        crate::platform::rseq::fence();

        for class in 1..NUM_CLASSES {
            let (cur, end) = saved[class];
            let mut remaining = cur;
            let begin = slab.begin(class);
            while remaining > begin {
                let mut buf = [core::ptr::null_mut::<u8>(); 64];
                let n = unsafe { slab.read_locked(cpu as u32, class, remaining, &mut buf) };
                if n == 0 {
                    break;
                }
                t.stash(class, &buf[..n]);
                remaining -= n as u16;
            }
            slab.unlock_header(cpu as u32, class, begin, end);
        }

        state.num_reclaims.fetch_add(1, Ordering::Relaxed);
        state.resize_lock.unlock();
    }

    // ── observation ──────────────────────────────────────────────────

    pub fn capacity(&self, cpu: usize) -> usize {
        self.state(cpu).capacity_bytes.load(Ordering::Relaxed)
    }

    /// Bytes granted to slot arrays on `cpu`.
    pub fn allocated(&self, cpu: usize) -> usize {
        self.state(cpu).allocated_bytes.load(Ordering::Relaxed)
    }

    /// Budget headroom on `cpu`.
    pub fn unallocated(&self, cpu: usize) -> usize {
        sat_sub(self.capacity(cpu) as u64, self.allocated(cpu) as u64) as usize
    }

    /// Bytes of live cached objects on `cpu`.
    pub fn used_bytes(&self, cpu: usize) -> usize {
        let slab = self.slab();
        let mut total = 0;
        for class in 1..NUM_CLASSES {
            total += slab.length(cpu as u32, class) * class_to_size(class);
        }
        total
    }

    pub fn total_used_bytes(&self) -> usize {
        if !self.active() {
            return 0;
        }
        (0..self.num_cpus.load(Ordering::Relaxed))
            .map(|cpu| self.used_bytes(cpu))
            .sum()
    }

    /// Objects of `class` cached across all CPUs.
    pub fn total_objects_of_class(&self, class: usize) -> usize {
        if !self.active() {
            return 0;
        }
        (0..self.num_cpus.load(Ordering::Relaxed))
            .map(|cpu| self.slab().length(cpu as u32, class))
            .sum()
    }

    pub fn total_miss_stats(&self, cpu: usize) -> MissStats {
        let state = self.state(cpu);
        MissStats {
            underflows: state.underflows.load(Ordering::Relaxed),
            overflows: state.overflows.load(Ordering::Relaxed),
        }
    }

    /// Misses accumulated since `consumer` last called
    /// [`CpuCache::update_interval`] for this CPU.
    pub fn interval_miss_stats(&self, cpu: usize, consumer: MissConsumer) -> MissStats {
        let state = self.state(cpu);
        let snap = &state.snapshots[consumer as usize];
        let total = self.total_miss_stats(cpu);
        MissStats {
            underflows: sat_sub(total.underflows, snap[0].load(Ordering::Relaxed)),
            overflows: sat_sub(total.overflows, snap[1].load(Ordering::Relaxed)),
        }
    }

    pub fn update_interval(&self, cpu: usize, consumer: MissConsumer) {
        let state = self.state(cpu);
        let total = self.total_miss_stats(cpu);
        let snap = &state.snapshots[consumer as usize];
        snap[0].store(total.underflows, Ordering::Relaxed);
        snap[1].store(total.overflows, Ordering::Relaxed);
    }

    pub fn populated(&self, cpu: usize) -> bool {
        self.state(cpu).populated.load(Ordering::Relaxed)
    }

    pub fn num_reclaims(&self, cpu: usize) -> u64 {
        self.state(cpu).num_reclaims.load(Ordering::Relaxed)
    }

    pub fn num_cpus_view(&self) -> usize {
        self.num_cpus.load(Ordering::Relaxed)
    }

    pub fn metadata_usage(&self) -> SlabMetadata {
        let bytes = self.region_bytes.load(Ordering::Relaxed);
        if bytes == 0 {
            return SlabMetadata::default();
        }
        let region = unsafe { *self.region.get() };
        SlabMetadata {
            virtual_size: bytes,
            resident_size: unsafe { platform::resident_bytes(region, bytes) },
        }
    }

}
