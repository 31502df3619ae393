//! The per-CPU slab: one contiguous region, `2^shift` bytes per CPU.
//!
//! Layout of a CPU's region:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ Header[0]  (4 bytes: current u16 | end u16)         │
//! │ ...                                                 │
//! │ Header[NUM_CLASSES-1]                               │
//! │ (padding to 8-byte alignment)                       │
//! │ Slot array for class 1: [*mut u8; max_capacity[1]]  │
//! │ Slot array for class 2: [*mut u8; max_capacity[2]]  │
//! │ ...                                                 │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! `begin` offsets are static per class; `end` moves within
//! `[begin, begin + max_capacity]` as the policy layer grows and shrinks
//! class capacity. The fast path commits with a single 16-bit store to
//! `current` inside an rseq critical section.
//!
//! Remote mutation (drain, shrink, deactivate) locks a class by swapping
//! its header to `(begin, begin)` — the fast path then reads "empty" and
//! "full" simultaneously and falls to the slow path — followed by one
//! rseq fence so no in-flight commit survives. The remote side then owns
//! the slots until it stores a fresh header.

use crate::size_class::{batch_size, NUM_CLASSES};
use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
use crate::platform::rseq::Rseq;
#[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
use core::arch::asm;

/// Byte offset of `cpu_id` within `struct rseq`.
#[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
const RSEQ_CPU_ID_OFF: u32 = 4;

/// Byte offset of `rseq_cs` within `struct rseq`.
#[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
const RSEQ_CS_OFF: u32 = 8;

/// Log2 of the per-CPU region size: 256 KiB per CPU.
pub const SLAB_SHIFT: u32 = 18;

/// Per-class ceiling on cached objects, sized so the worst-case layout
/// fits the region.
pub fn max_class_capacity(class: usize) -> usize {
    (8 * batch_size(class)).min(2048)
}

pub struct PerCpuSlab {
    slabs: *mut u8,
    num_cpus: u32,
    /// Per-class slot offsets in pointer-sized units, shared by all
    /// CPUs.
    begins: [u16; NUM_CLASSES],
    max_caps: [u16; NUM_CLASSES],
}

unsafe impl Sync for PerCpuSlab {}
unsafe impl Send for PerCpuSlab {}

impl PerCpuSlab {
    pub const fn empty() -> Self {
        Self {
            slabs: core::ptr::null_mut(),
            num_cpus: 0,
            begins: [0u16; NUM_CLASSES],
            max_caps: [0u16; NUM_CLASSES],
        }
    }

    /// Lay out the slab over a caller-provided region of at least
    /// `num_cpus << SLAB_SHIFT` bytes. Every class starts with zero
    /// capacity; the policy layer grows classes on demand.
    ///
    /// # Safety
    /// `region` must be valid, writable, zero-initialized memory of at
    /// least `num_cpus << SLAB_SHIFT` bytes, alive as long as the slab.
    pub unsafe fn init(&mut self, region: *mut u8, num_cpus: u32) -> bool {
        let header_bytes = NUM_CLASSES * 4;
        let data_start = (header_bytes + 7) & !7;
        let mut offset = data_start / 8;

        self.begins[0] = 0;
        for class in 1..NUM_CLASSES {
            self.begins[class] = offset as u16;
            offset += max_class_capacity(class);
        }
        if offset * 8 > (1usize << SLAB_SHIFT) {
            return false;
        }
        for class in 1..NUM_CLASSES {
            self.max_caps[class] = max_class_capacity(class) as u16;
        }
        self.slabs = region;
        self.num_cpus = num_cpus;

        for cpu in 0..num_cpus {
            for class in 1..NUM_CLASSES {
                let begin = self.begins[class];
                self.header(cpu, class)
                    .store(pack(begin, begin), Ordering::Relaxed);
            }
        }
        true
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        !self.slabs.is_null()
    }

    #[inline(always)]
    pub fn num_cpus(&self) -> u32 {
        self.num_cpus
    }

    #[inline(always)]
    pub fn begin(&self, class: usize) -> u16 {
        self.begins[class]
    }

    #[inline(always)]
    pub fn max_capacity(&self, class: usize) -> u16 {
        self.max_caps[class]
    }

    #[inline(always)]
    fn cpu_base(&self, cpu: u32) -> *mut u8 {
        unsafe { self.slabs.add((cpu as usize) << SLAB_SHIFT) }
    }

    #[inline(always)]
    fn header(&self, cpu: u32, class: usize) -> &AtomicU32 {
        unsafe { &*(self.cpu_base(cpu).add(class * 4) as *const AtomicU32) }
    }

    #[inline(always)]
    unsafe fn slot(&self, cpu: u32, index: u16) -> *mut *mut u8 {
        self.cpu_base(cpu).add(index as usize * 8) as *mut *mut u8
    }

    /// Cached object count for `class` on `cpu`.
    pub fn length(&self, cpu: u32, class: usize) -> usize {
        let (cur, _) = unpack(self.header(cpu, class).load(Ordering::Relaxed));
        (cur - self.begins[class]) as usize
    }

    /// Slot capacity currently granted to `class` on `cpu`.
    pub fn capacity(&self, cpu: u32, class: usize) -> usize {
        let (_, end) = unpack(self.header(cpu, class).load(Ordering::Relaxed));
        (end - self.begins[class]) as usize
    }

    // ── rseq fast path ───────────────────────────────────────────────

    /// Pop a pointer from `class` on the current CPU. `None` means the
    /// class is empty on this CPU *or* the critical section aborted;
    /// the caller retries once before taking the slow path.
    ///
    /// # Safety
    /// `rseq` must be the calling thread's registered rseq area;
    /// `class` must be a valid, initialized class.
    #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
    #[inline(never)]
    pub unsafe fn pop(&self, rseq: *mut Rseq, class: usize) -> Option<*mut u8> {
        let class_off = (class * 4) as u64;
        let begin = self.begins[class] as u64;
        let slabs = self.slabs as u64;

        let result: u64;
        let success: u64;

        asm!(
            // rseq_cs descriptor in a relocatable data section.
            ".pushsection __rseq_cs, \"aw\"",
            ".balign 32",
            "77:",
            ".long 0",                     // version
            ".long 0",                     // flags
            ".quad 3f",                    // start_ip
            ".quad (4f - 3f)",             // post_commit_offset
            ".quad 6f",                    // abort_ip
            ".popsection",

            "lea {tmp}, [rip + 77b]",
            "mov qword ptr [{rseq} + {rseq_cs_off}], {tmp}",

            // ── start of critical section ────────────────────────
            "3:",

            // Region base = slabs + (cpu << shift)
            "mov {base:e}, dword ptr [{rseq} + {cpu_id_off}]",
            "shl {base}, cl",
            "add {base}, {slabs}",

            // current (low 16 bits of the header)
            "movzx {cur:e}, word ptr [{base} + {class_off}]",

            // Empty (or remotely locked): current == begin
            "cmp {cur}, {begin}",
            "je 7f",

            "dec {cur:e}",
            "mov {result}, qword ptr [{base} + {cur} * 8]",

            // COMMIT: single 16-bit store of the new current
            "mov word ptr [{base} + {class_off}], {cur:x}",
            "4:",

            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "mov {succ}, 1",
            "jmp 5f",

            // ── empty ────────────────────────────────────────────
            "7:",
            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "xor {succ:e}, {succ:e}",
            "jmp 5f",

            // ── abort handler ────────────────────────────────────
            ".long 0x53053053",
            "6:",
            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "xor {succ:e}, {succ:e}",

            "5:",

            rseq = in(reg) rseq,
            slabs = in(reg) slabs,
            in("rcx") SLAB_SHIFT as u64,
            class_off = in(reg) class_off,
            begin = in(reg) begin,
            base = out(reg) _,
            cur = out(reg) _,
            result = out(reg) result,
            succ = out(reg) success,
            tmp = out(reg) _,
            rseq_cs_off = const RSEQ_CS_OFF,
            cpu_id_off = const RSEQ_CPU_ID_OFF,
            options(nostack),
        );

        if success != 0 {
            Some(result as *mut u8)
        } else {
            None
        }
    }

    /// Push a pointer to `class` on the current CPU. `None` means the
    /// class is full on this CPU *or* the critical section aborted.
    ///
    /// # Safety
    /// As [`PerCpuSlab::pop`]; `ptr` must be a free object of `class`.
    #[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
    #[inline(never)]
    pub unsafe fn push(&self, rseq: *mut Rseq, class: usize, ptr: *mut u8) -> Option<()> {
        let class_off = (class * 4) as u64;
        let slabs = self.slabs as u64;

        let success: u64;

        asm!(
            ".pushsection __rseq_cs, \"aw\"",
            ".balign 32",
            "77:",
            ".long 0",
            ".long 0",
            ".quad 3f",
            ".quad (4f - 3f)",
            ".quad 6f",
            ".popsection",

            "lea {tmp}, [rip + 77b]",
            "mov qword ptr [{rseq} + {rseq_cs_off}], {tmp}",

            // ── start of critical section ────────────────────────
            "3:",

            "mov {base:e}, dword ptr [{rseq} + {cpu_id_off}]",
            "shl {base}, cl",
            "add {base}, {slabs}",

            // Whole header: current | end << 16
            "mov {hdr:e}, dword ptr [{base} + {class_off}]",

            "mov {end_:e}, {hdr:e}",
            "shr {end_:e}, 16",
            "movzx {hdr:e}, {hdr:x}",

            // Full (or remotely locked): current == end
            "cmp {hdr:e}, {end_:e}",
            "je 7f",

            "mov qword ptr [{base} + {hdr} * 8], {ptr}",

            // COMMIT: single 16-bit store of current + 1
            "inc {hdr:e}",
            "mov word ptr [{base} + {class_off}], {hdr:x}",
            "4:",

            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "mov {succ}, 1",
            "jmp 5f",

            "7:",
            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "xor {succ:e}, {succ:e}",
            "jmp 5f",

            ".long 0x53053053",
            "6:",
            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "xor {succ:e}, {succ:e}",

            "5:",

            rseq = in(reg) rseq,
            slabs = in(reg) slabs,
            in("rcx") SLAB_SHIFT as u64,
            class_off = in(reg) class_off,
            ptr = in(reg) ptr,
            base = out(reg) _,
            hdr = out(reg) _,
            end_ = out(reg) _,
            succ = out(reg) success,
            tmp = out(reg) _,
            rseq_cs_off = const RSEQ_CS_OFF,
            cpu_id_off = const RSEQ_CPU_ID_OFF,
            options(nostack),
        );

        if success != 0 {
            Some(())
        } else {
            None
        }
    }

    // ── remote header protocol ───────────────────────────────────────

    /// Lock `class` on `cpu` by making it look simultaneously empty and
    /// full. Returns the previous (current, end). The caller must issue
    /// an rseq fence before touching slots, and must eventually call
    /// [`PerCpuSlab::unlock_header`].
    pub fn lock_header(&self, cpu: u32, class: usize) -> (u16, u16) {
        let begin = self.begins[class];
        let old = self
            .header(cpu, class)
            .swap(pack(begin, begin), Ordering::AcqRel);
        unpack(old)
    }

    /// Publish a fresh (current, end) for a locked class.
    pub fn unlock_header(&self, cpu: u32, class: usize, current: u16, end: u16) {
        debug_assert!(current >= self.begins[class] && current <= end);
        debug_assert!(end <= self.begins[class] + self.max_caps[class]);
        self.header(cpu, class)
            .store(pack(current, end), Ordering::Release);
    }

    /// Raise `end` by up to `slots`. The fast path tolerates concurrent
    /// growth (a stale smaller `end` only under-fills). Returns slots
    /// actually granted.
    ///
    /// Callers hold the CPU's resize lock so growth never races a
    /// header-locked remote operation.
    pub fn grow_end(&self, cpu: u32, class: usize, slots: u16) -> u16 {
        let begin = self.begins[class];
        let limit = begin + self.max_caps[class];
        let header = self.header(cpu, class);
        let mut old = header.load(Ordering::Relaxed);
        loop {
            let (cur, end) = unpack(old);
            let granted = slots.min(limit - end);
            if granted == 0 {
                return 0;
            }
            match header.compare_exchange_weak(
                old,
                pack(cur, end + granted),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return granted,
                Err(seen) => old = seen,
            }
        }
    }

    /// Read `n` pointers out of a locked class. Returns the count read.
    ///
    /// # Safety
    /// The class must be header-locked by the caller and fenced.
    pub unsafe fn read_locked(
        &self,
        cpu: u32,
        class: usize,
        current: u16,
        out: &mut [*mut u8],
    ) -> usize {
        let begin = self.begins[class];
        let avail = (current - begin) as usize;
        let n = avail.min(out.len());
        for (i, slot) in out.iter_mut().enumerate().take(n) {
            *slot = *self.slot(cpu, current - 1 - i as u16);
        }
        n
    }

    /// Write `ptrs` into a locked class starting at `current`.
    ///
    /// # Safety
    /// The class must be header-locked by the caller and fenced;
    /// `current + ptrs.len()` must not exceed the granted end.
    pub unsafe fn write_locked(&self, cpu: u32, class: usize, current: u16, ptrs: &[*mut u8]) {
        for (i, &ptr) in ptrs.iter().enumerate() {
            *self.slot(cpu, current + i as u16) = ptr;
        }
    }
}

#[inline(always)]
fn pack(current: u16, end: u16) -> u32 {
    current as u32 | ((end as u32) << 16)
}

#[inline(always)]
fn unpack(header: u32) -> (u16, u16) {
    (header as u16, (header >> 16) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform;

    fn make_slab(cpus: u32) -> PerCpuSlab {
        let mut slab = PerCpuSlab::empty();
        let bytes = (cpus as usize) << SLAB_SHIFT;
        let region = unsafe { platform::map_anonymous(bytes) };
        assert!(!region.is_null());
        assert!(unsafe { slab.init(region, cpus) });
        slab
    }

    #[test]
    fn layout_fits_region() {
        let slab = make_slab(2);
        assert!(slab.is_initialized());
        for class in 1..NUM_CLASSES {
            assert_eq!(slab.length(0, class), 0);
            assert_eq!(slab.capacity(0, class), 0);
            assert!(slab.max_capacity(class) >= batch_size(class) as u16);
        }
    }

    #[test]
    fn locked_read_write_round_trip() {
        let slab = make_slab(1);
        let class = 2;
        let granted = slab.grow_end(0, class, 8);
        assert_eq!(granted, 8);

        let (cur, end) = slab.lock_header(0, class);
        assert_eq!(cur, slab.begin(class));
        assert_eq!(end, slab.begin(class) + 8);

        let ptrs: [*mut u8; 4] = [8 as *mut u8, 16 as *mut u8, 24 as *mut u8, 32 as *mut u8];
        unsafe {
            slab.write_locked(0, class, cur, &ptrs);
        }
        slab.unlock_header(0, class, cur + 4, end);
        assert_eq!(slab.length(0, class), 4);

        let (cur, end) = slab.lock_header(0, class);
        let mut out = [core::ptr::null_mut::<u8>(); 4];
        let n = unsafe { slab.read_locked(0, class, cur, &mut out) };
        assert_eq!(n, 4);
        // LIFO: last written comes out first.
        assert_eq!(out[0], 32 as *mut u8);
        assert_eq!(out[3], 8 as *mut u8);
        slab.unlock_header(0, class, slab.begin(class), end);
        assert_eq!(slab.length(0, class), 0);
    }

    #[test]
    fn grow_end_respects_max() {
        let slab = make_slab(1);
        let class = 1;
        let max = slab.max_capacity(class);
        let granted = slab.grow_end(0, class, max + 100);
        assert_eq!(granted, max);
        assert_eq!(slab.grow_end(0, class, 1), 0);
    }
}
