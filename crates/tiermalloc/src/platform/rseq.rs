//! Restartable-sequence registration and the cross-CPU fence.
//!
//! The per-CPU slab's fast path runs inside an rseq critical section: the
//! kernel rewinds the section to its abort handler whenever the thread is
//! preempted, migrated, or takes a signal. Remote mutators (shuffle,
//! reclaim, deactivate) write slab headers with plain atomics and then
//! issue a membarrier `PRIVATE_EXPEDITED_RSEQ` fence, which forces every
//! in-flight critical section on other CPUs to abort and re-read.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

/// Signature placed before each abort handler. The kernel verifies it
/// before jumping, so stray writes cannot redirect control flow.
pub const RSEQ_SIG: u32 = 0x53053053;

const RSEQ_AREA_LEN: u32 = 32;

/// `struct rseq` from the kernel ABI. Must be registered per thread and
/// stay valid (and pinned) for the thread's lifetime.
#[repr(C, align(32))]
pub struct Rseq {
    pub cpu_id_start: AtomicU32,
    pub cpu_id: AtomicU32,
    pub rseq_cs: core::sync::atomic::AtomicU64,
    pub flags: AtomicU32,
}

impl Rseq {
    pub const fn new() -> Self {
        Self {
            cpu_id_start: AtomicU32::new(0),
            // RSEQ_CPU_ID_UNINITIALIZED
            cpu_id: AtomicU32::new(u32::MAX),
            rseq_cs: core::sync::atomic::AtomicU64::new(0),
            flags: AtomicU32::new(0),
        }
    }
}

const REG_UNKNOWN: u8 = 0;
const REG_OK: u8 = 1;
const REG_FAILED: u8 = 2;

struct RseqArea {
    rseq: Rseq,
    state: Cell<u8>,
}

impl Drop for RseqArea {
    fn drop(&mut self) {
        if self.state.get() == REG_OK {
            // The TLS block is about to be reclaimed; the kernel must
            // stop writing cpu ids into it.
            unsafe {
                libc::syscall(
                    libc::SYS_rseq,
                    &self.rseq as *const Rseq,
                    RSEQ_AREA_LEN,
                    RSEQ_FLAG_UNREGISTER,
                    RSEQ_SIG,
                );
            }
        }
    }
}

const RSEQ_FLAG_UNREGISTER: i32 = 1;

thread_local! {
    static RSEQ_AREA: RseqArea = const {
        RseqArea {
            rseq: Rseq::new(),
            state: Cell::new(REG_UNKNOWN),
        }
    };
}

/// Register the calling thread's rseq area if not yet done and return a
/// pointer to it. Returns None when the kernel refuses registration
/// (pre-4.18 kernels, or another rseq already registered by the runtime)
/// or during thread teardown; callers fall back to the slow path.
#[inline]
pub fn rseq_ptr() -> Option<*mut Rseq> {
    RSEQ_AREA
        .try_with(|area| {
            match area.state.get() {
                REG_OK => Some(&area.rseq as *const Rseq as *mut Rseq),
                REG_FAILED => None,
                _ => register(area),
            }
        })
        .unwrap_or(None)
}

#[cold]
fn register(area: &RseqArea) -> Option<*mut Rseq> {
    let ptr = &area.rseq as *const Rseq as *mut Rseq;
    let rc = unsafe { libc::syscall(libc::SYS_rseq, ptr, RSEQ_AREA_LEN, 0, RSEQ_SIG) };
    if rc == 0 {
        area.state.set(REG_OK);
        Some(ptr)
    } else {
        area.state.set(REG_FAILED);
        None
    }
}

const MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED_RSEQ: libc::c_int = 1 << 8;
const MEMBARRIER_CMD_PRIVATE_EXPEDITED_RSEQ: libc::c_int = 1 << 7;

/// Register the process for rseq-expedited membarriers. Must succeed
/// before the per-CPU cache activates; without the fence, remote header
/// mutation cannot pause a running CPU.
pub fn register_fence() -> bool {
    let rc = unsafe { libc::syscall(libc::SYS_membarrier, MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED_RSEQ, 0, 0) };
    rc == 0
}

/// Abort every in-flight rseq critical section in this process. Pairs
/// with remote slab-header writes: write, fence, then the old values can
/// no longer be committed by any CPU.
pub fn fence() {
    unsafe {
        libc::syscall(libc::SYS_membarrier, MEMBARRIER_CMD_PRIVATE_EXPEDITED_RSEQ, 0, 0);
    }
}

/// CPU id as maintained by the kernel in the registered area. Only valid
/// inside a critical section; outside one it is a hint.
#[inline(always)]
pub fn cached_cpu(rseq: *const Rseq) -> u32 {
    unsafe { (*rseq).cpu_id.load(Ordering::Relaxed) }
}
