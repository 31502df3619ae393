//! Runtime tunables.
//!
//! Every knob has a compiled-in default, can be seeded from a
//! `TIERMALLOC_*` environment variable at init (read with
//! `libc::getenv`; nothing here may allocate), and can be flipped at
//! runtime through the typed setters. Readers see plain atomic loads.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Enable the per-CPU fast path.
static PER_CPU_CACHES: AtomicBool = AtomicBool::new(true);
/// Per-CPU cache byte budget.
static MAX_PER_CPU_CACHE_SIZE: AtomicUsize = AtomicUsize::new(3 * 1024 * 1024);
/// Budget across all legacy thread caches; relevant when per-CPU is off.
static MAX_TOTAL_THREAD_CACHE_BYTES: AtomicUsize = AtomicUsize::new(32 * 1024 * 1024);
/// Background release throttle, bytes per second.
static BACKGROUND_RELEASE_RATE: AtomicUsize = AtomicUsize::new(0);
/// Suppress subrelease of ranges freed within this window (ns).
static FILLER_SKIP_SUBRELEASE_INTERVAL_NS: AtomicU64 = AtomicU64::new(60_000_000_000);
/// Enable periodic cross-CPU capacity shuffling.
static SHUFFLE_PER_CPU_CACHES: AtomicBool = AtomicBool::new(true);
/// Central lists draw from the fullest spans first.
static PRIORITIZE_SPANS: AtomicBool = AtomicBool::new(false);
/// Flexible (partial-batch, ring) transfer caches.
static PARTIAL_TRANSFER_CACHE: AtomicBool = AtomicBool::new(true);
/// Advise cold released regions against transparent huge pages.
static MADVISE_COLD_REGIONS_NOHUGEPAGE: AtomicBool = AtomicBool::new(false);
/// Object size at which the sharded transfer cache kicks in.
static SHARDED_TRANSFER_CACHE_MIN_SIZE: AtomicUsize = AtomicUsize::new(4096);
/// Sampling cadence for the external profiler, bytes. 0 disables.
static PROFILE_SAMPLING_RATE: AtomicU64 = AtomicU64::new(2 * 1024 * 1024);
/// Soft heap cap; crossing it triggers an extra release pass. 0 = none.
static DESIRED_USAGE_LIMIT_BYTES: AtomicU64 = AtomicU64::new(0);
/// Hard heap cap; crossing it aborts. 0 = none.
static HARD_USAGE_LIMIT_BYTES: AtomicU64 = AtomicU64::new(0);

pub fn per_cpu_caches() -> bool {
    PER_CPU_CACHES.load(Ordering::Relaxed)
}

pub fn set_per_cpu_caches(on: bool) {
    PER_CPU_CACHES.store(on, Ordering::Relaxed);
}

pub fn max_per_cpu_cache_size() -> usize {
    MAX_PER_CPU_CACHE_SIZE.load(Ordering::Relaxed)
}

pub fn set_max_per_cpu_cache_size(bytes: usize) {
    MAX_PER_CPU_CACHE_SIZE.store(bytes, Ordering::Relaxed);
}

pub fn max_total_thread_cache_bytes() -> usize {
    MAX_TOTAL_THREAD_CACHE_BYTES.load(Ordering::Relaxed)
}

pub fn set_max_total_thread_cache_bytes(bytes: usize) {
    MAX_TOTAL_THREAD_CACHE_BYTES.store(bytes, Ordering::Relaxed);
}

pub fn background_release_rate() -> usize {
    BACKGROUND_RELEASE_RATE.load(Ordering::Relaxed)
}

pub fn set_background_release_rate(bytes_per_sec: usize) {
    BACKGROUND_RELEASE_RATE.store(bytes_per_sec, Ordering::Relaxed);
}

pub fn filler_skip_subrelease_interval_ns() -> u64 {
    FILLER_SKIP_SUBRELEASE_INTERVAL_NS.load(Ordering::Relaxed)
}

pub fn set_filler_skip_subrelease_interval_ns(ns: u64) {
    FILLER_SKIP_SUBRELEASE_INTERVAL_NS.store(ns, Ordering::Relaxed);
}

pub fn shuffle_per_cpu_caches() -> bool {
    SHUFFLE_PER_CPU_CACHES.load(Ordering::Relaxed)
}

pub fn set_shuffle_per_cpu_caches(on: bool) {
    SHUFFLE_PER_CPU_CACHES.store(on, Ordering::Relaxed);
}

pub fn prioritize_spans() -> bool {
    PRIORITIZE_SPANS.load(Ordering::Relaxed)
}

pub fn set_prioritize_spans(on: bool) {
    PRIORITIZE_SPANS.store(on, Ordering::Relaxed);
}

pub fn partial_transfer_cache() -> bool {
    PARTIAL_TRANSFER_CACHE.load(Ordering::Relaxed)
}

pub fn set_partial_transfer_cache(on: bool) {
    PARTIAL_TRANSFER_CACHE.store(on, Ordering::Relaxed);
}

pub fn madvise_cold_regions_nohugepage() -> bool {
    MADVISE_COLD_REGIONS_NOHUGEPAGE.load(Ordering::Relaxed)
}

pub fn set_madvise_cold_regions_nohugepage(on: bool) {
    MADVISE_COLD_REGIONS_NOHUGEPAGE.store(on, Ordering::Relaxed);
}

pub fn sharded_transfer_cache_min_size() -> usize {
    SHARDED_TRANSFER_CACHE_MIN_SIZE.load(Ordering::Relaxed)
}

pub fn set_sharded_transfer_cache_min_size(bytes: usize) {
    SHARDED_TRANSFER_CACHE_MIN_SIZE.store(bytes, Ordering::Relaxed);
}

pub fn profile_sampling_rate() -> u64 {
    PROFILE_SAMPLING_RATE.load(Ordering::Relaxed)
}

pub fn set_profile_sampling_rate(bytes: u64) {
    PROFILE_SAMPLING_RATE.store(bytes, Ordering::Relaxed);
}

pub fn desired_usage_limit_bytes() -> u64 {
    DESIRED_USAGE_LIMIT_BYTES.load(Ordering::Relaxed)
}

pub fn set_desired_usage_limit_bytes(bytes: u64) {
    DESIRED_USAGE_LIMIT_BYTES.store(bytes, Ordering::Relaxed);
}

pub fn hard_usage_limit_bytes() -> u64 {
    HARD_USAGE_LIMIT_BYTES.load(Ordering::Relaxed)
}

pub fn set_hard_usage_limit_bytes(bytes: u64) {
    HARD_USAGE_LIMIT_BYTES.store(bytes, Ordering::Relaxed);
}

/// Seed every tunable from the environment. Must run during init,
/// single-threaded, before any allocation flows through the instance.
///
/// # Safety
/// Calls `libc::getenv`, which must not race concurrent `setenv`.
pub unsafe fn read_config() {
    if let Some(v) = getenv_usize(b"TIERMALLOC_PER_CPU_CACHES\0") {
        set_per_cpu_caches(v != 0);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_MAX_PER_CPU_CACHE_SIZE\0") {
        set_max_per_cpu_cache_size(v);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_MAX_TOTAL_THREAD_CACHE_BYTES\0") {
        set_max_total_thread_cache_bytes(v);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_BACKGROUND_RELEASE_RATE\0") {
        set_background_release_rate(v);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_SKIP_SUBRELEASE_INTERVAL_MS\0") {
        set_filler_skip_subrelease_interval_ns(v as u64 * 1_000_000);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_SHUFFLE_PER_CPU_CACHES\0") {
        set_shuffle_per_cpu_caches(v != 0);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_PRIORITIZE_SPANS\0") {
        set_prioritize_spans(v != 0);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_PARTIAL_TRANSFER_CACHE\0") {
        set_partial_transfer_cache(v != 0);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_MADVISE_COLD_NOHUGEPAGE\0") {
        set_madvise_cold_regions_nohugepage(v != 0);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_SHARDED_MIN_SIZE\0") {
        set_sharded_transfer_cache_min_size(v);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_PROFILE_SAMPLING_RATE\0") {
        set_profile_sampling_rate(v as u64);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_DESIRED_USAGE_LIMIT\0") {
        set_desired_usage_limit_bytes(v as u64);
    }
    if let Some(v) = getenv_usize(b"TIERMALLOC_HARD_USAGE_LIMIT\0") {
        set_hard_usage_limit_bytes(v as u64);
    }
}

/// Parse a decimal environment variable without allocating.
///
/// # Safety
/// Calls `libc::getenv`.
unsafe fn getenv_usize(key: &[u8]) -> Option<usize> {
    let val = libc::getenv(key.as_ptr() as *const libc::c_char);
    if val.is_null() {
        return None;
    }
    let mut result: usize = 0;
    let mut ptr = val as *const u8;
    loop {
        let byte = *ptr;
        if byte == 0 {
            break;
        }
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
        ptr = ptr.add(1);
    }
    Some(result)
}
