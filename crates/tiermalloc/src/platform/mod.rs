#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(all(target_os = "linux", target_arch = "x86_64", feature = "percpu"))]
pub mod rseq;

#[cfg(not(target_os = "linux"))]
pub mod generic;
#[cfg(not(target_os = "linux"))]
pub use generic as sys;

/// Map anonymous read-write memory. Returns null on failure.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
#[inline]
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    sys::map_anonymous(size)
}

/// Map anonymous memory whose base is aligned to `align` bytes.
/// `align` must be a power of two and a multiple of the OS page size.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
#[inline]
pub unsafe fn map_aligned(size: usize, align: usize) -> *mut u8 {
    sys::map_aligned(size, align)
}

/// Unmap previously mapped memory.
///
/// # Safety
/// `ptr` must have been returned by a map call and `size` must match.
#[inline]
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    sys::unmap(ptr, size);
}

/// Advise the kernel that the range is no longer needed and may be
/// discarded. Returns false if the advise call failed; the caller keeps
/// the range on its normal (resident) list in that case.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped, page-aligned region.
#[inline]
pub unsafe fn advise_free(ptr: *mut u8, size: usize) -> bool {
    sys::advise_free(ptr, size)
}

/// Advise the kernel not to back the range with transparent huge pages.
/// Best-effort; failures are ignored.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped, page-aligned region.
#[inline]
pub unsafe fn advise_nohugepage(ptr: *mut u8, size: usize) {
    sys::advise_nohugepage(ptr, size);
}

/// Number of configured CPUs.
pub fn num_cpus() -> usize {
    sys::num_cpus()
}

/// Index of the CPU the calling thread is currently running on.
#[inline]
pub fn current_cpu() -> usize {
    sys::current_cpu()
}

/// Resident bytes within a mapped range (pages actually faulted in).
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped region.
pub unsafe fn resident_bytes(ptr: *mut u8, size: usize) -> usize {
    sys::resident_bytes(ptr, size)
}

/// Monotonic clock in nanoseconds. Feeds free-range age histograms and
/// the background release rate limiter.
#[inline]
pub fn monotonic_nanos() -> u64 {
    sys::monotonic_nanos()
}
