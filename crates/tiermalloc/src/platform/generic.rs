//! Fallback platform layer for non-Linux Unix targets. No restartable
//! sequences here, so the per-thread cache front is always used.

use core::ptr;

/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// # Safety
/// `size` must be page-aligned and non-zero; `align` a power of two.
pub unsafe fn map_aligned(size: usize, align: usize) -> *mut u8 {
    let raw = map_anonymous(size + align);
    if raw.is_null() {
        return ptr::null_mut();
    }
    let addr = raw as usize;
    let aligned = crate::util::align_up(addr, align);
    let head = aligned - addr;
    let tail = align - head;
    if head > 0 {
        libc::munmap(raw as *mut libc::c_void, head);
    }
    if tail > 0 {
        libc::munmap((aligned + size) as *mut libc::c_void, tail);
    }
    aligned as *mut u8
}

/// # Safety
/// `ptr` must have been returned by a map call with the same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn advise_free(ptr: *mut u8, size: usize) -> bool {
    libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_DONTNEED) == 0
}

/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn advise_nohugepage(_ptr: *mut u8, _size: usize) {}

pub fn num_cpus() -> usize {
    unsafe {
        let n = libc::sysconf(libc::_SC_NPROCESSORS_CONF);
        if n < 1 {
            1
        } else {
            n as usize
        }
    }
}

#[inline]
pub fn current_cpu() -> usize {
    0
}

/// # Safety
/// `ptr` and `size` must refer to a valid mapped region.
pub unsafe fn resident_bytes(_ptr: *mut u8, size: usize) -> usize {
    size
}

#[inline]
pub fn monotonic_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}
