use core::ptr;

/// Map anonymous read-write memory.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// Map anonymous memory aligned to `align` by over-mapping and trimming
/// the head and tail back to the kernel.
///
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

/// Unmap memory.
///
/// # Safety
/// `ptr` must have been returned by a map call with the same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// Advise the kernel that pages can be reclaimed. MADV_DONTNEED
/// guarantees zero-filled pages on next access.
///
/// Returns false on failure (EINTR is retried, anything else reported to
/// the caller so the range stays on the normal free list).
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn advise_free(ptr: *mut u8, size: usize) -> bool {
    loop {
        let ret = libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_DONTNEED);
        if ret == 0 {
            return true;
        }
        if *libc::__errno_location() != libc::EINTR {
            return false;
        }
    }
}

/// Advise against transparent huge pages for a cold range.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn advise_nohugepage(ptr: *mut u8, size: usize) {
    libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_NOHUGEPAGE);
}

/// Get the number of configured CPUs.
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

/// CPU the calling thread is currently running on. Advisory: the thread
/// may migrate immediately after the call returns.
#[inline]
pub fn current_cpu() -> usize {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        0
    } else {
        cpu as usize
    }
}

/// Count resident bytes in a mapped range via mincore.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped region.
pub unsafe fn resident_bytes(ptr: *mut u8, size: usize) -> usize {
    let os_page = libc::sysconf(libc::_SC_PAGESIZE) as usize;
    let num_pages = size.div_ceil(os_page);

    // Probe in fixed-size stack chunks; metadata paths cannot allocate.
    const CHUNK: usize = 512;
    let mut vec = [0u8; CHUNK];
    let mut resident = 0usize;
    let mut page = 0usize;
    while page < num_pages {
        let n = (num_pages - page).min(CHUNK);
        let addr = ptr.add(page * os_page) as *mut libc::c_void;
        if libc::mincore(addr, n * os_page, vec.as_mut_ptr()) != 0 {
            return 0;
        }
        for &v in vec.iter().take(n) {
            if v & 1 != 0 {
                resident += os_page;
            }
        }
        page += n;
    }
    resident.min(size)
}

/// Monotonic clock in nanoseconds.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_aligned_is_aligned() {
        unsafe {
            let align = 1 << 21;
            let p = map_aligned(1 << 21, align);
            assert!(!p.is_null());
            assert_eq!(p as usize % align, 0);
            unmap(p, 1 << 21);
        }
    }

    #[test]
    fn advise_free_discards() {
        unsafe {
            let size = 1 << 16;
            let p = map_anonymous(size);
            assert!(!p.is_null());
            p.write_bytes(0xAB, size);
            assert!(advise_free(p, size));
            // MADV_DONTNEED guarantees zero refill.
            assert_eq!(p.read(), 0);
            unmap(p, size);
        }
    }

    #[test]
    fn clock_is_monotone() {
        let a = monotonic_nanos();
        let b = monotonic_nanos();
        assert!(b >= a);
    }
}
