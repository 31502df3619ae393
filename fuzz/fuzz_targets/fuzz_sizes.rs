#![no_main]

use libfuzzer_sys::fuzz_target;
use tiermalloc::init;

// Exercises size boundaries: allocates, writes the full extent,
// verifies usable_size covers the request, and frees.

fuzz_target!(|data: &[u8]| {
    let alloc = init::global();
    let mut i = 0;
    while i + 4 <= data.len() {
        let raw_size = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        i += 4;

        // Cap size to keep the corpus fast and memory bounded.
        let size = (raw_size as usize) % (4 * 1024 * 1024);

        let ptr = alloc.allocate(size);
        if ptr.is_null() {
            continue;
        }
        let usable = unsafe { alloc.usable_size(ptr) };
        assert!(usable >= size.max(1));
        unsafe {
            if size > 0 {
                ptr.write(0x5A);
                ptr.add(size - 1).write(0x5A);
            }
            alloc.deallocate(ptr);
        }
    }
});
