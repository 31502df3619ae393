#![no_main]

use libfuzzer_sys::fuzz_target;
use tiermalloc::init;

/// Interprets a byte slice as a sequence of allocator operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=allocate, 1=deallocate, 2=deallocate_sized,
///           3=allocate_aligned)
///   byte 1-2: size (little-endian u16)
///   byte 3: slot index (which tracked pointer to operate on)
///
/// We track up to 64 live pointers.
const MAX_SLOTS: usize = 64;

fuzz_target!(|data: &[u8]| {
    let alloc = init::global();
    let mut slots: [*mut u8; MAX_SLOTS] = [std::ptr::null_mut(); MAX_SLOTS];
    let mut sizes: [usize; MAX_SLOTS] = [0; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x03;
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let slot = (data[i + 3] as usize) % MAX_SLOTS;
        i += 4;

        match opcode {
            0 => {
                if !slots[slot].is_null() {
                    unsafe { alloc.deallocate(slots[slot]) };
                }
                let ptr = alloc.allocate(size);
                slots[slot] = ptr;
                sizes[slot] = size;
                if !ptr.is_null() && size > 0 {
                    unsafe {
                        std::ptr::write_bytes(ptr, 0xAA, size.min(256));
                    }
                }
            }
            1 => {
                if !slots[slot].is_null() {
                    unsafe { alloc.deallocate(slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                    sizes[slot] = 0;
                }
            }
            2 => {
                if !slots[slot].is_null() {
                    unsafe { alloc.deallocate_sized(slots[slot], sizes[slot]) };
                    slots[slot] = std::ptr::null_mut();
                    sizes[slot] = 0;
                }
            }
            3 => {
                if !slots[slot].is_null() {
                    unsafe { alloc.deallocate(slots[slot]) };
                }
                let align = 1usize << (1 + (data[i.saturating_sub(1)] & 0x0F));
                let ptr = alloc.allocate_aligned(size, align);
                if !ptr.is_null() {
                    assert_eq!(ptr as usize % align, 0);
                }
                slots[slot] = ptr;
                sizes[slot] = size;
            }
            _ => unreachable!(),
        }
    }

    // Drain live pointers so runs are independent.
    for slot in 0..MAX_SLOTS {
        if !slots[slot].is_null() {
            unsafe { alloc.deallocate(slots[slot]) };
        }
    }
});
