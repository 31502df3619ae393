//! `#[global_allocator]` support.
//!
//! ```rust,ignore
//! use tiermalloc::TierMalloc;
//!
//! #[global_allocator]
//! static GLOBAL: TierMalloc = TierMalloc;
//! ```

use crate::init;
use crate::util::MIN_ALIGN;
use core::alloc::{GlobalAlloc, Layout};

/// Zero-sized handle delegating to the process-wide allocator.
pub struct TierMalloc;

unsafe impl GlobalAlloc for TierMalloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        let align = layout.align();

        // Zero-size types get a well-aligned dangling pointer, the
        // standard-library convention.
        if size == 0 {
            return align as *mut u8;
        }

        let alloc = init::global();
        if align <= MIN_ALIGN {
            alloc.allocate(size)
        } else {
            alloc.allocate_aligned(size, align)
        }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.alloc(layout);
        if !ptr.is_null() {
            core::ptr::write_bytes(ptr, 0, layout.size());
        }
        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // A live pointer implies alloc() already initialized the
        // singleton.
        let alloc = init::global();
        if layout.align() <= MIN_ALIGN {
            alloc.deallocate_sized(ptr, layout.size());
        } else {
            // Over-aligned allocations may have been promoted to a
            // larger class or span; the pagemap knows.
            alloc.deallocate(ptr);
        }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old_size = layout.size();
        if old_size == 0 {
            return self.alloc(Layout::from_size_align_unchecked(new_size, layout.align()));
        }
        debug_assert!(new_size > 0, "GlobalAlloc::realloc with new_size == 0");

        let alloc = init::global();
        // In-place when the backing block already fits.
        let usable = alloc.usable_size(ptr);
        if new_size <= usable && layout.align() <= MIN_ALIGN {
            return ptr;
        }

        let new_ptr = self.alloc(Layout::from_size_align_unchecked(new_size, layout.align()));
        if !new_ptr.is_null() {
            core::ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
            self.dealloc(ptr, layout);
        }
        new_ptr
    }
}
