//! Size classes and the bytes→class index.
//!
//! Small allocations are rounded up to one of the compiled-in classes.
//! Each class carries the object size, the span length used to back it,
//! and the batch size moved between tiers in one step.
//!
//! The progression: 8-byte steps up to 128, then eight classes per
//! power-of-two doubling up to 16 KiB, then four per doubling up to the
//! 256 KiB maximum. Everything above routes directly to the page heap.

use crate::util::{MIN_ALIGN, PAGE_SIZE};

/// Total number of classes including the invalid class 0.
pub const NUM_CLASSES: usize = 89;

/// Largest size served by a size class.
pub const MAX_SIZE: usize = 256 * 1024;

/// Per-class constants.
#[derive(Clone, Copy)]
pub struct SizeClassInfo {
    /// Object size in bytes. Multiple of 8.
    pub size: usize,
    /// Pages per span backing this class.
    pub pages: usize,
    /// Objects moved per tier transfer.
    pub batch: usize,
}

const fn build_sizes() -> [usize; NUM_CLASSES] {
    let mut table = [0usize; NUM_CLASSES];
    let mut idx = 1;

    // 8-byte steps up to 128.
    let mut size = MIN_ALIGN;
    while size <= 128 {
        table[idx] = size;
        idx += 1;
        size += 8;
    }

    // Eight per doubling up to 16 KiB, then four per doubling.
    let mut base = 128;
    while idx < NUM_CLASSES {
        let per = if base < 16 * 1024 { 8 } else { 4 };
        let step = base / per;
        let mut j = 0;
        while j < per && idx < NUM_CLASSES {
            base += step;
            table[idx] = base;
            idx += 1;
            j += 1;
        }
    }

    table
}

const fn span_pages(size: usize) -> usize {
    // Smallest span with at most 1/8 of its bytes wasted by the final
    // partial object.
    let mut pages = 1;
    while pages <= 32 {
        let span_bytes = pages * PAGE_SIZE;
        if span_bytes >= size {
            let waste = span_bytes % size;
            if waste * 8 <= span_bytes {
                return pages;
            }
        }
        pages += 1;
    }
    32
}

const fn batch_for(size: usize) -> usize {
    let b = (64 * 1024) / size;
    if b < 2 {
        2
    } else if b > 32 {
        32
    } else {
        b
    }
}

const fn build_info() -> [SizeClassInfo; NUM_CLASSES] {
    let sizes = build_sizes();
    let mut table = [SizeClassInfo {
        size: 0,
        pages: 0,
        batch: 0,
    }; NUM_CLASSES];
    let mut c = 1;
    while c < NUM_CLASSES {
        table[c] = SizeClassInfo {
            size: sizes[c],
            pages: span_pages(sizes[c]),
            batch: batch_for(sizes[c]),
        };
        c += 1;
    }
    table
}

const CLASS_INFO_TABLE: [SizeClassInfo; NUM_CLASSES] = build_info();

/// The compiled-in class table. Class 0 is invalid.
pub static CLASS_INFO: [SizeClassInfo; NUM_CLASSES] = CLASS_INFO_TABLE;

// Bytes→class index table. Sizes at or below 1024 bucket by 8 bytes;
// larger sizes bucket by 128. One table lookup on the allocation path,
// no search.
const SMALL_BUCKETS: usize = 1024 / 8 + 1;
const LARGE_BUCKETS: usize = (MAX_SIZE - 1024).div_ceil(128);
const INDEX_ENTRIES: usize = SMALL_BUCKETS + LARGE_BUCKETS;

#[inline(always)]
const fn bucket(size: usize) -> usize {
    if size <= 1024 {
        (size + 7) >> 3
    } else {
        SMALL_BUCKETS + ((size - 1024 - 1) >> 7)
    }
}

const fn build_index() -> [u8; INDEX_ENTRIES] {
    let mut table = [0u8; INDEX_ENTRIES];
    let mut b = 0;
    let mut c = 1;
    while b < INDEX_ENTRIES {
        // Smallest size that maps to this bucket.
        let size = if b <= SMALL_BUCKETS - 1 {
            if b == 0 {
                0
            } else {
                (b - 1) * 8 + 1
            }
        } else {
            1024 + (b - SMALL_BUCKETS) * 128 + 1
        };
        while c < NUM_CLASSES && CLASS_INFO_TABLE[c].size < size {
            c += 1;
        }
        table[b] = if c < NUM_CLASSES { c as u8 } else { 0 };
        b += 1;
    }
    table
}

static CLASS_INDEX: [u8; INDEX_ENTRIES] = build_index();

/// Map a request size to its class. Returns `None` for sizes the page
/// heap must serve directly.
#[inline(always)]
pub fn size_to_class(size: usize) -> Option<usize> {
    if size > MAX_SIZE {
        return None;
    }
    let c = CLASS_INDEX[bucket(size)] as usize;
    if c == 0 {
        None
    } else {
        Some(c)
    }
}

/// Object size for a class.
#[inline(always)]
pub fn class_to_size(class: usize) -> usize {
    CLASS_INFO[class].size
}

/// Span length in pages for a class.
#[inline(always)]
pub fn class_to_pages(class: usize) -> usize {
    CLASS_INFO[class].pages
}

/// Objects moved per tier transfer for a class.
#[inline(always)]
pub fn batch_size(class: usize) -> usize {
    CLASS_INFO[class].batch
}

/// Objects in one freshly carved span of a class.
#[inline(always)]
pub fn objects_per_span(class: usize) -> usize {
    class_to_pages(class) * PAGE_SIZE / class_to_size(class)
}
