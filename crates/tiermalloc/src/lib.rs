//! tiermalloc: a multi-tier, huge-page-aware memory allocator.
//!
//! Allocation flows size → class → per-CPU slot. A miss draws a batch
//! from the per-class transfer cache, then the central free list, then
//! the huge-page-aware page heap. Deallocation mirrors the path in
//! reverse; spans that empty out unwind to the page heap, which
//! releases idle sub-huge-page ranges back to the OS in background.
//!
//! The per-CPU fast path runs inside restartable sequences (x86-64
//! Linux); elsewhere, or when `per_cpu_caches` is off, per-thread
//! caches provide the same external contract.
//!
//! ```rust,ignore
//! use tiermalloc::TierMalloc;
//!
//! #[global_allocator]
//! static GLOBAL: TierMalloc = TierMalloc;
//! ```

pub mod api;
pub mod arena;
pub mod background;
pub mod caches;
pub mod config;
pub mod global_alloc;
pub mod init;
pub mod pages;
pub mod platform;
pub mod size_class;
pub mod stats;
pub mod sync;
pub mod util;

pub use api::Allocator;
pub use global_alloc::TierMalloc;
pub use stats::get_numeric_property;
