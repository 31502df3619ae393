//! Cross-tier accounting and the numeric property surface.
//!
//! Tier counters are not snapshot-consistent: a batch in flight between
//! the per-CPU slab and the transfer cache may be counted twice or not
//! at all for a moment. Every derived quantity therefore subtracts with
//! [`sat_sub`] so readers never see underflowed garbage.

use crate::api::Allocator;
use crate::caches::thread_cache;
use crate::config;
use crate::util::sat_sub;

/// One consistent-enough snapshot of every tier.
#[derive(Clone, Copy, Default, Debug)]
pub struct TotalStats {
    pub system_bytes: u64,
    pub page_heap_free_bytes: u64,
    pub page_heap_unmapped_bytes: u64,
    pub central_cache_free_bytes: u64,
    pub transfer_cache_free_bytes: u64,
    pub sharded_transfer_cache_free_bytes: u64,
    pub per_cpu_free_bytes: u64,
    pub thread_cache_free_bytes: u64,
    pub metadata_bytes: u64,
    pub in_use_bytes: u64,
}

pub fn collect(alloc: &Allocator) -> TotalStats {
    let backing = alloc.page_heap().stats();
    let arena = alloc.arena().stats();
    let slab = alloc.cpu_cache().metadata_usage();

    let mut s = TotalStats {
        system_bytes: backing.system_bytes,
        page_heap_free_bytes: backing.free_bytes,
        page_heap_unmapped_bytes: backing.unmapped_bytes,
        central_cache_free_bytes: alloc.central_free_bytes() as u64,
        transfer_cache_free_bytes: alloc.transfer().free_bytes() as u64,
        sharded_transfer_cache_free_bytes: alloc.sharded().free_bytes() as u64,
        per_cpu_free_bytes: alloc.cpu_cache().total_used_bytes() as u64,
        thread_cache_free_bytes: thread_cache::total_thread_cache_bytes() as u64,
        metadata_bytes: arena.bytes_allocated
            + arena.bytes_unavailable
            + slab.resident_size as u64,
        ..Default::default()
    };

    let cached = s.page_heap_free_bytes
        + s.central_cache_free_bytes
        + s.transfer_cache_free_bytes
        + s.sharded_transfer_cache_free_bytes
        + s.per_cpu_free_bytes
        + s.thread_cache_free_bytes;
    let physical = sat_sub(s.system_bytes, s.page_heap_unmapped_bytes);
    s.in_use_bytes = sat_sub(physical, cached);
    s
}

/// Physical bytes this allocator is holding (backed heap + metadata).
pub fn physical_memory_used(s: &TotalStats) -> u64 {
    sat_sub(s.system_bytes, s.page_heap_unmapped_bytes) + s.metadata_bytes
}

/// The numeric/property API. Returns `None` for unknown keys.
pub fn get_numeric_property(alloc: &Allocator, name: &str) -> Option<u64> {
    let s = collect(alloc);
    let value = match name {
        "generic.bytes_in_use_by_app" | "generic.current_allocated_bytes" => s.in_use_bytes,
        "generic.heap_size" => s.system_bytes,
        "generic.physical_memory_used" => physical_memory_used(&s),
        "generic.virtual_memory_used" => {
            s.system_bytes + alloc.cpu_cache().metadata_usage().virtual_size as u64
        }
        "tcmalloc.central_cache_free" => s.central_cache_free_bytes,
        "tcmalloc.cpu_free" => s.per_cpu_free_bytes,
        "tcmalloc.current_total_thread_cache_bytes" => s.thread_cache_free_bytes,
        "tcmalloc.desired_usage_limit_bytes" => config::desired_usage_limit_bytes(),
        "tcmalloc.external_fragmentation_bytes" => {
            s.page_heap_free_bytes
                + s.central_cache_free_bytes
                + s.transfer_cache_free_bytes
                + s.sharded_transfer_cache_free_bytes
                + s.per_cpu_free_bytes
                + s.thread_cache_free_bytes
                + s.metadata_bytes
        }
        "tcmalloc.hard_usage_limit_bytes" => config::hard_usage_limit_bytes(),
        "tcmalloc.local_bytes" => s.per_cpu_free_bytes + s.thread_cache_free_bytes,
        "tcmalloc.max_total_thread_cache_bytes" => config::max_total_thread_cache_bytes() as u64,
        "tcmalloc.metadata_bytes" => s.metadata_bytes,
        // Huge-page-aware page heap.
        "tcmalloc.page_algorithm" => 2,
        "tcmalloc.page_heap_free" => s.page_heap_free_bytes,
        "tcmalloc.page_heap_unmapped" => s.page_heap_unmapped_bytes,
        "tcmalloc.per_cpu_caches_active" => alloc.cpu_cache().active() as u64,
        "tcmalloc.required_bytes" => {
            sat_sub(
                physical_memory_used(&s),
                s.page_heap_free_bytes + s.page_heap_unmapped_bytes,
            )
        }
        // The profiler owning this count is external; the key stays
        // recognized.
        "tcmalloc.sampled_internal_fragmentation" => 0,
        "tcmalloc.sharded_transfer_cache_free" => s.sharded_transfer_cache_free_bytes,
        "tcmalloc.slack_bytes" => s.page_heap_free_bytes + s.page_heap_unmapped_bytes,
        "tcmalloc.thread_cache_count" => thread_cache::thread_cache_count(),
        "tcmalloc.thread_cache_free" => s.thread_cache_free_bytes,
        "tcmalloc.transfer_cache_free" => s.transfer_cache_free_bytes,
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_is_none() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        assert!(get_numeric_property(&alloc, "tcmalloc.not_a_key").is_none());
    }

    #[test]
    fn every_documented_key_resolves() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        for key in [
            "generic.bytes_in_use_by_app",
            "generic.current_allocated_bytes",
            "generic.heap_size",
            "generic.physical_memory_used",
            "generic.virtual_memory_used",
            "tcmalloc.central_cache_free",
            "tcmalloc.cpu_free",
            "tcmalloc.current_total_thread_cache_bytes",
            "tcmalloc.desired_usage_limit_bytes",
            "tcmalloc.external_fragmentation_bytes",
            "tcmalloc.hard_usage_limit_bytes",
            "tcmalloc.local_bytes",
            "tcmalloc.max_total_thread_cache_bytes",
            "tcmalloc.metadata_bytes",
            "tcmalloc.page_algorithm",
            "tcmalloc.page_heap_free",
            "tcmalloc.page_heap_unmapped",
            "tcmalloc.per_cpu_caches_active",
            "tcmalloc.required_bytes",
            "tcmalloc.sampled_internal_fragmentation",
            "tcmalloc.sharded_transfer_cache_free",
            "tcmalloc.slack_bytes",
            "tcmalloc.thread_cache_count",
            "tcmalloc.thread_cache_free",
            "tcmalloc.transfer_cache_free",
        ] {
            assert!(get_numeric_property(&alloc, key).is_some(), "{}", key);
        }
    }

    #[test]
    fn in_use_tracks_allocation() {
        let alloc = Allocator::new();
        assert!(alloc.init());
        let before = collect(&alloc);
        let ptr = alloc.allocate(1 << 20);
        assert!(!ptr.is_null());
        let after = collect(&alloc);
        assert!(after.system_bytes >= before.system_bytes + (1 << 20));
        unsafe { alloc.deallocate(ptr) };
    }
}
