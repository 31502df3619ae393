pub mod central;
pub mod cpu_cache;
pub mod percpu;
pub mod sharded;
pub mod thread_cache;
pub mod transfer;

use crate::arena::Arena;
use crate::caches::central::CentralFreeList;
use crate::caches::sharded::ShardedTransferCache;
use crate::caches::transfer::TransferCaches;
use crate::pages::page_heap::PageHeap;
use crate::pages::page_map::PageMap;
use crate::size_class::NUM_CLASSES;

/// Borrowed handles to the tiers below the fronts. Every slow path
/// threads this down instead of reaching for globals, so tests can run
/// against private instances.
pub struct Tiers<'a> {
    pub arena: &'a Arena,
    pub pm: &'a PageMap,
    pub page_heap: &'a PageHeap,
    pub central: &'a [CentralFreeList; NUM_CLASSES],
    pub transfer: &'a TransferCaches,
    pub sharded: Option<&'a ShardedTransferCache>,
}

impl<'a> Tiers<'a> {
    /// Pull up to `dst.len()` objects of `class`: sharded tier when the
    /// class qualifies, then the per-class transfer cache, falling
    /// through to central and the page heap.
    pub fn fetch(&self, class: usize, dst: &mut [*mut u8]) -> usize {
        if let Some(sharded) = self.sharded {
            if sharded.should_use(class) {
                return sharded.remove_range(self, class, dst);
            }
        }
        self.fetch_transfer(class, dst)
    }

    /// Push objects of `class` down a tier. The first eligible push
    /// from a CPU materializes its sharded cache.
    pub fn stash(&self, class: usize, batch: &[*mut u8]) {
        if let Some(sharded) = self.sharded {
            if sharded.eligible_class(class) {
                sharded.insert_range(self, class, batch);
                return;
            }
        }
        self.stash_transfer(class, batch);
    }

    /// The non-sharded path, used directly by the sharded cache's own
    /// fallthrough.
    pub(crate) fn fetch_transfer(&self, class: usize, dst: &mut [*mut u8]) -> usize {
        self.transfer.get(class).remove_range(
            self.arena,
            self.pm,
            self.page_heap,
            &self.central[class],
            dst,
        )
    }

    pub(crate) fn stash_transfer(&self, class: usize, batch: &[*mut u8]) {
        self.transfer
            .get(class)
            .insert_range(self.pm, self.page_heap, &self.central[class], batch);
    }
}
