//! Background maintenance: transfer-cache resizing, per-CPU shuffling
//! and reclaim, and rate-limited release back to the OS.
//!
//! One task, coarse cadence, bounded work per step. Every step is
//! idempotent; recoverable failures are swallowed and retried next
//! tick.

use crate::api::Allocator;
use crate::config;
use crate::platform;
use crate::util::PAGE_SIZE;

/// Seconds between background ticks.
const TICK_SECONDS: u64 = 1;

pub struct BackgroundTask {
    last_release_ns: u64,
    /// Fractional release budget carried between ticks.
    release_debt_bytes: u64,
}

impl Default for BackgroundTask {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTask {
    pub fn new() -> Self {
        BackgroundTask {
            last_release_ns: platform::monotonic_nanos(),
            release_debt_bytes: 0,
        }
    }

    /// One maintenance pass.
    pub fn step(&mut self, alloc: &Allocator) {
        let t = alloc.tiers();

        alloc.transfer().try_resizing();
        alloc
            .transfer()
            .plunder_all(t.pm, t.page_heap, t.central);

        if config::shuffle_per_cpu_caches() {
            alloc.cpu_cache().shuffle();
        }
        alloc.cpu_cache().try_reclaiming(&t);

        self.release_step(alloc);
    }

    /// Release memory at `background_release_rate` bytes per second,
    /// carrying remainders so slow rates still make progress.
    fn release_step(&mut self, alloc: &Allocator) {
        let rate = config::background_release_rate() as u64;
        let now = platform::monotonic_nanos();
        let elapsed = now.saturating_sub(self.last_release_ns);
        self.last_release_ns = now;
        if rate == 0 {
            self.release_debt_bytes = 0;
            return;
        }
        // Budget accrues with elapsed time, capped at one second's
        // worth so a stalled task cannot burst.
        let earned = rate.saturating_mul(elapsed) / 1_000_000_000;
        self.release_debt_bytes = (self.release_debt_bytes + earned).min(rate);
        if self.release_debt_bytes < PAGE_SIZE as u64 {
            return;
        }
        let target_pages = (self.release_debt_bytes as usize) / PAGE_SIZE;
        let released = alloc.page_heap().release_at_least(target_pages);
        self.release_debt_bytes -= (released.min(target_pages) * PAGE_SIZE) as u64;
    }

    /// Run forever on the tick cadence. Spawned by
    /// [`start_background_thread`].
    fn run(mut self, alloc: &'static Allocator) {
        loop {
            std::thread::sleep(std::time::Duration::from_secs(TICK_SECONDS));
            self.step(alloc);
        }
    }
}

/// Spawn the maintenance thread for the process singleton. Call once
/// from the embedding application; extra calls spawn extra harmless
/// workers.
pub fn start_background_thread() {
    let alloc = crate::init::global();
    std::thread::Builder::new()
        .name("tiermalloc-bg".into())
        .spawn(move || BackgroundTask::new().run(alloc))
        .ok();
}
