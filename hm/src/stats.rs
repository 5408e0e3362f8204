// SPDX-License-Identifier: MIT OR Apache-2.0

use core::sync::atomic::{AtomicU64, Ordering};

/// A statistics counter. Relaxed ordering is enough: counters never order
/// other memory accesses.
#[derive(Debug, Default)]
pub struct StatCounter(AtomicU64);

impl StatCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

macro_rules! vcpu_stats {
    ($($(#[$doc:meta])* $name:ident,)*) => {
        /// Per-vCPU TLB shootdown statistics.
        #[derive(Debug, Default)]
        pub struct VCpuStats {
            $($(#[$doc])* pub $name: StatCounter,)*
        }

        /// Point-in-time copy of [`VCpuStats`].
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct VCpuStatsSnapshot {
            $(pub $name: u64,)*
        }

        impl VCpuStats {
            pub const fn new() -> Self {
                Self {
                    $($name: StatCounter::new(),)*
                }
            }

            pub fn snapshot(&self) -> VCpuStatsSnapshot {
                VCpuStatsSnapshot {
                    $($name: self.$name.get(),)*
                }
            }
        }
    };
}

vcpu_stats! {
    /// Page invalidations this vCPU broadcast to all vCPUs.
    flush_page,
    /// Full flushes this vCPU broadcast to all vCPUs.
    flush_tlb,
    /// Page invalidations targeting this vCPU that needed no poke.
    flush_page_manual,
    /// Full flushes targeting this vCPU that needed no poke.
    flush_tlb_manual,
    /// Page invalidations targeting this vCPU that required a poke.
    tlb_shootdown,
    /// Full flushes targeting this vCPU that required a poke.
    tlb_shootdown_flush,
    /// Asynchronous pokes attempted towards this vCPU's host CPU.
    poke,
    /// Rendezvous completed after a successful poke.
    spin_poke,
    /// Rendezvous completed after a poke that reported failure.
    spin_poke_failed,
    /// Rendezvous abandoned after exhausting the spin limit.
    spin_poke_timeout,
    /// Synchronous cross-calls used instead of an asynchronous poke.
    sync_poke,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = VCpuStats::new();
        stats.poke.inc();
        stats.poke.inc();
        stats.flush_tlb.inc();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.poke, 2);
        assert_eq!(snapshot.flush_tlb, 1);
        assert_eq!(snapshot.sync_poke, 0);
    }
}
