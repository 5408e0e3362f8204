// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::HmError;
use crate::hostcpu::HostCpu;
use crate::platform::PokeError;
use crate::stats::VCpuStats;
use crate::tlb::TlbFlushScope;
use crate::types::HostCpuId;
use crate::vm::{VCpuShared, Vm};

use core::hint::spin_loop;

/// Spins while `busy()` returns true, at most `limit` times. Returns false
/// if the condition still held when the limit was reached.
fn spin_while(limit: u32, mut busy: impl FnMut() -> bool) -> bool {
    for _ in 0..limit {
        if !busy() {
            return true;
        }
        spin_loop();
    }
    !busy()
}

impl Vm {
    /// Makes sure a flush request already posted to `target` gets noticed.
    /// The caller must have set the target's pending flag before.
    ///
    /// If the target is not inside the entry window it checks the flag on
    /// its own. Otherwise its host CPU is poked and, for the fast poke, we
    /// wait until the target left guest mode.
    pub(crate) fn ring_doorbell(&self, target: &VCpuShared, scope: TlbFlushScope) {
        let stats = target.stats();

        if !target.flush_flags().is_checked() {
            match scope {
                TlbFlushScope::Page => stats.flush_page_manual.inc(),
                TlbFlushScope::All => stats.flush_tlb_manual.inc(),
            }
            return;
        }

        match scope {
            TlbFlushScope::Page => stats.tlb_shootdown.inc(),
            TlbFlushScope::All => stats.tlb_shootdown_flush.inc(),
        }

        // The target may have left its host CPU since checking the flag. It
        // will see the pending flush on its next entry.
        let Some(cpu) = target.entered_host_cpu() else {
            log::trace!("{}: not on a host CPU, no poke needed", target.id());
            return;
        };

        match self.host_cpus().get(cpu) {
            Ok(host_cpu) => self.poke_host_cpu(target, host_cpu),
            Err(_) => log::warn!("{}: entered unknown {}", target.id(), cpu),
        }
    }

    fn poke_host_cpu(&self, target: &VCpuShared, host_cpu: &HostCpu) {
        let stats = target.stats();
        let cpu = host_cpu.id();
        let exits = host_cpu.world_switch_exits();

        stats.poke.inc();
        let result = self.platform().poke_cpu(cpu);
        if result == Err(HmError::Poke(PokeError::NotSupported)) {
            self.sync_poke(stats, cpu);
            return;
        }

        let left_guest = spin_while(self.config().poke_spin_limit(), || {
            target.flush_flags().is_checked() && host_cpu.world_switch_exits() == exits
        });

        if !left_guest {
            stats.spin_poke_timeout.inc();
            log::warn!(
                "{}: no world switch on {} after {} spins, flush left pending",
                target.id(),
                cpu,
                self.config().poke_spin_limit()
            );
        } else if let Err(e) = result {
            stats.spin_poke_failed.inc();
            log::debug!("{}: poke of {} failed: {:?}", target.id(), cpu, e);
        } else {
            stats.spin_poke.inc();
        }
    }

    // Running anything on the remote CPU forces it through host code, where
    // the pending flag is checked again. No need to spin afterwards.
    fn sync_poke(&self, stats: &VCpuStats, cpu: HostCpuId) {
        stats.sync_poke.inc();
        if let Err(e) = self.platform().run_on_cpu(cpu, &|| {}) {
            log::warn!("HM: synchronous poke of {} failed: {:?}", cpu, e);
        }
    }
}
