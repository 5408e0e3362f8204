// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::address::{GuestAddress, GuestPhysAddr, GuestVirtAddr};
use crate::types::VCpuId;
use crate::vm::Vm;

/// Defines the scope of a flush request sent to another vCPU. Only used
/// for accounting: the target always flushes its entire TLB.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TlbFlushScope {
    /// A single guest-linear page was invalidated.
    Page,

    /// The entire guest TLB must be flushed.
    All,
}

impl Vm {
    /// Invalidates the translation of `addr` for `target`. Only the vCPU
    /// itself can do that precisely, and only while its hardware context is
    /// loaded; every other case turns into a full flush on the target's
    /// next entry.
    pub fn invalidate_page(&self, caller: VCpuId, target: VCpuId, addr: GuestVirtAddr) {
        let Ok(vcpu) = self.vcpu(target) else {
            log::warn!("HM: invalidate_page for unknown {}", target);
            return;
        };

        if caller == target {
            if let Some(host_cpu) = vcpu.entered_host_cpu() {
                match self
                    .platform()
                    .invalidate_local_page(target, host_cpu, addr.page_align())
                {
                    Ok(()) => {
                        vcpu.stats().flush_page_manual.inc();
                        return;
                    }
                    Err(e) => log::trace!("{}: no local invalidation: {:?}", target, e),
                }
            }
        }

        log::trace!("{}: page {:#x} degraded to full flush", target, addr);
        vcpu.flush_flags().request();
        vcpu.stats().flush_tlb_manual.inc();
    }

    /// Invalidates `addr` in the TLBs of all vCPUs. Running vCPUs are poked
    /// so they pick up the request before going back to guest mode.
    pub fn invalidate_page_all_vcpus(&self, caller: VCpuId, addr: GuestVirtAddr) {
        if let Ok(vcpu) = self.vcpu(caller) {
            vcpu.stats().flush_page.inc();
        }

        for vcpu in self.vcpus() {
            if vcpu.id() == caller {
                self.invalidate_page(caller, caller, addr);
            } else if vcpu.flush_flags().request() {
                self.ring_doorbell(vcpu, TlbFlushScope::Page);
            }
        }
    }

    /// Requests a full flush of `target`'s TLB on its next entry. Does not
    /// poke.
    pub fn flush_tlb(&self, target: VCpuId) {
        let Ok(vcpu) = self.vcpu(target) else {
            log::warn!("HM: flush_tlb for unknown {}", target);
            return;
        };
        vcpu.flush_flags().request();
        vcpu.stats().flush_tlb_manual.inc();
    }

    pub fn flush_tlb_all_vcpus(&self, caller: VCpuId) {
        if self.vcpu_count() == 1 {
            self.flush_tlb(VCpuId(0));
            return;
        }

        if let Ok(vcpu) = self.vcpu(caller) {
            vcpu.stats().flush_tlb.inc();
        }

        for vcpu in self.vcpus() {
            if vcpu.flush_flags().request() && vcpu.id() != caller {
                self.ring_doorbell(vcpu, TlbFlushScope::All);
            }
        }
    }

    /// Invalidates all guest-linear translations that may map `addr`.
    /// Hardware can't invalidate by physical address, so with nested
    /// paging active this is a flush of all vCPUs.
    pub fn invalidate_phys_page(&self, caller: VCpuId, addr: GuestPhysAddr) {
        if !self.platform().nested_paging_active() {
            return;
        }
        log::trace!("HM: physical page {:#x} invalidated by {}", addr, caller);
        self.flush_tlb_all_vcpus(caller);
    }
}
