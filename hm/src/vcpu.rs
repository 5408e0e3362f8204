// SPDX-License-Identifier: MIT OR Apache-2.0

extern crate alloc;

use crate::address::{GuestPhysAddr, GuestVirtAddr};
use crate::changed::HmChanged;
use crate::error::HmError;
use crate::nested::NestedHwvirt;
use crate::stats::VCpuStatsSnapshot;
use crate::types::{HostCpuId, VCpuId};
use crate::vm::{VCpuShared, Vm, VmError};
use alloc::sync::Arc;

/// What the entry code has to do to the guest TLB before resuming guest
/// execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryFlush {
    None,
    /// A flush was requested since the last entry.
    Requested,
    /// The vCPU moved to another host CPU; a fresh ASID/VPID is needed.
    Migrated,
}

impl EntryFlush {
    pub fn needs_flush(self) -> bool {
        self != Self::None
    }
}

/// Owner handle of a vCPU. Exactly one exists per vCPU while it is claimed
/// and it is held by the thread that executes the vCPU.
#[derive(Debug)]
pub struct VCpu {
    id: VCpuId,
    vm: Arc<Vm>,
    last_host_cpu: Option<HostCpuId>,
    changed: HmChanged,
    nested: Option<NestedHwvirt>,
}

impl VCpu {
    pub(crate) fn new(vm: Arc<Vm>, id: VCpuId) -> Self {
        Self {
            id,
            vm,
            last_host_cpu: None,
            changed: HmChanged::empty(),
            nested: None,
        }
    }

    pub fn id(&self) -> VCpuId {
        self.id
    }

    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    pub fn shared(&self) -> &VCpuShared {
        self.vm.shared(self.id)
    }

    pub fn stats(&self) -> VCpuStatsSnapshot {
        self.shared().stats().snapshot()
    }

    pub fn entered_host_cpu(&self) -> Option<HostCpuId> {
        self.shared().entered_host_cpu()
    }

    pub fn last_host_cpu(&self) -> Option<HostCpuId> {
        self.last_host_cpu
    }

    /// Marks the vCPU as loaded on `cpu`. Remote requesters use this to
    /// find where to send their pokes.
    pub fn enter_host_cpu(&mut self, cpu: HostCpuId) -> Result<(), HmError> {
        self.vm.host_cpus().get(cpu)?;
        self.shared().set_entered_host_cpu(Some(cpu));
        log::trace!("{}: entered {}", self.id, cpu);
        Ok(())
    }

    pub fn leave_host_cpu(&mut self) {
        let shared = self.shared();
        shared.flush_flags().clear_checked();
        shared.set_entered_host_cpu(None);
    }

    /// Last step before guest execution. From here until the next
    /// [`VCpu::world_switch_exit`] remote requesters must poke this vCPU to
    /// get a new flush request noticed.
    pub fn prepare_guest_entry(&mut self) -> Result<EntryFlush, HmError> {
        let shared = self.shared();
        let cpu = shared
            .entered_host_cpu()
            .ok_or(HmError::Vm(VmError::NotOnHostCpu))?;

        let flags = shared.flush_flags();
        flags.set_checked();
        let requested = flags.take_pending();

        let migrated = self.last_host_cpu != Some(cpu);
        self.last_host_cpu = Some(cpu);

        let flush = if requested {
            EntryFlush::Requested
        } else if migrated {
            EntryFlush::Migrated
        } else {
            EntryFlush::None
        };
        Ok(flush)
    }

    /// Called on every return from guest execution, before any other host
    /// work.
    pub fn world_switch_exit(&mut self) {
        let shared = self.shared();
        if let Some(cpu) = shared.entered_host_cpu() {
            if let Ok(host_cpu) = self.vm.host_cpus().get(cpu) {
                host_cpu.count_world_switch_exit();
            }
        }
        shared.flush_flags().clear_checked();
    }

    pub fn changed(&self) -> HmChanged {
        self.changed
    }

    pub fn mark_changed(&mut self, changed: HmChanged) {
        self.changed |= changed;
    }

    pub fn take_changed(&mut self) -> HmChanged {
        core::mem::take(&mut self.changed)
    }

    pub fn nested(&self) -> Option<&NestedHwvirt> {
        self.nested.as_ref()
    }

    pub fn nested_mut(&mut self) -> Option<&mut NestedHwvirt> {
        self.nested.as_mut()
    }

    pub(crate) fn replace_nested(&mut self, nested: Option<NestedHwvirt>) -> Option<NestedHwvirt> {
        core::mem::replace(&mut self.nested, nested)
    }

    pub fn invalidate_page(&self, addr: GuestVirtAddr) {
        self.vm.invalidate_page(self.id, self.id, addr);
    }

    pub fn invalidate_page_all_vcpus(&self, addr: GuestVirtAddr) {
        self.vm.invalidate_page_all_vcpus(self.id, addr);
    }

    pub fn flush_tlb(&self) {
        self.vm.flush_tlb(self.id);
    }

    pub fn flush_tlb_all_vcpus(&self) {
        self.vm.flush_tlb_all_vcpus(self.id);
    }

    pub fn invalidate_phys_page(&self, addr: GuestPhysAddr) {
        self.vm.invalidate_phys_page(self.id, addr);
    }
}

impl Drop for VCpu {
    fn drop(&mut self) {
        self.leave_host_cpu();
        self.shared().release();
    }
}
