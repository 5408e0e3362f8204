// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{HwvirtVendor, NestedControlCache, NestedError};
use crate::address::GuestPhysAddr;
use crate::error::HmError;
use cpuarch::vmx::{ProcBasedControls, ProcBasedControls2, VmxExecControls};

// Outer controls that only make sense for the outer guest's own state and
// are left to the nested hypervisor while its guest runs.
const OUTER_PROC_EXCLUDED: ProcBasedControls = ProcBasedControls::INT_WINDOW_EXIT
    .union(ProcBasedControls::NMI_WINDOW_EXIT)
    .union(ProcBasedControls::USE_TPR_SHADOW)
    .union(ProcBasedControls::MONITOR_TRAP_FLAG);

const OUTER_PROC2_EXCLUDED: ProcBasedControls2 = ProcBasedControls2::VIRT_APIC_ACCESS
    .union(ProcBasedControls2::INVPCID)
    .union(ProcBasedControls2::VMCS_SHADOWING)
    .union(ProcBasedControls2::RDTSCP)
    .union(ProcBasedControls2::XSAVES_XRSTORS)
    .union(ProcBasedControls2::APIC_REG_VIRT)
    .union(ProcBasedControls2::VIRT_INT_DELIVERY)
    .union(ProcBasedControls2::TSC_SCALING);

/// Nested VMX state of a vCPU. There is no field cache: the hardware VMCS
/// is derived from the nested hypervisor's VMCS, and two flags tell
/// whether the derived parts are current.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmxNested {
    current_vmcs: Option<GuestPhysAddr>,
    controls_merged: bool,
    shadow_copied: bool,
    shadow_vmcs: Option<GuestPhysAddr>,
}

impl VmxNested {
    pub const fn new() -> Self {
        Self {
            current_vmcs: None,
            controls_merged: false,
            shadow_copied: false,
            shadow_vmcs: None,
        }
    }

    pub fn current_vmcs(&self) -> Option<GuestPhysAddr> {
        self.current_vmcs
    }

    /// Records the nested hypervisor's VMPTRLD (`Some`) or VMCLEAR of the
    /// current VMCS (`None`).
    pub fn set_current_vmcs(&mut self, vmcs: Option<GuestPhysAddr>) {
        self.current_vmcs = vmcs;
    }

    /// Computes the execution controls used by hardware for the nested
    /// guest.
    pub fn merge_controls(
        &mut self,
        outer: &VmxExecControls,
        nested: &VmxExecControls,
    ) -> VmxExecControls {
        let merged = VmxExecControls {
            pin_based: outer.pin_based | nested.pin_based,
            proc_based: (outer.proc_based - OUTER_PROC_EXCLUDED) | nested.proc_based,
            proc_based2: (outer.proc_based2 - OUTER_PROC2_EXCLUDED) | nested.proc_based2,
            exception_bitmap: outer.exception_bitmap | nested.exception_bitmap,
        };
        self.controls_merged = true;
        merged
    }

    /// Marks the shadow VMCS as synced from the current VMCS.
    pub fn copy_to_shadow(&mut self) -> Result<GuestPhysAddr, HmError> {
        let vmcs = self.current_vmcs.ok_or(NestedError::NoCurrentVmcs)?;
        self.shadow_vmcs = Some(vmcs);
        self.shadow_copied = true;
        Ok(vmcs)
    }

    pub fn needs_merge(&self) -> bool {
        !self.controls_merged
    }

    pub fn needs_shadow_copy(&self) -> bool {
        !self.shadow_copied || self.shadow_vmcs != self.current_vmcs
    }

    pub(crate) fn invalidate_shadow(&mut self) {
        self.shadow_copied = false;
    }
}

impl NestedControlCache for VmxNested {
    fn vendor(&self) -> HwvirtVendor {
        HwvirtVendor::Vmx
    }

    fn is_valid(&self) -> bool {
        self.controls_merged
    }

    fn restore_and_invalidate(&mut self) -> bool {
        core::mem::replace(&mut self.controls_merged, false)
    }
}
