// SPDX-License-Identifier: MIT OR Apache-2.0

//! Nested hardware-virtualization state of a vCPU.
//!
//! Running a nested guest on hardware needs control fields the nested
//! hypervisor never asked for. Those are applied on top of its own control
//! structure right before hardware execution and undone whenever control
//! returns through software emulation instead of the regular exit path,
//! so that the nested hypervisor never observes them.

pub mod svm;
pub mod vmx;

pub use svm::{OuterSvmControls, SvmNested, SvmNestedVmcbCache};
pub use vmx::VmxNested;

use crate::changed::HmChanged;
use crate::error::HmError;
use crate::vcpu::VCpu;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NestedError {
    // The vCPU does not run a nested guest
    NotInNestedMode,
    // The nested state belongs to the other vendor
    WrongVendor,
    // VMX operation that needs a current VMCS
    NoCurrentVmcs,
}

impl From<NestedError> for HmError {
    fn from(err: NestedError) -> Self {
        Self::Nested(err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwvirtVendor {
    Svm,
    Vmx,
}

/// Hardware-derived state kept for a nested guest.
pub trait NestedControlCache {
    fn vendor(&self) -> HwvirtVendor;

    /// Whether hardware-only modifications are currently applied.
    fn is_valid(&self) -> bool;

    /// Undoes the hardware-only modifications and marks the state as no
    /// longer valid. Returns false, without changing anything, when nothing
    /// was applied.
    fn restore_and_invalidate(&mut self) -> bool;
}

#[derive(Debug)]
pub enum NestedHwvirt {
    Svm(SvmNested),
    Vmx(VmxNested),
}

impl NestedHwvirt {
    pub fn as_dyn_ref(&self) -> &dyn NestedControlCache {
        match self {
            NestedHwvirt::Svm(svm) => svm,
            NestedHwvirt::Vmx(vmx) => vmx,
        }
    }

    pub fn as_mut_dyn_ref(&mut self) -> &mut dyn NestedControlCache {
        match self {
            NestedHwvirt::Svm(svm) => svm,
            NestedHwvirt::Vmx(vmx) => vmx,
        }
    }

    pub fn vendor(&self) -> HwvirtVendor {
        self.as_dyn_ref().vendor()
    }
}

impl VCpu {
    /// Installs nested state; any previous state is restored and dropped.
    pub fn enter_nested(&mut self, state: NestedHwvirt) {
        log::debug!("{}: entering nested {:?} mode", self.id(), state.vendor());
        if let Some(mut old) = self.replace_nested(Some(state)) {
            old.as_mut_dyn_ref().restore_and_invalidate();
        }
        self.mark_changed(HmChanged::HWVIRT);
    }

    /// Removes the nested state. The returned state carries the nested
    /// hypervisor's own control values.
    pub fn leave_nested(&mut self) -> Option<NestedHwvirt> {
        let mut state = self.replace_nested(None)?;
        state.as_mut_dyn_ref().restore_and_invalidate();
        self.mark_changed(HmChanged::HWVIRT);
        Some(state)
    }

    pub fn svm_nested_mut(&mut self) -> Result<&mut SvmNested, HmError> {
        match self.nested_mut() {
            Some(NestedHwvirt::Svm(svm)) => Ok(svm),
            Some(NestedHwvirt::Vmx(_)) => Err(NestedError::WrongVendor.into()),
            None => Err(NestedError::NotInNestedMode.into()),
        }
    }

    pub fn vmx_nested_mut(&mut self) -> Result<&mut VmxNested, HmError> {
        match self.nested_mut() {
            Some(NestedHwvirt::Vmx(vmx)) => Ok(vmx),
            Some(NestedHwvirt::Svm(_)) => Err(NestedError::WrongVendor.into()),
            None => Err(NestedError::NotInNestedMode.into()),
        }
    }

    /// Must be called whenever a nested-guest exit is handled by software
    /// emulation rather than the hardware exit path.
    pub fn notify_nested_exit(&mut self) {
        let id = self.id();
        match self.nested_mut() {
            Some(state) => {
                if !state.as_mut_dyn_ref().restore_and_invalidate() {
                    log::trace!("{}: nested exit without hardware state", id);
                }
            }
            None => log::debug!("{}: nested exit outside nested mode", id),
        }

        self.mark_changed(HmChanged::ALL_GUEST);
        self.flush_tlb();
    }

    /// Must be called when the emulated VMPTRLD/VMCLEAR changed the
    /// current VMCS of a nested VMX guest.
    pub fn notify_nested_current_vmcs_changed(&mut self) {
        let id = self.id();
        match self.nested_mut() {
            Some(NestedHwvirt::Vmx(vmx)) => vmx.invalidate_shadow(),
            _ => {
                log::warn!("{}: current VMCS change on a non-VMX vCPU", id);
                return;
            }
        }
        self.mark_changed(HmChanged::HWVIRT);
    }
}
