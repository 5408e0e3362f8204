// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::address::GuestVirtAddr;
use crate::error::HmError;
use crate::types::{HostCpuId, VCpuId};

use core::fmt::Debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PokeError {
    // The host kernel has no asynchronous poke primitive
    NotSupported,
    // The poke was attempted but could not be confirmed as delivered
    Failed,
}

impl From<PokeError> for HmError {
    fn from(err: PokeError) -> Self {
        Self::Poke(err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidationError {
    // No hot-path context is available to issue a precise invalidation
    NotSupported,
}

impl From<InvalidationError> for HmError {
    fn from(err: InvalidationError) -> Self {
        Self::Invalidation(err)
    }
}

/// The services the HM core consumes from the host kernel and the
/// vendor-specific world-switch code. One platform object is shared by all
/// EMTs of a VM, so every method may be called concurrently.
pub trait HmPlatform: Debug + Send + Sync {
    /// Invalidates the translation of `addr` for `vcpu` under its current
    /// ASID/VPID. Only called on the EMT of `vcpu` while it is loaded on
    /// `host_cpu`.
    fn invalidate_local_page(
        &self,
        vcpu: VCpuId,
        host_cpu: HostCpuId,
        addr: GuestVirtAddr,
    ) -> Result<(), HmError>;

    /// Sends an asynchronous interrupt to `host_cpu` without waiting for it
    /// to be handled.  Returns `PokeError::NotSupported` if the host cannot
    /// do this.
    fn poke_cpu(&self, host_cpu: HostCpuId) -> Result<(), HmError>;

    /// Runs `handler` on `host_cpu` and returns once it has completed there.
    fn run_on_cpu(&self, host_cpu: HostCpuId, handler: &(dyn Fn() + Sync)) -> Result<(), HmError>;

    /// Indicates whether second-level address translation (EPT/NPT) is
    /// active for the VM.
    fn nested_paging_active(&self) -> bool;
}
