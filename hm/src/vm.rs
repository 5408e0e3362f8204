// SPDX-License-Identifier: MIT OR Apache-2.0

extern crate alloc;

use crate::config::{HmConfig, MAX_VCPUS};
use crate::error::HmError;
use crate::flags::TlbFlushFlags;
use crate::hostcpu::HostCpuTable;
use crate::platform::HmPlatform;
use crate::stats::VCpuStats;
use crate::types::{HostCpuId, VCpuId};
use crate::vcpu::VCpu;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::slice::Iter;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmError {
    // A VM needs at least one vCPU
    NoVCpus,
    // More vCPUs than MAX_VCPUS were requested
    TooManyVCpus,
    // vCPU id out of range
    InvalidVCpu,
    // The vCPU already has an owning EMT
    VCpuClaimed,
    // Host CPU id out of range
    InvalidHostCpu,
    // The operation requires the vCPU to be loaded on a host CPU
    NotOnHostCpu,
}

impl From<VmError> for HmError {
    fn from(err: VmError) -> Self {
        Self::Vm(err)
    }
}

/// The part of a vCPU that other EMTs may look at. Everything here is
/// atomic; owner-only state lives in [`VCpu`].
#[derive(Debug)]
pub struct VCpuShared {
    id: VCpuId,
    flush: TlbFlushFlags,
    entered_host_cpu: AtomicU32,
    claimed: AtomicBool,
    stats: VCpuStats,
}

impl VCpuShared {
    const fn new(id: VCpuId) -> Self {
        Self {
            id,
            flush: TlbFlushFlags::new(),
            entered_host_cpu: AtomicU32::new(HostCpuId::NIL_RAW),
            claimed: AtomicBool::new(false),
            stats: VCpuStats::new(),
        }
    }

    pub fn id(&self) -> VCpuId {
        self.id
    }

    pub fn flush_flags(&self) -> &TlbFlushFlags {
        &self.flush
    }

    /// The host CPU this vCPU's hardware context is currently loaded on.
    pub fn entered_host_cpu(&self) -> Option<HostCpuId> {
        HostCpuId::from_raw(self.entered_host_cpu.load(Ordering::Acquire))
    }

    pub(crate) fn set_entered_host_cpu(&self, cpu: Option<HostCpuId>) {
        self.entered_host_cpu
            .store(HostCpuId::into_raw(cpu), Ordering::Release);
    }

    pub fn stats(&self) -> &VCpuStats {
        &self.stats
    }

    fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}

/// Per-VM state of the HM core: configuration, the platform services and
/// the shared halves of all vCPUs.
#[derive(Debug)]
pub struct Vm {
    config: HmConfig,
    platform: Box<dyn HmPlatform>,
    vcpus: Vec<VCpuShared>,
    host_cpus: HostCpuTable,
}

impl Vm {
    pub fn new(
        config: HmConfig,
        platform: Box<dyn HmPlatform>,
        vcpu_count: usize,
    ) -> Result<Arc<Self>, HmError> {
        if vcpu_count == 0 {
            return Err(VmError::NoVCpus.into());
        }
        if vcpu_count > MAX_VCPUS {
            return Err(VmError::TooManyVCpus.into());
        }

        let vcpus = (0..vcpu_count)
            .map(|index| VCpuShared::new(VCpuId(index as u32)))
            .collect();
        log::debug!(
            "HM: created VM with {} vCPUs, {} host CPUs",
            vcpu_count,
            config.host_cpu_count()
        );

        Ok(Arc::new(Self {
            config,
            platform,
            vcpus,
            host_cpus: HostCpuTable::new(config.host_cpu_count()),
        }))
    }

    pub fn config(&self) -> &HmConfig {
        &self.config
    }

    pub fn platform(&self) -> &dyn HmPlatform {
        self.platform.as_ref()
    }

    pub fn vcpu_count(&self) -> usize {
        self.vcpus.len()
    }

    pub fn vcpu(&self, id: VCpuId) -> Result<&VCpuShared, HmError> {
        self.vcpus
            .get(id.index())
            .ok_or(HmError::Vm(VmError::InvalidVCpu))
    }

    // Only for ids that were validated before, e.g. by claim_vcpu().
    pub(crate) fn shared(&self, id: VCpuId) -> &VCpuShared {
        &self.vcpus[id.index()]
    }

    pub fn vcpus(&self) -> Iter<'_, VCpuShared> {
        self.vcpus.iter()
    }

    pub fn host_cpus(&self) -> &HostCpuTable {
        &self.host_cpus
    }

    /// Hands out the owner handle of a vCPU to the thread that is going to
    /// run it. Only one handle per vCPU can exist at a time.
    pub fn claim_vcpu(self: &Arc<Self>, id: VCpuId) -> Result<VCpu, HmError> {
        let shared = self.vcpu(id)?;
        if !shared.try_claim() {
            return Err(VmError::VCpuClaimed.into());
        }
        Ok(VCpu::new(Arc::clone(self), id))
    }
}
