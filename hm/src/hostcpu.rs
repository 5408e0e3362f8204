// SPDX-License-Identifier: MIT OR Apache-2.0

extern crate alloc;

use crate::error::HmError;
use crate::types::HostCpuId;
use crate::vm::VmError;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Per-physical-CPU state shared with remote requesters.
#[derive(Debug)]
pub struct HostCpu {
    id: HostCpuId,
    // Bumped by the EMT running on this CPU each time its vCPU leaves
    // guest mode. Never written by anyone else.
    world_switch_exits: AtomicU32,
}

impl HostCpu {
    const fn new(id: HostCpuId) -> Self {
        Self {
            id,
            world_switch_exits: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> HostCpuId {
        self.id
    }

    pub fn world_switch_exits(&self) -> u32 {
        self.world_switch_exits.load(Ordering::Acquire)
    }

    pub(crate) fn count_world_switch_exit(&self) {
        self.world_switch_exits.fetch_add(1, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct HostCpuTable {
    cpus: Vec<HostCpu>,
}

impl HostCpuTable {
    pub fn new(count: usize) -> Self {
        let cpus = (0..count)
            .map(|index| HostCpu::new(HostCpuId(index as u32)))
            .collect();
        Self { cpus }
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn get(&self, id: HostCpuId) -> Result<&HostCpu, HmError> {
        self.cpus
            .get(id.index())
            .ok_or(HmError::Vm(VmError::InvalidHostCpu))
    }
}
