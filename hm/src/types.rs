// SPDX-License-Identifier: MIT OR Apache-2.0

use core::fmt;

/// Index of a virtual CPU within its VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VCpuId(pub u32);

impl VCpuId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for VCpuId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for VCpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vcpu{}", self.0)
    }
}

/// Identifier of a physical (host) CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostCpuId(pub u32);

impl HostCpuId {
    /// Sentinel stored in atomics for "not on any host CPU".
    pub(crate) const NIL_RAW: u32 = u32::MAX;

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn from_raw(raw: u32) -> Option<Self> {
        if raw == Self::NIL_RAW {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub(crate) const fn into_raw(cpu: Option<Self>) -> u32 {
        match cpu {
            Some(cpu) => cpu.0,
            None => Self::NIL_RAW,
        }
    }
}

impl From<u32> for HostCpuId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for HostCpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
