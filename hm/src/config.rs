// SPDX-License-Identifier: MIT OR Apache-2.0

/// Default number of spin iterations a doorbell rendezvous waits for the
/// poked CPU to leave guest mode.
pub const DEFAULT_POKE_SPIN_LIMIT: u32 = 1_000_000;

/// Default size of the host CPU table.
pub const DEFAULT_HOST_CPU_COUNT: usize = 64;

/// Upper bound on the number of vCPUs in one VM.
pub const MAX_VCPUS: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HmConfig {
    poke_spin_limit: u32,
    host_cpu_count: usize,
}

impl HmConfig {
    pub const fn new() -> Self {
        Self {
            poke_spin_limit: DEFAULT_POKE_SPIN_LIMIT,
            host_cpu_count: DEFAULT_HOST_CPU_COUNT,
        }
    }

    /// Sets the maximum number of spin iterations of a doorbell
    /// rendezvous. A limit of zero degrades every poke to fire-and-forget.
    pub const fn with_poke_spin_limit(mut self, limit: u32) -> Self {
        self.poke_spin_limit = limit;
        self
    }

    pub const fn with_host_cpu_count(mut self, count: usize) -> Self {
        self.host_cpu_count = count;
        self
    }

    pub const fn poke_spin_limit(&self) -> u32 {
        self.poke_spin_limit
    }

    pub const fn host_cpu_count(&self) -> usize {
        self.host_cpu_count
    }
}

impl Default for HmConfig {
    fn default() -> Self {
        Self::new()
    }
}
