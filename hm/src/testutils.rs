// SPDX-License-Identifier: MIT OR Apache-2.0

extern crate alloc;
extern crate std;

use crate::address::GuestVirtAddr;
use crate::config::HmConfig;
use crate::error::HmError;
use crate::platform::{HmPlatform, InvalidationError, PokeError};
use crate::types::{HostCpuId, VCpuId};
use crate::vcpu::{EntryFlush, VCpu};
use crate::vm::Vm;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const SYNC_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Recording platform with switchable capabilities. Pokes and synchronous
/// calls bump a per-host-CPU kick counter; a [`SimulatedEmt`] running on
/// that CPU reacts to it like a real EMT leaving guest mode.
#[derive(Debug)]
pub struct TestPlatformState {
    poke_supported: AtomicBool,
    poke_fails: AtomicBool,
    local_invalidation: AtomicBool,
    nested_paging: AtomicBool,
    auto_ack: AtomicBool,
    pokes: Mutex<Vec<HostCpuId>>,
    sync_calls: Mutex<Vec<HostCpuId>>,
    local_invalidations: Mutex<Vec<(VCpuId, HostCpuId, GuestVirtAddr)>>,
    kicks: Vec<AtomicU32>,
    acks: Vec<AtomicU32>,
}

impl TestPlatformState {
    fn new(host_cpus: usize) -> Self {
        Self {
            poke_supported: AtomicBool::new(true),
            poke_fails: AtomicBool::new(false),
            local_invalidation: AtomicBool::new(true),
            nested_paging: AtomicBool::new(true),
            auto_ack: AtomicBool::new(false),
            pokes: Mutex::new(Vec::new()),
            sync_calls: Mutex::new(Vec::new()),
            local_invalidations: Mutex::new(Vec::new()),
            kicks: (0..host_cpus).map(|_| AtomicU32::new(0)).collect(),
            acks: (0..host_cpus).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn set_poke_supported(&self, supported: bool) {
        self.poke_supported.store(supported, Ordering::SeqCst);
    }

    pub fn set_poke_fails(&self, fails: bool) {
        self.poke_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_local_invalidation(&self, supported: bool) {
        self.local_invalidation.store(supported, Ordering::SeqCst);
    }

    pub fn set_nested_paging(&self, active: bool) {
        self.nested_paging.store(active, Ordering::SeqCst);
    }

    /// Synchronous calls complete without a [`SimulatedEmt`] acking them.
    pub fn set_auto_ack(&self, auto_ack: bool) {
        self.auto_ack.store(auto_ack, Ordering::SeqCst);
    }

    pub fn pokes(&self) -> Vec<HostCpuId> {
        self.pokes.lock().unwrap().clone()
    }

    pub fn sync_calls(&self) -> Vec<HostCpuId> {
        self.sync_calls.lock().unwrap().clone()
    }

    pub fn local_invalidations(&self) -> Vec<(VCpuId, HostCpuId, GuestVirtAddr)> {
        self.local_invalidations.lock().unwrap().clone()
    }

    pub fn kicks(&self, cpu: HostCpuId) -> u32 {
        self.kicks[cpu.index()].load(Ordering::SeqCst)
    }

    fn kick(&self, cpu: HostCpuId) -> u32 {
        self.kicks[cpu.index()].fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn ack(&self, cpu: HostCpuId, kicks: u32) {
        self.acks[cpu.index()].fetch_max(kicks, Ordering::SeqCst);
    }

    fn wait_for_ack(&self, cpu: HostCpuId, kick: u32) -> bool {
        let deadline = Instant::now() + SYNC_CALL_TIMEOUT;
        while self.acks[cpu.index()].load(Ordering::SeqCst) < kick {
            if Instant::now() > deadline {
                return false;
            }
            thread::yield_now();
        }
        true
    }
}

#[derive(Clone, Debug)]
pub struct TestPlatform(Arc<TestPlatformState>);

impl TestPlatform {
    pub fn new(host_cpus: usize) -> (Self, Arc<TestPlatformState>) {
        let state = Arc::new(TestPlatformState::new(host_cpus));
        (Self(state.clone()), state)
    }
}

impl HmPlatform for TestPlatform {
    fn invalidate_local_page(
        &self,
        vcpu: VCpuId,
        host_cpu: HostCpuId,
        addr: GuestVirtAddr,
    ) -> Result<(), HmError> {
        if !self.0.local_invalidation.load(Ordering::SeqCst) {
            return Err(InvalidationError::NotSupported.into());
        }
        self.0
            .local_invalidations
            .lock()
            .unwrap()
            .push((vcpu, host_cpu, addr));
        Ok(())
    }

    fn poke_cpu(&self, host_cpu: HostCpuId) -> Result<(), HmError> {
        if !self.0.poke_supported.load(Ordering::SeqCst) {
            return Err(PokeError::NotSupported.into());
        }
        if self.0.poke_fails.load(Ordering::SeqCst) {
            return Err(PokeError::Failed.into());
        }
        self.0.pokes.lock().unwrap().push(host_cpu);
        self.0.kick(host_cpu);
        Ok(())
    }

    fn run_on_cpu(&self, host_cpu: HostCpuId, handler: &(dyn Fn() + Sync)) -> Result<(), HmError> {
        self.0.sync_calls.lock().unwrap().push(host_cpu);
        let kick = self.0.kick(host_cpu);
        if self.0.auto_ack.load(Ordering::SeqCst) {
            self.0.ack(host_cpu, kick);
        }
        if !self.0.wait_for_ack(host_cpu, kick) {
            return Err(PokeError::Failed.into());
        }
        handler();
        Ok(())
    }

    fn nested_paging_active(&self) -> bool {
        self.0.nested_paging.load(Ordering::SeqCst)
    }
}

/// Creates a VM whose doorbell waits long enough for test threads to be
/// scheduled.
pub fn test_vm(vcpus: usize, host_cpus: usize) -> (Arc<Vm>, Arc<TestPlatformState>) {
    let config = HmConfig::new()
        .with_host_cpu_count(host_cpus)
        .with_poke_spin_limit(u32::MAX);
    test_vm_with_config(config, vcpus)
}

pub fn test_vm_with_config(config: HmConfig, vcpus: usize) -> (Arc<Vm>, Arc<TestPlatformState>) {
    let (platform, state) = TestPlatform::new(config.host_cpu_count());
    let vm = Vm::new(config, Box::new(platform), vcpus).unwrap();
    (vm, state)
}

/// Runs a vCPU "in guest mode" on a host CPU in its own thread. Every kick
/// of that host CPU makes it leave guest mode, acknowledge the kick and
/// enter again, servicing pending flushes on the way.
#[derive(Debug)]
pub struct SimulatedEmt {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<u32>>,
}

impl SimulatedEmt {
    /// Returns once the vCPU is in guest mode.
    pub fn start(mut vcpu: VCpu, cpu: HostCpuId, platform: Arc<TestPlatformState>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let in_guest = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let thread_in_guest = in_guest.clone();
        let handle = thread::spawn(move || {
            let mut flushes = 0;
            let mut seen = platform.kicks(cpu);

            vcpu.enter_host_cpu(cpu).unwrap();
            if vcpu.prepare_guest_entry().unwrap() == EntryFlush::Requested {
                flushes += 1;
            }
            thread_in_guest.store(true, Ordering::SeqCst);

            while !thread_stop.load(Ordering::SeqCst) {
                let kicks = platform.kicks(cpu);
                if kicks == seen {
                    thread::yield_now();
                    continue;
                }
                seen = kicks;
                vcpu.world_switch_exit();
                platform.ack(cpu, kicks);
                if vcpu.prepare_guest_entry().unwrap() == EntryFlush::Requested {
                    flushes += 1;
                }
            }

            vcpu.world_switch_exit();
            vcpu.leave_host_cpu();
            flushes
        });

        while !in_guest.load(Ordering::SeqCst) && !handle.is_finished() {
            thread::yield_now();
        }

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the thread and returns the number of requested flushes it
    /// serviced.
    pub fn stop(mut self) -> u32 {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.take().unwrap().join().unwrap()
    }
}

impl Drop for SimulatedEmt {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
