// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hardware-assisted virtualization core: cross-vCPU TLB invalidation and
//! nested hardware-virtualization state handling.

#![no_std]

pub mod address;
pub mod changed;
pub mod config;
mod doorbell;
pub mod error;
pub mod flags;
pub mod hostcpu;
pub mod nested;
pub mod platform;
pub mod stats;
mod tlb;
pub mod types;
pub mod vcpu;
pub mod vm;

#[cfg(test)]
pub mod testutils;

pub use error::HmError;
pub use vcpu::{EntryFlush, VCpu};
pub use vm::Vm;
