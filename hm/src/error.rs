// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::nested::NestedError;
use crate::platform::{InvalidationError, PokeError};
use crate::vm::VmError;

// Functions private to a module may use the leaf error types. Public
// functions return an HmError wrapping the leaf error of their module; each
// leaf error converts into HmError via a From impl next to its definition.
//
// None of the TLB or nested-exit notification entry points return errors:
// platform failures are absorbed where they happen. HmError only surfaces
// from setup and lookup paths and from the platform trait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HmError {
    // Errors from the inter-processor poke primitives
    Poke(PokeError),
    // Errors from the local precise-invalidation primitive
    Invalidation(InvalidationError),
    // VM construction and vCPU/host CPU lookup errors
    Vm(VmError),
    // Misuse of nested hardware-virtualization state
    Nested(NestedError),
}
