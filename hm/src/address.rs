// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::types::PAGE_SIZE;
use core::fmt;

// Guest addresses are kept as raw 64-bit values: the HM core never
// dereferences them, it only hands them to invalidation primitives and
// compares them as identities.
pub trait GuestAddress: Copy + From<u64> + Into<u64> + PartialEq + Eq {
    #[inline]
    fn bits(&self) -> u64 {
        (*self).into()
    }

    #[inline]
    fn page_align(&self) -> Self {
        Self::from(self.bits() & !(PAGE_SIZE - 1))
    }

    #[inline]
    fn is_page_aligned(&self) -> bool {
        self.bits() & (PAGE_SIZE - 1) == 0
    }

    #[inline]
    fn is_null(&self) -> bool {
        self.bits() == 0
    }
}

macro_rules! guest_address {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            #[inline]
            pub const fn null() -> Self {
                Self(0)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(addr: u64) -> Self {
                Self(addr)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(addr: $name) -> Self {
                addr.0
            }
        }

        impl GuestAddress for $name {}

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#018x}", self.0)
            }
        }
    };
}

guest_address!(GuestVirtAddr);
guest_address!(GuestPhysAddr);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_align() {
        let addr = GuestVirtAddr::new(0x7fff_1234);
        assert_eq!(addr.page_align(), GuestVirtAddr::new(0x7fff_1000));
        assert!(!addr.is_page_aligned());
        assert!(addr.page_align().is_page_aligned());
    }

    #[test]
    fn test_null() {
        assert!(GuestPhysAddr::null().is_null());
        assert!(!GuestPhysAddr::new(0x1000).is_null());
    }
}
