// SPDX-License-Identifier: MIT OR Apache-2.0

use core::sync::atomic::{AtomicBool, Ordering};

/// The two per-vCPU flags other EMTs may touch.
///
/// `pending` is the sticky "flush the TLB before the next guest entry"
/// request. Any thread may set it; only the owning EMT clears it, while
/// consuming it on entry.
///
/// `checked` is true from the point the owning EMT has looked at `pending`
/// on its way into guest mode until it is back in host code after the next
/// world switch. While it is set, a remote requester cannot rely on the
/// flag alone and has to poke the CPU the vCPU runs on.
///
/// The owner stores `checked` before it loads `pending`; requesters store
/// `pending` before they load `checked`. Both sides use SeqCst so that at
/// least one of them observes the other's store.
#[derive(Debug, Default)]
pub struct TlbFlushFlags {
    pending: AtomicBool,
    checked: AtomicBool,
}

impl TlbFlushFlags {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            checked: AtomicBool::new(false),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Requests a flush. Returns `true` if this call moved the flag from
    /// clear to set, i.e. no earlier request is still outstanding.
    pub fn request(&self) -> bool {
        !self.pending.swap(true, Ordering::SeqCst)
    }

    /// Consumes an outstanding request. Owner only.
    pub(crate) fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    pub fn is_checked(&self) -> bool {
        self.checked.load(Ordering::SeqCst)
    }

    pub(crate) fn set_checked(&self) {
        self.checked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_checked(&self) {
        self.checked.store(false, Ordering::SeqCst);
    }
}
