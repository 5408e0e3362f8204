// SPDX-License-Identifier: MIT OR Apache-2.0

use bitflags::bitflags;

bitflags! {
    /// Guest-context state that must be re-imported into the hardware
    /// control structure before the next guest entry. The HM core only ever
    /// adds bits; the entry code of the owning EMT consumes them.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct HmChanged: u64 {
        const RIP           = 1 << 0;
        const RFLAGS        = 1 << 1;
        const GPRS          = 1 << 2;
        const SEGMENT_REGS  = 1 << 3;
        const GDTR          = 1 << 4;
        const IDTR          = 1 << 5;
        const LDTR          = 1 << 6;
        const TR            = 1 << 7;
        const CR0           = 1 << 8;
        const CR2           = 1 << 9;
        const CR3           = 1 << 10;
        const CR4           = 1 << 11;
        const DEBUG         = 1 << 12;
        const EFER_MSR      = 1 << 13;
        const SYSCALL_MSRS  = 1 << 14;
        const SYSENTER_MSRS = 1 << 15;
        const TSC_AUX       = 1 << 16;
        const OTHER_MSRS    = 1 << 17;
        const XCRX          = 1 << 18;
        const APIC_TPR      = 1 << 19;
        const INTR_STATE    = 1 << 20;
        const HWVIRT        = 1 << 21;

        const ALL_GUEST = Self::RIP.bits()
            | Self::RFLAGS.bits()
            | Self::GPRS.bits()
            | Self::SEGMENT_REGS.bits()
            | Self::GDTR.bits()
            | Self::IDTR.bits()
            | Self::LDTR.bits()
            | Self::TR.bits()
            | Self::CR0.bits()
            | Self::CR2.bits()
            | Self::CR3.bits()
            | Self::CR4.bits()
            | Self::DEBUG.bits()
            | Self::EFER_MSR.bits()
            | Self::SYSCALL_MSRS.bits()
            | Self::SYSENTER_MSRS.bits()
            | Self::TSC_AUX.bits()
            | Self::OTHER_MSRS.bits()
            | Self::XCRX.bits()
            | Self::APIC_TPR.bits()
            | Self::INTR_STATE.bits()
            | Self::HWVIRT.bits();
    }
}
