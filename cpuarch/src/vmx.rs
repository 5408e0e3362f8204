// SPDX-License-Identifier: MIT OR Apache-2.0

use bitflags::bitflags;

// Intel SDM Vol. 3C, 25.6 "VM-Execution Control Fields".

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PinBasedControls: u32 {
        const EXT_INT_EXIT      = 1 << 0;
        const NMI_EXIT          = 1 << 3;
        const VIRTUAL_NMI       = 1 << 5;
        const PREEMPT_TIMER     = 1 << 6;
        const POSTED_INT        = 1 << 7;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ProcBasedControls: u32 {
        const INT_WINDOW_EXIT       = 1 << 2;
        const USE_TSC_OFFSETTING    = 1 << 3;
        const HLT_EXIT              = 1 << 7;
        const INVLPG_EXIT           = 1 << 9;
        const MWAIT_EXIT            = 1 << 10;
        const RDPMC_EXIT            = 1 << 11;
        const RDTSC_EXIT            = 1 << 12;
        const CR3_LOAD_EXIT         = 1 << 15;
        const CR3_STORE_EXIT        = 1 << 16;
        const CR8_LOAD_EXIT         = 1 << 19;
        const CR8_STORE_EXIT        = 1 << 20;
        const USE_TPR_SHADOW        = 1 << 21;
        const NMI_WINDOW_EXIT       = 1 << 22;
        const MOV_DR_EXIT           = 1 << 23;
        const UNCOND_IO_EXIT        = 1 << 24;
        const USE_IO_BITMAPS        = 1 << 25;
        const MONITOR_TRAP_FLAG     = 1 << 27;
        const USE_MSR_BITMAPS       = 1 << 28;
        const MONITOR_EXIT          = 1 << 29;
        const PAUSE_EXIT            = 1 << 30;
        const USE_SECONDARY_CTLS    = 1 << 31;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ProcBasedControls2: u32 {
        const VIRT_APIC_ACCESS      = 1 << 0;
        const EPT                   = 1 << 1;
        const DESC_TABLE_EXIT       = 1 << 2;
        const RDTSCP                = 1 << 3;
        const VIRT_X2APIC_MODE      = 1 << 4;
        const VPID                  = 1 << 5;
        const WBINVD_EXIT           = 1 << 6;
        const UNRESTRICTED_GUEST    = 1 << 7;
        const APIC_REG_VIRT         = 1 << 8;
        const VIRT_INT_DELIVERY     = 1 << 9;
        const PAUSE_LOOP_EXIT       = 1 << 10;
        const RDRAND_EXIT           = 1 << 11;
        const INVPCID               = 1 << 12;
        const VMFUNC                = 1 << 13;
        const VMCS_SHADOWING        = 1 << 14;
        const ENCLS_EXIT            = 1 << 15;
        const RDSEED_EXIT           = 1 << 16;
        const PML                   = 1 << 17;
        const EPT_VE                = 1 << 18;
        const CONCEAL_VMX_FROM_PT   = 1 << 19;
        const XSAVES_XRSTORS        = 1 << 20;
        const MODE_BASED_EPT_PERM   = 1 << 22;
        const SPP_EPT               = 1 << 23;
        const PT_EPT                = 1 << 24;
        const TSC_SCALING           = 1 << 25;
        const USER_WAIT_PAUSE       = 1 << 26;
        const ENCLV_EXIT            = 1 << 28;
    }
}

/// The subset of VM-execution controls that is merged between an outer
/// guest and a nested guest before hardware execution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VmxExecControls {
    pub pin_based: PinBasedControls,
    pub proc_based: ProcBasedControls,
    pub proc_based2: ProcBasedControls2,
    pub exception_bitmap: u32,
}
