// SPDX-License-Identifier: MIT OR Apache-2.0

use bitfield_struct::bitfield;
use bitflags::bitflags;
use zerocopy::{FromBytes, FromZeros};

bitflags! {
    /// VMCB control intercepts (offsets 00Ch and 010h, read as one 64-bit
    /// value).
    /// AMD64 Architecture Programmer's Manual, Vol. 2, Appendix B.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SvmCtrlIntercepts: u64 {
        const INTR              = 1 << 0;
        const NMI               = 1 << 1;
        const SMI               = 1 << 2;
        const INIT              = 1 << 3;
        const VINTR             = 1 << 4;
        const CR0_SEL_WRITE     = 1 << 5;
        const IDTR_READS        = 1 << 6;
        const GDTR_READS        = 1 << 7;
        const LDTR_READS        = 1 << 8;
        const TR_READS          = 1 << 9;
        const IDTR_WRITES       = 1 << 10;
        const GDTR_WRITES       = 1 << 11;
        const LDTR_WRITES       = 1 << 12;
        const TR_WRITES         = 1 << 13;
        const RDTSC             = 1 << 14;
        const RDPMC             = 1 << 15;
        const PUSHF             = 1 << 16;
        const POPF              = 1 << 17;
        const CPUID             = 1 << 18;
        const RSM               = 1 << 19;
        const IRET              = 1 << 20;
        const INTN              = 1 << 21;
        const INVD              = 1 << 22;
        const PAUSE             = 1 << 23;
        const HLT               = 1 << 24;
        const INVLPG            = 1 << 25;
        const INVLPGA           = 1 << 26;
        const IOIO_PROT         = 1 << 27;
        const MSR_PROT          = 1 << 28;
        const TASK_SWITCH       = 1 << 29;
        const FERR_FREEZE       = 1 << 30;
        const SHUTDOWN          = 1 << 31;
        const VMRUN             = 1 << 32;
        const VMMCALL           = 1 << 33;
        const VMLOAD            = 1 << 34;
        const VMSAVE            = 1 << 35;
        const STGI              = 1 << 36;
        const CLGI              = 1 << 37;
        const SKINIT            = 1 << 38;
        const RDTSCP            = 1 << 39;
        const ICEBP             = 1 << 40;
        const WBINVD            = 1 << 41;
        const MONITOR           = 1 << 42;
        const MWAIT             = 1 << 43;
        const MWAIT_ARMED       = 1 << 44;
        const XSETBV            = 1 << 45;
        const RDPRU             = 1 << 46;
        const EFER_WRITE_TRAP   = 1 << 47;
    }
}

/// Bit in the CR read/write intercept words for `CR<n>`.
#[inline]
pub const fn cr_intercept_bit(cr: u8) -> u16 {
    1u16 << (cr & 0xf)
}

/// Bit in the DR read/write intercept words for `DR<n>`.
#[inline]
pub const fn dr_intercept_bit(dr: u8) -> u16 {
    1u16 << (dr & 0xf)
}

/// Bit in the exception intercept word for exception `vector`.
#[inline]
pub const fn xcpt_intercept_bit(vector: u8) -> u32 {
    1u32 << (vector & 0x1f)
}

#[bitfield(u64)]
#[derive(FromBytes, PartialEq, Eq)]
pub struct VmcbIntCtrl {
    pub v_tpr: u8,
    pub v_irq: bool,
    pub vgif: bool,
    _rsvd_10: bool,
    pub v_nmi: bool,
    pub v_nmi_mask: bool,
    #[bits(3)]
    _rsvd_15_13: u8,
    #[bits(4)]
    pub v_intr_prio: u8,
    pub v_ign_tpr: bool,
    #[bits(3)]
    _rsvd_23_21: u8,
    pub v_intr_masking: bool,
    pub vgif_enable: bool,
    pub v_nmi_enable: bool,
    #[bits(3)]
    _rsvd_29_27: u8,
    pub x2avic_enable: bool,
    pub avic_enable: bool,
    pub v_intr_vector: u8,
    #[bits(24)]
    _rsvd_63_40: u32,
}

#[bitfield(u64)]
#[derive(FromBytes, PartialEq, Eq)]
pub struct VmcbNestedCtrl {
    pub np_enable: bool,
    pub sev_enable: bool,
    pub sev_es_enable: bool,
    pub gmet_enable: bool,
    pub sss_check_enable: bool,
    pub vte_enable: bool,
    pub ro_guest_pt_enable: bool,
    pub invlpgb_tlbsync_enable: bool,
    #[bits(56)]
    _rsvd_63_8: u64,
}

#[bitfield(u64)]
#[derive(FromBytes, PartialEq, Eq)]
pub struct VmcbVirtExt {
    pub lbr_virt_enable: bool,
    pub vmload_vmsave_virt_enable: bool,
    #[bits(62)]
    _rsvd_63_2: u64,
}

/// The VMCB control area (first 1024 bytes of a VMCB).
/// AMD64 Architecture Programmer's Manual, Vol. 2, Table B-1.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, FromBytes)]
pub struct VmcbControlArea {
    pub intercept_cr_read: u16,
    pub intercept_cr_write: u16,
    pub intercept_dr_read: u16,
    pub intercept_dr_write: u16,
    pub intercept_exceptions: u32,
    pub intercept_ctrl: u64,
    pub intercept_misc3: u32,
    pub reserved_018: [u8; 36],
    pub pause_filter_threshold: u16,
    pub pause_filter_count: u16,
    pub iopm_base_pa: u64,
    pub msrpm_base_pa: u64,
    pub tsc_offset: u64,
    pub guest_asid: u32,
    pub tlb_control: u8,
    pub reserved_05d: [u8; 3],
    pub int_ctrl: VmcbIntCtrl,
    pub int_shadow: u64,
    pub exit_code: u64,
    pub exit_info1: u64,
    pub exit_info2: u64,
    pub exit_int_info: u64,
    pub np_ctrl: VmcbNestedCtrl,
    pub avic_apic_bar: u64,
    pub ghcb_gpa: u64,
    pub event_inj: u64,
    pub n_cr3: u64,
    pub virt_ext: VmcbVirtExt,
    pub vmcb_clean: u32,
    pub reserved_0c4: u32,
    pub nrip: u64,
    pub insn_len: u8,
    pub insn_bytes: [u8; 15],
    pub avic_backing_page: u64,
    pub reserved_0e8: u64,
    pub avic_logical_table: u64,
    pub avic_physical_table: u64,
    pub reserved_100: u64,
    pub vmsa_pa: u64,
    pub reserved_110: [u8; 0x2f0],
}

const _: () = assert!(core::mem::size_of::<VmcbControlArea>() == 0x400);

impl Default for VmcbControlArea {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl VmcbControlArea {
    pub fn ctrl_intercepts(&self) -> SvmCtrlIntercepts {
        SvmCtrlIntercepts::from_bits_retain(self.intercept_ctrl)
    }

    pub fn set_ctrl_intercepts(&mut self, intercepts: SvmCtrlIntercepts) {
        self.intercept_ctrl = intercepts.bits();
    }
}
