// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{HwvirtVendor, NestedControlCache};
use cpuarch::vmcb::{
    cr_intercept_bit, dr_intercept_bit, xcpt_intercept_bit, SvmCtrlIntercepts, VmcbControlArea,
};

/// Controls the outer hypervisor needs while any nested guest executes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OuterSvmControls {
    pub intercept_cr_read: u16,
    pub intercept_cr_write: u16,
    pub intercept_dr_read: u16,
    pub intercept_dr_write: u16,
    pub intercept_exceptions: u32,
    pub intercept_ctrl: SvmCtrlIntercepts,
    pub tsc_offset: u64,
    pub nested_paging: bool,
    pub pause_filter_count: u16,
    pub pause_filter_threshold: u16,
}

/// The nested hypervisor's own values of the VMCB control fields that are
/// modified for hardware execution. Only meaningful while valid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SvmNestedVmcbCache {
    intercept_rd_crx: u16,
    intercept_wr_crx: u16,
    intercept_rd_drx: u16,
    intercept_wr_drx: u16,
    pause_filter_threshold: u16,
    pause_filter_count: u16,
    intercept_xcpt: u32,
    intercept_ctrl: u64,
    tsc_offset: u64,
    v_intr_masking: bool,
    nested_paging: bool,
    lbr_virt: bool,
    valid: bool,
}

impl SvmNestedVmcbCache {
    pub const fn new() -> Self {
        Self {
            intercept_rd_crx: 0,
            intercept_wr_crx: 0,
            intercept_rd_drx: 0,
            intercept_wr_drx: 0,
            pause_filter_threshold: 0,
            pause_filter_count: 0,
            intercept_xcpt: 0,
            intercept_ctrl: 0,
            tsc_offset: 0,
            v_intr_masking: false,
            nested_paging: false,
            lbr_virt: false,
            valid: false,
        }
    }

    // The result is not marked valid.
    fn from_vmcb(vmcb: &VmcbControlArea) -> Self {
        let int_ctrl = vmcb.int_ctrl;
        let np_ctrl = vmcb.np_ctrl;
        let virt_ext = vmcb.virt_ext;
        Self {
            intercept_rd_crx: vmcb.intercept_cr_read,
            intercept_wr_crx: vmcb.intercept_cr_write,
            intercept_rd_drx: vmcb.intercept_dr_read,
            intercept_wr_drx: vmcb.intercept_dr_write,
            pause_filter_threshold: vmcb.pause_filter_threshold,
            pause_filter_count: vmcb.pause_filter_count,
            intercept_xcpt: vmcb.intercept_exceptions,
            intercept_ctrl: vmcb.intercept_ctrl,
            tsc_offset: vmcb.tsc_offset,
            v_intr_masking: int_ctrl.v_intr_masking(),
            nested_paging: np_ctrl.np_enable(),
            lbr_virt: virt_ext.lbr_virt_enable(),
            valid: false,
        }
    }

    fn restore(&self, vmcb: &mut VmcbControlArea) {
        vmcb.intercept_cr_read = self.intercept_rd_crx;
        vmcb.intercept_cr_write = self.intercept_wr_crx;
        vmcb.intercept_dr_read = self.intercept_rd_drx;
        vmcb.intercept_dr_write = self.intercept_wr_drx;
        vmcb.pause_filter_threshold = self.pause_filter_threshold;
        vmcb.pause_filter_count = self.pause_filter_count;
        vmcb.intercept_exceptions = self.intercept_xcpt;
        vmcb.intercept_ctrl = self.intercept_ctrl;
        vmcb.tsc_offset = self.tsc_offset;

        let int_ctrl = vmcb.int_ctrl;
        vmcb.int_ctrl = int_ctrl.with_v_intr_masking(self.v_intr_masking);
        let np_ctrl = vmcb.np_ctrl;
        vmcb.np_ctrl = np_ctrl.with_np_enable(self.nested_paging);
        let virt_ext = vmcb.virt_ext;
        vmcb.virt_ext = virt_ext.with_lbr_virt_enable(self.lbr_virt);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn intercept_ctrl(&self) -> SvmCtrlIntercepts {
        SvmCtrlIntercepts::from_bits_retain(self.intercept_ctrl)
    }

    pub fn tsc_offset(&self) -> u64 {
        self.tsc_offset
    }
}

/// Nested SVM state of a vCPU: the nested hypervisor's VMCB control area
/// and the cache of its original values while hardware runs it.
#[derive(Debug, Default)]
pub struct SvmNested {
    vmcb: VmcbControlArea,
    cache: SvmNestedVmcbCache,
}

impl SvmNested {
    pub fn new(vmcb: VmcbControlArea) -> Self {
        Self {
            vmcb,
            cache: SvmNestedVmcbCache::new(),
        }
    }

    pub fn vmcb(&self) -> &VmcbControlArea {
        &self.vmcb
    }

    pub fn vmcb_mut(&mut self) -> &mut VmcbControlArea {
        &mut self.vmcb
    }

    pub fn cache(&self) -> &SvmNestedVmcbCache {
        &self.cache
    }

    /// Merges the outer hypervisor's requirements into the nested VMCB
    /// before it is handed to hardware. The nested hypervisor's values are
    /// saved first and come back with
    /// [`NestedControlCache::restore_and_invalidate`].
    pub fn prepare_hw_run(&mut self, outer: &OuterSvmControls) {
        if self.cache.valid {
            log::trace!("SVM: nested VMCB already prepared");
            return;
        }

        let mut cache = SvmNestedVmcbCache::from_vmcb(&self.vmcb);
        cache.valid = true;
        self.cache = cache;

        let vmcb = &mut self.vmcb;
        vmcb.intercept_cr_read = cache.intercept_rd_crx | outer.intercept_cr_read;
        vmcb.intercept_cr_write =
            cache.intercept_wr_crx | outer.intercept_cr_write | cr_intercept_bit(4);
        vmcb.intercept_dr_read = cache.intercept_rd_drx | outer.intercept_dr_read;
        vmcb.intercept_dr_write = cache.intercept_wr_drx | outer.intercept_dr_write;
        vmcb.intercept_exceptions = cache.intercept_xcpt | outer.intercept_exceptions;

        // The outer interrupt window can't be opened while the nested guest
        // runs.
        let nested_ctrl = cache.intercept_ctrl();
        let outer_ctrl = outer.intercept_ctrl - SvmCtrlIntercepts::VINTR;
        vmcb.set_ctrl_intercepts(nested_ctrl | outer_ctrl | SvmCtrlIntercepts::VMRUN);

        vmcb.tsc_offset = cache.tsc_offset.wrapping_add(outer.tsc_offset);

        let int_ctrl = vmcb.int_ctrl;
        vmcb.int_ctrl = int_ctrl.with_v_intr_masking(true);
        let np_ctrl = vmcb.np_ctrl;
        vmcb.np_ctrl = np_ctrl.with_np_enable(outer.nested_paging);
        let virt_ext = vmcb.virt_ext;
        vmcb.virt_ext = virt_ext.with_lbr_virt_enable(false);

        if !nested_ctrl.contains(SvmCtrlIntercepts::PAUSE) {
            vmcb.pause_filter_count = outer.pause_filter_count;
            vmcb.pause_filter_threshold = outer.pause_filter_threshold;
        }
    }

    // What the nested hypervisor put into its VMCB.
    fn intended(&self) -> SvmNestedVmcbCache {
        if self.cache.valid {
            self.cache
        } else {
            SvmNestedVmcbCache::from_vmcb(&self.vmcb)
        }
    }

    pub fn is_ctrl_intercept_set(&self, intercepts: SvmCtrlIntercepts) -> bool {
        self.intended().intercept_ctrl().contains(intercepts)
    }

    pub fn is_xcpt_intercept_set(&self, vector: u8) -> bool {
        self.intended().intercept_xcpt & xcpt_intercept_bit(vector) != 0
    }

    pub fn is_read_cr_intercept_set(&self, cr: u8) -> bool {
        self.intended().intercept_rd_crx & cr_intercept_bit(cr) != 0
    }

    pub fn is_write_cr_intercept_set(&self, cr: u8) -> bool {
        self.intended().intercept_wr_crx & cr_intercept_bit(cr) != 0
    }

    pub fn is_read_dr_intercept_set(&self, dr: u8) -> bool {
        self.intended().intercept_rd_drx & dr_intercept_bit(dr) != 0
    }

    pub fn is_write_dr_intercept_set(&self, dr: u8) -> bool {
        self.intended().intercept_wr_drx & dr_intercept_bit(dr) != 0
    }

    pub fn pause_filter_count(&self) -> u16 {
        self.intended().pause_filter_count
    }

    pub fn pause_filter_threshold(&self) -> u16 {
        self.intended().pause_filter_threshold
    }

    /// Converts an outer-guest TSC value into the nested guest's view.
    pub fn apply_tsc_offset(&self, tsc: u64) -> u64 {
        tsc.wrapping_add(self.intended().tsc_offset)
    }

    pub fn remove_tsc_offset(&self, tsc: u64) -> u64 {
        tsc.wrapping_sub(self.intended().tsc_offset)
    }
}

impl NestedControlCache for SvmNested {
    fn vendor(&self) -> HwvirtVendor {
        HwvirtVendor::Svm
    }

    fn is_valid(&self) -> bool {
        self.cache.valid
    }

    fn restore_and_invalidate(&mut self) -> bool {
        if !self.cache.valid {
            return false;
        }
        self.cache.restore(&mut self.vmcb);
        self.cache.valid = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_vmcb() -> VmcbControlArea {
        let mut vmcb = VmcbControlArea::default();
        vmcb.intercept_cr_read = cr_intercept_bit(0) | cr_intercept_bit(3);
        vmcb.intercept_cr_write = cr_intercept_bit(0);
        vmcb.intercept_dr_write = dr_intercept_bit(7);
        vmcb.intercept_exceptions = xcpt_intercept_bit(14);
        vmcb.set_ctrl_intercepts(
            SvmCtrlIntercepts::HLT | SvmCtrlIntercepts::PAUSE | SvmCtrlIntercepts::VMRUN,
        );
        vmcb.pause_filter_count = 3000;
        vmcb.pause_filter_threshold = 40;
        vmcb.tsc_offset = 0x1000;
        let virt_ext = vmcb.virt_ext;
        vmcb.virt_ext = virt_ext.with_lbr_virt_enable(true);
        vmcb
    }

    fn outer_controls() -> OuterSvmControls {
        OuterSvmControls {
            intercept_cr_read: cr_intercept_bit(4),
            intercept_cr_write: cr_intercept_bit(8),
            intercept_dr_read: 0xffff,
            intercept_dr_write: 0xffff,
            intercept_exceptions: xcpt_intercept_bit(18) | xcpt_intercept_bit(17),
            intercept_ctrl: SvmCtrlIntercepts::INTR
                | SvmCtrlIntercepts::VINTR
                | SvmCtrlIntercepts::CPUID,
            tsc_offset: 0x20,
            nested_paging: true,
            pause_filter_count: 100,
            pause_filter_threshold: 10,
        }
    }

    #[test]
    fn test_prepare_widens() {
        let mut svm = SvmNested::new(nested_vmcb());
        svm.prepare_hw_run(&outer_controls());
        assert!(svm.is_valid());

        let vmcb = *svm.vmcb();
        let cr_read = vmcb.intercept_cr_read;
        let cr_write = vmcb.intercept_cr_write;
        let exceptions = vmcb.intercept_exceptions;
        let tsc_offset = vmcb.tsc_offset;
        let int_ctrl = vmcb.int_ctrl;
        let np_ctrl = vmcb.np_ctrl;
        let virt_ext = vmcb.virt_ext;
        assert_eq!(cr_read, 0x19);
        assert_eq!(cr_write, 0x111);
        assert_eq!(exceptions, (1 << 14) | (1 << 17) | (1 << 18));
        assert_eq!(
            vmcb.ctrl_intercepts(),
            SvmCtrlIntercepts::HLT
                | SvmCtrlIntercepts::PAUSE
                | SvmCtrlIntercepts::VMRUN
                | SvmCtrlIntercepts::INTR
                | SvmCtrlIntercepts::CPUID
        );
        assert_eq!(tsc_offset, 0x1020);
        assert!(int_ctrl.v_intr_masking());
        assert!(np_ctrl.np_enable());
        assert!(!virt_ext.lbr_virt_enable());
    }

    #[test]
    fn test_pause_filter() {
        // The nested hypervisor intercepts PAUSE: its filter stays.
        let mut svm = SvmNested::new(nested_vmcb());
        svm.prepare_hw_run(&outer_controls());
        let count = svm.vmcb().pause_filter_count;
        assert_eq!(count, 3000);

        let mut vmcb = nested_vmcb();
        vmcb.set_ctrl_intercepts(SvmCtrlIntercepts::HLT);
        let mut svm = SvmNested::new(vmcb);
        svm.prepare_hw_run(&outer_controls());
        let count = svm.vmcb().pause_filter_count;
        let threshold = svm.vmcb().pause_filter_threshold;
        assert_eq!((count, threshold), (100, 10));
        assert_eq!(svm.pause_filter_count(), 3000);
        assert_eq!(svm.pause_filter_threshold(), 40);
    }

    #[test]
    fn test_round_trip() {
        let original = nested_vmcb();
        let mut svm = SvmNested::new(original);
        svm.prepare_hw_run(&outer_controls());

        // Software-emulated #VMEXIT.
        svm.vmcb_mut().exit_code = 0x78;
        svm.vmcb_mut().exit_info1 = 0xdead;

        assert!(svm.restore_and_invalidate());
        assert!(!svm.is_valid());
        assert!(!svm.cache().is_valid());
        assert_eq!(
            SvmNestedVmcbCache::from_vmcb(svm.vmcb()),
            SvmNestedVmcbCache::from_vmcb(&original)
        );
        let exit_code = svm.vmcb().exit_code;
        let exit_info1 = svm.vmcb().exit_info1;
        assert_eq!((exit_code, exit_info1), (0x78, 0xdead));
    }

    #[test]
    fn test_single_use() {
        let mut svm = SvmNested::new(nested_vmcb());
        assert!(!svm.restore_and_invalidate());

        svm.prepare_hw_run(&outer_controls());
        assert!(svm.restore_and_invalidate());
        let restored = *svm.vmcb();

        // Anything written after the restore survives a second call.
        svm.vmcb_mut().tsc_offset = 42;
        assert!(!svm.restore_and_invalidate());
        let tsc_offset = svm.vmcb().tsc_offset;
        assert_eq!(tsc_offset, 42);
        svm.vmcb_mut().tsc_offset = restored.tsc_offset;
        assert_eq!(*svm.vmcb(), restored);
    }

    #[test]
    fn test_double_prepare() {
        let original = nested_vmcb();
        let mut svm = SvmNested::new(original);
        svm.prepare_hw_run(&outer_controls());
        let widened = *svm.vmcb();
        svm.prepare_hw_run(&outer_controls());
        assert_eq!(*svm.vmcb(), widened);
        assert_eq!(*svm.cache(), {
            let mut cache = SvmNestedVmcbCache::from_vmcb(&original);
            cache.valid = true;
            cache
        });

        svm.restore_and_invalidate();
        assert_eq!(*svm.vmcb(), original);
    }

    #[test]
    fn test_queries_use_intent() {
        let mut svm = SvmNested::new(nested_vmcb());
        svm.prepare_hw_run(&outer_controls());

        assert!(svm.is_ctrl_intercept_set(SvmCtrlIntercepts::HLT));
        assert!(!svm.is_ctrl_intercept_set(SvmCtrlIntercepts::CPUID));
        assert!(!svm.is_ctrl_intercept_set(SvmCtrlIntercepts::HLT | SvmCtrlIntercepts::INTR));
        assert!(svm.is_xcpt_intercept_set(14));
        assert!(!svm.is_xcpt_intercept_set(18));
        assert!(svm.is_read_cr_intercept_set(3));
        assert!(!svm.is_read_cr_intercept_set(4));
        assert!(!svm.is_write_cr_intercept_set(4));
        assert!(svm.is_write_dr_intercept_set(7));
        assert!(!svm.is_read_dr_intercept_set(7));
        assert_eq!(svm.apply_tsc_offset(0x10000), 0x11000);
        assert_eq!(svm.remove_tsc_offset(0x11000), 0x10000);

        // Same answers without hardware state applied.
        svm.restore_and_invalidate();
        assert!(!svm.is_ctrl_intercept_set(SvmCtrlIntercepts::CPUID));
        assert!(svm.is_write_dr_intercept_set(7));
        assert_eq!(svm.apply_tsc_offset(0x10000), 0x11000);
    }

    #[test]
    fn test_tsc_offset_wraps() {
        let mut vmcb = VmcbControlArea::default();
        vmcb.tsc_offset = (-0x100i64) as u64;
        let svm = SvmNested::new(vmcb);
        assert_eq!(svm.apply_tsc_offset(0x1000), 0xf00);
        assert_eq!(svm.remove_tsc_offset(0xf00), 0x1000);
    }
}
