use crate::error::MtrrError;
use crate::error::MtrrResult;
use crate::hal::Hal;
use crate::hal::X64Hal;
use crate::structs::CR0_CD;
use crate::structs::CR0_NW;
use crate::structs::CR4_PGE;
use crate::structs::MSR_IA32_MTRR_DEF_TYPE;
use crate::structs::MSR_IA32_MTRRCAP;
use crate::structs::MTRR_NUMBER_OF_VARIABLE_MTRR;
use crate::structs::MsrIa32MtrrDefType;
use crate::structs::MsrIa32MtrrPhysbaseRegister;
use crate::structs::MsrIa32MtrrPhysmaskRegister;
use crate::structs::MsrIa32MtrrcapRegister;
use crate::structs::MtrrContext;
use crate::structs::MtrrMemoryCacheType;
use crate::structs::MtrrMemoryRange;
use crate::structs::PAGE_SHIFT;
use crate::structs::SIZE_4KB;
use crate::structs::SL_ACM_MTRR_MASK;
use crate::structs::msr_ia32_mtrr_physbase;
use crate::structs::msr_ia32_mtrr_physmask;
use crate::utils::get_power_of_two_64;
use crate::utils::is_pow2;
use crate::utils::trailing_zero_count;

/// Number of whole pages needed to hold `size` bytes.
pub fn acm_page_count(size: u32) -> u64 {
    (size as u64 + SIZE_4KB - 1) >> PAGE_SHIFT
}

/// Largest range, in pages, that `base_address` is naturally aligned to.
///
/// MTRRs work at page granularity, so the result is never below one page.
pub fn max_aligned_range(base_address: u64) -> u64 {
    1u64 << trailing_zero_count(base_address >> PAGE_SHIFT).min(u64::BITS - 1)
}

/// The variable MTRR ranges that cover an ACM as write-back.
///
/// There are very specific rules about calculating the MTRR mask. If the size
/// of the range is a power of 2 and the base of the range is on a size of
/// range boundary, a single MTRR can be used. In all other cases multiple
/// MTRRs must be used. Depending on the base and size, this could end up being
/// successively smaller MTRR range sizes but they all have to be multiples of
/// one another.
#[derive(Debug, Clone)]
pub struct AcmMtrrPlan {
    ranges: [MtrrMemoryRange; MTRR_NUMBER_OF_VARIABLE_MTRR],
    count: usize,
}

impl AcmMtrrPlan {
    ///  Computes the ranges covering `[base_address, base_address + size)`
    ///  rounded up to whole pages.
    ///
    ///  - `base_address` -  Page aligned physical base of the ACM
    ///  - `size`         -  Size of the ACM in bytes
    ///  - `capacity`     -  Variable MTRR pairs available on this processor
    pub fn new(base_address: u64, size: u32, capacity: usize) -> MtrrResult<Self> {
        if base_address == 0 || size == 0 {
            return Err(MtrrError::InvalidParameter);
        }

        if base_address & (SIZE_4KB - 1) != 0 {
            return Err(MtrrError::BaseAddressNotAligned);
        }

        let mut remaining = acm_page_count(size);
        if (base_address >> PAGE_SHIFT) + remaining > SL_ACM_MTRR_MASK + 1 {
            return Err(MtrrError::AddressBeyondAcmMask);
        }

        let capacity = capacity.min(MTRR_NUMBER_OF_VARIABLE_MTRR);
        let mut plan = Self { ranges: [MtrrMemoryRange::default(); MTRR_NUMBER_OF_VARIABLE_MTRR], count: 0 };
        let mut base = base_address;

        // First loop, use the max range the base is aligned to
        let mtrr_max_range = max_aligned_range(base_address);
        while remaining >= mtrr_max_range {
            plan.push(capacity, MtrrMemoryRange::new(base, mtrr_max_range, MtrrMemoryCacheType::WriteBack))?;
            remaining -= mtrr_max_range;
            base += mtrr_max_range << PAGE_SHIFT;
        }

        // Second loop, successively smaller ranges to cover the rest
        while remaining > 0 {
            let mtrr_next_range = get_power_of_two_64(remaining);
            if mtrr_next_range == 0 {
                return Err(MtrrError::ZeroSizedRange);
            }

            plan.push(capacity, MtrrMemoryRange::new(base, mtrr_next_range, MtrrMemoryCacheType::WriteBack))?;
            remaining -= mtrr_next_range;
            base += mtrr_next_range << PAGE_SHIFT;
        }

        Ok(plan)
    }

    fn push(&mut self, capacity: usize, range: MtrrMemoryRange) -> MtrrResult<()> {
        if self.count >= capacity {
            return Err(MtrrError::VariableRangeMtrrExhausted);
        }

        debug_assert!(is_pow2(range.page_count));
        self.ranges[self.count] = range;
        self.count += 1;
        Ok(())
    }

    pub fn ranges(&self) -> &[MtrrMemoryRange] {
        &self.ranges[..self.count]
    }

    pub fn iter(&self) -> core::slice::Iter<'_, MtrrMemoryRange> {
        self.ranges().iter()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<'a> IntoIterator for &'a AcmMtrrPlan {
    type Item = &'a MtrrMemoryRange;
    type IntoIter = core::slice::Iter<'a, MtrrMemoryRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct MtrrLib<H: Hal = X64Hal> {
    hal: H,
}

impl<H: Hal> MtrrLib<H> {
    pub fn new(hal: H) -> Self {
        Self { hal }
    }

    pub(crate) fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    //  Returns the variable MTRR count for the CPU, clamped to the number of
    //  pairs this library tracks.
    pub fn get_variable_mtrr_count(&self) -> usize {
        let mtrr_cap = MsrIa32MtrrcapRegister::from_bits(self.hal.asm_read_msr64(MSR_IA32_MTRRCAP) as u32);

        (mtrr_cap.vcnt() as usize).min(MTRR_NUMBER_OF_VARIABLE_MTRR)
    }

    //  Preparation before programming MTRR.
    //
    //  Disable interrupts, enter no fill cache mode, flush the caches and
    //  drop global pages. Returns the control registers to restore.
    fn mtrr_lib_pre_mtrr_change(&mut self) -> MtrrContext {
        self.hal.disable_interrupts();

        // Enter no fill cache mode, CD=1(Bit30), NW=0 (Bit29)
        let cr0 = self.hal.asm_read_cr0();
        self.hal.asm_write_cr0((cr0 & !CR0_NW) | CR0_CD);

        // Now flush all caches and disable global pages
        self.hal.asm_wbinvd();

        let cr4 = self.hal.asm_read_cr4();
        self.hal.asm_write_cr4(cr4 & !CR4_PGE);

        MtrrContext { cr0, cr4 }
    }

    //  Disable all MTRRs, then make the rest of the world UC with the fixed
    //  MTRRs left off.
    fn mtrr_lib_set_default_uncacheable(&mut self) {
        let mut def_type = MsrIa32MtrrDefType::from_bits(self.hal.asm_read_msr64(MSR_IA32_MTRR_DEF_TYPE));
        def_type.set_e(false);
        self.hal.asm_write_msr64(MSR_IA32_MTRR_DEF_TYPE, def_type.into_bits());

        let mut def_type = MsrIa32MtrrDefType::from_bits(self.hal.asm_read_msr64(MSR_IA32_MTRR_DEF_TYPE));
        def_type.set_fe(false);
        def_type.set_mem_type(MtrrMemoryCacheType::Uncacheable as u8);
        self.hal.asm_write_msr64(MSR_IA32_MTRR_DEF_TYPE, def_type.into_bits());
    }

    //  Clear the valid bit of every variable MTRR the processor reports.
    fn mtrr_lib_invalidate_variable_mtrrs(&mut self, vcnt: usize) {
        for index in 0..vcnt {
            let msr = msr_ia32_mtrr_physmask(index);
            let mut mask = MsrIa32MtrrPhysmaskRegister::from_bits(self.hal.asm_read_msr64(msr));
            mask.set_v(false);
            self.hal.asm_write_msr64(msr, mask.into_bits());
        }
    }

    //  Program one PHYSBASE/PHYSMASK pair, keeping the reserved bits.
    fn mtrr_lib_program_variable_mtrr(&mut self, index: usize, range: &MtrrMemoryRange) {
        log::trace!(
            "ACM MTRR[{:02}]: {:#016x} +{:#x} pages {:?}",
            index,
            range.base_address,
            range.page_count,
            range.mem_type
        );

        let msr = msr_ia32_mtrr_physbase(index);
        let mut base = MsrIa32MtrrPhysbaseRegister::from_bits(self.hal.asm_read_msr64(msr));
        base.set_phys_base((range.base_address >> PAGE_SHIFT) & SL_ACM_MTRR_MASK);
        base.set_mem_type(range.mem_type as u8);
        self.hal.asm_write_msr64(msr, base.into_bits());

        let msr = msr_ia32_mtrr_physmask(index);
        let mut mask = MsrIa32MtrrPhysmaskRegister::from_bits(self.hal.asm_read_msr64(msr));
        mask.set_phys_mask(!(range.page_count - 1) & SL_ACM_MTRR_MASK);
        mask.set_v(true);
        self.hal.asm_write_msr64(msr, mask.into_bits());
    }

    //  Cleaning up after programming MTRRs.
    //
    //  Flush the caches again, enable all MTRRs, restore the control
    //  registers and re-enable interrupts.
    fn mtrr_lib_post_mtrr_change(&mut self, mtrr_context: &MtrrContext) {
        self.hal.asm_wbinvd();

        let mut def_type = MsrIa32MtrrDefType::from_bits(self.hal.asm_read_msr64(MSR_IA32_MTRR_DEF_TYPE));
        def_type.set_e(true);
        self.hal.asm_write_msr64(MSR_IA32_MTRR_DEF_TYPE, def_type.into_bits());

        self.hal.asm_write_cr0(mtrr_context.cr0);
        self.hal.asm_write_cr4(mtrr_context.cr4);

        self.hal.enable_interrupts();
    }

    ///  Sets the ACM memory to WB and all other memory to UC, with the fixed
    ///  MTRRs disabled.
    ///
    ///  The whole plan is computed before the first register is touched, so
    ///  an ACM that cannot be covered leaves the MTRRs untouched.
    ///
    ///  - `base_address` -  Physical base of the ACM
    ///  - `size`         -  Size of the ACM in bytes
    pub fn setup_acm_mtrrs(&mut self, base_address: u64, size: u32) -> MtrrResult<()> {
        let vcnt = self.get_variable_mtrr_count();
        let plan = AcmMtrrPlan::new(base_address, size, vcnt)?;

        let mtrr_context = self.mtrr_lib_pre_mtrr_change();

        self.mtrr_lib_set_default_uncacheable();
        self.mtrr_lib_invalidate_variable_mtrrs(vcnt);

        for (index, range) in plan.iter().enumerate() {
            self.mtrr_lib_program_variable_mtrr(index, range);
        }

        self.mtrr_lib_post_mtrr_change(&mtrr_context);

        Ok(())
    }

    ///  This function logs the default type and every valid variable MTRR.
    pub fn debug_print_acm_mtrrs(&self) {
        // Array of MTRR memory cache type short names
        const MMTRR_MEMORY_CACHE_TYPE_SHORT_NAME: [&str; 8] = [
            "UC", // CacheUncacheable
            "WC", // CacheWriteCombining
            "R*", // Invalid
            "R*", // Invalid
            "WT", // CacheWriteThrough
            "WP", // CacheWriteProtected
            "WB", // CacheWriteBack
            "R*", // Invalid
        ];
        let mut contain_variable_mtrr = false;

        let def_type = MsrIa32MtrrDefType::from_bits(self.hal.asm_read_msr64(MSR_IA32_MTRR_DEF_TYPE));
        log::info!("MTRR Default Type: {:#016x}", def_type.into_bits());

        for index in 0..self.get_variable_mtrr_count() {
            let mask = MsrIa32MtrrPhysmaskRegister::from_bits(self.hal.asm_read_msr64(msr_ia32_mtrr_physmask(index)));
            if !mask.v() {
                // If mask is not valid, then do not display range
                continue;
            }

            contain_variable_mtrr = true;
            let base = MsrIa32MtrrPhysbaseRegister::from_bits(self.hal.asm_read_msr64(msr_ia32_mtrr_physbase(index)));
            let start = base.phys_base() << PAGE_SHIFT;
            let length = ((!mask.phys_mask() & SL_ACM_MTRR_MASK) + 1) << PAGE_SHIFT;
            log::info!(
                "Variable MTRR[{:02}]: Base={:#016x} Mask={:#016x} {}:{:#016x}-{:#016x}",
                index,
                base.into_bits(),
                mask.into_bits(),
                MMTRR_MEMORY_CACHE_TYPE_SHORT_NAME[(base.mem_type() & 0x07) as usize],
                start,
                start + length - 1
            );
        }

        if !contain_variable_mtrr {
            log::info!("Variable MTRR    : None.");
        }
    }

    //  Few tests require reusing the hal object passed to MtrrLib for
    //  validation purposes towards the end of the tests. So this function
    //  basically consumes the MtrrLib and returns the hal.
    #[cfg(test)]
    pub(crate) fn mtrr_drop_hal(self) -> H {
        self.hal
    }
}
