use bitfield_struct::bitfield;

//
// public structs/definitions
//

#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MtrrMemoryCacheType {
    #[default]
    Uncacheable = 0,
    WriteCombining = 1,
    Reserved1 = 2,
    Reserved2 = 3,
    WriteThrough = 4,
    WriteProtected = 5,
    WriteBack = 6,
    Invalid = 7,
}

impl From<u8> for MtrrMemoryCacheType {
    fn from(value: u8) -> Self {
        // Only the low three bits encode a type, the upper type bits are reserved.
        match value & 0x07 {
            0 => MtrrMemoryCacheType::Uncacheable,
            1 => MtrrMemoryCacheType::WriteCombining,
            2 => MtrrMemoryCacheType::Reserved1,
            3 => MtrrMemoryCacheType::Reserved2,
            4 => MtrrMemoryCacheType::WriteThrough,
            5 => MtrrMemoryCacheType::WriteProtected,
            6 => MtrrMemoryCacheType::WriteBack,
            _ => MtrrMemoryCacheType::Invalid,
        }
    }
}

/// A single variable range produced by the ACM planner.
///
/// `page_count` is always a power of two and `base_address` is aligned to
/// `page_count` pages, so the pair maps onto one PHYSBASE/PHYSMASK MSR pair.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MtrrMemoryRange {
    pub base_address: u64,
    pub page_count: u64,
    pub mem_type: MtrrMemoryCacheType,
}

impl MtrrMemoryRange {
    pub fn new(base_address: u64, page_count: u64, mem_type: MtrrMemoryCacheType) -> Self {
        Self { base_address, page_count, mem_type }
    }

    /// Length of the range in bytes.
    pub fn length(&self) -> u64 {
        self.page_count << PAGE_SHIFT
    }

    /// First address past the end of the range.
    pub fn end(&self) -> u64 {
        self.base_address + self.length()
    }
}

// translated from MSR_IA32_MTRR_DEF_TYPE_REGISTER in
// MU_BASECORE\MdePkg\Include\Register\Intel\ArchitecturalMsr.h
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct MsrIa32MtrrDefType {
    #[bits(3)]
    pub mem_type: u8, // [Bits 2:0] Default Memory Type (3 bits)
    #[bits(7)]
    pub reserved1: u8, // [Bits 9:3] Reserved (7 bits)
    #[bits(1)]
    pub fe: bool, // [Bit 10] Fixed Range MTRR Enable (1 bit)
    #[bits(1)]
    pub e: bool, // [Bit 11] MTRR Enable (1 bit)
    #[bits(52)]
    pub reserved: u64, // [Bits 63:12] Reserved
}

/*
  MSR information returned for MSR index #MSR_IA32_MTRRCAP
*/
#[bitfield(u32)]
pub struct MsrIa32MtrrcapRegister {
    #[bits(8)]
    pub vcnt: u8, // [Bits 7:0] VCNT: Number of variable memory type ranges
    #[bits(1)]
    pub fix: bool, // [Bit 8] Fixed range MTRRs supported when set
    #[bits(1)]
    pub reserved1: bool, // [Bit 9] Reserved
    #[bits(1)]
    pub wc: bool, // [Bit 10] WC Supported when set
    #[bits(1)]
    pub smrr: bool, // [Bit 11] SMRR Supported when set
    #[bits(20)]
    pub reserved: u32,
}

#[bitfield(u64)]
pub struct MsrIa32MtrrPhysbaseRegister {
    #[bits(8)]
    pub mem_type: u8, // [Bits 7:0] Type. Specifies memory type of the range.
    #[bits(4)]
    pub reserved1: u8, // [Bits 11:8] Reserved.
    #[bits(40)]
    pub phys_base: u64, // [Bits 51:12] PhysBase. MTRR physical Base Address.
    #[bits(12)]
    pub reserved2: u32, // [Bits 63:52] Reserved.
}

#[bitfield(u64)]
pub struct MsrIa32MtrrPhysmaskRegister {
    #[bits(11)]
    pub reserved1: u16, // [Bits 10:0] Reserved.
    #[bits(1)]
    pub v: bool, // [Bit 11] Valid Enable range mask.
    #[bits(40)]
    pub phys_mask: u64, // [Bits 51:12] PhysMask. MTRR address range mask.
    #[bits(12)]
    pub reserved2: u32, // [Bits 63:52] Reserved.
}

#[bitfield(u64)]
pub struct MsrIa32ApicBaseRegister {
    #[bits(8)]
    pub reserved1: u8, // [Bits 7:0] Reserved.
    #[bits(1)]
    pub bsp: bool, // [Bit 8] BSP flag, set on the bootstrap processor.
    #[bits(1)]
    pub reserved2: bool, // [Bit 9] Reserved.
    #[bits(1)]
    pub extd: bool, // [Bit 10] Enable x2APIC mode.
    #[bits(1)]
    pub en: bool, // [Bit 11] APIC Global Enable.
    #[bits(52)]
    pub apic_base: u64, // [Bits 63:12] APIC Base.
}

/// Secure Launch state flags, see `SL_FLAG_*`.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct LaunchFlags {
    #[bits(1)]
    pub active: bool, // [Bit 0] A measured launch is in effect.
    #[bits(1)]
    pub arch_skinit: bool, // [Bit 1] Launched with AMD SKINIT.
    #[bits(1)]
    pub arch_txt: bool, // [Bit 2] Launched with Intel TXT.
    #[bits(29)]
    pub reserved: u32,
}

//
// Architectural MSRs and control register bits
//

pub(crate) const PAGE_SHIFT: u32 = 12;
pub(crate) const SIZE_4KB: u64 = 0x00001000;

pub(crate) const BIT7: u64 = 0x80;
pub(crate) const BIT14: u64 = 0x4000;
pub(crate) const BIT29: u64 = 0x2000_0000;
pub(crate) const BIT30: u64 = 0x4000_0000;

pub(crate) const CR0_NW: u64 = BIT29; // Not Write-through
pub(crate) const CR0_CD: u64 = BIT30; // Cache Disable
pub(crate) const CR4_PGE: u64 = BIT7; // Page Global Enable
pub(crate) const CR4_SMXE: u64 = BIT14; // SMX Enable

pub(crate) const MSR_IA32_APIC_BASE: u32 = 0x0000001B;
pub(crate) const MSR_IA32_MTRRCAP: u32 = 0x000000FE;
pub(crate) const MSR_IA32_MTRR_DEF_TYPE: u32 = 0x000002FF;
pub(crate) const MSR_IA32_MTRR_PHYSBASE0: u32 = 0x00000200;
pub(crate) const MSR_IA32_MTRR_PHYSMASK0: u32 = 0x00000201;

// Upper bound on the variable MTRR pairs tracked, VCNT is clamped to this.
pub(crate) const MTRR_NUMBER_OF_VARIABLE_MTRR: usize = 32;

// The ACM requires a 36-bit mask, i.e. 24 bits of page frame number.
pub(crate) const SL_ACM_MTRR_MASK: u64 = 0x00FF_FFFF;

pub(crate) fn msr_ia32_mtrr_physbase(index: usize) -> u32 {
    MSR_IA32_MTRR_PHYSBASE0 + (index as u32) * 2
}

pub(crate) fn msr_ia32_mtrr_physmask(index: usize) -> u32 {
    MSR_IA32_MTRR_PHYSMASK0 + (index as u32) * 2
}

// Structure to save and restore the control registers around an MTRR change
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MtrrContext {
    pub cr0: u64,
    pub cr4: u64,
}

//
// Secure Launch definitions
//

pub const SL_FLAG_ACTIVE: u32 = 0x00000001;
pub const SL_FLAG_ARCH_SKINIT: u32 = 0x00000002;
pub const SL_FLAG_ARCH_TXT: u32 = 0x00000004;

pub const SL_CPU_AMD: u32 = 1;
pub const SL_CPU_INTEL: u32 = 2;

// Architecture tags carried by the launch resource table
pub const SLR_INTEL_TXT: u16 = 1;
pub const SLR_AMD_SKINIT: u16 = 2;

// SMX GETSEC leaf functions
pub const SMX_X86_GETSEC_SEXIT: u32 = 5;
pub const SMX_X86_GETSEC_SMCTRL: u32 = 7;
pub const SMX_X86_GETSEC_WAKEUP: u32 = 8;

//
// Intel TXT configuration register banks
//

pub const TXT_PUB_CONFIG_REGS_BASE: u64 = 0xfed30000;
pub const TXT_PRIV_CONFIG_REGS_BASE: u64 = 0xfed20000;
pub const TXT_NR_CONFIG_PAGES: usize =
    ((TXT_PUB_CONFIG_REGS_BASE - TXT_PRIV_CONFIG_REGS_BASE) >> PAGE_SHIFT) as usize;
pub const TXT_CONFIG_REGS_SIZE: usize = TXT_NR_CONFIG_PAGES * SIZE_4KB as usize;

pub const TXT_CR_STS: usize = 0x0000;
pub const TXT_CR_ESTS: usize = 0x0008;
pub const TXT_CR_ERRORCODE: usize = 0x0030;
pub const TXT_CR_CMD_RESET: usize = 0x0038;
pub const TXT_CR_CMD_CLOSE_PRIVATE: usize = 0x0048;
pub const TXT_CR_DIDVID: usize = 0x0110;
pub const TXT_CR_VER_EMIF: usize = 0x0200;
pub const TXT_CR_CMD_UNLOCK_MEM_CONFIG: usize = 0x0218;
pub const TXT_CR_SINIT_BASE: usize = 0x0270;
pub const TXT_CR_SINIT_SIZE: usize = 0x0278;
pub const TXT_CR_MLE_JOIN: usize = 0x0290;
pub const TXT_CR_HEAP_BASE: usize = 0x0300;
pub const TXT_CR_HEAP_SIZE: usize = 0x0308;
pub const TXT_CR_SCRATCHPAD: usize = 0x0378;
pub const TXT_CR_CMD_OPEN_LOCALITY1: usize = 0x0380;
pub const TXT_CR_CMD_CLOSE_LOCALITY1: usize = 0x0388;
pub const TXT_CR_CMD_OPEN_LOCALITY2: usize = 0x0390;
pub const TXT_CR_CMD_CLOSE_LOCALITY2: usize = 0x0398;
pub const TXT_CR_CMD_SECRETS: usize = 0x08e0;
pub const TXT_CR_CMD_NO_SECRETS: usize = 0x08e8;
pub const TXT_CR_E2STS: usize = 0x08f0;

/// TXT default register value
pub const TXT_REGVALUE_ONE: u64 = 0x1;

// TXT_CR_STS status bits
pub const TXT_SENTER_DONE_STS: u64 = 1 << 0;
pub const TXT_SEXIT_DONE_STS: u64 = 1 << 1;
