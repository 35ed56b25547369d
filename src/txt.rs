//! Intel TXT finalize and reset support.
//!
//! Every command written to the TXT configuration space is followed by a read
//! of `TXT_CR_E2STS`. The value is discarded, the read only forces the write
//! to complete before the next command is issued.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::ptr::NonNull;

use crate::error::TxtError;
use crate::error::TxtResult;
use crate::hal::Hal;
use crate::structs::CR4_SMXE;
use crate::structs::SMX_X86_GETSEC_SEXIT;
use crate::structs::TXT_CONFIG_REGS_SIZE;
use crate::structs::TXT_CR_CMD_CLOSE_PRIVATE;
use crate::structs::TXT_CR_CMD_NO_SECRETS;
use crate::structs::TXT_CR_CMD_RESET;
use crate::structs::TXT_CR_CMD_UNLOCK_MEM_CONFIG;
use crate::structs::TXT_CR_E2STS;
use crate::structs::TXT_CR_ERRORCODE;
use crate::structs::TXT_PRIV_CONFIG_REGS_BASE;
use crate::structs::TXT_PUB_CONFIG_REGS_BASE;
use crate::structs::TXT_REGVALUE_ONE;

/// A mapped TXT configuration register bank.
pub trait TxtRegisters {
    fn read64(&mut self, offset: usize) -> u64;
    fn write64(&mut self, offset: usize, value: u64);
}

/// Maps TXT configuration register banks into the address space.
pub trait TxtMapper {
    type Registers: TxtRegisters;

    /// Returns `None` if the window cannot be mapped.
    fn map(&mut self, phys_base: u64, length: usize) -> Option<Self::Registers>;
}

/// A TXT configuration register bank reached through MMIO.
#[derive(Debug)]
pub struct TxtConfigSpace {
    base: NonNull<u8>,
    length: usize,
}

impl TxtConfigSpace {
    /// # Safety
    ///
    /// `base` must point to `length` bytes of mapped TXT configuration space
    /// (or memory standing in for it) that stays mapped for the lifetime of
    /// the returned value, and must be 8 byte aligned.
    pub unsafe fn from_raw(base: *mut u8, length: usize) -> Option<Self> {
        Some(Self { base: NonNull::new(base)?, length })
    }

    fn register(&self, offset: usize) -> *mut u64 {
        assert!(offset % 8 == 0 && offset + 8 <= self.length, "TXT register offset {offset:#x} out of range");

        // SAFETY: the offset was checked against the mapped length above.
        unsafe { self.base.as_ptr().add(offset).cast::<u64>() }
    }
}

impl TxtRegisters for TxtConfigSpace {
    fn read64(&mut self, offset: usize) -> u64 {
        let register = self.register(offset);

        // SAFETY: `register` lies inside the window promised by `from_raw`.
        unsafe { register.read_volatile() }
    }

    fn write64(&mut self, offset: usize, value: u64) {
        let register = self.register(offset);

        // SAFETY: `register` lies inside the window promised by `from_raw`.
        unsafe { register.write_volatile(value) }
    }
}

/// Maps the TXT banks at their physical address.
///
/// Usable while the TXT configuration space is identity mapped, which is the
/// case for the early boot paths.
#[derive(Debug)]
pub struct IdentityMapper {
    _private: (),
}

impl IdentityMapper {
    /// # Safety
    ///
    /// The TXT private and public configuration spaces must be identity
    /// mapped as uncached memory for as long as the mapper or any bank it
    /// returns is in use.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl TxtMapper for IdentityMapper {
    type Registers = TxtConfigSpace;

    fn map(&mut self, phys_base: u64, length: usize) -> Option<Self::Registers> {
        // SAFETY: the identity mapping is guaranteed by `IdentityMapper::new`.
        unsafe { TxtConfigSpace::from_raw(phys_base as usize as *mut u8, length) }
    }
}

fn txt_barrier<R: TxtRegisters>(txt: &mut R) {
    let _ = txt.read64(TXT_CR_E2STS);
}

fn txt_command<R: TxtRegisters>(txt: &mut R, offset: usize, value: u64) {
    txt.write64(offset, value);
    txt_barrier(txt);
}

///  Resets the platform with a sticky TXT error code.
///
///  This is the proper way to reset the system from within a TXT established
///  DRTM when a failure occurs or a security issue is found. Never returns,
///  the processor halts until the platform resets.
///
///  - `txt`   -  The mapped TXT configuration space
///  - `msg`   -  Reason for the reset, logged before the reset starts
///  - `error` -  Value for `TXT_CR_ERRORCODE`
pub fn txt_reset<R: TxtRegisters, H: Hal>(txt: &mut R, hal: &mut H, msg: &str, error: u64) -> ! {
    log::error!("{msg}");

    txt_command(txt, TXT_CR_ERRORCODE, error);
    txt_command(txt, TXT_CR_CMD_NO_SECRETS, TXT_REGVALUE_ONE);
    txt_command(txt, TXT_CR_CMD_UNLOCK_MEM_CONFIG, TXT_REGVALUE_ONE);
    txt_command(txt, TXT_CR_CMD_RESET, TXT_REGVALUE_ONE);

    loop {
        hal.asm_halt();
    }
}

///  Finalizes the TXT state on kexec and reboot paths.
///
///  Clears the secrets bit, unlocks the memory configuration and closes the
///  private space. With `do_sexit` the DRTM is then exited with GETSEC[SEXIT],
///  which has to happen on the boot processor.
///
///  Mapping failures are logged and returned without finishing the sequence.
///
///  # Panics
///
///  If `do_sexit` is set and this is not the boot processor.
pub fn finalize<M: TxtMapper, H: Hal>(mapper: &mut M, hal: &mut H, do_sexit: bool) -> TxtResult<()> {
    let Some(mut config) = mapper.map(TXT_PRIV_CONFIG_REGS_BASE, TXT_CONFIG_REGS_SIZE) else {
        log::error!("Error SEXIT failed to map TXT private registers");
        return Err(TxtError::PrivateSpaceMapFailed);
    };

    // Clear secrets bit for SEXIT
    txt_command(&mut config, TXT_CR_CMD_NO_SECRETS, TXT_REGVALUE_ONE);

    // Unlock memory configurations
    txt_command(&mut config, TXT_CR_CMD_UNLOCK_MEM_CONFIG, TXT_REGVALUE_ONE);

    // Close the TXT private register space
    txt_command(&mut config, TXT_CR_CMD_CLOSE_PRIVATE, TXT_REGVALUE_ONE);

    // The mappings are never released. Interrupts are off this late and an
    // unmap flushes the TLB, the next kernel rebuilds memory management anyway.
    core::mem::forget(config);

    // Map public registers and do a final read fence
    let Some(mut config) = mapper.map(TXT_PUB_CONFIG_REGS_BASE, TXT_CONFIG_REGS_SIZE) else {
        log::error!("Error SEXIT failed to map TXT public registers");
        return Err(TxtError::PublicSpaceMapFailed);
    };

    txt_barrier(&mut config);
    core::mem::forget(config);

    log::warn!("TXT clear secrets bit and unlock memory complete.");

    if !do_sexit {
        return Ok(());
    }

    if !hal.is_boot_processor() {
        panic!("Error TXT SEXIT must be called on the boot processor");
    }

    let cr4 = hal.asm_read_cr4();
    hal.asm_write_cr4(cr4 | CR4_SMXE);

    hal.asm_getsec(SMX_X86_GETSEC_SEXIT);

    log::info!("TXT SEXIT complete.");

    Ok(())
}
