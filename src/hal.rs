#[allow(unused_imports)]
use core::arch::asm;

use crate::structs::MSR_IA32_APIC_BASE;
use crate::structs::MsrIa32ApicBaseRegister;

/// HAL trait for the secure launch library - This trait is used to abstract
/// the privileged operations the launch and teardown paths need. The reason
/// for this, to keep the MTRR planning and TXT command sequencing unit
/// testable by plugging in a mock HAL. `struct X64Hal` implements the real
/// operations where as `struct MockHal` in `tests\mock_hal.rs` implements a
/// mock version of it.
///
/// None of the operations validate their arguments; callers own correctness.
pub trait Hal {
    fn enable_interrupts(&mut self);
    fn disable_interrupts(&mut self);
    fn asm_read_cr0(&self) -> u64;
    fn asm_write_cr0(&mut self, value: u64);
    fn asm_read_cr4(&self) -> u64;
    fn asm_write_cr4(&mut self, value: u64);
    fn asm_wbinvd(&mut self);
    fn asm_read_msr64(&self, msr: u32) -> u64;
    fn asm_write_msr64(&mut self, msr: u32, value: u64);
    fn asm_getsec(&mut self, leaf: u32);
    fn asm_halt(&mut self);
    fn is_boot_processor(&self) -> bool;

    /// Irrecoverable reset. Raises an invalid opcode, the only failure signal
    /// available before any console or exception handling exists.
    fn reset(&mut self) -> !;
}

pub struct X64Hal;

impl X64Hal {
    pub fn new() -> Self {
        Self
    }
}

impl Default for X64Hal {
    fn default() -> Self {
        Self::new()
    }
}

impl Hal for X64Hal {
    #[inline(always)]
    fn enable_interrupts(&mut self) {
        unsafe {
            asm!("sti");
        }
    }

    #[inline(always)]
    fn disable_interrupts(&mut self) {
        unsafe {
            asm!("cli");
        }
    }

    /// Read CR0 register.
    #[inline(always)]
    fn asm_read_cr0(&self) -> u64 {
        let mut value;

        unsafe {
            asm!("mov {}, cr0", out(reg) value, options(nostack, preserves_flags));
        }

        value
    }

    /// Write CR0 register.
    #[inline(always)]
    fn asm_write_cr0(&mut self, value: u64) {
        unsafe {
            asm!("mov cr0, {}", in(reg) value, options(nostack, preserves_flags));
        }
    }

    /// Read CR4 register.
    #[inline(always)]
    fn asm_read_cr4(&self) -> u64 {
        let mut value;

        unsafe {
            asm!("mov {}, cr4", out(reg) value, options(nostack, preserves_flags));
        }

        value
    }

    /// Write CR4 register. Also invalidates TLB.
    #[inline(always)]
    fn asm_write_cr4(&mut self, value: u64) {
        unsafe {
            asm!("mov cr4, {}", in(reg) value, options(nostack, preserves_flags));
        }
    }

    /// Write back and invalidate all caches.
    #[inline(always)]
    fn asm_wbinvd(&mut self) {
        unsafe {
            asm!("wbinvd", options(nostack, preserves_flags));
        }
    }

    fn asm_read_msr64(&self, msr: u32) -> u64 {
        let (mut high, mut low): (u32, u32);
        unsafe {
            asm!(
                "rdmsr",
                in("ecx") msr,
                out("eax") low, out("edx") high,
                options(nomem, nostack, preserves_flags),
            );
        }
        ((high as u64) << 32) | (low as u64)
    }

    fn asm_write_msr64(&mut self, msr: u32, value: u64) {
        let low = value as u32;
        let high = (value >> 32) as u32;
        unsafe {
            asm!(
                "wrmsr",
                in("ecx") msr,
                in("eax") low, in("edx") high,
                options(nostack, preserves_flags),
            );
        }
    }

    /// Issue an SMX GETSEC leaf. Only leaves without register outputs
    /// (SEXIT, SMCTRL, WAKEUP) are issued through here.
    fn asm_getsec(&mut self, leaf: u32) {
        unsafe {
            asm!(
                ".byte 0x0f, 0x37", // GETSEC
                inout("eax") leaf => _,
                options(nostack),
            );
        }
    }

    #[inline(always)]
    fn asm_halt(&mut self) {
        unsafe {
            asm!("hlt", options(nomem, nostack, preserves_flags));
        }
    }

    fn is_boot_processor(&self) -> bool {
        MsrIa32ApicBaseRegister::from_bits(self.asm_read_msr64(MSR_IA32_APIC_BASE)).bsp()
    }

    fn reset(&mut self) -> ! {
        unsafe {
            asm!("ud2", options(noreturn, nomem, nostack));
        }
    }
}
