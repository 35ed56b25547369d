//! # Introduction
//! Secure Launch helps an x86_64 kernel take part in a Dynamic Root of Trust
//! for Measurement (DRTM) launch.
//!
//! Two pieces live here. The dynamic launch stub runs before the measured
//! launch: it validates the launch parameters, programs the MTRRs so only the
//! Authenticated Code Module (ACM) is write-back cacheable while everything
//! else is uncacheable, and jumps to the dynamic launch event code. The TXT
//! protocol runs afterwards: on kexec and reboot it finalizes the TXT state
//! and exits the measured environment, and when something cannot be trusted
//! it resets the platform with a sticky error code.
//!
//! MTRRs are described in 12.11 Vol 3A of the Intel Software Developers
//! Manual, SMX and GETSEC in chapter 6 of Vol 2D.
//!
//! # Getting Started
//!
//! ## Public API:
//! ```ignore
//! pub fn dl_stub_entry<T: LaunchTable + ?Sized, E: DynamicLaunchEvent>(table: &T, entry: E) -> !;
//!
//! pub fn slaunch_get_flags() -> LaunchFlags;
//!
//! pub fn slaunch_finalize<M: TxtMapper>(mapper: &mut M, do_sexit: bool) -> TxtResult<()>;
//!
//! pub fn slaunch_txt_reset<R: TxtRegisters>(txt: &mut R, msg: &str, error: u64) -> !;
//! ```
//!
//! ## API usage:
//! ```ignore
//! use slaunch::launch::{DlInfo, LaunchTable};
//! use slaunch::txt::IdentityMapper;
//!
//! struct Slrt { architecture: u16, dl_info: Option<DlInfo> }
//!
//! impl LaunchTable for Slrt {
//!     fn architecture(&self) -> u16 { self.architecture }
//!     fn dl_info(&self) -> Option<DlInfo> { self.dl_info }
//! }
//!
//! fn dynamic_launch_event(architecture: u64, dce_base: u64, dce_size: u64) -> ! {
//!     // Issue GETSEC[SENTER]
//!     loop {}
//! }
//!
//! fn early_entry(slrt: &Slrt) -> ! {
//!     slaunch::dl_stub_entry(slrt, dynamic_launch_event as fn(u64, u64, u64) -> !)
//! }
//!
//! fn kexec_teardown() {
//!     if slaunch::slaunch_get_flags().arch_txt() {
//!         let mut mapper = unsafe { IdentityMapper::new() };
//!         let _ = slaunch::slaunch_finalize(&mut mapper, true);
//!     }
//! }
//! ```

#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
    use error::TxtResult;
    use hal::X64Hal;
    use launch::DynamicLaunch;
    use launch::DynamicLaunchEvent;
    use launch::LaunchTable;
    use structs::LaunchFlags;
    use txt::TxtMapper;
    use txt::TxtRegisters;
    pub mod error;
    pub mod hal;
    pub mod launch;
    pub mod mtrr;
    pub mod structs;
    pub mod txt;
    mod utils;

    /// Dynamic launch stub entry point.
    ///
    /// Sets up the ACM MTRRs for a TXT launch, records the launch in the
    /// process wide flags and hands off to `entry`. Resets on any bad
    /// parameter.
    pub fn dl_stub_entry<T: LaunchTable + ?Sized, E: DynamicLaunchEvent>(table: &T, entry: E) -> ! {
        DynamicLaunch::new().enter(table, entry)
    }

    /// If running within a TXT established DRTM, this is the proper way to
    /// reset the system if a failure occurs or a security issue is found.
    pub fn slaunch_txt_reset<R: TxtRegisters>(txt: &mut R, msg: &str, error: u64) -> ! {
        txt::txt_reset(txt, &mut X64Hal::new(), msg, error)
    }

    cfg_if::cfg_if! {
        if #[cfg(feature = "secure-launch")] {
        /// Get the Secure Launch flags that indicate what kind of launch is
        /// being done. E.g. a TXT launch is in progress or no Secure Launch is
        /// happening.
        pub fn slaunch_get_flags() -> LaunchFlags {
            launch::SL_STATE.flags()
        }

        /// Used during kexec and on reboot paths to finalize the TXT state and
        /// optionally do an SEXIT exiting the DRTM and disabling SMX mode.
        pub fn slaunch_finalize<M: TxtMapper>(mapper: &mut M, do_sexit: bool) -> TxtResult<()> {
            txt::finalize(mapper, &mut X64Hal::new(), do_sexit)
        }
        } else {
        pub fn slaunch_get_flags() -> LaunchFlags {
            LaunchFlags::new()
        }

        pub fn slaunch_finalize<M: TxtMapper>(_mapper: &mut M, _do_sexit: bool) -> TxtResult<()> {
            Ok(())
        }
        }
    }

    #[cfg(test)]
    mod tests;
    }
}
