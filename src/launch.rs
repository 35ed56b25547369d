//! Dynamic launch event entry.
//!
//! Runs very early, before any console, with the launch resource table handed
//! over by the boot loader. Validates the DL info entry, sets up the MTRRs the
//! launch architecture requires and jumps to the dynamic launch event code.
//! There is no failure path short of the irrecoverable reset.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

use crate::hal::Hal;
use crate::hal::X64Hal;
use crate::mtrr::MtrrLib;
use crate::structs::LaunchFlags;
use crate::structs::SLR_AMD_SKINIT;
use crate::structs::SLR_INTEL_TXT;

/// Launch architecture tag from the launch resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchArchitecture {
    IntelTxt,
    AmdSkinit,
    Unsupported(u16),
}

impl LaunchArchitecture {
    pub fn tag(self) -> u16 {
        match self {
            LaunchArchitecture::IntelTxt => SLR_INTEL_TXT,
            LaunchArchitecture::AmdSkinit => SLR_AMD_SKINIT,
            LaunchArchitecture::Unsupported(tag) => tag,
        }
    }
}

impl From<u16> for LaunchArchitecture {
    fn from(value: u16) -> Self {
        match value {
            SLR_INTEL_TXT => LaunchArchitecture::IntelTxt,
            SLR_AMD_SKINIT => LaunchArchitecture::AmdSkinit,
            tag => LaunchArchitecture::Unsupported(tag),
        }
    }
}

/// The DL info entry of the launch resource table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DlInfo {
    /// Physical base of the dynamic code environment (the ACM on TXT).
    pub dce_base: u64,
    /// Size of the dynamic code environment in bytes.
    pub dce_size: u32,
}

/// Access to an already parsed launch resource table.
pub trait LaunchTable {
    /// Architecture tag of the table, see `SLR_*`.
    fn architecture(&self) -> u16;

    /// The DL info entry, looked up by its tag.
    fn dl_info(&self) -> Option<DlInfo>;
}

/// Launch parameters the trampoline acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchInfo {
    pub architecture: LaunchArchitecture,
    pub dce_base: u64,
    pub dce_size: u32,
}

impl LaunchInfo {
    /// Returns `None` if the table has no DL info entry or if its base or
    /// size is zero.
    pub fn from_table<T: LaunchTable + ?Sized>(table: &T) -> Option<Self> {
        let dl_info = table.dl_info()?;

        if dl_info.dce_base == 0 || dl_info.dce_size == 0 {
            return None;
        }

        Some(Self {
            architecture: LaunchArchitecture::from(table.architecture()),
            dce_base: dl_info.dce_base,
            dce_size: dl_info.dce_size,
        })
    }
}

/// The final, non-returning jump into the dynamic launch event code.
pub trait DynamicLaunchEvent {
    fn launch(self, architecture: u64, dce_base: u64, dce_size: u64) -> !;
}

impl DynamicLaunchEvent for fn(u64, u64, u64) -> ! {
    fn launch(self, architecture: u64, dce_base: u64, dce_size: u64) -> ! {
        self(architecture, dce_base, dce_size)
    }
}

/// Process wide Secure Launch flags.
///
/// Written once while launching and read-only afterwards. Only a reboot clears
/// them.
#[derive(Debug)]
pub struct LaunchState {
    flags: AtomicU32,
}

impl LaunchState {
    pub const fn new() -> Self {
        Self { flags: AtomicU32::new(0) }
    }

    pub fn flags(&self) -> LaunchFlags {
        LaunchFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    // First writer wins, returns whether `flags` were recorded.
    pub(crate) fn record(&self, flags: LaunchFlags) -> bool {
        self.flags.compare_exchange(0, flags.into_bits(), Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

impl Default for LaunchState {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) static SL_STATE: LaunchState = LaunchState::new();

pub struct DynamicLaunch<'a, H: Hal = X64Hal> {
    mtrr: MtrrLib<H>,
    state: &'a LaunchState,
}

impl DynamicLaunch<'static, X64Hal> {
    pub fn new() -> Self {
        Self::with_hal(X64Hal::new(), &SL_STATE)
    }
}

impl Default for DynamicLaunch<'static, X64Hal> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, H: Hal> DynamicLaunch<'a, H> {
    pub fn with_hal(hal: H, state: &'a LaunchState) -> Self {
        Self { mtrr: MtrrLib::new(hal), state }
    }

    ///  Validates the launch table, prepares the platform for the launch
    ///  architecture and hands off to `entry`.
    ///
    ///  Any problem with the launch parameters, an unsupported architecture or
    ///  an ACM that cannot be covered by the variable MTRRs resets.
    pub fn enter<T, E>(mut self, table: &T, entry: E) -> !
    where
        T: LaunchTable + ?Sized,
        E: DynamicLaunchEvent,
    {
        let Some(launch_info) = LaunchInfo::from_table(table) else {
            self.reset();
        };

        match launch_info.architecture {
            LaunchArchitecture::IntelTxt => {
                // Set ACM memory to WB and all other to UC. All MTRRs have been
                // saved in the TXT heap for restoration after SENTER.
                if self.mtrr.setup_acm_mtrrs(launch_info.dce_base, launch_info.dce_size).is_err() {
                    self.reset();
                }

                self.state.record(LaunchFlags::new().with_active(true).with_arch_txt(true));
            }
            // AMD SKINIT support not present yet
            LaunchArchitecture::AmdSkinit | LaunchArchitecture::Unsupported(_) => self.reset(),
        }

        entry.launch(launch_info.architecture.tag() as u64, launch_info.dce_base, launch_info.dce_size as u64)
    }

    fn reset(&mut self) -> ! {
        self.mtrr.hal_mut().reset()
    }
}
