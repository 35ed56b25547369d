//! Unit tests for the TXT reset and finalize protocol.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use crate::{
    error::TxtError,
    slaunch_finalize, slaunch_get_flags,
    structs::{
        LaunchFlags, MSR_IA32_APIC_BASE, SMX_X86_GETSEC_SEXIT, TXT_CONFIG_REGS_SIZE, TXT_CR_CMD_CLOSE_PRIVATE,
        TXT_CR_CMD_NO_SECRETS, TXT_CR_CMD_RESET, TXT_CR_CMD_UNLOCK_MEM_CONFIG, TXT_CR_E2STS, TXT_CR_ERRORCODE,
        TXT_PRIV_CONFIG_REGS_BASE, TXT_PUB_CONFIG_REGS_BASE,
    },
    tests::{
        config::{DEFAULT_SYSTEM_PARAMETER, SystemParameterBuilder, TEST_CR4},
        fixtures::{Divergence, run_to_divergence},
        mock_hal::{HalOp, MockHal},
        mock_txt::{MockTxtMapper, MockTxtRegisters, TxtOp, UNMAPPED_BANK},
    },
    txt::{TxtConfigSpace, TxtRegisters, finalize, txt_reset},
};

const PRIV: u64 = TXT_PRIV_CONFIG_REGS_BASE;
const PUB: u64 = TXT_PUB_CONFIG_REGS_BASE;

fn reset_sequence(bank: u64, error: u64) -> Vec<TxtOp> {
    vec![
        TxtOp::Write(bank, TXT_CR_ERRORCODE, error),
        TxtOp::Read(bank, TXT_CR_E2STS),
        TxtOp::Write(bank, TXT_CR_CMD_NO_SECRETS, 1),
        TxtOp::Read(bank, TXT_CR_E2STS),
        TxtOp::Write(bank, TXT_CR_CMD_UNLOCK_MEM_CONFIG, 1),
        TxtOp::Read(bank, TXT_CR_E2STS),
        TxtOp::Write(bank, TXT_CR_CMD_RESET, 1),
        TxtOp::Read(bank, TXT_CR_E2STS),
    ]
}

fn finalize_sequence() -> Vec<TxtOp> {
    vec![
        TxtOp::Map(PRIV),
        TxtOp::Write(PRIV, TXT_CR_CMD_NO_SECRETS, 1),
        TxtOp::Read(PRIV, TXT_CR_E2STS),
        TxtOp::Write(PRIV, TXT_CR_CMD_UNLOCK_MEM_CONFIG, 1),
        TxtOp::Read(PRIV, TXT_CR_E2STS),
        TxtOp::Write(PRIV, TXT_CR_CMD_CLOSE_PRIVATE, 1),
        TxtOp::Read(PRIV, TXT_CR_E2STS),
        TxtOp::Map(PUB),
        TxtOp::Read(PUB, TXT_CR_E2STS),
    ]
}

#[test]
fn unit_test_txt_reset_issues_commands_then_halts() {
    let mut hal = MockHal::new(&DEFAULT_SYSTEM_PARAMETER);
    let mut txt = MockTxtRegisters::new(0);

    let divergence = run_to_divergence(|| txt_reset(&mut txt, &mut hal, "Error TXT launch failed", 0xC000_0001));

    assert_eq!(divergence, Divergence::Halt);
    assert_eq!(txt.ops(), reset_sequence(UNMAPPED_BANK, 0xC000_0001));
    assert_eq!(hal.ops(), vec![HalOp::Halt]);
}

#[test]
fn unit_test_txt_reset_ignores_barrier_values() {
    for (e2sts, error) in [(0, 0), (u64::MAX, 1), (0x2, u64::MAX), (0xDEAD_BEEF, 0x8000_0000_0000_0000)] {
        let mut hal = MockHal::new(&DEFAULT_SYSTEM_PARAMETER);
        let mut txt = MockTxtRegisters::new(e2sts);

        assert_eq!(run_to_divergence(|| txt_reset(&mut txt, &mut hal, "", error)), Divergence::Halt);
        assert_eq!(txt.ops(), reset_sequence(UNMAPPED_BANK, error));
    }
}

#[test]
fn unit_test_txt_reset_through_mmio() {
    let mut hal = MockHal::new(&DEFAULT_SYSTEM_PARAMETER);
    let mut window = vec![0u64; TXT_CONFIG_REGS_SIZE / 8];
    window[TXT_CR_E2STS / 8] = 0x2;

    // SAFETY: the window is alive for the whole test and 8 byte aligned.
    let mut txt = unsafe { TxtConfigSpace::from_raw(window.as_mut_ptr().cast(), TXT_CONFIG_REGS_SIZE) }.unwrap();
    assert_eq!(run_to_divergence(|| txt_reset(&mut txt, &mut hal, "Error SINIT failed", 0x1234)), Divergence::Halt);
    drop(txt);

    assert_eq!(window[TXT_CR_ERRORCODE / 8], 0x1234);
    assert_eq!(window[TXT_CR_CMD_NO_SECRETS / 8], 1);
    assert_eq!(window[TXT_CR_CMD_UNLOCK_MEM_CONFIG / 8], 1);
    assert_eq!(window[TXT_CR_CMD_RESET / 8], 1);
    assert_eq!(window[TXT_CR_E2STS / 8], 0x2);
    assert_eq!(window[TXT_CR_CMD_CLOSE_PRIVATE / 8], 0);
}

#[test]
fn unit_test_txt_config_space_access() {
    let mut window = vec![0u64; 16];

    // SAFETY: the window is alive for the whole test and 8 byte aligned.
    let mut txt = unsafe { TxtConfigSpace::from_raw(window.as_mut_ptr().cast(), 16 * 8) }.unwrap();
    txt.write64(0x30, 0xC0DE);
    txt.write64(0x78, 7);
    assert_eq!(txt.read64(0x30), 0xC0DE);
    assert_eq!(txt.read64(0x38), 0);
    drop(txt);

    assert_eq!(window[6], 0xC0DE);
    assert_eq!(window[15], 7);

    // SAFETY: a null base is rejected before it is used.
    assert!(unsafe { TxtConfigSpace::from_raw(core::ptr::null_mut(), 16 * 8) }.is_none());
}

#[test]
#[should_panic(expected = "out of range")]
fn unit_test_txt_config_space_rejects_offsets_past_the_window() {
    let mut window = vec![0u64; 16];

    // SAFETY: the window is alive for the whole test and 8 byte aligned.
    let mut txt = unsafe { TxtConfigSpace::from_raw(window.as_mut_ptr().cast(), 16 * 8) }.unwrap();
    txt.read64(16 * 8);
}

#[test]
fn unit_test_finalize_without_sexit() {
    let mut hal = MockHal::new(&DEFAULT_SYSTEM_PARAMETER);
    let mut mapper = MockTxtMapper::new();

    assert_eq!(finalize(&mut mapper, &mut hal, false), Ok(()));

    assert_eq!(mapper.ops(), finalize_sequence());
    assert!(hal.ops().is_empty());
    assert_eq!(hal.cr4(), TEST_CR4);
}

#[test]
fn unit_test_finalize_with_sexit_on_boot_processor() {
    let mut hal = MockHal::new(&DEFAULT_SYSTEM_PARAMETER);
    let mut mapper = MockTxtMapper::new();

    assert_eq!(finalize(&mut mapper, &mut hal, true), Ok(()));

    assert_eq!(mapper.ops(), finalize_sequence());
    assert_eq!(
        hal.ops(),
        vec![
            HalOp::ReadMsr(MSR_IA32_APIC_BASE),
            HalOp::ReadCr4,
            HalOp::WriteCr4(TEST_CR4 | 0x4000),
            HalOp::Getsec(SMX_X86_GETSEC_SEXIT),
        ]
    );
}

#[test]
fn unit_test_finalize_sexit_off_boot_processor_panics() {
    let mut hal = MockHal::new(&SystemParameterBuilder::new().with_boot_processor(false).build());
    let mut mapper = MockTxtMapper::new();

    let divergence = run_to_divergence(|| {
        let _ = finalize(&mut mapper, &mut hal, true);
    });

    let Divergence::Panic(message) = divergence else {
        panic!("expected a panic, got {divergence:?}");
    };
    assert!(message.contains("boot processor"), "{message}");

    // The TXT state is already finalized when the check fires.
    assert_eq!(mapper.ops(), finalize_sequence());
    assert_eq!(hal.ops(), vec![HalOp::ReadMsr(MSR_IA32_APIC_BASE)]);
}

#[test]
fn unit_test_finalize_private_map_failure() {
    let mut hal = MockHal::new(&DEFAULT_SYSTEM_PARAMETER);
    let mut mapper = MockTxtMapper::new().with_private_map_failure();

    assert_eq!(finalize(&mut mapper, &mut hal, true), Err(TxtError::PrivateSpaceMapFailed));

    assert!(mapper.ops().is_empty());
    assert!(hal.ops().is_empty());
}

#[test]
fn unit_test_finalize_public_map_failure() {
    let mut hal = MockHal::new(&DEFAULT_SYSTEM_PARAMETER);
    let mut mapper = MockTxtMapper::new().with_public_map_failure();

    assert_eq!(finalize(&mut mapper, &mut hal, true), Err(TxtError::PublicSpaceMapFailed));

    let mut expected = finalize_sequence();
    expected.truncate(7);
    assert_eq!(mapper.ops(), expected);
    assert!(hal.ops().is_empty());
}

#[test]
fn unit_test_finalize_never_unmaps() {
    for do_sexit in [false, true] {
        let mut hal = MockHal::new(&DEFAULT_SYSTEM_PARAMETER);
        let mut mapper = MockTxtMapper::new();

        finalize(&mut mapper, &mut hal, do_sexit).unwrap();

        assert!(!mapper.ops().iter().any(|op| matches!(op, TxtOp::Unmap(_))));
    }
}

#[test]
#[cfg(feature = "secure-launch")]
fn unit_test_slaunch_finalize_leaves_flags() {
    let mut mapper = MockTxtMapper::new();

    assert_eq!(slaunch_finalize(&mut mapper, false), Ok(()));
    assert_eq!(slaunch_get_flags(), LaunchFlags::new());
    assert_eq!(mapper.ops(), finalize_sequence());
}
