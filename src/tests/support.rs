//! Test support utilities and helpers for the ACM MTRR unit tests.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0

use crate::structs::MsrIa32MtrrPhysbaseRegister;
use crate::structs::MsrIa32MtrrPhysmaskRegister;
use crate::structs::MtrrMemoryCacheType;
use crate::structs::MtrrMemoryRange;
use crate::structs::PAGE_SHIFT;
use crate::structs::SL_ACM_MTRR_MASK;
use crate::tests::mock_hal::MockHal;
use crate::utils::is_pow2;

/// Checks that `ranges` tile `[base_address, base_address + page_count pages)`
/// in ascending order, with naturally aligned power of two write-back ranges.
pub(crate) fn assert_ranges_cover(ranges: &[MtrrMemoryRange], base_address: u64, page_count: u64) {
    assert!(!ranges.is_empty(), "no ranges for {base_address:#x} +{page_count} pages");

    let mut expected_base = base_address;
    let mut previous_pages = u64::MAX;
    for range in ranges {
        assert_eq!(range.base_address, expected_base, "gap or overlap in {ranges:x?}");
        assert!(is_pow2(range.page_count), "range {range:x?} is not a power of two");
        assert_eq!(range.base_address % range.length(), 0, "range {range:x?} is not naturally aligned");
        assert!(range.page_count <= previous_pages, "range {range:x?} grows after a smaller one");
        assert_eq!(range.mem_type, MtrrMemoryCacheType::WriteBack);

        previous_pages = range.page_count;
        expected_base = range.end();
    }

    assert_eq!(expected_base, base_address + (page_count << PAGE_SHIFT), "ranges do not end at the ACM end");
}

/// Number of ranges the planner needs, computed independently of it.
pub(crate) fn expected_range_count(base_address: u64, page_count: u64) -> usize {
    let alignment = 1u64 << (base_address >> PAGE_SHIFT).trailing_zeros();
    ((page_count / alignment) + (page_count % alignment).count_ones() as u64) as usize
}

/// Decodes the valid variable MTRRs of the mock back into ranges.
pub(crate) fn decode_variable_mtrrs(hal: &MockHal, vcnt: usize) -> Vec<MtrrMemoryRange> {
    let mut ranges = Vec::new();

    for index in 0..vcnt {
        let (base, mask) = hal.variable_mtrr(index);
        let base = MsrIa32MtrrPhysbaseRegister::from_bits(base);
        let mask = MsrIa32MtrrPhysmaskRegister::from_bits(mask);
        if !mask.v() {
            continue;
        }

        let page_count = (!mask.phys_mask() & SL_ACM_MTRR_MASK) + 1;
        ranges.push(MtrrMemoryRange::new(
            base.phys_base() << PAGE_SHIFT,
            page_count,
            MtrrMemoryCacheType::from(base.mem_type()),
        ));
    }

    ranges
}
