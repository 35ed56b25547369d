//! Bit helpers used by the ACM range planner.
//!
//! These stay plain loops over the operand so the planner can be exercised on
//! any host without relying on a particular instruction being available.

/// Returns the number of trailing zero bits in `operand`.
///
/// Returns 64 if `operand` is zero.
pub fn trailing_zero_count(operand: u64) -> u32 {
    if operand == 0 {
        return u64::BITS;
    }

    let mut count = 0;
    let mut value = operand;

    while value & 0x01 == 0 {
        count += 1;
        value >>= 1;
    }

    count
}

/// Returns the bit position of the highest bit set in a 64-bit value.
/// Equivalent to log2(x).
///
/// # Arguments
///
/// * `operand` - The 64-bit operand to evaluate.
///
/// # Returns
///
/// * `Some` value between 0 and 63 if the highest bit is found.
/// * `None` if `operand` is zero.
pub fn highest_set_bit_position(operand: u64) -> Option<u32> {
    if operand == 0 {
        return None;
    }

    let mut pos = 0;
    let mut value = operand;

    while value != 0 {
        pos += 1;
        value >>= 1;
    }

    Some(pos - 1)
}

/// Returns the highest power of two less than or equal to `value`, or zero
/// when `value` is zero.
pub fn get_power_of_two_64(value: u64) -> u64 {
    match highest_set_bit_position(value) {
        Some(position) => 1u64 << position,
        None => 0,
    }
}

pub fn is_pow2(length: u64) -> bool {
    length != 0 && (length & (length - 1)) == 0
}
