//! Error types and result aliases for the secure launch library.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
pub type MtrrResult<T> = Result<T, MtrrError>;

/// ACM MTRR planning errors
#[derive(Debug, PartialEq)]
pub enum MtrrError {
    /// The ACM base or size is zero
    InvalidParameter,
    /// The ACM base is not page aligned
    BaseAddressNotAligned,
    /// The ACM region ends above what the 36-bit ACM MTRR mask can describe
    AddressBeyondAcmMask,
    /// The number of variable mtrr required to cover the ACM are exhausted
    VariableRangeMtrrExhausted,
    /// A remainder range computed to zero pages while pages were still left
    ZeroSizedRange,
}

pub type TxtResult<T> = Result<T, TxtError>;

/// TXT configuration space errors
#[derive(Debug, PartialEq)]
pub enum TxtError {
    /// The private configuration register window could not be mapped
    PrivateSpaceMapFailed,
    /// The public configuration register window could not be mapped
    PublicSpaceMapFailed,
}
