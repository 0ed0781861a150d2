// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

/// Fails the build when a constant expression is false.
macro_rules! static_assert {
    ($condition:expr) => {
        const _: () = core::assert!($condition);
    };
}
pub(crate) use static_assert;

/// Pins a header struct to its on-the-wire byte size at compile time.
///
/// Every `#[repr(C)]` struct mirroring a framing or discovery layout gets
/// one of these next to its definition.
macro_rules! assert_size {
    ($t:ty, $sz:expr ) => {
        crate::macros::static_assert!(::std::mem::size_of::<$t>() == $sz);
    };
}
pub(crate) use assert_size;
