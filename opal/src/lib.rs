// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024
#![deny(
    missing_docs,
    missing_debug_implementations,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]
#![doc = include_str!("../README.md")]

mod drive;
mod error;
mod framing;
mod macros;
mod misc;
mod stream;
mod transport;
pub mod uid;

pub use drive::Drive;
pub use error::{Error, Result};
pub use stream::{Atom, Datum, Encoding, MethodCall};
pub use transport::{SgDevice, Transport};
