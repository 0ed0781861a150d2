// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

//! Well-known UIDs of the TCG Opal 2.0 SSC.
//!
//! UIDs are 64 bit identifiers for tables, rows, methods and authorities.
//! They travel as 8-byte big-endian binaries, see [`crate::Atom::uid`].

/// Session manager, target of `StartSession` and `Properties`.
pub const SESSION_MGR: u64 = 0x0000_0000_0000_00ff;

/// Administrative Security Provider.
pub const ADMIN_SP: u64 = 0x0000_0205_0000_0001;
/// Locking Security Provider.
pub const LOCKING_SP: u64 = 0x0000_0205_0000_0002;

/// SID authority on the Admin SP (the drive owner).
pub const SID: u64 = 0x0000_0009_0000_0006;
/// First Locking SP Admin authority minus one; add the authority number.
pub const ADMIN_BASE: u64 = 0x0000_0009_0001_0000;
/// First Locking SP User authority minus one; add the authority number.
pub const USER_BASE: u64 = 0x0000_0009_0003_0000;

/// Credential row holding the manufactured default PIN.
pub const C_PIN_MSID: u64 = 0x0000_000b_0000_8402;
/// Credential row holding the SID PIN.
pub const C_PIN_SID: u64 = 0x0000_000b_0000_0001;

/// Locking range spanning the whole medium.
pub const LBA_RANGE_GLOBAL: u64 = 0x0000_0802_0000_0001;
/// Row controlling the MBR shadow state.
pub const MBR_CONTROL: u64 = 0x0000_0803_0000_0001;
/// The MBR shadow byte table itself.
pub const MBR: u64 = 0x0000_0804_0000_0000;

/// Session manager method `Properties`.
pub const PROPERTIES: u64 = 0x0000_0000_0000_ff01;
/// Session manager method `StartSession`.
pub const START_SESSION: u64 = 0x0000_0000_0000_ff02;
/// Session manager reply method `SyncSession`.
pub const SYNC_SESSION: u64 = 0x0000_0000_0000_ff03;
/// Table method `Get`.
pub const GET: u64 = 0x0000_0006_0000_0016;
/// Table method `Set`.
pub const SET: u64 = 0x0000_0006_0000_0017;
/// SP method `Revert`.
pub const REVERT: u64 = 0x0000_0006_0000_0202;
/// SP method `Activate`.
pub const ACTIVATE: u64 = 0x0000_0006_0000_0203;

/// Locking SP Admin authority `n` (1-based).
pub fn admin(n: u32) -> u64 {
    ADMIN_BASE + u64::from(n)
}

/// Locking SP User authority `n` (1-based).
pub fn user(n: u32) -> u64 {
    USER_BASE + u64::from(n)
}
