// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

/// Result type for this crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error cases for this crate
#[allow(missing_docs)]
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // stream decode errors
    #[error("Stream encoding ended unexpectedly")]
    UnexpectedEof,

    #[error("Reserved token in stream ({0:#04x})")]
    ReservedToken(u8),

    #[error("Unexpected token in stream ({0:#04x})")]
    UnexpectedToken(u8),

    #[error("Integer atom with invalid payload length ({0})")]
    IntegerLength(usize),

    #[error("Atom payload too large to encode")]
    AtomTooLarge,

    #[error("Atom is not {0}")]
    AtomKind(&'static str),

    #[error("Malformed reply payload")]
    MalformedReply,

    // framing errors
    #[error("Com packet of {size} bytes exceeds the drive limit of {max}")]
    ComPacketTooLarge { size: usize, max: usize },

    #[error("Response carries ComID {got:#06x}, expected {want:#06x}")]
    ComIdMismatch { want: u16, got: u16 },

    #[error("Impossible length field in response framing")]
    BadFraming,

    // transport / device errors
    #[error("Cannot open `{path}`")]
    Open {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Linux libata blocks TPM calls (boot with libata.allow_tpm=1)")]
    TpmBlocked,

    #[error("ATA device too old to report a TPM")]
    AtaTooOld,

    #[error("No TPM detected in the specified drive")]
    NoTpm,

    #[error("Drive does not support TCG Opal")]
    NotOpal,

    #[error("SG_IO transfer reported bad sense data")]
    BadSense,

    #[error("Unexpected level 0 discovery revision {major}.{minor}")]
    Level0Revision { major: u16, minor: u16 },

    #[error("Drive rejected the ComID stack reset")]
    ComIdReset,

    // method errors
    #[error("Method failed: '{msg}' ({status:#04x})")]
    Method { status: u64, msg: &'static str },

    // session errors
    #[error("Operation requires an open session")]
    NoSession,

    #[error("Timed out waiting for the drive response")]
    Timeout,

    // errors from other crates
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a [`Error::Method`] from the status code of a method reply.
    pub(crate) fn method(status: u64) -> Self {
        Self::Method {
            status,
            msg: status_fmt(status),
        }
    }

    /// True for failures after which the drive session must be considered
    /// lost (§ TCG Core: the TPer may discard the session on any aborted
    /// exchange).
    pub(crate) fn loses_session(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BadSense | Self::Timeout)
    }
}

/// Converts method status codes into human readable error messages
fn status_fmt(status: u64) -> &'static str {
    match status {
        0x00 => "success reported as failure",
        0x01 => "not authorized",
        0x02 | 0x0d | 0x0e => "obsolete status",
        0x03 => "SP busy",
        0x04 => "SP failed",
        0x05 => "SP disabled",
        0x06 => "SP frozen",
        0x07 => "no sessions available",
        0x08 => "uniqueness conflict",
        0x09 => "insufficient space",
        0x0a => "insufficient rows",
        0x0c => "invalid parameter",
        0x0f => "TPer malfunction",
        0x10 => "transaction failure",
        0x11 => "response overflow",
        0x12 => "authority locked out",
        0x3f => "fail",
        _ => "unexpected status code",
    }
}

/// Method status code of a successful call.
pub(crate) const STATUS_SUCCESS: u64 = 0x00;
/// Method status code for malformed or unsatisfiable parameters.
pub(crate) const STATUS_INVALID_PARAMETER: u64 = 0x0c;
