// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

mod discovery;
mod session;

use log::debug;
use std::{path::Path, time::Duration};

use crate::{
    error::{Error, Result, STATUS_INVALID_PARAMETER},
    stream::{Atom, Datum},
    transport::{SgDevice, Transport},
    uid,
};

/// Interval between receive polls while the drive works on a call.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on waiting for any single response.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Worst case method skeleton plus framing around one bulk `Set` chunk:
/// call token, two UID atoms, named where/values arguments, status footer
/// and the three envelope headers.
const BULK_OVERHEAD: usize = 102;

/// Handle to a TCG Opal drive.
///
/// Opening a drive probes the TPM security protocols, walks Level 0
/// discovery, resets the ComID stack where the drive supports it and
/// negotiates communication properties. A handle owns at most one session;
/// it is not safe to share and makes no attempt to coordinate with other
/// handles on the same device.
///
/// # Example
///
/// ```rust,no_run
/// # use opal::{uid, Atom, Drive};
/// # fn main() -> opal::Result<()> {
/// let mut drive = Drive::open("/dev/sda")?;
/// let msid = drive.login_anon(uid::ADMIN_SP).and_then(|_| drive.default_pin())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Drive<T: Transport> {
    transport: T,
    com_id: u16,
    tper_session_id: u32,
    host_session_id: u32,
    has_opal1: bool,
    has_opal2: bool,
    lba_align: u64,
    max_com_pkt_size: usize,
    admin_count: u16,
    user_count: u16,
    poll_interval: Duration,
    recv_timeout: Duration,
}

impl Drive<SgDevice> {
    /// Opens the drive at the given OS path (eg `/dev/sda`).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(SgDevice::open(path)?)
    }
}

impl<T: Transport> Drive<T> {
    /// Brings up a drive on an already opened transport.
    pub fn new(transport: T) -> Result<Self> {
        let mut drive = Self::undiscovered(transport);
        drive.probe_tpm()?;
        drive.probe_level0()?;
        // start from a blank slate when the drive can do it
        if drive.has_opal2 {
            drive.reset_com_id()?;
        }
        drive.probe_level1()?;
        Ok(drive)
    }

    fn undiscovered(transport: T) -> Self {
        Self {
            transport,
            com_id: 0,
            tper_session_id: 0,
            host_session_id: 0,
            has_opal1: false,
            has_opal2: false,
            lba_align: 1,
            max_com_pkt_size: usize::MAX,
            admin_count: 0,
            user_count: 0,
            poll_interval: POLL_INTERVAL,
            recv_timeout: RECV_TIMEOUT,
        }
    }

    /// Starts an anonymous session on the given Security Provider.
    pub fn login_anon(&mut self, sp_uid: u64) -> Result<()> {
        self.start_session(sp_uid, None)
    }

    /// Starts an authenticated read/write session on the given Security
    /// Provider, signing on as `auth_uid` with the PIN as host challenge.
    pub fn login(&mut self, sp_uid: u64, auth_uid: u64, pin: &[u8]) -> Result<()> {
        self.start_session(sp_uid, Some((auth_uid, pin)))
    }

    /// Ends the session in progress, if any. Best effort.
    pub fn logout(&mut self) {
        self.end_session();
    }

    /// Queries one column of the given table object.
    pub fn table_get(&mut self, tbl_uid: u64, tbl_col: u64) -> Result<Atom> {
        let cellblock = Datum::List(vec![
            Datum::named(Atom::uint(3), Datum::uint(tbl_col)), // starting column
            Datum::named(Atom::uint(4), Datum::uint(tbl_col)), // ending column
        ]);
        let results = self.invoke(tbl_uid, uid::GET, vec![cellblock])?;

        // single requested value inside a nested list
        let row = results.first().ok_or(Error::MalformedReply)?.as_list()?;
        let cell = row
            .first()
            .ok_or_else(|| Error::method(STATUS_INVALID_PARAMETER))?;
        Ok(cell.as_named()?.1.as_atom()?.clone())
    }

    /// Queries every column of the given table object.
    pub fn table_get_all(&mut self, tbl_uid: u64) -> Result<Vec<Datum>> {
        let results = self.invoke(tbl_uid, uid::GET, vec![Datum::List(Vec::new())])?;
        Ok(results
            .first()
            .ok_or(Error::MalformedReply)?
            .as_list()?
            .to_vec())
    }

    /// Sets one column of the given table object.
    pub fn table_set(&mut self, tbl_uid: u64, tbl_col: u64, value: Atom) -> Result<()> {
        let values = Datum::named(
            Atom::uint(1),
            Datum::List(vec![Datum::named(Atom::uint(tbl_col), Datum::Atom(value))]),
        );
        self.invoke(tbl_uid, uid::SET, vec![values])?;
        Ok(())
    }

    /// Streams `data` into a byte table starting at byte `offset`.
    ///
    /// Large buffers (the MBR shadow) go out as successive `Set` calls,
    /// each sized to the negotiated maximum ComPacket less the framing and
    /// method overhead, rounded down to a 4 KiB boundary.
    pub fn table_set_bin(&mut self, tbl_uid: u64, offset: u64, data: &[u8]) -> Result<()> {
        let chunk = self.bulk_chunk_size()?;
        for (n, piece) in data.chunks(chunk).enumerate() {
            let pos = offset + (n * chunk) as u64;
            debug!("bulk write of {} bytes at {pos:#x}", piece.len());
            let params = vec![
                Datum::named(Atom::uint(0), Datum::uint(pos)), // where
                Datum::named(Atom::uint(1), Datum::bytes(piece)?), // values
            ];
            self.invoke(tbl_uid, uid::SET, params)?;
        }
        Ok(())
    }

    fn bulk_chunk_size(&self) -> Result<usize> {
        let chunk = self.max_com_pkt_size.saturating_sub(BULK_OVERHEAD) & !0xfff;
        if chunk == 0 {
            return Err(Error::ComPacketTooLarge {
                size: 0x1000 + BULK_OVERHEAD,
                max: self.max_com_pkt_size,
            });
        }
        Ok(chunk)
    }

    /// Reads the manufactured default PIN from the MSID credential row.
    pub fn default_pin(&mut self) -> Result<Atom> {
        self.table_get(uid::C_PIN_MSID, 3)
    }

    /// `Revert[]` on the Admin SP: factory-resets the TPer.
    ///
    /// On success the drive drops the session unilaterally, so the handle
    /// forgets it without an end-of-session exchange.
    pub fn admin_sp_revert(&mut self) -> Result<()> {
        self.invoke(uid::ADMIN_SP, uid::REVERT, Vec::new())?;
        self.tper_session_id = 0;
        self.host_session_id = 0;
        Ok(())
    }

    /// The ComID negotiated during discovery.
    pub fn com_id(&self) -> u16 {
        self.com_id
    }

    /// Whether the drive reported the Opal 1 SSC feature.
    pub fn has_opal1(&self) -> bool {
        self.has_opal1
    }

    /// Whether the drive reported the Opal 2 SSC feature.
    pub fn has_opal2(&self) -> bool {
        self.has_opal2
    }

    /// Lowest aligned LBA of the drive geometry.
    pub fn lba_align(&self) -> u64 {
        self.lba_align
    }

    /// Largest ComPacket the drive accepts.
    pub fn max_com_packet_size(&self) -> usize {
        self.max_com_pkt_size
    }

    /// Locking SP Admin authority slots.
    pub fn admin_slots(&self) -> u16 {
        self.admin_count
    }

    /// Locking SP User authority slots.
    pub fn user_slots(&self) -> u16 {
        self.user_count
    }

    /// Whether a session is currently open.
    pub fn session_open(&self) -> bool {
        self.host_session_id != 0
    }
}

impl<T: Transport> Drop for Drive<T> {
    fn drop(&mut self) {
        self.logout();
    }
}
