// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

use log::{debug, trace};
use std::{
    fs::File,
    io::Read,
    os::unix::prelude::AsRawFd,
    path::Path,
    ptr,
};

use crate::{framing::BLOCK_SIZE, misc::HexDump, transport::Transport, Error, Result};

const SG_IO: libc::c_ulong = 0x2285;
const SG_DXFER_TO_DEV: libc::c_int = -2;
const SG_DXFER_FROM_DEV: libc::c_int = -3;

const ATA_IDENTIFY_DEVICE: u8 = 0xec;
const ATA_TRUSTED_RECEIVE: u8 = 0x5c;
const ATA_TRUSTED_SEND: u8 = 0x5e;

/// Timeout for trusted send/receive commands (seconds).
const TRUSTED_TIMEOUT: libc::c_uint = 5;
/// Timeout for the identify probe (seconds).
const IDENTIFY_TIMEOUT: libc::c_uint = 1;

const ALLOW_TPM: &str = "/sys/module/libata/parameters/allow_tpm";

/// `struct sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
#[derive(Debug)]
#[allow(non_camel_case_types)]
struct sg_io_hdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *mut libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

/// ATA pass-through transport over the Linux SG_IO ioctl.
///
/// Trusted send/receive and the identify probe go out as ATA12 command
/// descriptor blocks; build with the `ata16` feature for the 16-byte form.
#[derive(Debug)]
pub struct SgDevice(File);

impl SgDevice {
    /// Opens the block device at `path` and verifies its TPM is reachable.
    ///
    /// # Errors
    ///
    /// Fails when the kernel is configured to block TPM calls, the device
    /// cannot be opened, or the identify data carries no TPM fingerprint.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        check_libata()?;

        let path = path.as_ref();
        debug!("opening {}", path.display());
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Open {
                path: path.into(),
                source: e,
            })?;

        let dev = Self(file);
        dev.check_tpm()?;
        Ok(dev)
    }

    /// Checks the IDENTIFY DEVICE data for the TPM fingerprint.
    fn check_tpm(&self) -> Result<()> {
        debug!("probe ATA identify");
        let mut id = [0u8; BLOCK_SIZE];
        self.ata_exec(
            ATA_IDENTIFY_DEVICE,
            0,
            0,
            SG_DXFER_FROM_DEV,
            id.as_mut_ptr().cast(),
            id.len(),
            1,
            IDENTIFY_TIMEOUT,
        )?;

        debug!("  model: {}", ata_string(&id, 27, 20));
        debug!("  serial: {}", ata_string(&id, 10, 10));
        debug!("  firmware: {}", ata_string(&id, 23, 4));

        let word = |n: usize| u16::from_le_bytes([id[2 * n], id[2 * n + 1]]);

        // only ATA8-ACS or later reports TPM presence
        if word(80) >> 8 == 0 {
            return Err(Error::AtaTooOld);
        }
        // trusted computing feature set fingerprint
        if word(48) & 0xc000 != 0x4000 {
            return Err(Error::NoTpm);
        }
        Ok(())
    }

    /// Executes one ATA pass-through command through the SGIO ioctl.
    #[allow(clippy::too_many_arguments)]
    fn ata_exec(
        &self,
        command: u8,
        protocol: u8,
        com_id: u16,
        direction: libc::c_int,
        data: *mut libc::c_void,
        dxfer_len: usize,
        block_count: u8,
        timeout_secs: libc::c_uint,
    ) -> Result<()> {
        // ATA protocol (PIO-in/out) and the t_length/byt_blok/t_dir flags
        let (ata_protocol, flags): (u8, u8) = match direction {
            SG_DXFER_FROM_DEV => (4 << 1, 0x2e),
            SG_DXFER_TO_DEV => (5 << 1, 0x26),
            _ => unreachable!("invalid SG_IO transfer direction"),
        };

        #[cfg(not(feature = "ata16"))]
        let mut cdb: [u8; 12] = [
            0xa1, // ATA12 pass through
            ata_protocol,
            flags,
            protocol,    // feature
            block_count, // sector count
            0x00,        // LBA low
            (com_id & 0xff) as u8,
            (com_id >> 8) as u8,
            0x00, // device
            command,
            0x00,
            0x00,
        ];
        #[cfg(feature = "ata16")]
        let mut cdb: [u8; 16] = [
            0x85, // ATA16 pass through
            ata_protocol,
            flags,
            0x00,
            protocol, // feature
            0x00,
            block_count, // sector count
            0x00,
            0x00, // LBA low
            0x00,
            (com_id & 0xff) as u8,
            0x00,
            (com_id >> 8) as u8,
            0x00, // device
            command,
            0x00,
        ];

        let mut sense = [0u8; 32];
        let mut hdr = sg_io_hdr {
            interface_id: 'S' as libc::c_int,
            dxfer_direction: direction,
            cmd_len: cdb.len() as libc::c_uchar,
            mx_sb_len: sense.len() as libc::c_uchar,
            iovec_count: 0,
            dxfer_len: dxfer_len as libc::c_uint,
            dxferp: data,
            cmdp: cdb.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: timeout_secs * 1000,
            flags: 0,
            pack_id: 0,
            usr_ptr: ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        trace!("SG_IO cdb: {}", HexDump(&cdb));

        // SAFETY: `hdr` points at `cdb`, `sense` and the caller's data
        // buffer, all of which outlive the ioctl.
        let rc = unsafe { libc::ioctl(self.0.as_raw_fd(), SG_IO, &mut hdr) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        // a successful ATA translation answers with exactly this
        // descriptor-format sense shape
        if sense[0] != 0x72
            || sense[7] != 0x0e
            || sense[8] != 0x09
            || sense[9] != 0x0c
            || sense[10] != 0x00
        {
            trace!("bad sense: {}", HexDump(&sense));
            return Err(Error::BadSense);
        }
        Ok(())
    }
}

impl Transport for SgDevice {
    fn if_send(&mut self, protocol: u8, com_id: u16, data: &[u8], block_count: u8) -> Result<()> {
        trace!(
            "IF-SEND proto {protocol:#04x} comid {com_id:#06x}: {}",
            HexDump(data)
        );
        self.ata_exec(
            ATA_TRUSTED_SEND,
            protocol,
            com_id,
            SG_DXFER_TO_DEV,
            data.as_ptr() as *mut libc::c_void,
            data.len(),
            block_count,
            TRUSTED_TIMEOUT,
        )
    }

    fn if_recv(
        &mut self,
        protocol: u8,
        com_id: u16,
        data: &mut [u8],
        block_count: u8,
    ) -> Result<()> {
        self.ata_exec(
            ATA_TRUSTED_RECEIVE,
            protocol,
            com_id,
            SG_DXFER_FROM_DEV,
            data.as_mut_ptr().cast(),
            data.len(),
            block_count,
            TRUSTED_TIMEOUT,
        )?;
        trace!(
            "IF-RECV proto {protocol:#04x} comid {com_id:#06x}: {}",
            HexDump(data)
        );
        Ok(())
    }
}

/// Checks libata (Linux ATA layer) for misconfiguration.
///
/// Best effort, /sys may not be mounted.
fn check_libata() -> Result<()> {
    let Ok(mut file) = File::open(ALLOW_TPM) else {
        return Ok(());
    };
    let mut flag = [0u8; 1];
    if file.read_exact(&mut flag).is_ok() && flag[0] == b'0' {
        return Err(Error::TpmBlocked);
    }
    Ok(())
}

/// Reads an identify string: two characters per 16-bit word, high byte first.
fn ata_string(id: &[u8; BLOCK_SIZE], word: usize, len_words: usize) -> String {
    let mut s = String::with_capacity(len_words * 2);
    for n in word..word + len_words {
        for b in [id[2 * n + 1], id[2 * n]] {
            if b == 0 {
                return s.trim().to_string();
            }
            s.push(char::from(b));
        }
    }
    s.trim().to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identify_strings() {
        let mut id = [0u8; BLOCK_SIZE];
        // " DRIVE X " packed high-byte-first into words 27..
        for (i, pair) in [b" D", b"RI", b"VE", b" X"].iter().enumerate() {
            id[2 * (27 + i)] = pair[1];
            id[2 * (27 + i) + 1] = pair[0];
        }
        assert_eq!(ata_string(&id, 27, 20), "DRIVE X");
    }
}
