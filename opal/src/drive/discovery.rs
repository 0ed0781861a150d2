// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

use log::debug;
use std::mem::size_of;
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16, U32, U64};

use super::Drive;
use crate::{
    error::{Error, Result},
    framing::BLOCK_SIZE,
    macros::assert_size,
    transport::Transport,
    uid,
};

// Level 0 feature descriptor codes
const FEAT_TPER: u16 = 0x0001;
const FEAT_LOCKING: u16 = 0x0002;
const FEAT_GEOMETRY: u16 = 0x0003;
const FEAT_OPAL1: u16 = 0x0200;
const FEAT_SINGLE_USER: u16 = 0x0201;
const FEAT_DATASTORE: u16 = 0x0202;
const FEAT_OPAL2: u16 = 0x0203;

/// ComID management request code dropping all state bound to a ComID.
const STACK_RESET: u32 = 0x02;

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
struct Level0Header {
    length: U32<BigEndian>,
    major_ver: U16<BigEndian>,
    minor_ver: U16<BigEndian>,
    reserved: [u8; 8],
    vendor: [u8; 16],
}
assert_size!(Level0Header, 32);

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
struct FeatureHeader {
    code: U16<BigEndian>,
    version: u8,
    length: u8,
}
assert_size!(FeatureHeader, 4);

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
struct FeatGeometry {
    align: u8,
    reserved: [u8; 7],
    lba_size: U32<BigEndian>,
    align_gran: U64<BigEndian>,
    lowest_align: U64<BigEndian>,
}
assert_size!(FeatGeometry, 28);

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
struct FeatOpal1 {
    comid_base: U16<BigEndian>,
    comid_count: U16<BigEndian>,
    range_bhv: u8,
}
assert_size!(FeatOpal1, 5);

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
struct FeatOpal2 {
    comid_base: U16<BigEndian>,
    comid_count: U16<BigEndian>,
    range_bhv: u8,
    admin_count: U16<BigEndian>,
    user_count: U16<BigEndian>,
    init_pin: u8,
    revert_pin: u8,
}
assert_size!(FeatOpal2, 11);

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
struct ComIdRequest {
    com_id: U16<BigEndian>,
    com_id_ext: U16<BigEndian>,
    reserved: [u8; 4],
    request_code: U32<BigEndian>,
}
assert_size!(ComIdRequest, 12);

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
struct ComIdResponse {
    com_id: U16<BigEndian>,
    com_id_ext: U16<BigEndian>,
    reserved: [u8; 4],
    available_data: U32<BigEndian>,
    failure: U32<BigEndian>,
}
assert_size!(ComIdResponse, 16);

impl<T: Transport> Drive<T> {
    /// Walks the security protocol list the TPM announces on protocol 0.
    ///
    /// Protocol 0x01 carries the Opal management traffic and is mandatory.
    pub(crate) fn probe_tpm(&mut self) -> Result<()> {
        debug!("probe TPM security protocols");
        let mut block = [0u8; BLOCK_SIZE];
        self.transport.if_recv(0, 0, &mut block, 1)?;

        let count = u16::from_be_bytes([block[6], block[7]]) as usize;
        let list = block.get(8..8 + count).ok_or(Error::BadFraming)?;

        let mut has_opal = false;
        for &proto in list {
            debug!("  ({proto:#04x}) {}", tpm_proto_name(proto));
            if proto == 0x01 {
                has_opal = true;
            }
        }
        if !has_opal {
            return Err(Error::NotOpal);
        }
        Ok(())
    }

    /// Level 0 discovery: walks the feature descriptors and records the
    /// drive capabilities.
    pub(crate) fn probe_level0(&mut self) -> Result<()> {
        debug!("level 0 discovery");
        let mut block = [0u8; BLOCK_SIZE];
        self.transport.if_recv(1, 1, &mut block, 1)?;

        let header = Level0Header::read_from_prefix(&block[..]).ok_or(Error::BadFraming)?;
        // the length field does not count itself
        let total = (header.length.get() as usize + 4).min(BLOCK_SIZE);
        let (major, minor) = (header.major_ver.get(), header.minor_ver.get());
        debug!("  level 0 data: {total} bytes, revision {major}.{minor}");
        if (major, minor) != (0, 1) {
            return Err(Error::Level0Revision { major, minor });
        }

        let mut offset = size_of::<Level0Header>();
        while offset + size_of::<FeatureHeader>() <= total {
            let feat = FeatureHeader::read_from_prefix(&block[offset..]).ok_or(Error::BadFraming)?;
            offset += size_of::<FeatureHeader>();
            let data = block
                .get(offset..offset + feat.length as usize)
                .ok_or(Error::BadFraming)?;
            self.record_feature(feat.code.get(), feat.version >> 4, data)?;
            offset += feat.length as usize;
        }

        if !self.has_opal1 && !self.has_opal2 {
            return Err(Error::NotOpal);
        }
        Ok(())
    }

    fn record_feature(&mut self, code: u16, version: u8, data: &[u8]) -> Result<()> {
        match code {
            FEAT_TPER => {
                if let Some(bits) = data.first() {
                    debug!(
                        "  TPer: sync {} async {} ack/nak {} buffer mgmt {} streaming {} comid mgmt {}",
                        bits & 0x01,
                        (bits >> 1) & 0x01,
                        (bits >> 2) & 0x01,
                        (bits >> 3) & 0x01,
                        (bits >> 4) & 0x01,
                        (bits >> 6) & 0x01,
                    );
                }
            }
            FEAT_LOCKING => {
                if let Some(bits) = data.first() {
                    debug!(
                        "  locking: supported {} enabled {} locked {} media encryption {} MBR enabled {} MBR done {}",
                        bits & 0x01,
                        (bits >> 1) & 0x01,
                        (bits >> 2) & 0x01,
                        (bits >> 3) & 0x01,
                        (bits >> 4) & 0x01,
                        (bits >> 5) & 0x01,
                    );
                }
            }
            FEAT_GEOMETRY => {
                let geo = FeatGeometry::read_from_prefix(data).ok_or(Error::BadFraming)?;
                self.lba_align = geo.lowest_align.get();
                debug!(
                    "  geometry: lba size {}, lowest aligned lba {}",
                    geo.lba_size.get(),
                    self.lba_align
                );
            }
            FEAT_OPAL1 => {
                let ssc = FeatOpal1::read_from_prefix(data).ok_or(Error::BadFraming)?;
                self.has_opal1 = true;
                self.com_id = ssc.comid_base.get();
                // Opal 1.0 drives don't do large sectors
                self.lba_align = 1;
                debug!(
                    "  Opal 1 SSC v{version}: base comid {:#06x}, {} comids",
                    self.com_id,
                    ssc.comid_count.get()
                );
            }
            FEAT_OPAL2 => {
                let ssc = FeatOpal2::read_from_prefix(data).ok_or(Error::BadFraming)?;
                self.has_opal2 = true;
                self.com_id = ssc.comid_base.get();
                self.admin_count = ssc.admin_count.get();
                self.user_count = ssc.user_count.get();
                debug!(
                    "  Opal 2 SSC v{version}: base comid {:#06x}, {} admins, {} users",
                    self.com_id, self.admin_count, self.user_count
                );
            }
            FEAT_SINGLE_USER => debug!("  single user mode feature present"),
            FEAT_DATASTORE => debug!("  additional datastore tables feature present"),
            _ => debug!("  feature {code:#06x} v{version} skipped"),
        }
        Ok(())
    }

    /// Resets the protocol stack bound to the discovered ComID.
    pub(crate) fn reset_com_id(&mut self) -> Result<()> {
        debug!("reset comid {:#06x}", self.com_id);
        let mut request = ComIdRequest::new_zeroed();
        request.com_id.set(self.com_id);
        request.request_code.set(STACK_RESET);

        let mut block = [0u8; BLOCK_SIZE];
        block[..size_of::<ComIdRequest>()].copy_from_slice(request.as_bytes());
        self.transport.if_send(2, self.com_id, &block, 1)?;

        let mut block = [0u8; BLOCK_SIZE];
        self.transport.if_recv(2, self.com_id, &mut block, 1)?;
        let response = ComIdResponse::read_from_prefix(&block[..]).ok_or(Error::BadFraming)?;
        if response.available_data.get() != 4 || response.failure.get() != 0 {
            return Err(Error::ComIdReset);
        }
        Ok(())
    }

    /// Level 1 discovery: `SessionMgr.Properties[]`.
    ///
    /// Adopts `MaxComPacketSize` as the framing bound; the other properties
    /// are informational.
    pub(crate) fn probe_level1(&mut self) -> Result<()> {
        debug!("level 1 discovery - host properties");
        let results = self.invoke(uid::SESSION_MGR, uid::PROPERTIES, Vec::new())?;
        let props = results.first().ok_or(Error::MalformedReply)?.as_list()?;

        for prop in props {
            let (name, value) = prop.as_named()?;
            let name = String::from_utf8_lossy(name.as_bytes()?);
            let value = value.as_atom()?.as_uint()?;
            debug!("  property {name} = {value}");
            if name == "MaxComPacketSize" {
                self.max_com_pkt_size = value as usize;
            }
        }
        Ok(())
    }
}

fn tpm_proto_name(proto: u8) -> &'static str {
    match proto {
        0x00 => "security protocol discovery",
        0x01..=0x06 => "TCG Opal",
        0x20 | 0xef => "T10 (reserved)",
        0xee => "IEEE P1667",
        0xf0..=0xff => "vendor specific",
        _ => "reserved",
    }
}
