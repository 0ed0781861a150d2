// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

//! ComPacket / Packet / SubPacket framing envelopes.
//!
//! Three nested headers wrap every request and response. All multi-byte
//! fields are big-endian; a `length` field never counts its own header.

use std::mem::size_of;
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16, U32};

use crate::{macros::assert_size, Error, Result};

/// Transfer granularity of the IF-SEND / IF-RECV primitives.
pub(crate) const BLOCK_SIZE: usize = 512;

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
pub(crate) struct ComPacketHeader {
    pub reserved: U32<BigEndian>,
    pub com_id: U16<BigEndian>,
    pub com_id_ext: U16<BigEndian>,
    pub outstanding: U32<BigEndian>,
    pub min_transfer: U32<BigEndian>,
    pub length: U32<BigEndian>,
}
assert_size!(ComPacketHeader, 20);

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
pub(crate) struct PacketHeader {
    pub tper_session_id: U32<BigEndian>,
    pub host_session_id: U32<BigEndian>,
    pub seq_number: U32<BigEndian>,
    pub reserved: U16<BigEndian>,
    pub ack_type: U16<BigEndian>,
    pub ack: U32<BigEndian>,
    pub length: U32<BigEndian>,
}
assert_size!(PacketHeader, 24);

#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
pub(crate) struct SubPacketHeader {
    pub reserved: [u8; 6],
    pub kind: U16<BigEndian>,
    pub length: U32<BigEndian>,
}
assert_size!(SubPacketHeader, 12);

/// The three headers as they sit in front of every payload.
#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, FromZeroes)]
pub(crate) struct OpalHeader {
    pub com: ComPacketHeader,
    pub pkt: PacketHeader,
    pub sub: SubPacketHeader,
}
assert_size!(OpalHeader, 56);

fn pad_to(len: usize, align: usize) -> usize {
    (len + (align - 1)) / align * align
}

/// Wraps a data stream payload into the framing envelopes.
///
/// `session` is the `(tper, host)` session id pair to place in the packet
/// header; calls on the session manager pass zeros. The result is padded to
/// a multiple of the transport block and checked against the negotiated
/// maximum ComPacket size.
pub(crate) fn wrap(
    payload: &[u8],
    com_id: u16,
    session: (u32, u32),
    max_size: usize,
) -> Result<Vec<u8>> {
    let sub_size = payload.len();
    // the packet envelope pads the sub packet to a 4-byte boundary
    let pkt_size = pad_to(sub_size + size_of::<SubPacketHeader>(), 4);
    let com_size = pkt_size + size_of::<PacketHeader>();
    let total = pad_to(com_size + size_of::<ComPacketHeader>(), BLOCK_SIZE);
    if total > max_size {
        return Err(Error::ComPacketTooLarge {
            size: total,
            max: max_size,
        });
    }

    let (tper, host) = session;
    let mut header = OpalHeader::new_zeroed();
    header.com.com_id.set(com_id);
    header.com.length.set(com_size as u32);
    header.pkt.tper_session_id.set(tper);
    header.pkt.host_session_id.set(host);
    header.pkt.length.set(pkt_size as u32);
    header.sub.length.set(sub_size as u32);

    let mut block = vec![0u8; total];
    block[..size_of::<OpalHeader>()].copy_from_slice(header.as_bytes());
    block[size_of::<OpalHeader>()..size_of::<OpalHeader>() + sub_size].copy_from_slice(payload);
    Ok(block)
}

/// Peels the framing envelopes off a received block.
///
/// Returns `Ok(None)` while the drive has no response queued yet (ComPacket
/// length still zero), the sub packet payload once it does.
pub(crate) fn unwrap(block: &[u8], com_id: u16) -> Result<Option<&[u8]>> {
    let header = OpalHeader::read_from_prefix(block).ok_or(Error::BadFraming)?;
    if header.com.length.get() == 0 {
        return Ok(None);
    }

    let got = header.com.com_id.get();
    if got != com_id {
        return Err(Error::ComIdMismatch { want: com_id, got });
    }
    let min = size_of::<PacketHeader>() + size_of::<SubPacketHeader>();
    if header.com.length.get() as usize <= min {
        return Err(Error::BadFraming);
    }

    let sub_len = header.sub.length.get() as usize;
    block
        .get(size_of::<OpalHeader>()..size_of::<OpalHeader>() + sub_len)
        .ok_or(Error::BadFraming)
        .map(Some)
}

#[cfg(test)]
mod test {
    use super::*;

    const COM_ID: u16 = 0x07fe;

    #[test]
    fn length_fields() {
        let payload = [0xf8u8; 23];
        let block = wrap(&payload, COM_ID, (0x11, 0x22), usize::MAX).unwrap();
        assert_eq!(block.len(), 512);

        let header = OpalHeader::read_from_prefix(block.as_slice()).unwrap();
        assert_eq!(header.sub.length.get(), 23);
        // sub packet envelope padded to 4
        assert_eq!(header.pkt.length.get(), 36);
        assert_eq!(header.com.length.get(), 36 + 24);
        assert_eq!(header.com.com_id.get(), COM_ID);
        assert_eq!(header.pkt.tper_session_id.get(), 0x11);
        assert_eq!(header.pkt.host_session_id.get(), 0x22);
        // padding area stays zero
        assert!(block[56 + 23..].iter().all(|b| *b == 0));
    }

    #[test]
    fn blocks_are_multiples_of_512() {
        for len in [0usize, 1, 455, 456, 457, 1000] {
            let block = wrap(&vec![0xaa; len], COM_ID, (0, 0), usize::MAX).unwrap();
            assert_eq!(block.len() % BLOCK_SIZE, 0, "payload len {len}");
            assert!(block.len() >= len + size_of::<OpalHeader>());
        }
    }

    #[test]
    fn size_bound_enforced() {
        assert!(matches!(
            wrap(&[0u8; 600], COM_ID, (0, 0), 512),
            Err(Error::ComPacketTooLarge {
                size: 1024,
                max: 512
            })
        ));
    }

    #[test]
    fn unwrap_roundtrip() {
        let payload = [0x01u8, 0x02, 0x03];
        let block = wrap(&payload, COM_ID, (0, 0), usize::MAX).unwrap();
        let got = unwrap(&block, COM_ID).unwrap().unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn unwrap_pending_response() {
        // an all-zero block means the drive has nothing queued yet
        assert!(unwrap(&[0u8; 512], COM_ID).unwrap().is_none());
    }

    #[test]
    fn unwrap_rejects_foreign_com_id() {
        let block = wrap(&[0u8; 4], 0x1001, (0, 0), usize::MAX).unwrap();
        assert!(matches!(
            unwrap(&block, COM_ID),
            Err(Error::ComIdMismatch {
                want: COM_ID,
                got: 0x1001
            })
        ));
    }

    #[test]
    fn unwrap_rejects_impossible_lengths() {
        let mut block = wrap(&[0u8; 4], COM_ID, (0, 0), usize::MAX).unwrap();
        // sub packet claims more payload than the block holds
        block[52..56].copy_from_slice(&0x0100_0000u32.to_be_bytes());
        assert!(matches!(unwrap(&block, COM_ID), Err(Error::BadFraming)));

        // com packet shorter than its inner headers
        let mut block = wrap(&[0u8; 4], COM_ID, (0, 0), usize::MAX).unwrap();
        block[16..20].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(unwrap(&block, COM_ID), Err(Error::BadFraming)));

        // block too short for the headers
        assert!(matches!(unwrap(&[0u8; 10], COM_ID), Err(Error::BadFraming)));
    }
}
