// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::{stream, Error, Result};

// Header tokens and their flag bits per encoding class
const TINY_SIGN: u8 = 0x40;
const TINY_NEG: u8 = 0x20;
const SHORT_TOK: u8 = 0x80;
const SHORT_BIN: u8 = 0x20;
const SHORT_SIGN: u8 = 0x10;
const MEDIUM_TOK: u8 = 0xc0;
const MEDIUM_BIN: u8 = 0x10;
const MEDIUM_SIGN: u8 = 0x08;
const LONG_TOK: u8 = 0xe0;
const LONG_BIN: u8 = 0x02;
const LONG_SIGN: u8 = 0x01;

const SHORT_MAX_LEN: usize = 0xf;
const MEDIUM_MAX_LEN: usize = 0x7ff;
const LONG_MAX_LEN: usize = 0xff_ffff;

/// Encoding class of an atom.
///
/// Chosen as the smallest class that fits at construction time. The class is
/// part of an atom's identity: the same semantic value in two classes
/// compares unequal, because the UID interpretation of a value depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Data lives in the header byte itself.
    Tiny,
    /// 1-byte header, up to 15 data bytes.
    Short,
    /// 2-byte header, up to 2047 data bytes.
    Medium,
    /// 4-byte header, up to 2²⁴−1 data bytes.
    Long,
}

impl Encoding {
    fn for_len(len: usize) -> Result<Self> {
        match len {
            0..=SHORT_MAX_LEN => Ok(Self::Short),
            ..=MEDIUM_MAX_LEN => Ok(Self::Medium),
            ..=LONG_MAX_LEN => Ok(Self::Long),
            _ => Err(Error::AtomTooLarge),
        }
    }

    fn header_size(self) -> usize {
        match self {
            Self::Tiny => 1,
            Self::Short => 1,
            Self::Medium => 2,
            Self::Long => 4,
        }
    }
}

/// A primitive value of the TCG data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    /// Zero-length placeholder, one byte on the wire.
    Empty,
    /// Unsigned integer of up to 64 bits.
    Uint {
        /// Represented value.
        value: u64,
        /// Wire encoding class.
        enc: Encoding,
    },
    /// Signed integer of up to 64 bits, two's complement on the wire.
    Int {
        /// Represented value.
        value: i64,
        /// Wire encoding class.
        enc: Encoding,
    },
    /// Ordered byte sequence of up to 2²⁴−1 bytes.
    Bytes {
        /// Represented bytes.
        data: Vec<u8>,
        /// Wire encoding class.
        enc: Encoding,
    },
}

impl Atom {
    /// Builds an unsigned integer atom.
    pub fn uint(value: u64) -> Self {
        let enc = if value < 0x40 {
            Encoding::Tiny
        } else {
            Encoding::Short
        };
        Self::Uint { value, enc }
    }

    /// Builds a signed integer atom.
    pub fn int(value: i64) -> Self {
        let enc = if (-0x20..0x20).contains(&value) {
            Encoding::Tiny
        } else {
            Encoding::Short
        };
        Self::Int { value, enc }
    }

    /// Builds a binary atom.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AtomTooLarge`] when `data` does not fit the
    /// largest encoding class.
    pub fn bytes<D: Into<Vec<u8>>>(data: D) -> Result<Self> {
        let data = data.into();
        let enc = Encoding::for_len(data.len())?;
        Ok(Self::Bytes { data, enc })
    }

    /// Builds a UID atom.
    ///
    /// UIDs are 64 bit integers, but go on the wire as an 8-byte big-endian
    /// binary of the short class rather than as an integer.
    pub fn uid(value: u64) -> Self {
        Self::Bytes {
            data: value.to_be_bytes().to_vec(),
            enc: Encoding::Short,
        }
    }

    /// Returns the unsigned integer value.
    pub fn as_uint(&self) -> Result<u64> {
        match self {
            Self::Uint { value, .. } => Ok(*value),
            _ => Err(Error::AtomKind("an unsigned integer")),
        }
    }

    /// Returns the signed integer value.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Self::Int { value, .. } => Ok(*value),
            _ => Err(Error::AtomKind("a signed integer")),
        }
    }

    /// Returns the binary payload.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Self::Bytes { data, .. } => Ok(data),
            _ => Err(Error::AtomKind("binary data")),
        }
    }

    /// Reads the atom back as a UID.
    ///
    /// Only a length-8 binary of the short class qualifies; the wire format
    /// cannot distinguish a UID from such a binary, so this is the caller's
    /// interpretation.
    pub fn as_uid(&self) -> Result<u64> {
        match self {
            Self::Bytes {
                data,
                enc: Encoding::Short,
            } if data.len() == 8 => {
                // cannot fail, length checked above
                Ok(u64::from_be_bytes(data.as_slice().try_into().unwrap()))
            }
            _ => Err(Error::AtomKind("a UID")),
        }
    }

    /// Byte count of the atom when encoded.
    pub fn size(&self) -> usize {
        match self {
            Self::Empty => 1,
            Self::Uint {
                enc: Encoding::Tiny,
                ..
            }
            | Self::Int {
                enc: Encoding::Tiny,
                ..
            } => 1,
            Self::Uint { value, enc } => enc.header_size() + (8 - uint_payload(*value).1),
            Self::Int { value, enc } => enc.header_size() + (8 - int_payload(*value).1),
            Self::Bytes { data, enc } => enc.header_size() + data.len(),
        }
    }

    /// Encodes the atom onto the stream.
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        match self {
            Self::Empty => w.write_u8(stream::TOK_EMPTY)?,
            Self::Uint {
                value,
                enc: Encoding::Tiny,
            } => w.write_u8(*value as u8 & 0x3f)?,
            Self::Int {
                value,
                enc: Encoding::Tiny,
            } => w.write_u8(TINY_SIGN | (*value as u8 & 0x3f))?,
            Self::Uint { value, enc } => {
                let (raw, skip) = uint_payload(*value);
                write_header(w, *enc, false, false, 8 - skip)?;
                w.write_all(&raw[skip..])?;
            }
            Self::Int { value, enc } => {
                let (raw, skip) = int_payload(*value);
                write_header(w, *enc, false, true, 8 - skip)?;
                w.write_all(&raw[skip..])?;
            }
            Self::Bytes { data, enc } => {
                write_header(w, *enc, true, false, data.len())?;
                w.write_all(data)?;
            }
        }
        Ok(())
    }

    /// Decodes one atom from the stream.
    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let tok = stream::read_byte(r)?;
        Self::decode_with(tok, r)
    }

    /// Decodes the atom whose header byte has already been consumed.
    pub(crate) fn decode_with<R: Read>(tok: u8, r: &mut R) -> Result<Self> {
        let (enc, bin, sign, len) = match tok {
            stream::TOK_EMPTY => return Ok(Self::Empty),
            0x00..=0x3f => {
                return Ok(Self::Uint {
                    value: tok.into(),
                    enc: Encoding::Tiny,
                })
            }
            0x40..=0x7f => {
                let mut value = i64::from(tok & 0x3f);
                if tok & TINY_NEG != 0 {
                    // sign extend from bit 5
                    value |= !0x3f;
                }
                return Ok(Self::Int {
                    value,
                    enc: Encoding::Tiny,
                });
            }
            0x80..=0xbf => (
                Encoding::Short,
                tok & SHORT_BIN != 0,
                tok & SHORT_SIGN != 0,
                (tok & 0x0f) as usize,
            ),
            0xc0..=0xdf => {
                let lo = stream::read_byte(r)?;
                (
                    Encoding::Medium,
                    tok & MEDIUM_BIN != 0,
                    tok & MEDIUM_SIGN != 0,
                    ((tok & 0x07) as usize) << 8 | lo as usize,
                )
            }
            0xe0..=0xe3 => {
                let len = r
                    .read_u24::<BigEndian>()
                    .map_err(|_| Error::UnexpectedEof)? as usize;
                (
                    Encoding::Long,
                    tok & LONG_BIN != 0,
                    tok & LONG_SIGN != 0,
                    len,
                )
            }
            0xe4..=0xef | 0xf4..=0xf7 | 0xfd | 0xfe => return Err(Error::ReservedToken(tok)),
            // sequence and control tokens are no atoms
            _ => return Err(Error::UnexpectedToken(tok)),
        };

        if bin && sign {
            return Err(Error::ReservedToken(tok));
        }
        if bin {
            let mut data = vec![0u8; len];
            r.read_exact(&mut data).map_err(|_| Error::UnexpectedEof)?;
            Ok(Self::Bytes { data, enc })
        } else {
            Self::decode_int(r, enc, sign, len)
        }
    }

    fn decode_int<R: Read>(r: &mut R, enc: Encoding, sign: bool, len: usize) -> Result<Self> {
        if len == 0 || len > 8 {
            return Err(Error::IntegerLength(len));
        }
        let mut raw = [0u8; 8];
        r.read_exact(&mut raw[8 - len..])
            .map_err(|_| Error::UnexpectedEof)?;
        if sign {
            if raw[8 - len] & 0x80 != 0 {
                // negative value, extend the sign over the stripped bytes
                for b in &mut raw[..8 - len] {
                    *b = 0xff;
                }
            }
            Ok(Self::Int {
                value: i64::from_be_bytes(raw),
                enc,
            })
        } else {
            Ok(Self::Uint {
                value: u64::from_be_bytes(raw),
                enc,
            })
        }
    }
}

/// Big-endian bytes of an unsigned value and the count of lead bytes to strip.
fn uint_payload(value: u64) -> ([u8; 8], usize) {
    let raw = value.to_be_bytes();
    let mut skip = 0;
    while skip < 7 && raw[skip] == 0x00 {
        skip += 1;
    }
    (raw, skip)
}

/// Big-endian bytes of a signed value and the count of lead bytes to strip.
///
/// Lead bytes go only while the remaining value keeps its sign: the next
/// byte's top bit must match. The probe never reads past the buffer, also
/// for `0` and `-1`.
fn int_payload(value: i64) -> ([u8; 8], usize) {
    let raw = value.to_be_bytes();
    let mut skip = 0;
    if value < 0 {
        while skip < 7 && raw[skip] == 0xff && raw[skip + 1] & 0x80 != 0 {
            skip += 1;
        }
    } else {
        while skip < 7 && raw[skip] == 0x00 && raw[skip + 1] & 0x80 == 0 {
            skip += 1;
        }
    }
    (raw, skip)
}

fn write_header<W: Write>(w: &mut W, enc: Encoding, bin: bool, sign: bool, len: usize) -> Result<()> {
    match enc {
        Encoding::Tiny => unreachable!("tiny atoms carry their payload in the header byte"),
        Encoding::Short => {
            let mut tok = SHORT_TOK | len as u8;
            if bin {
                tok |= SHORT_BIN;
            }
            if sign {
                tok |= SHORT_SIGN;
            }
            w.write_u8(tok)?;
        }
        Encoding::Medium => {
            let mut tok = MEDIUM_TOK | (len >> 8) as u8;
            if bin {
                tok |= MEDIUM_BIN;
            }
            if sign {
                tok |= MEDIUM_SIGN;
            }
            w.write_u8(tok)?;
            w.write_u8(len as u8)?;
        }
        Encoding::Long => {
            let mut tok = LONG_TOK;
            if bin {
                tok |= LONG_BIN;
            }
            if sign {
                tok |= LONG_SIGN;
            }
            w.write_u8(tok)?;
            w.write_u24::<BigEndian>(len as u32)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn enc(a: &Atom) -> Vec<u8> {
        let mut buf = Vec::new();
        a.encode(&mut buf).unwrap();
        buf
    }

    fn dec(bytes: &[u8]) -> Atom {
        Atom::decode(&mut Cursor::new(bytes)).unwrap()
    }

    fn roundtrip(a: Atom) {
        let bytes = enc(&a);
        assert_eq!(bytes.len(), a.size(), "size mismatch for {a:?}");
        assert_eq!(dec(&bytes), a, "roundtrip mismatch for {a:?}");
    }

    #[test]
    fn tiny_uint() {
        let a = Atom::uint(5);
        assert_eq!(enc(&a), [0x05]);
        assert_eq!(a.size(), 1);
        assert_eq!(dec(&[0x05]).as_uint().unwrap(), 5);
    }

    #[test]
    fn tiny_int() {
        assert_eq!(enc(&Atom::int(-1)), [0x7f]);
        assert_eq!(dec(&[0x7f]).as_int().unwrap(), -1);
        assert_eq!(enc(&Atom::int(-32)), [0x60]);
        assert_eq!(enc(&Atom::int(31)), [0x5f]);
        assert_eq!(enc(&Atom::int(0)), [0x40]);
    }

    #[test]
    fn short_bin() {
        let a = Atom::bytes(vec![0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(enc(&a), [0xa4, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(a.size(), 5);
    }

    #[test]
    fn uid_is_short_binary() {
        let a = Atom::uid(0x0000_0000_00ff_0001);
        assert_eq!(
            enc(&a),
            [0xa8, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x00, 0x01]
        );
        assert_eq!(a.size(), 9);
        assert_eq!(dec(&enc(&a)).as_uid().unwrap(), 0x0000_0000_00ff_0001);
    }

    #[test]
    fn uid_roundtrips_as_binary() {
        // the wire cannot tell a UID from a length-8 short binary
        let uid = Atom::uid(0x0102_0304_0506_0708);
        let bin = Atom::bytes(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]).unwrap();
        assert_eq!(uid, bin);
        assert_eq!(dec(&enc(&uid)), bin);
    }

    #[test]
    fn minimal_integer_class() {
        assert!(matches!(
            Atom::uint(0x3f),
            Atom::Uint {
                enc: Encoding::Tiny,
                ..
            }
        ));
        assert!(matches!(
            Atom::uint(0x40),
            Atom::Uint {
                enc: Encoding::Short,
                ..
            }
        ));
        assert_eq!(enc(&Atom::uint(0x40)), [0x81, 0x40]);
        assert!(matches!(
            Atom::int(-33),
            Atom::Int {
                enc: Encoding::Short,
                ..
            }
        ));
        assert_eq!(enc(&Atom::int(-33)), [0x91, 0xdf]);
    }

    #[test]
    fn minimal_binary_class() {
        let short = Atom::bytes(vec![0u8; 15]).unwrap();
        assert!(matches!(
            short,
            Atom::Bytes {
                enc: Encoding::Short,
                ..
            }
        ));
        let medium = Atom::bytes(vec![0u8; 16]).unwrap();
        assert_eq!(enc(&medium)[..2], [0xd0, 0x10]);
        let medium_max = Atom::bytes(vec![0u8; 2047]).unwrap();
        assert!(matches!(
            medium_max,
            Atom::Bytes {
                enc: Encoding::Medium,
                ..
            }
        ));
        let long = Atom::bytes(vec![0u8; 2048]).unwrap();
        assert_eq!(enc(&long)[..4], [0xe2, 0x00, 0x08, 0x00]);
    }

    #[test]
    fn integer_trimming() {
        // unsigned values shed plain zero lead bytes
        assert_eq!(enc(&Atom::uint(0x80)), [0x81, 0x80]);
        assert_eq!(enc(&Atom::uint(0x1234)), [0x82, 0x12, 0x34]);
        assert_eq!(
            enc(&Atom::uint(u64::MAX)),
            [0x88, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
        // signed values keep a byte for the sign
        assert_eq!(enc(&Atom::int(0x80)), [0x92, 0x00, 0x80]);
        assert_eq!(enc(&Atom::int(i64::MIN)), {
            let mut v = vec![0x98, 0x80];
            v.extend([0; 7]);
            v
        });
    }

    #[test]
    fn roundtrips() {
        roundtrip(Atom::Empty);
        roundtrip(Atom::uint(0));
        roundtrip(Atom::uint(0x3f));
        roundtrip(Atom::uint(0x40));
        roundtrip(Atom::uint(u64::MAX));
        roundtrip(Atom::int(-1));
        roundtrip(Atom::int(-32));
        roundtrip(Atom::int(-33));
        roundtrip(Atom::int(i64::MIN));
        roundtrip(Atom::int(i64::MAX));
        roundtrip(Atom::bytes(Vec::new()).unwrap());
        roundtrip(Atom::bytes(vec![0x42; 15]).unwrap());
        roundtrip(Atom::bytes(vec![0x42; 16]).unwrap());
        roundtrip(Atom::bytes(vec![0x42; 2048]).unwrap());
        roundtrip(Atom::uid(crate::uid::LOCKING_SP));
    }

    #[test]
    fn empty_token() {
        assert_eq!(enc(&Atom::Empty), [0xff]);
        assert_eq!(dec(&[0xff]), Atom::Empty);
    }

    #[test]
    fn equality_includes_encoding() {
        // a short-encoded 5 is not the tiny 5
        let short5 = dec(&[0x81, 0x05]);
        assert_eq!(short5.as_uint().unwrap(), 5);
        assert_ne!(short5, Atom::uint(5));
    }

    #[test]
    fn oversized_binary_rejected() {
        assert!(matches!(
            Atom::bytes(vec![0u8; 0x100_0000]),
            Err(Error::AtomTooLarge)
        ));
    }

    #[test]
    fn decode_failures() {
        // reserved tokens
        for tok in [0xe4, 0xef, 0xf4, 0xfd, 0xfe] {
            assert!(matches!(dec_err(&[tok]), Error::ReservedToken(t) if t == tok));
        }
        // sequence tokens are not atoms
        assert!(matches!(dec_err(&[0xf0]), Error::UnexpectedToken(0xf0)));
        // truncated payloads and headers
        assert!(matches!(dec_err(&[]), Error::UnexpectedEof));
        assert!(matches!(dec_err(&[0xa4, 0xde]), Error::UnexpectedEof));
        assert!(matches!(dec_err(&[0xc0]), Error::UnexpectedEof));
        assert!(matches!(dec_err(&[0xe0, 0x00]), Error::UnexpectedEof));
        // integer length limits
        assert!(matches!(dec_err(&[0x80]), Error::IntegerLength(0)));
        assert!(matches!(
            dec_err(&[0x89, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            Error::IntegerLength(9)
        ));
        // binary and sign flags together are reserved
        assert!(matches!(dec_err(&[0xb1, 0x00]), Error::ReservedToken(0xb1)));
    }

    fn dec_err(bytes: &[u8]) -> Error {
        Atom::decode(&mut Cursor::new(bytes)).unwrap_err()
    }
}
