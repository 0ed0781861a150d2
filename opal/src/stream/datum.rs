// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

use byteorder::WriteBytesExt;
use std::io::{Read, Write};

use crate::{
    error::STATUS_SUCCESS,
    stream::{self, Atom},
    Error, Result,
};

/// An aggregate value of the TCG data stream.
///
/// The structure is strictly tree shaped, nesting is bounded only by input
/// size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    /// A single primitive value.
    Atom(Atom),
    /// Key/value pair. The key is always an atom.
    Named {
        /// Key of the pair.
        name: Atom,
        /// Value of the pair, itself any datum.
        value: Box<Datum>,
    },
    /// Ordered sequence of datums, possibly empty.
    List(Vec<Datum>),
    /// Method invocation, including its status footer.
    Method(MethodCall),
    /// End-of-session control sentinel.
    EndSession,
}

/// A method call on a Security Provider object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    /// UID of the invoked object.
    pub object: u64,
    /// UID of the invoked method.
    pub method: u64,
    /// Positional and named parameters.
    pub params: Vec<Datum>,
    /// Status code; meaningful on replies only, zero on calls.
    pub status: u64,
}

impl Datum {
    /// Builds an unsigned integer datum.
    pub fn uint(value: u64) -> Self {
        Self::Atom(Atom::uint(value))
    }

    /// Builds a binary datum.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AtomTooLarge`] when `data` does not fit the
    /// largest encoding class.
    pub fn bytes<D: Into<Vec<u8>>>(data: D) -> Result<Self> {
        Ok(Self::Atom(Atom::bytes(data)?))
    }

    /// Builds a UID datum.
    pub fn uid(value: u64) -> Self {
        Self::Atom(Atom::uid(value))
    }

    /// Builds a named pair.
    pub fn named(name: Atom, value: Datum) -> Self {
        Self::Named {
            name,
            value: Box::new(value),
        }
    }

    /// Returns the wrapped atom.
    pub fn as_atom(&self) -> Result<&Atom> {
        match self {
            Self::Atom(a) => Ok(a),
            _ => Err(Error::MalformedReply),
        }
    }

    /// Returns the list elements.
    pub fn as_list(&self) -> Result<&[Datum]> {
        match self {
            Self::List(items) => Ok(items),
            _ => Err(Error::MalformedReply),
        }
    }

    /// Returns key and value of a named pair.
    pub fn as_named(&self) -> Result<(&Atom, &Datum)> {
        match self {
            Self::Named { name, value } => Ok((name, value)),
            _ => Err(Error::MalformedReply),
        }
    }

    /// Encodes the datum onto the stream.
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        match self {
            Self::Atom(a) => a.encode(w)?,
            Self::Named { name, value } => {
                w.write_u8(stream::TOK_START_NAME)?;
                name.encode(w)?;
                value.encode(w)?;
                w.write_u8(stream::TOK_END_NAME)?;
            }
            Self::List(items) => {
                w.write_u8(stream::TOK_START_LIST)?;
                for item in items {
                    item.encode(w)?;
                }
                w.write_u8(stream::TOK_END_LIST)?;
            }
            Self::Method(call) => call.encode(w)?,
            Self::EndSession => w.write_u8(stream::TOK_END_SESSION)?,
        }
        Ok(())
    }

    /// Decodes one datum from the stream.
    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let tok = stream::read_byte(r)?;
        Self::decode_with(tok, r)
    }

    fn decode_with<R: Read>(tok: u8, r: &mut R) -> Result<Self> {
        match tok {
            stream::TOK_START_LIST => Ok(Self::List(Self::decode_list(r)?)),
            stream::TOK_START_NAME => {
                let key_tok = stream::read_byte(r)?;
                let name = Atom::decode_with(key_tok, r)?;
                let value = Self::decode(r)?;
                stream::expect_token(r, stream::TOK_END_NAME)?;
                Ok(Self::named(name, value))
            }
            stream::TOK_CALL => Ok(Self::Method(MethodCall::decode_body(r)?)),
            stream::TOK_END_SESSION => Ok(Self::EndSession),
            stream::TOK_END_LIST
            | stream::TOK_END_NAME
            | stream::TOK_END_OF_DATA
            | stream::TOK_START_TRANS
            | stream::TOK_END_TRANS => Err(Error::UnexpectedToken(tok)),
            _ => Ok(Self::Atom(Atom::decode_with(tok, r)?)),
        }
    }

    /// Decodes list elements up to the closing token.
    fn decode_list<R: Read>(r: &mut R) -> Result<Vec<Self>> {
        let mut items = Vec::new();
        loop {
            let tok = stream::read_byte(r)?;
            if tok == stream::TOK_END_LIST {
                return Ok(items);
            }
            items.push(Self::decode_with(tok, r)?);
        }
    }
}

impl MethodCall {
    /// Builds a call on `method` of `object`.
    pub fn new(object: u64, method: u64, params: Vec<Datum>) -> Self {
        Self {
            object,
            method,
            params,
            status: STATUS_SUCCESS,
        }
    }

    fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(stream::TOK_CALL)?;
        Atom::uid(self.object).encode(w)?;
        Atom::uid(self.method).encode(w)?;
        w.write_u8(stream::TOK_START_LIST)?;
        for param in &self.params {
            param.encode(w)?;
        }
        w.write_u8(stream::TOK_END_LIST)?;
        // the "execute, reserved, reserved" footer closes every call
        w.write_u8(stream::TOK_END_OF_DATA)?;
        w.write_u8(stream::TOK_START_LIST)?;
        Atom::uint(self.status).encode(w)?;
        Atom::uint(0).encode(w)?;
        Atom::uint(0).encode(w)?;
        w.write_u8(stream::TOK_END_LIST)?;
        Ok(())
    }

    fn decode_body<R: Read>(r: &mut R) -> Result<Self> {
        let object = Atom::decode(r)?.as_uid()?;
        let method = Atom::decode(r)?.as_uid()?;
        stream::expect_token(r, stream::TOK_START_LIST)?;
        let params = Datum::decode_list(r)?;
        let status = decode_status_footer(r)?;
        Ok(Self {
            object,
            method,
            params,
            status,
        })
    }
}

/// Parses the `EndOfData · List{status, 0, 0} · EndList` suffix of a method
/// exchange and hands back the status code.
pub(crate) fn decode_status_footer<R: Read>(r: &mut R) -> Result<u64> {
    stream::expect_token(r, stream::TOK_END_OF_DATA)?;
    stream::expect_token(r, stream::TOK_START_LIST)?;
    let status = Atom::decode(r)?.as_uint()?;
    Atom::decode(r)?.as_uint()?;
    Atom::decode(r)?.as_uint()?;
    stream::expect_token(r, stream::TOK_END_LIST)?;
    Ok(status)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::uid;
    use std::io::Cursor;

    fn enc(d: &Datum) -> Vec<u8> {
        let mut buf = Vec::new();
        d.encode(&mut buf).unwrap();
        buf
    }

    fn dec(bytes: &[u8]) -> Datum {
        Datum::decode(&mut Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn named_pair() {
        let d = Datum::named(Atom::uint(3), Datum::uid(uid::LOCKING_SP));
        let bytes = enc(&d);
        assert_eq!(bytes.len(), 12);
        assert_eq!(
            bytes,
            [0xf2, 0x03, 0xa8, 0x00, 0x00, 0x02, 0x05, 0x00, 0x00, 0x00, 0x02, 0xf3]
        );
        assert_eq!(dec(&bytes), d);
    }

    #[test]
    fn lists() {
        assert_eq!(enc(&Datum::List(Vec::new())), [0xf0, 0xf1]);
        let d = Datum::List(vec![
            Datum::uint(1),
            Datum::List(vec![Datum::named(
                Atom::uint(7),
                Datum::bytes(vec![0xaa]).unwrap(),
            )]),
        ]);
        assert_eq!(dec(&enc(&d)), d);
    }

    #[test]
    fn method_call_wire_shape() {
        let call = MethodCall::new(uid::SESSION_MGR, uid::START_SESSION, vec![Datum::uint(1)]);
        let bytes = enc(&Datum::Method(call));
        let mut want = vec![0xf8];
        want.extend([0xa8, 0, 0, 0, 0, 0, 0, 0, 0xff]); // session manager
        want.extend([0xa8, 0, 0, 0, 0, 0, 0, 0xff, 0x02]); // StartSession
        want.extend([0xf0, 0x01, 0xf1]); // parameters
        want.extend([0xf9, 0xf0, 0x00, 0x00, 0x00, 0xf1]); // status footer
        assert_eq!(bytes, want);
    }

    #[test]
    fn method_status_preserved() {
        let mut call = MethodCall::new(uid::ADMIN_SP, uid::GET, Vec::new());
        call.status = 0x12;
        let d = Datum::Method(call);
        match dec(&enc(&d)) {
            Datum::Method(m) => assert_eq!(m.status, 0x12),
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn method_roundtrip() {
        let d = Datum::Method(MethodCall::new(
            uid::LOCKING_SP,
            uid::SET,
            vec![Datum::named(
                Atom::uint(1),
                Datum::List(vec![Datum::named(Atom::uint(7), Datum::uint(0))]),
            )],
        ));
        assert_eq!(dec(&enc(&d)), d);
    }

    #[test]
    fn end_session_token() {
        assert_eq!(enc(&Datum::EndSession), [0xfa]);
        assert_eq!(dec(&[0xfa]), Datum::EndSession);
    }

    #[test]
    fn status_footer() {
        let mut r = Cursor::new([0xf9, 0xf0, 0x1f, 0x00, 0x00, 0xf1]);
        assert_eq!(decode_status_footer(&mut r).unwrap(), 0x1f);
    }

    #[test]
    fn decode_failures() {
        let err = |bytes: &[u8]| Datum::decode(&mut Cursor::new(bytes)).unwrap_err();
        // stray sequence closers and transaction tokens
        assert!(matches!(err(&[0xf1]), Error::UnexpectedToken(0xf1)));
        assert!(matches!(err(&[0xf3]), Error::UnexpectedToken(0xf3)));
        assert!(matches!(err(&[0xfb]), Error::UnexpectedToken(0xfb)));
        // named pair must close after exactly one value
        assert!(matches!(
            err(&[0xf2, 0x03, 0x01, 0x02, 0xf3]),
            Error::UnexpectedToken(0x02)
        ));
        // named key must be an atom
        assert!(matches!(
            err(&[0xf2, 0xf0, 0xf1, 0x01, 0xf3]),
            Error::UnexpectedToken(0xf0)
        ));
        // unterminated list
        assert!(matches!(err(&[0xf0, 0x01]), Error::UnexpectedEof));
        // method without a footer
        let mut bytes = Vec::new();
        Datum::Method(MethodCall::new(1, 2, Vec::new()))
            .encode(&mut bytes)
            .unwrap();
        bytes.truncate(bytes.len() - 6);
        assert!(matches!(err(&bytes), Error::UnexpectedEof));
    }
}
