// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

use log::{debug, trace};
use std::{io::Cursor, thread, time::Instant};

use super::Drive;
use crate::{
    error::{Error, Result, STATUS_SUCCESS},
    framing::{self, BLOCK_SIZE},
    misc::HexDump,
    stream::{self, Atom, Datum, MethodCall},
    transport::Transport,
    uid,
};

impl<T: Transport> Drive<T> {
    /// Invokes `method` on `object` and hands back the result list.
    ///
    /// Session manager replies come in as a full method call carrying its
    /// own status; everything else is a bare result list followed by the
    /// status footer.
    pub(crate) fn invoke(
        &mut self,
        object: u64,
        method: u64,
        params: Vec<Datum>,
    ) -> Result<Vec<Datum>> {
        let mut payload = Vec::new();
        Datum::Method(MethodCall::new(object, method, params)).encode(&mut payload)?;

        self.send_payload(&payload, object == uid::SESSION_MGR)?;
        let reply = self.recv_payload()?;

        let mut r = Cursor::new(reply.as_slice());
        let (status, results) = match Datum::decode(&mut r)? {
            Datum::Method(m) => (m.status, m.params),
            Datum::List(items) => (stream::decode_status_footer(&mut r)?, items),
            _ => return Err(Error::MalformedReply),
        };
        if status != STATUS_SUCCESS {
            return Err(Error::method(status));
        }
        Ok(results)
    }

    /// Wraps a payload and hands it to the transport.
    ///
    /// Method calls to the session manager ride outside any session; every
    /// other target needs one open.
    fn send_payload(&mut self, payload: &[u8], session_mgr: bool) -> Result<()> {
        let session = if session_mgr {
            (0, 0)
        } else if self.host_session_id == 0 {
            return Err(Error::NoSession);
        } else {
            (self.tper_session_id, self.host_session_id)
        };

        let block = framing::wrap(payload, self.com_id, session, self.max_com_pkt_size)?;
        trace!("opal tx: {}", HexDump(&block));
        let blocks = (block.len() / BLOCK_SIZE) as u8;
        self.transport
            .if_send(1, self.com_id, &block, blocks)
            .map_err(|e| self.fail(e))
    }

    /// Polls the transport until the drive queues a response.
    fn recv_payload(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.recv_timeout;
        loop {
            let mut block = [0u8; BLOCK_SIZE];
            self.transport
                .if_recv(1, self.com_id, &mut block, 1)
                .map_err(|e| self.fail(e))?;

            match framing::unwrap(&block, self.com_id)? {
                Some(payload) => {
                    trace!("opal rx: {}", HexDump(payload));
                    return Ok(payload.to_vec());
                }
                None if Instant::now() >= deadline => return Err(self.fail(Error::Timeout)),
                None => thread::sleep(self.poll_interval),
            }
        }
    }

    /// Forgets the session on failures after which the drive state is
    /// unknown; method and decode failures pass through untouched.
    fn fail(&mut self, e: Error) -> Error {
        if e.loses_session() {
            self.tper_session_id = 0;
            self.host_session_id = 0;
        }
        e
    }

    /// `SessionMgr.StartSession[]`, anonymous or authenticated.
    pub(crate) fn start_session(&mut self, sp_uid: u64, auth: Option<(u64, &[u8])>) -> Result<()> {
        // end any session in progress first
        self.end_session();

        let mut params = vec![
            Datum::uint(u64::from(std::process::id())), // proposed host session id
            Datum::uid(sp_uid),
            Datum::uint(1), // read/write session
        ];
        if let Some((auth_uid, pin)) = auth {
            params.push(Datum::named(Atom::uint(0), Datum::bytes(pin)?)); // host challenge
            params.push(Datum::named(Atom::uint(3), Datum::uid(auth_uid))); // host signing authority
        }

        let results = self.invoke(uid::SESSION_MGR, uid::START_SESSION, params)?;
        let host = results
            .first()
            .ok_or(Error::MalformedReply)?
            .as_atom()?
            .as_uint()?;
        let tper = results
            .get(1)
            .ok_or(Error::MalformedReply)?
            .as_atom()?
            .as_uint()?;
        self.host_session_id = host as u32;
        self.tper_session_id = tper as u32;

        debug!(
            "session {:x}:{:x} started",
            self.tper_session_id, self.host_session_id
        );
        Ok(())
    }

    /// Sends the end-of-session token and forgets the ids.
    ///
    /// Timeouts are expected here: a preceding `Revert` legitimately tears
    /// the session down before this exchange completes.
    pub(crate) fn end_session(&mut self) {
        if self.host_session_id == 0 {
            return;
        }
        debug!(
            "stopping session {:x}:{:x}",
            self.tper_session_id, self.host_session_id
        );

        let mut payload = Vec::new();
        if Datum::EndSession.encode(&mut payload).is_ok()
            && self.send_payload(&payload, false).is_ok()
        {
            if let Err(e) = self.recv_payload() {
                debug!("end of session went unacknowledged: {e}");
            }
        }
        self.tper_session_id = 0;
        self.host_session_id = 0;
    }
}
