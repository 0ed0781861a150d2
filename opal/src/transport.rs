// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

//! IF-SEND / IF-RECV transport to the drive TPM.

mod sgio;

pub use sgio::SgDevice;

use crate::Result;

/// Low level block interface to a drive TPM.
///
/// Both primitives are synchronous and exchange buffers that are exact
/// multiples of 512 bytes with the given security protocol and ComID.
pub trait Transport {
    /// IF-SEND: hand `data` to the drive TPM.
    fn if_send(&mut self, protocol: u8, com_id: u16, data: &[u8], block_count: u8) -> Result<()>;

    /// IF-RECV: fill `data` from the drive TPM.
    fn if_recv(&mut self, protocol: u8, com_id: u16, data: &mut [u8], block_count: u8)
        -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use super::Transport;
    use crate::{
        framing,
        stream::{Datum, MethodCall},
        uid, Result,
    };

    /// Queue backed stand-in for the SG_IO transport.
    ///
    /// Records every IF-SEND and replays canned IF-RECV blocks in order; an
    /// exhausted queue yields all-zero blocks, which the session layer reads
    /// as "no response pending yet".
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub sent: Vec<(u8, u16, Vec<u8>)>,
        pub responses: VecDeque<Vec<u8>>,
        pub recvs: usize,
    }

    pub(crate) const MOCK_COM_ID: u16 = 0x07fe;

    impl MockTransport {
        pub fn respond(&mut self, block: Vec<u8>) {
            self.responses.push_back(block);
        }
    }

    impl Transport for MockTransport {
        fn if_send(
            &mut self,
            protocol: u8,
            com_id: u16,
            data: &[u8],
            _block_count: u8,
        ) -> Result<()> {
            self.sent.push((protocol, com_id, data.to_vec()));
            Ok(())
        }

        fn if_recv(
            &mut self,
            _protocol: u8,
            _com_id: u16,
            data: &mut [u8],
            _block_count: u8,
        ) -> Result<()> {
            self.recvs += 1;
            data.fill(0);
            if let Some(block) = self.responses.pop_front() {
                let n = block.len().min(data.len());
                data[..n].copy_from_slice(&block[..n]);
            }
            Ok(())
        }
    }

    /// Frames raw payload bytes the way a drive response comes in.
    pub(crate) fn reply_raw(payload: &[u8]) -> Vec<u8> {
        framing::wrap(payload, MOCK_COM_ID, (0, 0), usize::MAX).unwrap()
    }

    /// Frames a result datum, appending the status footer of a method reply.
    pub(crate) fn reply(datum: &Datum, status: u64) -> Vec<u8> {
        let mut payload = Vec::new();
        datum.encode(&mut payload).unwrap();
        if !matches!(datum, Datum::Method(_)) {
            payload.extend_from_slice(&[0xf9, 0xf0, status as u8, 0x00, 0x00, 0xf1]);
        }
        reply_raw(&payload)
    }

    /// The `SyncSession` reply closing a `StartSession` handshake.
    pub(crate) fn sync_session_reply(host: u64, tper: u64) -> Vec<u8> {
        let call = MethodCall {
            object: uid::SESSION_MGR,
            method: uid::SYNC_SESSION,
            params: vec![Datum::uint(host), Datum::uint(tper)],
            status: 0,
        };
        reply(&Datum::Method(call), 0)
    }
}
