// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast egress: a product becomes BOP, MEM_DATA chunks, EOP.
//!
//! Chunking is pure and takes a send callback, so the framing logic is
//! exercised without sockets. Ordering holds by construction: the BOP is
//! emitted before any data chunk, the EOP after all of them, and everything
//! runs on the calling thread.

use crate::error::Result;
use crate::protocol::{build_datagram, FmtpHeader, MsgKind, MAX_FMTP_PAYLOAD};
use crate::security::Mac;
use crate::sender::retention::ProductData;

/// Serialize `data` into authenticated datagrams, handing each one to
/// `send` in wire order. A zero-size product is just BOP then EOP.
pub fn emit_product<F>(data: &ProductData, mac: &Mac, mut send: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let bop = data.bop().encode();
    let bop_hdr = FmtpHeader {
        prodindex: data.prodindex,
        seqnum: 0,
        payloadlen: bop.len() as u16,
        kind: MsgKind::Bop,
    };
    send(&build_datagram(&bop_hdr, &bop, mac))?;

    let bytes = &data.bytes;
    let mut offset = 0usize;
    while offset < bytes.len() {
        let end = (offset + MAX_FMTP_PAYLOAD).min(bytes.len());
        let hdr = FmtpHeader {
            prodindex: data.prodindex,
            seqnum: offset as u32,
            payloadlen: (end - offset) as u16,
            kind: MsgKind::MemData,
        };
        send(&build_datagram(&hdr, &bytes[offset..end], mac))?;
        offset = end;
    }

    let eop_hdr = FmtpHeader::control(data.prodindex, MsgKind::Eop);
    send(&build_datagram(&eop_hdr, &[], mac))?;

    log::debug!(
        "[EGRESS] product {} sent: {} bytes in {} chunk(s)",
        data.prodindex,
        bytes.len(),
        bytes.len().div_ceil(MAX_FMTP_PAYLOAD)
    );
    Ok(())
}
