// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FMTP wire codec: fixed header, control-message payloads, and multicast
//! datagram assembly.
//!
//! A multicast datagram is `Header(12 BE) || Payload(payloadlen) || MAC`,
//! where the MAC length is a protocol-wide constant fixed by the configured
//! MAC mode. Unicast TCP messages carry `Header || Payload` with no MAC.

pub mod bop;
pub mod constants;
pub mod header;
pub mod retx;

pub use bop::BopMsg;
pub use constants::{
    BOP_FIXED_LEN, FMTP_HEADER_LEN, MAX_BOP_METADATA, MAX_FMTP_PACKET_LEN, MAX_FMTP_PAYLOAD,
    RECV_BUF_LEN, RETX_REQ_LEN,
};
pub use header::{FmtpHeader, MsgKind};
pub use retx::RetxReqMsg;

use crate::security::Mac;

/// Why an incoming multicast datagram was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramError {
    /// Too short for `header + MAC`, unknown flags word, or total length not
    /// equal to `HEADER_LEN + payloadlen + MAC_LEN`.
    Malformed,
    /// The MAC over `header || payload` did not verify.
    BadMac,
}

/// Assemble one authenticated multicast datagram.
///
/// The MAC is computed over the header bytes (network order) followed by the
/// payload, then appended. `payloadlen` in `hdr` must equal `payload.len()`.
pub fn build_datagram(hdr: &FmtpHeader, payload: &[u8], mac: &Mac) -> Vec<u8> {
    debug_assert_eq!(hdr.payloadlen as usize, payload.len());
    let mut buf = Vec::with_capacity(FMTP_HEADER_LEN + payload.len() + mac.mac_len());
    buf.extend_from_slice(&hdr.encode());
    buf.extend_from_slice(payload);
    let tag = mac.sign(&buf);
    buf.extend_from_slice(&tag);
    buf
}

/// Validate and split one received multicast datagram.
///
/// Acceptance rule: total length must be exactly
/// `HEADER_LEN + payloadlen + MAC_LEN` and the MAC must verify over
/// `header || payload`. Returns the decoded header and the payload slice.
pub fn parse_datagram<'a>(
    buf: &'a [u8],
    mac: &Mac,
) -> core::result::Result<(FmtpHeader, &'a [u8]), DatagramError> {
    let mac_len = mac.mac_len();
    if buf.len() < FMTP_HEADER_LEN + mac_len {
        return Err(DatagramError::Malformed);
    }
    let hdr = FmtpHeader::decode(buf).ok_or(DatagramError::Malformed)?;
    if hdr.payloadlen as usize > MAX_FMTP_PAYLOAD {
        return Err(DatagramError::Malformed);
    }
    let signed_len = FMTP_HEADER_LEN + hdr.payloadlen as usize;
    if buf.len() != signed_len + mac_len {
        return Err(DatagramError::Malformed);
    }
    if !mac.verify(&buf[..signed_len], &buf[signed_len..]) {
        return Err(DatagramError::BadMac);
    }
    Ok((hdr, &buf[FMTP_HEADER_LEN..signed_len]))
}
