// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retransmission-request message payload (RETX_REQ).

use super::constants::RETX_REQ_LEN;

/// Payload of a RETX_REQ: a contiguous byte range of `header.prodindex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetxReqMsg {
    /// First missing byte offset.
    pub startpos: u32,
    /// Number of missing bytes from `startpos`.
    pub length: u16,
}

impl RetxReqMsg {
    /// Encode into the 6-byte wire form, big-endian.
    pub fn encode(&self) -> [u8; RETX_REQ_LEN] {
        let mut buf = [0u8; RETX_REQ_LEN];
        buf[0..4].copy_from_slice(&self.startpos.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode from a payload that must be exactly 6 bytes.
    pub fn decode(buf: &[u8]) -> Option<RetxReqMsg> {
        if buf.len() != RETX_REQ_LEN {
            return None;
        }
        Some(RetxReqMsg {
            startpos: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retx_req_roundtrip() {
        let req = RetxReqMsg {
            startpos: 1448,
            length: 1448,
        };
        assert_eq!(RetxReqMsg::decode(&req.encode()), Some(req));
    }

    #[test]
    fn test_retx_req_rejects_wrong_length() {
        let req = RetxReqMsg {
            startpos: 0,
            length: 1,
        };
        let wire = req.encode();
        assert_eq!(RetxReqMsg::decode(&wire[..5]), None);
        let mut long = wire.to_vec();
        long.push(0);
        assert_eq!(RetxReqMsg::decode(&long), None);
    }
}
