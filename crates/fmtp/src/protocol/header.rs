// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The fixed 12-byte header preceding every FMTP message.
//!
//! All fields travel big-endian. `flags` is a one-hot message kind; a word
//! with zero or more than one bit set is rejected at decode time so a
//! corrupted kind can never be dispatched.

use super::constants::FMTP_HEADER_LEN;

/// One-hot message kinds carried in `FmtpHeader::flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgKind {
    /// Begin-of-product control message (multicast).
    Bop = 0x0001,
    /// End-of-product control message (multicast).
    Eop = 0x0002,
    /// Multicast payload segment, `seqnum` = byte offset.
    MemData = 0x0004,
    /// Receiver asks for a byte range (unicast).
    RetxReq = 0x0008,
    /// Sender no longer holds the product (unicast).
    RetxRej = 0x0010,
    /// Receiver signals complete delivery of a product (unicast).
    RetxEnd = 0x0020,
    /// Retransmitted payload segment (unicast).
    RetxData = 0x0040,
    /// Receiver asks for a missed BOP (unicast).
    BopReq = 0x0080,
    /// Retransmitted BOP (unicast).
    RetxBop = 0x0100,
    /// Receiver asks for a missed EOP (unicast).
    EopReq = 0x0200,
    /// Retransmitted / timeout-driven EOP (unicast).
    RetxEop = 0x0400,
}

impl MsgKind {
    /// Decode a flags word. Exactly one known bit must be set.
    pub fn from_flags(flags: u16) -> Option<MsgKind> {
        match flags {
            0x0001 => Some(MsgKind::Bop),
            0x0002 => Some(MsgKind::Eop),
            0x0004 => Some(MsgKind::MemData),
            0x0008 => Some(MsgKind::RetxReq),
            0x0010 => Some(MsgKind::RetxRej),
            0x0020 => Some(MsgKind::RetxEnd),
            0x0040 => Some(MsgKind::RetxData),
            0x0080 => Some(MsgKind::BopReq),
            0x0100 => Some(MsgKind::RetxBop),
            0x0200 => Some(MsgKind::EopReq),
            0x0400 => Some(MsgKind::RetxEop),
            _ => None,
        }
    }

    /// The wire bit for this kind.
    #[inline]
    pub fn flags(self) -> u16 {
        self as u16
    }
}

/// Fixed prefix of every multicast datagram and unicast control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmtpHeader {
    /// Product this message belongs to.
    pub prodindex: u32,
    /// Byte offset within the product's data stream (never a packet count).
    pub seqnum: u32,
    /// Bytes of payload that follow the header (excludes any MAC suffix).
    pub payloadlen: u16,
    /// Message kind.
    pub kind: MsgKind,
}

impl FmtpHeader {
    /// Build a header for a control message with no payload.
    pub fn control(prodindex: u32, kind: MsgKind) -> Self {
        Self {
            prodindex,
            seqnum: 0,
            payloadlen: 0,
            kind,
        }
    }

    /// Encode into the fixed 12-byte wire form, big-endian.
    pub fn encode(&self) -> [u8; FMTP_HEADER_LEN] {
        let mut buf = [0u8; FMTP_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.prodindex.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seqnum.to_be_bytes());
        buf[8..10].copy_from_slice(&self.payloadlen.to_be_bytes());
        buf[10..12].copy_from_slice(&self.kind.flags().to_be_bytes());
        buf
    }

    /// Decode from the first 12 bytes of `buf`.
    ///
    /// Returns `None` for a short buffer or a flags word that is not a
    /// single known bit; callers drop such messages locally.
    pub fn decode(buf: &[u8]) -> Option<FmtpHeader> {
        if buf.len() < FMTP_HEADER_LEN {
            return None;
        }
        let prodindex = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let seqnum = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let payloadlen = u16::from_be_bytes([buf[8], buf[9]]);
        let flags = u16::from_be_bytes([buf[10], buf[11]]);
        let kind = MsgKind::from_flags(flags)?;
        Some(FmtpHeader {
            prodindex,
            seqnum,
            payloadlen,
            kind,
        })
    }
}
