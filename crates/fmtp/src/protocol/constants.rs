// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire-level constants shared by every FMTP message.

/// Fixed FMTP header length: prodindex(4) + seqnum(4) + payloadlen(2) + flags(2).
pub const FMTP_HEADER_LEN: usize = 12;

/// Largest `header || payload` unit we put in one multicast datagram:
/// 1500 (Ethernet MTU) - 20 (IPv4) - 8 (UDP) - 12 = 1460 total, so the
/// payload budget is 1448. The MAC suffix rides on top; paths that cannot
/// carry it fragment at the IP layer.
pub const MAX_FMTP_PACKET_LEN: usize = 1460;

/// Canonical payload size of a full MEM_DATA / RETX_DATA chunk. Every data
/// `seqnum` is a multiple of this except possibly the final chunk.
pub const MAX_FMTP_PAYLOAD: usize = MAX_FMTP_PACKET_LEN - FMTP_HEADER_LEN;

/// Fixed prefix of a BOP payload:
/// start_sec_high(4) + start_sec_low(4) + start_nsec(4) + prodsize(4) + metasize(2).
pub const BOP_FIXED_LEN: usize = 18;

/// Largest application metadata blob a BOP can carry.
pub const MAX_BOP_METADATA: usize = MAX_FMTP_PAYLOAD - BOP_FIXED_LEN;

/// RETX_REQ payload length: startpos(4) + length(2).
pub const RETX_REQ_LEN: usize = 6;

/// Receive buffer size: largest datagram plus the largest MAC suffix.
pub const RECV_BUF_LEN: usize = MAX_FMTP_PACKET_LEN + 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_budget() {
        assert_eq!(FMTP_HEADER_LEN + MAX_FMTP_PAYLOAD, MAX_FMTP_PACKET_LEN);
        assert_eq!(MAX_FMTP_PAYLOAD, 1448);
        assert_eq!(MAX_BOP_METADATA, 1430);
    }
}
