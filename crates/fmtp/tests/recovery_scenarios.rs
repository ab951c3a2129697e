// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gap-recovery scenarios driven end-to-end through the wire codec and the
//! assembler, with loss injected by dropping datagrams in flight.
//!
//! The sender side is the real egress chunker ([`emit_product`]); the
//! receiver side is the real assembler; retransmissions are synthesized
//! from the product bytes exactly as the retransmission worker would
//! (aligned RETX_DATA chunks). No sockets, so every run is deterministic.

use std::sync::Arc;

use fmtp::notify::ProductDelivery;
use fmtp::protocol::{
    build_datagram, parse_datagram, BopMsg, DatagramError, FmtpHeader, MsgKind, MAX_FMTP_PAYLOAD,
};
use fmtp::receiver::{Action, Assembler};
use fmtp::security::{Mac, MacMode};
use fmtp::sender::egress::emit_product;
use fmtp::sender::ProductData;
use fmtp::stats::ReceiverStats;

/// Deterministic payload of `size` bytes.
fn make_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn make_product(prodindex: u32, bytes: &[u8], metadata: &[u8]) -> ProductData {
    ProductData {
        prodindex,
        prodsize: bytes.len() as u32,
        metadata: metadata.to_vec(),
        start_sec: 1_700_000_000,
        start_nsec: 123_456_789,
        bytes: Arc::from(bytes.to_vec()),
    }
}

/// All datagrams of a product, in wire order.
fn datagrams_of(product: &ProductData, mac: &Mac) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    emit_product(product, mac, |d| {
        out.push(d.to_vec());
        Ok(())
    })
    .unwrap();
    out
}

/// Feed one multicast datagram through MAC verification into the assembler,
/// the way the ingress loop does.
fn ingest(
    assembler: &Assembler,
    stats: &ReceiverStats,
    mac: &Mac,
    datagram: &[u8],
) -> Vec<Action> {
    use std::sync::atomic::Ordering;
    let (hdr, payload) = match parse_datagram(datagram, mac) {
        Ok(parsed) => parsed,
        Err(DatagramError::BadMac) => {
            stats.mac_failures.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        Err(DatagramError::Malformed) => {
            stats.malformed.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
    };
    match hdr.kind {
        MsgKind::Bop => assembler.handle_bop(hdr.prodindex, BopMsg::decode(payload).unwrap()),
        MsgKind::MemData => assembler.handle_data(hdr.prodindex, hdr.seqnum, payload, false),
        MsgKind::Eop => assembler.handle_eop(hdr.prodindex),
        other => panic!("unexpected {:?} on multicast", other),
    }
}

/// Serve a RETX_REQ from the product bytes exactly as the retransmission
/// worker does: aligned chunks, truncated at product end, then replay them
/// into the assembler as RETX_DATA.
fn serve_retx_req(
    assembler: &Assembler,
    product: &ProductData,
    startpos: u32,
    length: u16,
) -> Vec<Action> {
    let prodsize = u64::from(product.prodsize);
    let req_end = (u64::from(startpos) + u64::from(length)).min(prodsize);
    let payload = MAX_FMTP_PAYLOAD as u64;
    let mut offset = u64::from(startpos) - (u64::from(startpos) % payload);
    let mut actions = Vec::new();
    while offset < req_end {
        let chunk_end = (offset + payload).min(prodsize);
        actions.extend(assembler.handle_data(
            product.prodindex,
            offset as u32,
            &product.bytes[offset as usize..chunk_end as usize],
            true,
        ));
        offset = chunk_end;
    }
    actions
}

fn deliveries(actions: &[Action]) -> Vec<ProductDelivery> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Deliver(d) => Some(d.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_s1_empty_metadata_product() {
    let mac = Mac::generate(MacMode::Hmac).unwrap();
    let verifier = Mac::from_key(MacMode::Hmac, mac.get_key()).unwrap();
    let stats = Arc::new(ReceiverStats::new());
    let assembler = Assembler::new(Arc::clone(&stats));

    let product = make_product(0, b"hello world", b"");
    let mut delivered = Vec::new();
    for datagram in datagrams_of(&product, &mac) {
        delivered.extend(deliveries(&ingest(&assembler, &stats, &verifier, &datagram)));
    }

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].prodindex, 0);
    assert_eq!(delivered[0].metadata.len(), 0);
    assert_eq!(delivered[0].data, b"hello world");
}

#[test]
fn test_product_fidelity_under_no_loss() {
    let mac = Mac::generate(MacMode::Dsa).unwrap();
    let verifier = Mac::from_key(MacMode::Dsa, mac.get_key()).unwrap();
    let stats = Arc::new(ReceiverStats::new());
    let assembler = Assembler::new(Arc::clone(&stats));

    let bytes = make_payload(10_000);
    let product = make_product(1, &bytes, b"NEXRAD3 KTLX 20260801");
    let mut delivered = Vec::new();
    for datagram in datagrams_of(&product, &mac) {
        delivered.extend(deliveries(&ingest(&assembler, &stats, &verifier, &datagram)));
    }

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].data, bytes);
    assert_eq!(delivered[0].metadata, b"NEXRAD3 KTLX 20260801");
    assert_eq!(stats.snapshot().mac_failures, 0);
}

#[test]
fn test_s2_single_packet_loss_recovers() {
    // 3000-byte product, MTU-sized chunks: drop the second MEM_DATA.
    let mac = Mac::generate(MacMode::Hmac).unwrap();
    let verifier = Mac::from_key(MacMode::Hmac, mac.get_key()).unwrap();
    let stats = Arc::new(ReceiverStats::new());
    let assembler = Assembler::new(Arc::clone(&stats));

    let bytes = make_payload(3000);
    let product = make_product(2, &bytes, b"m");
    let datagrams = datagrams_of(&product, &mac);
    assert_eq!(datagrams.len(), 5); // BOP, 3 chunks, EOP

    let mut actions = Vec::new();
    for (i, datagram) in datagrams.iter().enumerate() {
        if i == 2 {
            continue; // second MEM_DATA lost
        }
        actions.extend(ingest(&assembler, &stats, &verifier, datagram));
    }

    // Exactly one request, for exactly the missing chunk.
    let chunk = MAX_FMTP_PAYLOAD as u32;
    assert_eq!(
        actions,
        vec![Action::SendRetxReq {
            prodindex: 2,
            startpos: chunk,
            length: chunk as u16,
        }]
    );

    let actions = serve_retx_req(&assembler, &product, chunk, chunk as u16);
    let delivered = deliveries(&actions);
    assert!(actions.contains(&Action::SendRetxEnd(2)));
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].data, bytes);
}

#[test]
fn test_s3_missing_bop_recovers_via_bop_req() {
    let mac = Mac::generate(MacMode::Hmac).unwrap();
    let verifier = Mac::from_key(MacMode::Hmac, mac.get_key()).unwrap();
    let stats = Arc::new(ReceiverStats::new());
    let assembler = Assembler::new(Arc::clone(&stats));

    let bytes = make_payload(2000);
    let product = make_product(3, &bytes, b"hdr-meta");
    let datagrams = datagrams_of(&product, &mac);

    // Drop the BOP; the first data datagram must trigger one BOP_REQ.
    let mut actions = Vec::new();
    for datagram in &datagrams[1..] {
        actions.extend(ingest(&assembler, &stats, &verifier, datagram));
    }
    assert_eq!(
        actions
            .iter()
            .filter(|a| matches!(a, Action::SendBopReq(3)))
            .count(),
        1
    );

    // Sender answers with RETX_BOP; the gap scan then requests everything
    // (pre-BOP data is not buffered) and the repair completes the product.
    let actions = assembler.handle_bop(3, product.bop());
    let mut repaired = Vec::new();
    for action in actions {
        match action {
            Action::SendRetxReq {
                startpos, length, ..
            } => repaired.extend(serve_retx_req(&assembler, &product, startpos, length)),
            other => panic!("unexpected action {:?}", other),
        }
    }
    let delivered = deliveries(&repaired);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].data, bytes);
    assert_eq!(delivered[0].metadata, b"hdr-meta");
}

#[test]
fn test_s5_mac_tamper_dropped_then_recovered() {
    let mac = Mac::generate(MacMode::Hmac).unwrap();
    let verifier = Mac::from_key(MacMode::Hmac, mac.get_key()).unwrap();
    let stats = Arc::new(ReceiverStats::new());
    let assembler = Assembler::new(Arc::clone(&stats));

    let bytes = make_payload(3000);
    let product = make_product(4, &bytes, b"");
    let mut datagrams = datagrams_of(&product, &mac);

    // Flip one payload bit in the second MEM_DATA.
    datagrams[2][20] ^= 0x01;

    let mut actions = Vec::new();
    for datagram in &datagrams {
        actions.extend(ingest(&assembler, &stats, &verifier, datagram));
    }

    // Tampered datagram dropped silently, counted, socket-level flow
    // untouched; the EOP then requests exactly the hole it left.
    assert_eq!(stats.snapshot().mac_failures, 1);
    let chunk = MAX_FMTP_PAYLOAD as u32;
    assert_eq!(
        actions,
        vec![Action::SendRetxReq {
            prodindex: 4,
            startpos: chunk,
            length: chunk as u16,
        }]
    );

    let actions = serve_retx_req(&assembler, &product, chunk, chunk as u16);
    assert_eq!(deliveries(&actions)[0].data, bytes);
}

#[test]
fn test_arbitrary_loss_pattern_exact_coverage() {
    // Property 4: for any dropped MEM_DATA subset with the EOP delivered,
    // the requests exactly cover the missing ranges and the repaired bytes
    // match the sender's.
    for seed in 0..10u64 {
        fastrand::seed(seed);
        let size = 1448 * 8 + fastrand::usize(0..1448);
        let bytes = make_payload(size);
        let mac = Mac::generate(MacMode::Off).unwrap();
        let product = make_product(100 + seed as u32, &bytes, b"x");
        let datagrams = datagrams_of(&product, &mac);
        let n_chunks = datagrams.len() - 2;

        let stats = Arc::new(ReceiverStats::new());
        let assembler = Assembler::new(Arc::clone(&stats));

        let mut dropped_bytes = 0u64;
        let mut actions = Vec::new();
        for (i, datagram) in datagrams.iter().enumerate() {
            let is_chunk = i >= 1 && i <= n_chunks;
            if is_chunk && fastrand::bool() {
                let (hdr, payload) = parse_datagram(datagram, &mac).unwrap();
                assert_eq!(hdr.kind, MsgKind::MemData);
                dropped_bytes += payload.len() as u64;
                continue;
            }
            actions.extend(ingest(&assembler, &stats, &mac, datagram));
        }

        // Requested ranges (clamped to the product) must total the dropped
        // bytes exactly: no under- or over-requesting.
        let mut requested = 0u64;
        let mut repairs = Vec::new();
        for action in &actions {
            if let Action::SendRetxReq {
                startpos, length, ..
            } = action
            {
                let end = (u64::from(*startpos) + u64::from(*length)).min(size as u64);
                requested += end - u64::from(*startpos);
                repairs.push((*startpos, *length));
            }
        }
        assert_eq!(requested, dropped_bytes, "seed {}", seed);

        let mut delivered = Vec::new();
        for (startpos, length) in repairs {
            delivered.extend(deliveries(&serve_retx_req(
                &assembler, &product, startpos, length,
            )));
        }
        if dropped_bytes == 0 {
            // Nothing lost: delivery already happened on the EOP.
            let eop_deliveries = deliveries(&actions);
            assert_eq!(eop_deliveries[0].data, bytes, "seed {}", seed);
        } else {
            assert_eq!(delivered.len(), 1, "seed {}", seed);
            assert_eq!(delivered[0].data, bytes, "seed {}", seed);
        }
    }
}

#[test]
fn test_rejected_recovery_reports_missed() {
    let mac = Mac::generate(MacMode::Off).unwrap();
    let stats = Arc::new(ReceiverStats::new());
    let assembler = Assembler::new(Arc::clone(&stats));

    let bytes = make_payload(3000);
    let product = make_product(9, &bytes, b"");
    let datagrams = datagrams_of(&product, &mac);

    // Lose a chunk, get the EOP, then the sender refuses the repair.
    let mut actions = Vec::new();
    for (i, datagram) in datagrams.iter().enumerate() {
        if i == 1 {
            continue;
        }
        actions.extend(ingest(&assembler, &stats, &mac, datagram));
    }
    assert!(matches!(actions[0], Action::SendRetxReq { .. }));

    let actions = assembler.handle_retx_rej(9);
    assert_eq!(actions, vec![Action::Missed(9)]);
    assert_eq!(stats.snapshot().products_missed, 1);
}

#[test]
fn test_header_seqnum_is_byte_offset() {
    // The wire-visible seqnums of a product's chunks are byte offsets in
    // canonical-payload multiples, never packet counts.
    let mac = Mac::generate(MacMode::Off).unwrap();
    let product = make_product(5, &make_payload(6000), b"");
    let datagrams = datagrams_of(&product, &mac);

    let mut expected = 0u32;
    for datagram in &datagrams[1..datagrams.len() - 1] {
        let (hdr, payload) = parse_datagram(datagram, &mac).unwrap();
        assert_eq!(hdr.seqnum, expected);
        assert_eq!(hdr.seqnum as usize % MAX_FMTP_PAYLOAD, 0);
        expected += payload.len() as u32;
    }
    assert_eq!(expected, 6000);
}

#[test]
fn test_tampered_datagram_all_positions() {
    // Property 2 at datagram granularity: flipping any single region bit
    // (header, payload, MAC) must fail verification.
    let mac = Mac::generate(MacMode::Hmac).unwrap();
    let verifier = Mac::from_key(MacMode::Hmac, mac.get_key()).unwrap();
    let hdr = FmtpHeader {
        prodindex: 77,
        seqnum: 0,
        payloadlen: 32,
        kind: MsgKind::MemData,
    };
    let wire = build_datagram(&hdr, &make_payload(32), &mac);

    for pos in [0, 5, 11, 12, 30, wire.len() - 32, wire.len() - 1] {
        let mut tampered = wire.clone();
        tampered[pos] ^= 0x40;
        assert!(
            parse_datagram(&tampered, &verifier).is_err(),
            "bit flip at {} must not verify",
            pos
        );
    }
    assert!(parse_datagram(&wire, &verifier).is_ok());
}
