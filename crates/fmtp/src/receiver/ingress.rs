// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast ingress loop.
//!
//! Reads datagrams, verifies the MAC, peeks the header, and dispatches by
//! message kind. A MAC failure is dropped silently (counter only - the
//! socket stays open); malformed datagrams likewise. A socket error is
//! fatal to the receiver role.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::assembler::Assembler;
use super::requester::Requester;
use crate::notify::ReceiverNotifier;
use crate::protocol::{parse_datagram, BopMsg, DatagramError, MsgKind, RECV_BUF_LEN};
use crate::security::Mac;
use crate::stats::ReceiverStats;
use crate::transport::McastReceiver;

pub fn ingress_loop(
    socket: McastReceiver,
    mac: Arc<Mac>,
    assembler: Arc<Assembler>,
    requester: Arc<Requester>,
    notifier: Arc<dyn ReceiverNotifier>,
    stats: Arc<ReceiverStats>,
    stop: Arc<AtomicBool>,
) {
    log::debug!("[INGRESS] multicast listener up");
    let mut buf = [0u8; RECV_BUF_LEN];
    while !stop.load(Ordering::Relaxed) {
        let len = match socket.recv(&mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => continue, // poll timeout, recheck stop flag
            Err(e) => {
                log::error!("[INGRESS] multicast socket failed: {}", e);
                break;
            }
        };
        stats.datagrams_received.fetch_add(1, Ordering::Relaxed);

        let (hdr, payload) = match parse_datagram(&buf[..len], &mac) {
            Ok(parsed) => parsed,
            Err(DatagramError::BadMac) => {
                stats.mac_failures.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(DatagramError::Malformed) => {
                stats.malformed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let actions = match hdr.kind {
            MsgKind::Bop => match BopMsg::decode(payload) {
                Some(bop) => assembler.handle_bop(hdr.prodindex, bop),
                None => {
                    stats.malformed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            },
            MsgKind::MemData => assembler.handle_data(hdr.prodindex, hdr.seqnum, payload, false),
            MsgKind::Eop => assembler.handle_eop(hdr.prodindex),
            other => {
                log::debug!("[INGRESS] unexpected {:?} on multicast - dropped", other);
                continue;
            }
        };

        if let Err(e) = requester.execute(actions, &notifier) {
            // The recovery channel is gone; gaps can no longer be repaired.
            log::error!("[INGRESS] unicast send failed: {}", e);
            break;
        }
    }
    log::debug!("[INGRESS] multicast listener down");
}
