// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timeout thread: evicts retention entries when their reveal time passes.
//!
//! Pops product indices from the delay queue in reveal-time order. For each
//! due product, every still-unfinished receiver gets a RETX_EOP on its
//! unicast stream (best effort: dead connections are skipped), then the
//! entry is removed - or, when a worker holds it, removal is latched for
//! the releasing guard. The loop exits when the queue is disabled.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::delay_queue::DelayQueue;
use super::retention::RetentionTable;
use super::service::{is_dead_peer, ConnectionRegistry};
use super::BrokenLatch;
use crate::error::Error;
use crate::protocol::{FmtpHeader, MsgKind};
use crate::stats::SenderStats;

pub fn timeout_loop(
    queue: Arc<DelayQueue>,
    table: Arc<RetentionTable>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<SenderStats>,
    broken: Arc<BrokenLatch>,
) {
    log::debug!("[TIMEOUT] thread up");
    loop {
        let prodindex = match queue.pop() {
            Ok(prodindex) => prodindex,
            Err(_) => break, // disabled
        };

        let owing = table.unfinished_of(prodindex);
        if !owing.is_empty() {
            log::debug!(
                "[TIMEOUT] product {} due with {} receiver(s) still owing",
                prodindex,
                owing.len()
            );
        }

        let eop = FmtpHeader::control(prodindex, MsgKind::RetxEop);
        let sent = table.notify_unacked(prodindex, |conn_id| {
            let Some(conn) = registry.get(conn_id) else {
                // Already torn down; its worker handles the bookkeeping.
                return Ok(());
            };
            match conn.send_frame(&eop, &[]) {
                Ok(()) => Ok(()),
                Err(e) if is_dead_peer(&e) => {
                    log::debug!("[TIMEOUT] conn {} dead, skipping RETX_EOP: {}", conn_id, e);
                    Ok(())
                }
                Err(e) => Err(Error::Io(e)),
            }
        });
        if let Err(e) = sent {
            // Unicast failures other than a dead peer are fatal to the sender.
            broken.latch(format!("timeout RETX_EOP send failed: {}", e));
            break;
        }

        let existed = table.attempt_remove(prodindex);
        if existed && !owing.is_empty() {
            stats.retx_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }
    log::debug!("[TIMEOUT] thread down");
}
