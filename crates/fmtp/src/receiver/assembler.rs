// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-product reassembly state machine.
//!
//! Each product moves Unseen -> HaveBop -> Assembling -> Complete, or to
//! Abandoned when the sender answers RETX_REJ. The assembler is pure state:
//! every handler mutates records under one mutex and returns the [`Action`]s
//! the transport threads must carry out (requests on the unicast stream,
//! deliveries to the application). That keeps the whole recovery engine
//! exercisable without sockets.
//!
//! Policy notes:
//! - Data before the BOP is not buffered; a single BOP_REQ is latched per
//!   product and the dropped ranges are recovered by the gap scan after the
//!   EOP.
//! - Gap requests are aligned down to the canonical payload size and split
//!   only when a gap exceeds the u16 request-length field.
//! - A bounded FIFO of recently completed products absorbs late duplicates
//!   without re-requesting anything.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use super::bytemap::IntervalSet;
use crate::notify::ProductDelivery;
use crate::protocol::{BopMsg, MAX_FMTP_PAYLOAD};
use crate::stats::ReceiverStats;

/// How many completed/abandoned product indices are remembered to squelch
/// late duplicates.
const DONE_CAPACITY: usize = 512;

/// Largest single RETX_REQ length: the u16 field floored to a whole number
/// of canonical payloads.
const MAX_REQ_LEN: u32 = (u16::MAX as u32 / MAX_FMTP_PAYLOAD as u32) * MAX_FMTP_PAYLOAD as u32;

/// Work the transport threads must perform after a handler call, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Ask the sender for a missed BOP.
    SendBopReq(u32),
    /// Ask the sender for a missed EOP.
    SendEopReq(u32),
    /// Ask the sender for a byte range.
    SendRetxReq {
        prodindex: u32,
        startpos: u32,
        length: u16,
    },
    /// Tell the sender this product is fully delivered.
    SendRetxEnd(u32),
    /// Hand the completed product to the application.
    Deliver(ProductDelivery),
    /// Report the product as unrecoverable.
    Missed(u32),
}

#[derive(Debug, Default)]
struct ProductRecord {
    prodsize: u32,
    metadata: Vec<u8>,
    buf: Vec<u8>,
    received: IntervalSet,
    /// Ranges requested but not yet fulfilled.
    pending: IntervalSet,
    bop_seen: bool,
    eop_seen: bool,
    bop_requested: bool,
    eop_requested: bool,
}

#[derive(Debug, Default)]
struct Inner {
    products: HashMap<u32, ProductRecord>,
    done_fifo: VecDeque<u32>,
    done_set: HashSet<u32>,
}

/// Shared reassembly engine; the multicast ingress thread and the unicast
/// reader thread serialize through its mutex.
pub struct Assembler {
    inner: Mutex<Inner>,
    stats: Arc<ReceiverStats>,
}

impl Assembler {
    pub fn new(stats: Arc<ReceiverStats>) -> Assembler {
        Assembler {
            inner: Mutex::new(Inner::default()),
            stats,
        }
    }

    /// BOP or RETX_BOP for `prodindex`.
    pub fn handle_bop(&self, prodindex: u32, bop: BopMsg) -> Vec<Action> {
        let mut inner = self.inner.lock();
        if inner.done_set.contains(&prodindex) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        let record = inner.products.entry(prodindex).or_default();
        if record.bop_seen {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        record.bop_seen = true;
        record.prodsize = bop.prodsize;
        record.metadata = bop.metadata;
        record.buf = vec![0u8; bop.prodsize as usize];
        let eop_seen = record.eop_seen;
        log::debug!(
            "[INGRESS] product {} BOP: {} bytes, {} metadata byte(s)",
            prodindex,
            record.prodsize,
            record.metadata.len()
        );

        // A fresh BOP implies the sender has moved past older products: any
        // byte-complete record still waiting on its EOP lost it. Ask once.
        let mut actions = Vec::new();
        for (&idx, rec) in inner.products.iter_mut() {
            if idx != prodindex
                && rec.bop_seen
                && !rec.eop_seen
                && !rec.eop_requested
                && rec.received.is_complete(rec.prodsize)
            {
                rec.eop_requested = true;
                actions.push(Action::SendEopReq(idx));
            }
        }

        if eop_seen {
            // The BOP itself was the recovery; scan now that the size is known.
            actions.extend(self.finish_or_request(&mut inner, prodindex));
        }
        actions
    }

    /// MEM_DATA (multicast) or RETX_DATA (unicast) for `prodindex`.
    pub fn handle_data(
        &self,
        prodindex: u32,
        seqnum: u32,
        payload: &[u8],
        retx: bool,
    ) -> Vec<Action> {
        let mut inner = self.inner.lock();
        if inner.done_set.contains(&prodindex) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        let record = inner.products.entry(prodindex).or_default();

        if !record.bop_seen {
            return request_bop(record, prodindex);
        }

        let Some(end) = seqnum.checked_add(payload.len() as u32) else {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        };
        if end > record.prodsize || payload.is_empty() {
            if !payload.is_empty() {
                log::debug!(
                    "[INGRESS] product {} data [{}, {}) past product size {} - dropped",
                    prodindex,
                    seqnum,
                    end,
                    record.prodsize
                );
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            }
            return Vec::new();
        }

        let range = seqnum..end;
        if record.received.covers(&range) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        record.buf[seqnum as usize..end as usize].copy_from_slice(payload);
        record.received.insert(range.clone());
        record.pending.subtract(&range);

        if !record.received.is_complete(record.prodsize) {
            return Vec::new();
        }
        if record.eop_seen || retx {
            // Byte-complete with the end confirmed (or completed through
            // recovery): deliver.
            return self.finish_or_request(&mut inner, prodindex);
        }
        // Byte-complete but the EOP not seen yet: it is normally still in
        // flight right behind the last chunk. A lost EOP is recovered when
        // a newer product's BOP arrives (EOP_REQ) or when the sender's
        // timeout pushes a RETX_EOP.
        Vec::new()
    }

    /// EOP (multicast) or RETX_EOP (unicast) for `prodindex`.
    pub fn handle_eop(&self, prodindex: u32) -> Vec<Action> {
        let mut inner = self.inner.lock();
        if inner.done_set.contains(&prodindex) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        let record = inner.products.entry(prodindex).or_default();
        record.eop_seen = true;
        if !record.bop_seen {
            return request_bop(record, prodindex);
        }
        self.finish_or_request(&mut inner, prodindex)
    }

    /// RETX_REJ: the sender evicted the product; its gaps are permanent.
    pub fn handle_retx_rej(&self, prodindex: u32) -> Vec<Action> {
        let mut inner = self.inner.lock();
        if inner.products.remove(&prodindex).is_none() {
            // Nothing in flight (e.g. a reply that raced completion).
            return Vec::new();
        }
        mark_done(&mut inner, prodindex);
        self.stats.products_missed.fetch_add(1, Ordering::Relaxed);
        log::warn!("[INGRESS] product {} abandoned: sender no longer holds it", prodindex);
        vec![Action::Missed(prodindex)]
    }

    /// Number of products currently being tracked (tests, diagnostics).
    pub fn tracked(&self) -> usize {
        self.inner.lock().products.len()
    }

    /// Deliver when complete, otherwise emit one aligned RETX_REQ per
    /// still-unrequested gap. Caller guarantees `bop_seen`.
    fn finish_or_request(&self, inner: &mut Inner, prodindex: u32) -> Vec<Action> {
        let Some(record) = inner.products.get_mut(&prodindex) else {
            return Vec::new();
        };
        if record.received.is_complete(record.prodsize) {
            let Some(record) = inner.products.remove(&prodindex) else {
                return Vec::new();
            };
            mark_done(inner, prodindex);
            self.stats.products_delivered.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "[INGRESS] product {} complete: {} bytes",
                prodindex,
                record.prodsize
            );
            return vec![
                Action::SendRetxEnd(prodindex),
                Action::Deliver(ProductDelivery {
                    prodindex,
                    metadata: record.metadata,
                    data: record.buf,
                }),
            ];
        }

        let mut actions = Vec::new();
        for gap in record.received.gaps(record.prodsize) {
            for sub in record.pending.missing_within(&gap) {
                // Align down so retransmitted chunks keep canonical offsets.
                let mut pos = sub.start - sub.start % MAX_FMTP_PAYLOAD as u32;
                while pos < sub.end {
                    let len = (sub.end - pos).min(MAX_REQ_LEN);
                    actions.push(Action::SendRetxReq {
                        prodindex,
                        startpos: pos,
                        length: len as u16,
                    });
                    record.pending.insert(pos..pos + len);
                    pos += len;
                }
            }
        }
        log::debug!(
            "[INGRESS] product {} has {} byte(s) outstanding, {} request(s) issued",
            prodindex,
            record.prodsize as u64 - record.received.covered_len(),
            actions.len()
        );
        actions
    }
}

fn request_bop(record: &mut ProductRecord, prodindex: u32) -> Vec<Action> {
    if record.bop_requested {
        return Vec::new();
    }
    record.bop_requested = true;
    log::debug!("[INGRESS] product {} seen without BOP - requesting it", prodindex);
    vec![Action::SendBopReq(prodindex)]
}

fn mark_done(inner: &mut Inner, prodindex: u32) {
    if inner.done_set.insert(prodindex) {
        inner.done_fifo.push_back(prodindex);
        if inner.done_fifo.len() > DONE_CAPACITY {
            if let Some(oldest) = inner.done_fifo.pop_front() {
                inner.done_set.remove(&oldest);
            }
        }
    }
}
