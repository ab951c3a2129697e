// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Latency-friendly counters for both roles.
//!
//! All fields use relaxed atomics; consumers only need monotonic snapshots
//! for observability.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the sender's egress, retransmission, and timeout
/// workers.
#[derive(Debug, Default)]
pub struct SenderStats {
    pub products_sent: AtomicU64,
    pub datagrams_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// RETX_REQ / BOP_REQ / EOP_REQ served from the retention table.
    pub retx_served: AtomicU64,
    /// Requests for products already evicted (answered with RETX_REJ).
    pub retx_rejected: AtomicU64,
    /// Products evicted by the timeout thread with receivers still owing.
    pub retx_timeouts: AtomicU64,
    pub receivers_accepted: AtomicU64,
    pub receivers_disconnected: AtomicU64,
}

/// Point-in-time copy of [`SenderStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderSnapshot {
    pub products_sent: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub retx_served: u64,
    pub retx_rejected: u64,
    pub retx_timeouts: u64,
    pub receivers_accepted: u64,
    pub receivers_disconnected: u64,
}

impl SenderStats {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current counters without synchronisation penalties.
    #[inline]
    pub fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            products_sent: self.products_sent.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            retx_served: self.retx_served.load(Ordering::Relaxed),
            retx_rejected: self.retx_rejected.load(Ordering::Relaxed),
            retx_timeouts: self.retx_timeouts.load(Ordering::Relaxed),
            receivers_accepted: self.receivers_accepted.load(Ordering::Relaxed),
            receivers_disconnected: self.receivers_disconnected.load(Ordering::Relaxed),
        }
    }
}

/// Counters updated by the receiver's ingress and retransmission threads.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub datagrams_received: AtomicU64,
    /// Datagrams whose MAC failed verification (dropped silently).
    pub mac_failures: AtomicU64,
    /// Datagrams with a bad header or length (dropped locally).
    pub malformed: AtomicU64,
    /// Messages for already-delivered products.
    pub duplicates: AtomicU64,
    pub products_delivered: AtomicU64,
    pub products_missed: AtomicU64,
    pub retx_requests_sent: AtomicU64,
    pub bop_requests_sent: AtomicU64,
    pub eop_requests_sent: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub datagrams_received: u64,
    pub mac_failures: u64,
    pub malformed: u64,
    pub duplicates: u64,
    pub products_delivered: u64,
    pub products_missed: u64,
    pub retx_requests_sent: u64,
    pub bop_requests_sent: u64,
    pub eop_requests_sent: u64,
}

impl ReceiverStats {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            mac_failures: self.mac_failures.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            products_delivered: self.products_delivered.load(Ordering::Relaxed),
            products_missed: self.products_missed.load(Ordering::Relaxed),
            retx_requests_sent: self.retx_requests_sent.load(Ordering::Relaxed),
            bop_requests_sent: self.bop_requests_sent.load(Ordering::Relaxed),
            eop_requests_sent: self.eop_requests_sent.load(Ordering::Relaxed),
        }
    }
}
