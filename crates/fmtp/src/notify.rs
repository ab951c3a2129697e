// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application notification seams.
//!
//! The sender reports each product done exactly once (all acks arrived, or
//! the retention timeout fired); the receiver hands over completed products
//! and reports the ones the sender refused to retransmit. Implement the
//! traits directly for callback dispatch, or use the crossbeam-channel
//! backed [`SenderEvents`] / [`ReceiverEvents`] to consume events by
//! iteration.

use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::ConnId;

/// Terminal sender-side report for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDone {
    pub prodindex: u32,
    /// True when the unfinished set drained; false when the retention
    /// timeout evicted the entry with receivers still owing an ack.
    pub complete: bool,
    /// Connections that acknowledged full delivery. A receiver that died
    /// mid-product never appears here.
    pub acked: Vec<ConnId>,
}

/// A fully reassembled product handed to the receiving application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDelivery {
    pub prodindex: u32,
    pub metadata: Vec<u8>,
    pub data: Vec<u8>,
}

/// Sender-side application hooks.
pub trait SenderNotifier: Send + Sync {
    /// Veto point for a new subscriber after its key handshake. Returning
    /// false closes the connection before it becomes active.
    fn accept_receiver(&self, _peer: SocketAddr) -> bool {
        true
    }

    /// Invoked exactly once per product, whichever of {last ack, timeout
    /// eviction, receiver teardown} finishes it.
    fn product_done(&self, done: ProductDone);
}

/// Receiver-side application hooks.
pub trait ReceiverNotifier: Send + Sync {
    /// A product arrived byte-complete and was verified against its BOP.
    fn product_arrived(&self, product: ProductDelivery);

    /// The sender no longer holds the product; its gaps are unrecoverable.
    fn product_missed(&self, prodindex: u32);
}

/// Channel-backed [`SenderNotifier`].
pub struct SenderEvents {
    tx: Sender<ProductDone>,
}

impl SenderEvents {
    /// Returns the notifier half (give to `FmtpSender`) and the consuming
    /// half.
    pub fn channel() -> (Arc<SenderEvents>, Receiver<ProductDone>) {
        let (tx, rx) = unbounded();
        (Arc::new(SenderEvents { tx }), rx)
    }
}

impl SenderNotifier for SenderEvents {
    fn product_done(&self, done: ProductDone) {
        // A dropped consumer just means nobody is listening anymore.
        let _ = self.tx.send(done);
    }
}

/// Events emitted by the channel-backed receiver notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    Arrived(ProductDelivery),
    Missed(u32),
}

/// Channel-backed [`ReceiverNotifier`].
pub struct ReceiverEvents {
    tx: Sender<ReceiverEvent>,
}

impl ReceiverEvents {
    pub fn channel() -> (Arc<ReceiverEvents>, Receiver<ReceiverEvent>) {
        let (tx, rx) = unbounded();
        (Arc::new(ReceiverEvents { tx }), rx)
    }
}

impl ReceiverNotifier for ReceiverEvents {
    fn product_arrived(&self, product: ProductDelivery) {
        let _ = self.tx.send(ReceiverEvent::Arrived(product));
    }

    fn product_missed(&self, prodindex: u32) {
        let _ = self.tx.send(ReceiverEvent::Missed(prodindex));
    }
}
