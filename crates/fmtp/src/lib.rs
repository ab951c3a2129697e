// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # FMTP - File Multicast Transport Protocol
//!
//! A pure Rust implementation of FMTPv3, the reliable one-to-many transport
//! used underneath Unidata's LDM7 for fan-out of meteorological products.
//! Opaque, indexed products are pushed over an IP multicast group; each
//! receiver repairs its losses over a persistent unicast connection to the
//! sender, and every multicast datagram carries a message authentication
//! code keyed over the unicast handshake.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fmtp::{FmtpSender, SenderConfig, SenderEvents, Result};
//!
//! fn main() -> Result<()> {
//!     let config = SenderConfig::new("224.0.0.1:38800", "0.0.0.0:38801")?.mac_from_env()?;
//!     let (events, done) = SenderEvents::channel();
//!     let mut sender = FmtpSender::new(config, events)?;
//!     sender.start()?;
//!
//!     let prodindex = sender.send_product(Arc::from(&b"hello world"[..]), None)?;
//!     println!("product {} on the wire", prodindex);
//!
//!     // Exactly one terminal report per product.
//!     let report = done.recv().expect("sender alive");
//!     println!("product {} done, complete={}", report.prodindex, report.complete);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                            Application                             |
//! |     send_product / set_rate        notifier (done, arrived, missed)|
//! +--------------------------------------------------------------------+
//! |  Sender core                      |  Receiver core                 |
//! |  egress | retention | delay queue |  assembler | bytemap           |
//! |  retx service | timeout eviction  |  ingress | retx requester      |
//! +--------------------------------------------------------------------+
//! |                        Wire codec + MAC                            |
//! |     Header(12 BE) || payload || MAC(0|32|64)   (multicast UDP)     |
//! |     Header(12 BE) || payload                   (unicast TCP)       |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`FmtpSender`] | Multicast egress, retention, retransmission service |
//! | [`FmtpReceiver`] | Ingress, reassembly, gap recovery |
//! | [`SenderConfig`] / [`ReceiverConfig`] | Addresses, rate, timeouts, MAC mode |
//! | [`SenderNotifier`] / [`ReceiverNotifier`] | Application callback seams |
//! | [`MacMode`] | Multicast authentication: off, HMAC-SHA-256, Ed25519 |
//!
//! ## Modules Overview
//!
//! - [`sender`] - sender core (start here for the push side)
//! - [`receiver`] - receiver core
//! - [`protocol`] - wire codec: header, BOP, retransmission requests
//! - [`security`] - MAC modes and handshake key distribution
//! - [`transport`] - multicast UDP and unicast TCP plumbing

/// Sender and receiver configuration, address validation, env boundary.
pub mod config;
/// Crate error taxonomy.
pub mod error;
/// Application notification traits and channel-backed implementations.
pub mod notify;
/// Wire codec: fixed header, control payloads, datagram assembly.
pub mod protocol;
/// Receiver core: assembler, bytemap, ingress, unicast requester.
pub mod receiver;
/// MAC subsystem and handshake key exchange.
pub mod security;
/// Sender core: egress, retention, delay queue, timeout, retx service.
pub mod sender;
/// Per-role counters.
pub mod stats;
/// Multicast UDP and unicast TCP socket plumbing.
pub mod transport;

pub use config::{ReceiverConfig, SenderConfig};
pub use error::{Error, Result};
pub use notify::{
    ProductDelivery, ProductDone, ReceiverEvent, ReceiverEvents, ReceiverNotifier, SenderEvents,
    SenderNotifier,
};
pub use receiver::FmtpReceiver;
pub use security::MacMode;
pub use sender::FmtpSender;
pub use stats::{ReceiverStats, SenderStats};

/// Identifier of one retransmission connection, unique per sender lifetime.
pub type ConnId = u64;
