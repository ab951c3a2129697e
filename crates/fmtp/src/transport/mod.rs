// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket plumbing: multicast UDP for the product stream, unicast TCP for
//! per-receiver retransmission.

pub mod multicast;
pub mod tcp;
pub mod udp;

pub use udp::{McastReceiver, McastSender};
