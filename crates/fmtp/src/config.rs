// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sender and receiver configuration.
//!
//! Addresses are parsed and validated at construction time; an unusable
//! address is a fatal [`Error::Config`]. The only environment lookups in
//! the crate are [`crate::security::mac_mode_from_env`] (reached through
//! [`SenderConfig::mac_from_env`] / [`ReceiverConfig::mac_from_env`]) and
//! the `FMTP_MULTICAST_IF` interface override in the transport layer.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::security::{mac_mode_from_env, MacMode};

/// Default multicast TTL: stay on the local network unless told otherwise.
pub const DEFAULT_TTL: u32 = 1;

/// Default multiple applied to a product's measured transmission time to
/// derive its retention timeout.
pub const DEFAULT_RETX_TIMEOUT_RATIO: f64 = 50.0;

/// Floor for the per-product retention timeout; tiny products would
/// otherwise time out before a receiver can even request a repair.
pub const DEFAULT_MIN_RETX_TIMEOUT: Duration = Duration::from_secs(2);

fn parse_addr(s: &str, what: &str) -> Result<SocketAddr> {
    s.parse()
        .map_err(|_| Error::Config(format!("unparseable {} address '{}'", what, s)))
}

fn require_multicast_v4(addr: SocketAddr) -> Result<()> {
    match addr.ip() {
        IpAddr::V4(v4) if v4.is_multicast() => Ok(()),
        other => Err(Error::Config(format!(
            "'{}' is not an IPv4 multicast group",
            other
        ))),
    }
}

/// Configuration for [`crate::FmtpSender`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Multicast group and port products are pushed to.
    pub group: SocketAddr,
    /// TCP address the retransmission service listens on.
    pub listen: SocketAddr,
    /// Outbound multicast interface; `None` = first discovered.
    pub interface: Option<Ipv4Addr>,
    /// Multicast TTL.
    pub ttl: u32,
    /// Sustained egress rate in bits/second; 0 = unshaped.
    pub rate_bps: u64,
    /// Retention timeout = this ratio x the product's measured multicast
    /// transmission time, floored at `min_retx_timeout`.
    pub retx_timeout_ratio: f64,
    pub min_retx_timeout: Duration,
    /// Multicast MAC mode; both ends must agree.
    pub mac_mode: MacMode,
}

impl SenderConfig {
    /// Build a configuration with defaults, validating both addresses.
    pub fn new(group: &str, listen: &str) -> Result<SenderConfig> {
        let group = parse_addr(group, "multicast group")?;
        require_multicast_v4(group)?;
        let listen = parse_addr(listen, "retransmission listen")?;
        Ok(SenderConfig {
            group,
            listen,
            interface: None,
            ttl: DEFAULT_TTL,
            rate_bps: 0,
            retx_timeout_ratio: DEFAULT_RETX_TIMEOUT_RATIO,
            min_retx_timeout: DEFAULT_MIN_RETX_TIMEOUT,
            mac_mode: MacMode::Hmac,
        })
    }

    /// Replace the MAC mode with the one selected by the process
    /// environment (`FMTP_MAC_LEVEL` / `DISABLE_HMAC`).
    pub fn mac_from_env(mut self) -> Result<SenderConfig> {
        self.mac_mode = mac_mode_from_env()?;
        Ok(self)
    }

    /// Final consistency check, run by the sender constructor.
    pub fn validate(&self) -> Result<()> {
        require_multicast_v4(self.group)?;
        if !(self.retx_timeout_ratio > 0.0 && self.retx_timeout_ratio.is_finite()) {
            return Err(Error::Config(format!(
                "retx_timeout_ratio must be a positive finite number, got {}",
                self.retx_timeout_ratio
            )));
        }
        Ok(())
    }
}

/// Configuration for [`crate::FmtpReceiver`].
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Multicast group and port to listen on.
    pub group: SocketAddr,
    /// TCP address of the sender's retransmission service.
    pub sender: SocketAddr,
    /// Multicast interface to join on; `None` = all discovered.
    pub interface: Option<Ipv4Addr>,
    /// Multicast MAC mode; must match the sender.
    pub mac_mode: MacMode,
}

impl ReceiverConfig {
    pub fn new(group: &str, sender: &str) -> Result<ReceiverConfig> {
        let group = parse_addr(group, "multicast group")?;
        require_multicast_v4(group)?;
        let sender = parse_addr(sender, "sender retransmission")?;
        Ok(ReceiverConfig {
            group,
            sender,
            interface: None,
            mac_mode: MacMode::Hmac,
        })
    }

    /// Replace the MAC mode with the one selected by the process
    /// environment.
    pub fn mac_from_env(mut self) -> Result<ReceiverConfig> {
        self.mac_mode = mac_mode_from_env()?;
        Ok(self)
    }
}
