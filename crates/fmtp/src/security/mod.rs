// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message authentication for the multicast channel and key distribution
//! for the unicast handshake.
//!
//! Every multicast datagram carries a MAC over `header || payload`; the MAC
//! length is fixed process-wide by the selected mode. The sender generates
//! the keying material and hands it to each receiver over the unicast
//! handshake, wrapped to the receiver's ephemeral public key
//! (see [`key_exchange`]).
//!
//! Mode selection from the environment happens in exactly one place,
//! [`mac_mode_from_env`], called at the configuration boundary only.

pub mod key_exchange;
pub mod mac;

pub use key_exchange::{wrap_key, KeyExchange};
pub use mac::{Mac, MacMode};

use crate::error::{Error, Result};

/// Read the MAC mode from the process environment.
///
/// `FMTP_MAC_LEVEL` ∈ {unset, "0", "1", "2"} selects off/hmac/dsa; unset
/// defaults to hmac. Any other value is a fatal configuration error.
/// A truthy `DISABLE_HMAC` shortcuts level 1 to off (it does not override
/// level 0 or 2).
pub fn mac_mode_from_env() -> Result<MacMode> {
    let disabled = std::env::var("DISABLE_HMAC")
        .map(|v| truthy(&v))
        .unwrap_or(false);

    let mode = match std::env::var("FMTP_MAC_LEVEL") {
        Err(std::env::VarError::NotPresent) => MacMode::Hmac,
        Err(std::env::VarError::NotUnicode(_)) => {
            return Err(Error::Config("FMTP_MAC_LEVEL is not unicode".to_string()));
        }
        Ok(v) => match v.as_str() {
            "0" => MacMode::Off,
            "1" => MacMode::Hmac,
            "2" => MacMode::Dsa,
            other => {
                return Err(Error::Config(format!(
                    "FMTP_MAC_LEVEL='{}' (expected unset, 0, 1 or 2)",
                    other
                )));
            }
        },
    };

    if mode == MacMode::Hmac && disabled {
        log::info!("[MAC] DISABLE_HMAC set - multicast authentication off");
        return Ok(MacMode::Off);
    }
    Ok(mode)
}

fn truthy(v: &str) -> bool {
    !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
}
