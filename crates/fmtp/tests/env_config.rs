// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Environment-variable boundary tests.
//!
//! All env permutations live in one test function: the process environment
//! is shared and the test harness runs tests concurrently.

use fmtp::security::{mac_mode_from_env, MacMode};
use fmtp::{Error, SenderConfig};

fn with_env<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
    for (key, value) in vars {
        match value {
            Some(v) => std::env::set_var(key, v),
            None => std::env::remove_var(key),
        }
    }
    let result = f();
    for (key, _) in vars {
        std::env::remove_var(key);
    }
    result
}

#[test]
fn test_mac_level_env_permutations() {
    // Unset: authenticated by default.
    with_env(
        &[("FMTP_MAC_LEVEL", None), ("DISABLE_HMAC", None)],
        || assert_eq!(mac_mode_from_env().unwrap(), MacMode::Hmac),
    );

    // Explicit levels.
    with_env(&[("FMTP_MAC_LEVEL", Some("0")), ("DISABLE_HMAC", None)], || {
        assert_eq!(mac_mode_from_env().unwrap(), MacMode::Off)
    });
    with_env(&[("FMTP_MAC_LEVEL", Some("1")), ("DISABLE_HMAC", None)], || {
        assert_eq!(mac_mode_from_env().unwrap(), MacMode::Hmac)
    });
    with_env(&[("FMTP_MAC_LEVEL", Some("2")), ("DISABLE_HMAC", None)], || {
        assert_eq!(mac_mode_from_env().unwrap(), MacMode::Dsa)
    });

    // S6: any other value is a fatal Config error at startup.
    with_env(&[("FMTP_MAC_LEVEL", Some("3")), ("DISABLE_HMAC", None)], || {
        assert!(matches!(mac_mode_from_env(), Err(Error::Config(_))))
    });
    with_env(
        &[("FMTP_MAC_LEVEL", Some("hmac")), ("DISABLE_HMAC", None)],
        || assert!(matches!(mac_mode_from_env(), Err(Error::Config(_)))),
    );

    // DISABLE_HMAC shortcuts level 1 (and the unset default) to off...
    with_env(
        &[("FMTP_MAC_LEVEL", Some("1")), ("DISABLE_HMAC", Some("1"))],
        || assert_eq!(mac_mode_from_env().unwrap(), MacMode::Off),
    );
    with_env(
        &[("FMTP_MAC_LEVEL", None), ("DISABLE_HMAC", Some("yes"))],
        || assert_eq!(mac_mode_from_env().unwrap(), MacMode::Off),
    );
    // ...but does not override level 2, and falsy values do nothing.
    with_env(
        &[("FMTP_MAC_LEVEL", Some("2")), ("DISABLE_HMAC", Some("1"))],
        || assert_eq!(mac_mode_from_env().unwrap(), MacMode::Dsa),
    );
    with_env(
        &[("FMTP_MAC_LEVEL", Some("1")), ("DISABLE_HMAC", Some("0"))],
        || assert_eq!(mac_mode_from_env().unwrap(), MacMode::Hmac),
    );

    // The config constructors surface the same failure.
    with_env(&[("FMTP_MAC_LEVEL", Some("9")), ("DISABLE_HMAC", None)], || {
        let config = SenderConfig::new("239.0.0.1:38800", "0.0.0.0:0").unwrap();
        assert!(matches!(config.mac_from_env(), Err(Error::Config(_))));
    });
}
