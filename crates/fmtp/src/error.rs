// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by FMTP operations.

use std::fmt;

/// Errors returned by FMTP sender and receiver operations.
///
/// Propagation policy: per-receiver I/O errors are recovered locally (the
/// worker tears that connection down); malformed messages are dropped
/// locally; configuration and argument errors surface to the caller; the
/// first unrecoverable worker failure is latched on the sender and re-raised
/// from `send_product`/`start` as [`Error::Broken`].
#[derive(Debug)]
pub enum Error {
    /// Caller violated a precondition (oversized product, oversized metadata).
    InvalidArgument(&'static str),
    /// Invalid environment variable or unusable address. Fatal at construction.
    Config(String),
    /// Socket read/write failed. Fatal for a multicast socket, local to one
    /// worker for a per-receiver unicast socket.
    Io(std::io::Error),
    /// Cryptographic operation failed (key generation, handshake, MAC setup).
    ///
    /// MAC verification failures on ingress are NOT surfaced as errors; they
    /// are dropped silently with a counter increment.
    Crypto(String),
    /// Queue or service disabled; the pending operation was abandoned.
    Shutdown,
    /// A previous worker failure was latched; the sender is unusable.
    Broken(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Crypto(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::Shutdown => write!(f, "Service shut down"),
            Error::Broken(msg) => write!(f, "Sender broken by earlier failure: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for API results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_covers_variants() {
        let cases: Vec<(Error, &str)> = vec![
            (Error::InvalidArgument("metadata too long"), "Invalid argument"),
            (Error::Config("bad FMTP_MAC_LEVEL".into()), "Configuration error"),
            (Error::Shutdown, "Service shut down"),
            (Error::Broken("multicast send failed".into()), "broken"),
        ];
        for (err, needle) in cases {
            assert!(err.to_string().contains(needle), "{}", err);
        }
    }

    #[test]
    fn test_io_source_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
