// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MAC modes for multicast datagrams.
//!
//! Three interchangeable modes selected at process start:
//!
//! | mode | MAC length | key exchanged           |
//! |------|-----------:|-------------------------|
//! | off  | 0          | empty                   |
//! | hmac | 32         | 64-byte random secret   |
//! | dsa  | 64         | Ed25519 public key (32) |
//!
//! The MAC covers the 12 header bytes in network order followed by the
//! payload. A sender constructs via [`Mac::generate`] (fresh keying
//! material) and publishes [`Mac::get_key`]; each receiver constructs via
//! [`Mac::from_key`] with the key it received over the handshake.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Length of the HMAC shared secret on the wire.
pub const HMAC_KEY_LEN: usize = 64;

/// Length of an Ed25519 public key on the wire.
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// MAC mode for the multicast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacMode {
    /// No authentication; zero-length MAC, verification accepts only an
    /// empty tag.
    Off,
    /// HMAC-SHA-256 under a shared 64-byte random secret.
    Hmac,
    /// Ed25519 signature; receivers hold only the public key.
    Dsa,
}

impl MacMode {
    /// MAC suffix length for this mode.
    pub fn mac_len(self) -> usize {
        match self {
            MacMode::Off => 0,
            MacMode::Hmac => 32,
            MacMode::Dsa => 64,
        }
    }

    /// Wire tag used in the key-wrap blob.
    pub(crate) fn wire_tag(self) -> u8 {
        match self {
            MacMode::Off => 0,
            MacMode::Hmac => 1,
            MacMode::Dsa => 2,
        }
    }

    pub(crate) fn from_wire_tag(tag: u8) -> Option<MacMode> {
        match tag {
            0 => Some(MacMode::Off),
            1 => Some(MacMode::Hmac),
            2 => Some(MacMode::Dsa),
            _ => None,
        }
    }
}

enum MacImpl {
    Off,
    /// Symmetric: both construction paths can sign and verify.
    Hmac { key: hmac::Key, secret: Vec<u8> },
    /// Sender side: holds the keypair, publishes the public key.
    DsaSigner {
        keypair: Ed25519KeyPair,
        public: Vec<u8>,
    },
    /// Receiver side: verify only.
    DsaVerifier { public: Vec<u8> },
}

/// MAC signer/verifier for multicast datagrams.
pub struct Mac {
    inner: MacImpl,
}

impl Mac {
    /// Construct with freshly generated keying material (sender side).
    pub fn generate(mode: MacMode) -> Result<Mac> {
        let inner = match mode {
            MacMode::Off => MacImpl::Off,
            MacMode::Hmac => {
                let rng = SystemRandom::new();
                let mut secret = vec![0u8; HMAC_KEY_LEN];
                rng.fill(&mut secret)
                    .map_err(|_| Error::Crypto("HMAC secret generation failed".to_string()))?;
                let key = hmac::Key::new(hmac::HMAC_SHA256, &secret);
                MacImpl::Hmac { key, secret }
            }
            MacMode::Dsa => {
                let rng = SystemRandom::new();
                let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
                    .map_err(|_| Error::Crypto("Ed25519 key generation failed".to_string()))?;
                let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
                    .map_err(|_| Error::Crypto("Ed25519 key parsing failed".to_string()))?;
                let public = keypair.public_key().as_ref().to_vec();
                MacImpl::DsaSigner { keypair, public }
            }
        };
        Ok(Mac { inner })
    }

    /// Construct from a published key (receiver side).
    ///
    /// The key length must match the mode: empty for off, 64 bytes for hmac,
    /// 32 bytes (the public key) for dsa.
    pub fn from_key(mode: MacMode, key: &[u8]) -> Result<Mac> {
        let inner = match mode {
            MacMode::Off => {
                if !key.is_empty() {
                    return Err(Error::Crypto("MAC mode off expects an empty key".to_string()));
                }
                MacImpl::Off
            }
            MacMode::Hmac => {
                if key.len() != HMAC_KEY_LEN {
                    return Err(Error::Crypto(format!(
                        "HMAC secret must be {} bytes, got {}",
                        HMAC_KEY_LEN,
                        key.len()
                    )));
                }
                MacImpl::Hmac {
                    key: hmac::Key::new(hmac::HMAC_SHA256, key),
                    secret: key.to_vec(),
                }
            }
            MacMode::Dsa => {
                if key.len() != ED25519_PUBLIC_KEY_LEN {
                    return Err(Error::Crypto(format!(
                        "Ed25519 public key must be {} bytes, got {}",
                        ED25519_PUBLIC_KEY_LEN,
                        key.len()
                    )));
                }
                MacImpl::DsaVerifier {
                    public: key.to_vec(),
                }
            }
        };
        Ok(Mac { inner })
    }

    /// The mode this instance was built with.
    pub fn mode(&self) -> MacMode {
        match self.inner {
            MacImpl::Off => MacMode::Off,
            MacImpl::Hmac { .. } => MacMode::Hmac,
            MacImpl::DsaSigner { .. } | MacImpl::DsaVerifier { .. } => MacMode::Dsa,
        }
    }

    /// MAC suffix length appended to every multicast datagram.
    pub fn mac_len(&self) -> usize {
        self.mode().mac_len()
    }

    /// The key to publish to receivers: empty (off), the shared secret
    /// (hmac), or the public key (dsa).
    pub fn get_key(&self) -> &[u8] {
        match &self.inner {
            MacImpl::Off => &[],
            MacImpl::Hmac { secret, .. } => secret,
            MacImpl::DsaSigner { public, .. } | MacImpl::DsaVerifier { public } => public,
        }
    }

    /// Compute the MAC over `msg` (`header || payload`).
    ///
    /// Only the generating side can sign in dsa mode; a key-constructed dsa
    /// instance has no private key and produces an empty tag (which never
    /// verifies).
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        match &self.inner {
            MacImpl::Off => Vec::new(),
            MacImpl::Hmac { key, .. } => hmac::sign(key, msg).as_ref().to_vec(),
            MacImpl::DsaSigner { keypair, .. } => keypair.sign(msg).as_ref().to_vec(),
            MacImpl::DsaVerifier { .. } => {
                debug_assert!(false, "verify-only dsa Mac asked to sign");
                log::warn!("[MAC] verify-only dsa instance asked to sign; producing empty tag");
                Vec::new()
            }
        }
    }

    /// Verify `tag` over `msg`. A tag of the wrong length never verifies;
    /// in off mode only the empty tag verifies.
    pub fn verify(&self, msg: &[u8], tag: &[u8]) -> bool {
        if tag.len() != self.mac_len() {
            return false;
        }
        match &self.inner {
            MacImpl::Off => true,
            MacImpl::Hmac { key, .. } => hmac::verify(key, msg, tag).is_ok(),
            MacImpl::DsaSigner { public, .. } | MacImpl::DsaVerifier { public } => {
                signature::UnparsedPublicKey::new(&signature::ED25519, public)
                    .verify(msg, tag)
                    .is_ok()
            }
        }
    }
}

impl Drop for Mac {
    fn drop(&mut self) {
        if let MacImpl::Hmac { secret, .. } = &mut self.inner {
            secret.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_off_mode_semantics() {
        let mac = Mac::generate(MacMode::Off).unwrap();
        assert_eq!(mac.mac_len(), 0);
        assert!(mac.get_key().is_empty());
        assert!(mac.sign(b"msg").is_empty());
        assert!(mac.verify(b"msg", b""));
        assert!(!mac.verify(b"msg", b"x"));
    }

    #[test]
    fn test_hmac_sign_verify() {
        let signer = Mac::generate(MacMode::Hmac).unwrap();
        assert_eq!(signer.get_key().len(), HMAC_KEY_LEN);
        let verifier = Mac::from_key(MacMode::Hmac, signer.get_key()).unwrap();

        let tag = signer.sign(b"header-and-payload");
        assert_eq!(tag.len(), 32);
        assert!(verifier.verify(b"header-and-payload", &tag));
        assert!(!verifier.verify(b"header-and-paylomd", &tag));

        let mut flipped = tag.clone();
        flipped[0] ^= 0x01;
        assert!(!verifier.verify(b"header-and-payload", &flipped));
    }

    #[test]
    fn test_dsa_sign_verify() {
        let signer = Mac::generate(MacMode::Dsa).unwrap();
        assert_eq!(signer.get_key().len(), ED25519_PUBLIC_KEY_LEN);
        let verifier = Mac::from_key(MacMode::Dsa, signer.get_key()).unwrap();

        let tag = signer.sign(b"datagram bytes");
        assert_eq!(tag.len(), 64);
        assert!(verifier.verify(b"datagram bytes", &tag));
        assert!(!verifier.verify(b"datagram bytez", &tag));

        let mut flipped = tag.clone();
        flipped[63] ^= 0x80;
        assert!(!verifier.verify(b"datagram bytes", &flipped));
    }

    #[test]
    fn test_wrong_length_tag_rejected() {
        let signer = Mac::generate(MacMode::Hmac).unwrap();
        let tag = signer.sign(b"m");
        assert!(!signer.verify(b"m", &tag[..31]));
        assert!(!signer.verify(b"m", b""));
    }

    #[test]
    fn test_from_key_validates_length() {
        assert!(Mac::from_key(MacMode::Hmac, &[0u8; 63]).is_err());
        assert!(Mac::from_key(MacMode::Dsa, &[0u8; 33]).is_err());
        assert!(Mac::from_key(MacMode::Off, b"x").is_err());
        assert!(Mac::from_key(MacMode::Off, b"").is_ok());
    }

    #[test]
    fn test_two_generated_secrets_differ() {
        let a = Mac::generate(MacMode::Hmac).unwrap();
        let b = Mac::generate(MacMode::Hmac).unwrap();
        assert_ne!(a.get_key(), b.get_key());
    }
}
