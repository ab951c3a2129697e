// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MAC-key distribution for the unicast handshake.
//!
//! The receiver opens the handshake with an ephemeral ECDH P-256 public key.
//! The sender derives a one-shot wrap key (ECDH agreement, then HKDF-SHA-256)
//! and returns the published MAC key sealed with AES-256-GCM, alongside its
//! own ephemeral public key. Each connection gets fresh ephemeral keys, so a
//! recorded handshake cannot be unwrapped later.
//!
//! Wrap blob layout:
//! `mode(1) || sender_pub_len(2 BE) || sender_pub || nonce(12) || ciphertext+tag`.

use ring::aead::{Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM};
use ring::agreement::{agree_ephemeral, EphemeralPrivateKey, UnparsedPublicKey, ECDH_P256};
use ring::error::Unspecified;
use ring::hkdf::{Salt, HKDF_SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use super::mac::MacMode;
use crate::error::{Error, Result};

/// ECDH P-256 public key length (uncompressed: 0x04 || X || Y).
pub const ECDH_P256_PUBLIC_KEY_LEN: usize = 65;

/// HKDF salt binding derived keys to this protocol.
const WRAP_SALT: &[u8] = b"FMTP-MAC-KEY-WRAP";

/// Fixed prefix of the wrap blob: mode(1) + sender_pub_len(2) + sender_pub(65) + nonce(12).
const WRAP_PREFIX_LEN: usize = 1 + 2 + ECDH_P256_PUBLIC_KEY_LEN + 12;

/// Receiver-side half of the handshake: an ephemeral keypair whose public
/// key opens the exchange and whose private key unwraps the reply.
pub struct KeyExchange {
    private: EphemeralPrivateKey,
    public: Vec<u8>,
}

impl KeyExchange {
    /// Generate a fresh ephemeral keypair.
    pub fn generate() -> Result<KeyExchange> {
        let rng = SystemRandom::new();
        let private = EphemeralPrivateKey::generate(&ECDH_P256, &rng)
            .map_err(|_| Error::Crypto("ECDH P-256 key generation failed".to_string()))?;
        let public = private
            .compute_public_key()
            .map_err(|_| Error::Crypto("ECDH P-256 public key computation failed".to_string()))?
            .as_ref()
            .to_vec();
        Ok(KeyExchange { private, public })
    }

    /// The public key to send in the handshake (65 bytes, uncompressed).
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Unwrap the sender's reply. Consumes the ephemeral private key (the
    /// agreement is one-shot by construction).
    ///
    /// The blob's mode tag must match the receiver's configured mode;
    /// a mismatch means the two ends disagree on `FMTP_MAC_LEVEL` and the
    /// unwrapped bytes would be meaningless.
    pub fn unwrap_key(self, blob: &[u8], expect_mode: MacMode) -> Result<Vec<u8>> {
        if blob.len() < WRAP_PREFIX_LEN {
            return Err(Error::Crypto("key-wrap blob truncated".to_string()));
        }
        let mode = MacMode::from_wire_tag(blob[0])
            .ok_or_else(|| Error::Crypto(format!("unknown MAC mode tag {}", blob[0])))?;
        if mode != expect_mode {
            return Err(Error::Crypto(format!(
                "sender MAC mode {:?} does not match receiver mode {:?}",
                mode, expect_mode
            )));
        }
        let pub_len = u16::from_be_bytes([blob[1], blob[2]]) as usize;
        if pub_len != ECDH_P256_PUBLIC_KEY_LEN {
            return Err(Error::Crypto(format!(
                "unexpected sender public key length {}",
                pub_len
            )));
        }
        let sender_pub = &blob[3..3 + pub_len];
        let nonce_off = 3 + pub_len;
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&blob[nonce_off..nonce_off + 12]);
        let ciphertext = &blob[nonce_off + 12..];

        let mut wrap_key = derive_wrap_key(self.private, sender_pub, mode)?;
        let plaintext = open(&wrap_key, &nonce, &[mode.wire_tag()], ciphertext);
        wrap_key.zeroize();
        plaintext
    }
}

/// Sender-side half: wrap `key` to the receiver's ephemeral public key.
pub fn wrap_key(receiver_pub: &[u8], mode: MacMode, key: &[u8]) -> Result<Vec<u8>> {
    validate_public_key(receiver_pub)?;

    let rng = SystemRandom::new();
    let private = EphemeralPrivateKey::generate(&ECDH_P256, &rng)
        .map_err(|_| Error::Crypto("ECDH P-256 key generation failed".to_string()))?;
    let sender_pub = private
        .compute_public_key()
        .map_err(|_| Error::Crypto("ECDH P-256 public key computation failed".to_string()))?
        .as_ref()
        .to_vec();

    let mut wrap_key = derive_wrap_key(private, receiver_pub, mode)?;

    let mut nonce = [0u8; 12];
    rng.fill(&mut nonce)
        .map_err(|_| Error::Crypto("nonce generation failed".to_string()))?;

    let ciphertext = seal(&wrap_key, &nonce, &[mode.wire_tag()], key);
    wrap_key.zeroize();
    let ciphertext = ciphertext?;

    let mut blob = Vec::with_capacity(WRAP_PREFIX_LEN + ciphertext.len());
    blob.push(mode.wire_tag());
    blob.extend_from_slice(&(sender_pub.len() as u16).to_be_bytes());
    blob.extend_from_slice(&sender_pub);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Check an uncompressed P-256 public key as received off the wire.
pub fn validate_public_key(raw: &[u8]) -> Result<()> {
    if raw.len() != ECDH_P256_PUBLIC_KEY_LEN {
        return Err(Error::Crypto(format!(
            "P-256 public key must be {} bytes, got {}",
            ECDH_P256_PUBLIC_KEY_LEN,
            raw.len()
        )));
    }
    if raw[0] != 0x04 {
        return Err(Error::Crypto(
            "P-256 public key must be an uncompressed point (0x04 prefix)".to_string(),
        ));
    }
    Ok(())
}

/// ECDH agreement then HKDF-SHA-256 down to a 32-byte AES key. The mode tag
/// is the HKDF info so off/hmac/dsa wrap keys never collide.
fn derive_wrap_key(
    private: EphemeralPrivateKey,
    peer_public: &[u8],
    mode: MacMode,
) -> Result<[u8; 32]> {
    let peer = UnparsedPublicKey::new(&ECDH_P256, peer_public);
    let mut shared = agree_ephemeral(private, &peer, |secret| secret.to_vec())
        .map_err(|_| Error::Crypto("ECDH P-256 agreement failed".to_string()))?;

    let salt = Salt::new(HKDF_SHA256, WRAP_SALT);
    let prk = salt.extract(&shared);
    let info = [mode.wire_tag()];
    let mut wrap_key = [0u8; 32];
    let fill = prk
        .expand(&[&info], HKDF_SHA256)
        .map_err(|_| Error::Crypto("HKDF expand failed".to_string()))
        .and_then(|okm| {
            okm.fill(&mut wrap_key)
                .map_err(|_| Error::Crypto("HKDF fill failed".to_string()))
        });
    shared.zeroize();
    fill?;
    Ok(wrap_key)
}

fn seal(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| Error::Crypto("AES-256-GCM key setup failed".to_string()))?;
    let mut sealing = SealingKey::new(unbound, OneShotNonce::new(*nonce));
    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(Aad::from(aad), &mut in_out)
        .map_err(|_| Error::Crypto("AES-256-GCM seal failed".to_string()))?;
    Ok(in_out)
}

fn open(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| Error::Crypto("AES-256-GCM key setup failed".to_string()))?;
    let mut opening = OpeningKey::new(unbound, OneShotNonce::new(*nonce));
    let mut in_out = ciphertext.to_vec();
    let plaintext = opening
        .open_in_place(Aad::from(aad), &mut in_out)
        .map_err(|_| Error::Crypto("key unwrap failed (tag mismatch or wrong key)".to_string()))?;
    Ok(plaintext.to_vec())
}

/// One-shot nonce sequence for ring's `BoundKey` API: yields the externally
/// generated nonce once, then refuses.
struct OneShotNonce {
    nonce: Option<[u8; 12]>,
}

impl OneShotNonce {
    fn new(nonce: [u8; 12]) -> Self {
        Self { nonce: Some(nonce) }
    }
}

impl NonceSequence for OneShotNonce {
    fn advance(&mut self) -> core::result::Result<Nonce, Unspecified> {
        let bytes = self.nonce.take().ok_or(Unspecified)?;
        Nonce::try_assume_unique_for_key(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        for mode in [MacMode::Off, MacMode::Hmac, MacMode::Dsa] {
            let exchange = KeyExchange::generate().unwrap();
            let key = vec![0x42u8; mode.mac_len()]; // representative length
            let blob = wrap_key(exchange.public_key(), mode, &key).unwrap();
            let unwrapped = exchange.unwrap_key(&blob, mode).unwrap();
            assert_eq!(unwrapped, key);
        }
    }

    #[test]
    fn test_unwrap_rejects_mode_mismatch() {
        let exchange = KeyExchange::generate().unwrap();
        let blob = wrap_key(exchange.public_key(), MacMode::Hmac, &[7u8; 64]).unwrap();
        assert!(exchange.unwrap_key(&blob, MacMode::Dsa).is_err());
    }

    #[test]
    fn test_unwrap_rejects_tampered_blob() {
        let exchange = KeyExchange::generate().unwrap();
        let mut blob = wrap_key(exchange.public_key(), MacMode::Hmac, &[7u8; 64]).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(exchange.unwrap_key(&blob, MacMode::Hmac).is_err());
    }

    #[test]
    fn test_unwrap_rejects_wrong_receiver() {
        let intended = KeyExchange::generate().unwrap();
        let eavesdropper = KeyExchange::generate().unwrap();
        let blob = wrap_key(intended.public_key(), MacMode::Hmac, &[7u8; 64]).unwrap();
        assert!(eavesdropper.unwrap_key(&blob, MacMode::Hmac).is_err());
    }

    #[test]
    fn test_validate_public_key() {
        let exchange = KeyExchange::generate().unwrap();
        assert_eq!(exchange.public_key().len(), ECDH_P256_PUBLIC_KEY_LEN);
        assert!(validate_public_key(exchange.public_key()).is_ok());
        assert!(validate_public_key(&[0u8; 64]).is_err());
        let mut compressed = exchange.public_key().to_vec();
        compressed[0] = 0x02;
        assert!(validate_public_key(&compressed).is_err());
    }

    #[test]
    fn test_wrap_rejects_malformed_public_key() {
        assert!(wrap_key(&[0x04; 10], MacMode::Hmac, &[0u8; 64]).is_err());
    }
}
