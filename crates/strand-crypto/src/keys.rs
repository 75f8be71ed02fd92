//! Key material for the encryption layer.
//!
//! Provides X25519 key agreement, BLAKE3 key derivation and
//! ChaCha20-Poly1305 authenticated encryption.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{CryptoError, Result};

/// Derive a 32-byte key from `parts` under a domain-separation context.
pub(crate) fn kdf(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// An X25519 public key (32 bytes). Device keys are published as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Curve25519PublicKey(pub [u8; 32]);

impl Curve25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("device key must be 32 bytes: {s}")))?;
        Ok(Self(arr))
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for Curve25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Curve25519PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for Curve25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// An X25519 static secret.
#[derive(Clone)]
pub struct Curve25519SecretKey(StaticSecret);

impl Curve25519SecretKey {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> Curve25519PublicKey {
        Curve25519PublicKey(*PublicKey::from(&self.0).as_bytes())
    }

    /// Perform key agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer: &Curve25519PublicKey) -> SharedSecret {
        SharedSecret(*self.0.diffie_hellman(&peer.to_dalek()).as_bytes())
    }
}

impl Serialize for Curve25519SecretKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Curve25519SecretKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        <[u8; 32]>::deserialize(deserializer).map(Self::from_bytes)
    }
}

impl fmt::Debug for Curve25519SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Curve25519SecretKey({})", self.public_key())
    }
}

/// Raw output of one X25519 agreement.
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A 256-bit ChaCha20-Poly1305 key.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageKey([u8; 32]);

impl MessageKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt data with this key.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &MessageNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))
    }

    /// Decrypt data with this key.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &MessageNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageNonce(pub [u8; 12]);

impl MessageNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Symmetric hash ratchet step shared by bootstrap and group chains:
/// returns the message key for the current position and the next chain key.
pub(crate) fn ratchet_step(chain_key: &[u8; 32]) -> (MessageKey, [u8; 32]) {
    let message_key = blake3::keyed_hash(chain_key, &[0x01]);
    let next = blake3::keyed_hash(chain_key, &[0x02]);
    (MessageKey(*message_key.as_bytes()), *next.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x25519_key_agreement() {
        let alice = Curve25519SecretKey::generate();
        let bob = Curve25519SecretKey::generate();

        let alice_shared = alice.diffie_hellman(&bob.public_key());
        let bob_shared = bob.diffie_hellman(&alice.public_key());

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = MessageKey::generate();
        let nonce = MessageNonce::generate();
        let ciphertext = key.encrypt(b"hello, world!", &nonce).unwrap();
        assert_ne!(ciphertext, b"hello, world!");
        assert_eq!(key.decrypt(&ciphertext, &nonce).unwrap(), b"hello, world!");
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let nonce = MessageNonce::generate();
        let ciphertext = MessageKey::generate().encrypt(b"secret", &nonce).unwrap();
        assert!(MessageKey::generate().decrypt(&ciphertext, &nonce).is_err());
    }

    #[test]
    fn test_kdf_domain_separation() {
        let a = kdf("strand-test-a", &[b"input".as_slice()]);
        let b = kdf("strand-test-b", &[b"input".as_slice()]);
        assert_ne!(a, b);
        assert_eq!(a, kdf("strand-test-a", &[b"input".as_slice()]));
    }

    #[test]
    fn test_ratchet_step_moves_forward() {
        let (k0, c1) = ratchet_step(&[7; 32]);
        let (k1, _) = ratchet_step(&c1);
        assert_ne!(k0, k1);
        assert_ne!(c1, [7; 32]);
    }

    #[test]
    fn test_public_key_hex() {
        let key = Curve25519SecretKey::generate().public_key();
        assert_eq!(Curve25519PublicKey::from_hex(&key.to_hex()).unwrap(), key);
        assert!(Curve25519PublicKey::from_hex("abcd").is_err());
    }
}
