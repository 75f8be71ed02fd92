//! Group-ratchet sessions.
//!
//! One outbound session per stream encrypts every message the device sends
//! to that stream. Each message advances a hash ratchet, so a receiver that
//! holds the session key at index `n` can decrypt every message from `n` on
//! and nothing before it.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::envelope::{from_cbor, to_cbor, Sealed};
use crate::error::{CryptoError, Result};
use crate::keys::ratchet_step;

/// Group encryption algorithm tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GroupAlgorithm {
    /// BLAKE3 hash ratchet with ChaCha20-Poly1305 message keys.
    RatchetV1 = 1,
}

impl GroupAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupAlgorithm::RatchetV1 => "strand.group-ratchet.v1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strand.group-ratchet.v1" => Some(GroupAlgorithm::RatchetV1),
            _ => None,
        }
    }
}

impl fmt::Display for GroupAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ratchet position that can be shared with other devices.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub session_id: [u8; 32],
    pub index: u32,
    pub ratchet: [u8; 32],
}

impl SessionKey {
    /// Hex string form used in exports and key-sharing payloads.
    pub fn encode(&self) -> Result<String> {
        Ok(hex::encode(to_cbor(self)?))
    }

    pub fn decode(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        from_cbor(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn session_id_hex(&self) -> String {
        hex::encode(self.session_id)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("session_id", &self.session_id_hex())
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// A group message: ratchet index plus the sealed plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub index: u32,
    pub sealed: Sealed,
}

impl GroupMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}

/// The sending side of a group session.
#[derive(Clone, Serialize, Deserialize)]
pub struct OutboundGroupSession {
    session_id: [u8; 32],
    ratchet: [u8; 32],
    index: u32,
    created_at_ms: i64,
}

impl OutboundGroupSession {
    pub fn new(now_ms: i64) -> Self {
        let mut rng = rand::thread_rng();
        let mut session_id = [0u8; 32];
        let mut ratchet = [0u8; 32];
        rng.fill_bytes(&mut session_id);
        rng.fill_bytes(&mut ratchet);
        Self {
            session_id,
            ratchet,
            index: 0,
            created_at_ms: now_ms,
        }
    }

    pub fn session_id(&self) -> String {
        hex::encode(self.session_id)
    }

    /// Index of the next message.
    pub fn message_index(&self) -> u32 {
        self.index
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// The key at the current index; receivers can read from here on.
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            session_id: self.session_id,
            index: self.index,
            ratchet: self.ratchet,
        }
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<GroupMessage> {
        let (message_key, next) = ratchet_step(&self.ratchet);
        let message = GroupMessage {
            index: self.index,
            sealed: Sealed::seal(plaintext, &message_key)?,
        };
        self.ratchet = next;
        self.index += 1;
        Ok(message)
    }
}

impl fmt::Debug for OutboundGroupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundGroupSession")
            .field("session_id", &self.session_id())
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// The receiving side of a group session.
#[derive(Clone, Serialize, Deserialize)]
pub struct InboundGroupSession {
    key: SessionKey,
}

impl InboundGroupSession {
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }

    pub fn session_id(&self) -> String {
        self.key.session_id_hex()
    }

    /// Lowest message index this session can decrypt.
    pub fn first_known_index(&self) -> u32 {
        self.key.index
    }

    /// Export the key at the first known index.
    pub fn export(&self) -> SessionKey {
        self.key.clone()
    }

    /// Export the key at a later index, if `index` is reachable.
    pub fn export_at(&self, index: u32) -> Option<SessionKey> {
        if index < self.key.index {
            return None;
        }
        let mut ratchet = self.key.ratchet;
        for _ in self.key.index..index {
            ratchet = ratchet_step(&ratchet).1;
        }
        Some(SessionKey {
            session_id: self.key.session_id,
            index,
            ratchet,
        })
    }

    /// Decrypt a message, advancing a copy of the ratchet at most
    /// `max_advance` steps.
    pub fn decrypt(&self, message: &GroupMessage, max_advance: u32) -> Result<Vec<u8>> {
        if message.index < self.key.index {
            return Err(CryptoError::MessageIndexTooOld {
                index: message.index,
                first_known: self.key.index,
            });
        }
        if message.index - self.key.index > max_advance {
            return Err(CryptoError::MessageIndexTooFar {
                index: message.index,
                current: self.key.index,
            });
        }
        let mut ratchet = self.key.ratchet;
        for _ in self.key.index..message.index {
            ratchet = ratchet_step(&ratchet).1;
        }
        let (message_key, _) = ratchet_step(&ratchet);
        message.sealed.open(&message_key)
    }
}

impl fmt::Debug for InboundGroupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundGroupSession")
            .field("session_id", &self.session_id())
            .field("first_known_index", &self.first_known_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_copy_decrypts_outbound() {
        let mut outbound = OutboundGroupSession::new(0);
        let inbound = InboundGroupSession::new(outbound.session_key());
        assert_eq!(inbound.session_id(), outbound.session_id());

        let m0 = outbound.encrypt(b"first").unwrap();
        let m1 = outbound.encrypt(b"second").unwrap();
        assert_eq!(inbound.decrypt(&m1, 100).unwrap(), b"second");
        assert_eq!(inbound.decrypt(&m0, 100).unwrap(), b"first");
    }

    #[test]
    fn test_late_joiner_cannot_read_history() {
        let mut outbound = OutboundGroupSession::new(0);
        let early = outbound.encrypt(b"before").unwrap();
        let late = InboundGroupSession::new(outbound.session_key());
        let after = outbound.encrypt(b"after").unwrap();

        assert_eq!(late.first_known_index(), 1);
        assert_eq!(late.decrypt(&after, 100).unwrap(), b"after");
        assert!(matches!(
            late.decrypt(&early, 100),
            Err(CryptoError::MessageIndexTooOld { .. })
        ));
    }

    #[test]
    fn test_export_at_matches_later_key() {
        let mut outbound = OutboundGroupSession::new(0);
        let inbound = InboundGroupSession::new(outbound.session_key());
        for _ in 0..3 {
            outbound.encrypt(b"x").unwrap();
        }
        assert_eq!(inbound.export_at(3), Some(outbound.session_key()));
        let later = InboundGroupSession::new(outbound.session_key());
        assert_eq!(later.export_at(0), None);
    }

    #[test]
    fn test_max_advance() {
        let mut outbound = OutboundGroupSession::new(0);
        let inbound = InboundGroupSession::new(outbound.session_key());
        let mut last = None;
        for _ in 0..5 {
            last = Some(outbound.encrypt(b"x").unwrap());
        }
        assert!(inbound.decrypt(last.as_ref().unwrap(), 3).is_err());
        assert!(inbound.decrypt(last.as_ref().unwrap(), 4).is_ok());
    }

    #[test]
    fn test_session_key_encoding() {
        let key = OutboundGroupSession::new(0).session_key();
        let decoded = SessionKey::decode(&key.encode().unwrap()).unwrap();
        assert_eq!(decoded, key);
        assert!(SessionKey::decode("not hex").is_err());
        assert!(SessionKey::decode("deadbeef").is_err());
    }

    #[test]
    fn test_algorithm_tag() {
        let tag = GroupAlgorithm::RatchetV1.as_str();
        assert_eq!(GroupAlgorithm::parse(tag), Some(GroupAlgorithm::RatchetV1));
        assert_eq!(GroupAlgorithm::parse("unknown"), None);
    }
}
