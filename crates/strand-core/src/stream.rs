//! Stream identity: a stream is a named, independently synced conversation log.
//!
//! The first byte of a [`StreamId`] tags the stream's kind, so a reader can
//! tell channels from user streams without loading any events.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::payload::PayloadKind;
use crate::types::byte_array;

/// The kind of a stream, fixed by its inception event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamKind {
    /// Per-user stream holding cross-stream membership markers.
    User = 0xa8,
    /// A space: container of channels.
    Space = 0x10,
    /// A channel inside a space.
    Channel = 0x20,
    /// Direct message between two users.
    Dm = 0x88,
    /// Group direct message.
    Gdm = 0x77,
}

impl StreamKind {
    /// Convert to the id prefix byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from an id prefix byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xa8 => Some(Self::User),
            0x10 => Some(Self::Space),
            0x20 => Some(Self::Channel),
            0x88 => Some(Self::Dm),
            0x77 => Some(Self::Gdm),
            _ => None,
        }
    }

    /// Whether this kind carries chat messages.
    pub fn is_channel_like(self) -> bool {
        matches!(self, Self::Channel | Self::Dm | Self::Gdm)
    }

    /// Whether `payload` may appear in a stream of this kind.
    pub fn allows(self, payload: PayloadKind) -> bool {
        match payload {
            PayloadKind::Inception => true,
            PayloadKind::Membership => !matches!(self, Self::User),
            PayloadKind::UserMembership => matches!(self, Self::User),
            PayloadKind::Channel => matches!(self, Self::Space),
            PayloadKind::Message => self.is_channel_like(),
        }
    }
}

/// A 32-byte stream identifier whose first byte is the [`StreamKind`] tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(#[serde(with = "byte_array")] pub [u8; 32]);

impl StreamId {
    /// Create a fresh random id of the given kind.
    pub fn random(kind: StreamKind) -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes[1..]);
        bytes[0] = kind.to_u8();
        Self(bytes)
    }

    /// Derive a deterministic id of the given kind from a seed.
    pub fn derive(kind: StreamKind, seed: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("strand-stream-id-v1");
        hasher.update(&[kind.to_u8()]);
        hasher.update(seed);
        let mut bytes = *hasher.finalize().as_bytes();
        bytes[0] = kind.to_u8();
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The kind encoded in the prefix byte, if recognized.
    pub fn kind(&self) -> Option<StreamKind> {
        StreamKind::from_u8(self.0[0])
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for StreamId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for StreamId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_carries_kind() {
        for kind in [
            StreamKind::User,
            StreamKind::Space,
            StreamKind::Channel,
            StreamKind::Dm,
            StreamKind::Gdm,
        ] {
            assert_eq!(StreamId::random(kind).kind(), Some(kind));
            assert_eq!(StreamId::derive(kind, b"seed").kind(), Some(kind));
        }
        assert_eq!(StreamId::from_bytes([0u8; 32]).kind(), None);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = StreamId::derive(StreamKind::Channel, b"general");
        let b = StreamId::derive(StreamKind::Channel, b"general");
        let c = StreamId::derive(StreamKind::Channel, b"random");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_payload_rules() {
        assert!(StreamKind::Channel.allows(PayloadKind::Message));
        assert!(!StreamKind::Space.allows(PayloadKind::Message));
        assert!(StreamKind::Space.allows(PayloadKind::Channel));
        assert!(StreamKind::User.allows(PayloadKind::UserMembership));
        assert!(!StreamKind::User.allows(PayloadKind::Membership));
        assert!(StreamKind::Gdm.allows(PayloadKind::Membership));
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = StreamId::random(StreamKind::Dm);
        assert_eq!(StreamId::from_hex(&id.to_hex()).unwrap(), id);
    }
}
