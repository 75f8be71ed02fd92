//! Event payloads.
//!
//! A payload is a closed sum type. Each stream kind restricts which variants
//! are legal (see [`StreamKind::allows`]).

use serde::{Deserialize, Serialize};

use crate::stream::{StreamId, StreamKind};
use crate::types::{Address, EventHash};

/// Discriminator for payload variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PayloadKind {
    Inception = 0x0001,
    Membership = 0x0002,
    UserMembership = 0x0003,
    Channel = 0x0004,
    Message = 0x0005,
}

impl PayloadKind {
    /// Convert to u16 for serialization.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Try to parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Inception),
            0x0002 => Some(Self::Membership),
            0x0003 => Some(Self::UserMembership),
            0x0004 => Some(Self::Channel),
            0x0005 => Some(Self::Message),
            _ => None,
        }
    }
}

/// Membership operations, shared by direct and derived membership payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MembershipOp {
    Invite = 1,
    Join = 2,
    Leave = 3,
}

/// Channel lifecycle operations inside a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelOp {
    Created = 1,
    Deleted = 2,
}

/// The first event of every stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InceptionPayload {
    pub stream_id: StreamId,
    pub kind: StreamKind,
    /// Owning space, for channels.
    pub space_id: Option<StreamId>,
    pub name: Option<String>,
}

/// Join, invite or leave for a user in this stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPayload {
    pub op: MembershipOp,
    pub user: Address,
}

/// Derived user-stream marker: the user was invited to, joined, or left
/// another stream. `origin_event` is the membership event that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMembershipPayload {
    pub op: MembershipOp,
    pub stream_id: StreamId,
    pub origin_event: EventHash,
}

/// Derived space marker for channel creation or deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub op: ChannelOp,
    pub channel_id: StreamId,
    pub origin_event: EventHash,
}

/// Ciphertext produced by the group-ratchet layer plus the metadata needed to
/// find the session again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    /// Algorithm tag of the group session.
    pub algorithm: String,
    /// Hex identity key of the sending device.
    pub sender_key: String,
    /// Group session the ciphertext belongs to.
    pub session_id: String,
    /// Opaque sealed message (index, nonce, ciphertext).
    pub ciphertext: Vec<u8>,
}

/// Message content, cleartext or group-encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    Text(String),
    Encrypted(EncryptedData),
}

/// A chat message. `reply_to` marks a threaded reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub reply_to: Option<EventHash>,
    pub body: MessageBody,
}

impl MessagePayload {
    /// A top-level, renderable message (not a threaded reply).
    pub fn is_top_level(&self) -> bool {
        self.reply_to.is_none()
    }
}

/// The payload carried by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Inception(InceptionPayload),
    Membership(MembershipPayload),
    UserMembership(UserMembershipPayload),
    Channel(ChannelPayload),
    Message(MessagePayload),
}

impl Payload {
    /// The variant discriminator.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Inception(_) => PayloadKind::Inception,
            Payload::Membership(_) => PayloadKind::Membership,
            Payload::UserMembership(_) => PayloadKind::UserMembership,
            Payload::Channel(_) => PayloadKind::Channel,
            Payload::Message(_) => PayloadKind::Message,
        }
    }

    pub fn is_inception(&self) -> bool {
        matches!(self, Payload::Inception(_))
    }

    /// Shorthand for a cleartext top-level message.
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Message(MessagePayload {
            reply_to: None,
            body: MessageBody::Text(text.into()),
        })
    }

    /// Shorthand for an inception payload.
    pub fn inception(stream_id: StreamId, kind: StreamKind) -> Self {
        Payload::Inception(InceptionPayload {
            stream_id,
            kind,
            space_id: None,
            name: None,
        })
    }

    /// Shorthand for a membership payload.
    pub fn membership(op: MembershipOp, user: Address) -> Self {
        Payload::Membership(MembershipPayload { op, user })
    }
}
