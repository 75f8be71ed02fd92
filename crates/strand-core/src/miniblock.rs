//! Miniblocks and snapshots: the units a stream is persisted and synced in.
//!
//! A miniblock is a numbered batch of events. Every so often a miniblock
//! header carries a snapshot of the stream's member metadata so a client can
//! start from it instead of replaying the whole history.

use serde::{Deserialize, Serialize};

use crate::crypto::snapshot_hash;
use crate::error::CoreError;
use crate::event::Event;
use crate::payload::{MessageBody, Payload};
use crate::stream::{StreamId, StreamKind};
use crate::types::{Address, EventHash};

/// Header of a miniblock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniblockHeader {
    /// Hash of the previous miniblock header; `ZERO` for the genesis block.
    pub prev_miniblock_hash: EventHash,
    /// Number of the most recent miniblock at or before this one that
    /// carries a snapshot.
    pub prev_snapshot_miniblock_num: i64,
    /// Present on snapshot miniblocks.
    pub snapshot: Option<Snapshot>,
}

/// A numbered batch of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Miniblock {
    pub stream_id: StreamId,
    pub miniblock_num: i64,
    pub header: MiniblockHeader,
    pub events: Vec<Event>,
}

impl Miniblock {
    /// True when any event is a renderable message (not a threaded reply).
    pub fn has_top_level_message(&self) -> bool {
        self.events.iter().any(|e| match e.payload() {
            Payload::Message(m) => m.is_top_level(),
            _ => false,
        })
    }

    /// Hashes of events whose body is group-encrypted.
    pub fn encrypted_event_hashes(&self) -> impl Iterator<Item = EventHash> + '_ {
        self.events.iter().filter_map(|e| match e.payload() {
            Payload::Message(m) if matches!(m.body, MessageBody::Encrypted(_)) => Some(e.hash),
            _ => None,
        })
    }
}

/// Per-member metadata pointers carried by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user: Address,
    pub username_event: Option<EventHash>,
    pub display_name_event: Option<EventHash>,
}

/// Compacted stream state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub stream_id: StreamId,
    pub miniblock_num: i64,
    pub members: Vec<MemberSnapshot>,
    /// Group DM name and topic event.
    pub channel_properties_event: Option<EventHash>,
}

impl Snapshot {
    /// `snapshot_hash` over the CBOR encoding.
    pub fn compute_hash(&self) -> Result<EventHash, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(snapshot_hash(&buf))
    }

    /// Events whose decrypted content the client needs before rendering:
    /// every member's username and display name, plus the channel
    /// properties of a group DM.
    pub fn event_ids(&self) -> Vec<EventHash> {
        let mut ids: Vec<EventHash> = self
            .members
            .iter()
            .flat_map(|m| [m.username_event, m.display_name_event])
            .flatten()
            .collect();
        if self.stream_id.kind() == Some(StreamKind::Gdm) {
            ids.extend(self.channel_properties_event);
        }
        ids
    }
}

/// Position of the last sync for a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCookie {
    pub stream_id: StreamId,
    /// Highest miniblock number the client has seen.
    pub generation: i64,
}
