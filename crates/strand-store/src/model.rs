//! Named record models and the records stored in them.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use strand_core::{Event, EventHash, Miniblock, Snapshot, StreamId, SyncCookie};

use crate::error::{Result, StoreError};

/// The record collections an adapter must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Model {
    Cleartexts,
    SyncedStreams,
    Miniblocks,
    Snapshots,
    Scratch,
}

impl Model {
    pub const ALL: [Model; 5] = [
        Model::Cleartexts,
        Model::SyncedStreams,
        Model::Miniblocks,
        Model::Snapshots,
        Model::Scratch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Model::Cleartexts => "cleartexts",
            Model::SyncedStreams => "syncedStreams",
            Model::Miniblocks => "miniblocks",
            Model::Snapshots => "snapshots",
            Model::Scratch => "scratch",
        }
    }

    /// SQL table backing the model.
    pub fn table(self) -> &'static str {
        match self {
            Model::Cleartexts => "cleartexts",
            Model::SyncedStreams => "synced_streams",
            Model::Miniblocks => "miniblocks",
            Model::Snapshots => "snapshots",
            Model::Scratch => "scratch",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one record. `num` orders records sharing an `id`; only
/// miniblocks use it, everything else stores zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub id: String,
    pub num: i64,
}

impl RecordKey {
    pub fn id(id: impl Into<String>) -> Self {
        Self { id: id.into(), num: 0 }
    }

    pub fn numbered(id: impl Into<String>, num: i64) -> Self {
        Self { id: id.into(), num }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.num)
    }
}

/// Which records a query touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    /// Every record with this id, whatever its number.
    Id(String),
    Ids(Vec<String>),
    /// Records with this id and `from <= num <= to`.
    Range { id: String, from: i64, to: i64 },
}

impl Filter {
    pub fn matches(&self, key: &RecordKey) -> bool {
        match self {
            Filter::All => true,
            Filter::Id(id) => key.id == *id,
            Filter::Ids(ids) => ids.iter().any(|id| key.id == *id),
            Filter::Range { id, from, to } => key.id == *id && key.num >= *from && key.num <= *to,
        }
    }
}

/// Id of the single scratch record.
pub const SCRATCH_ID: &str = "0";

/// The persisted sync position of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSyncedStream {
    pub stream_id: StreamId,
    pub sync_cookie: SyncCookie,
    pub last_snapshot_miniblock_num: i64,
    pub last_miniblock_num: i64,
    /// Events accepted but not yet in a miniblock.
    pub minipool_events: Vec<Event>,
}

impl PersistedSyncedStream {
    /// The last persisted miniblock must be the one right before the
    /// cookie's generation.
    pub fn is_consistent(&self) -> bool {
        self.sync_cookie.generation.checked_sub(1) == Some(self.last_miniblock_num)
    }
}

/// A stored snapshot and the miniblock it was taken at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub miniblock_num: i64,
    pub snapshot: Snapshot,
}

/// Per-stream access times used to decide which streams to keep warm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScratchData {
    pub last_accessed_at: BTreeMap<StreamId, i64>,
}

/// A consistency-checked starting point for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedStream {
    pub persisted_synced_stream: PersistedSyncedStream,
    pub miniblocks: Vec<Miniblock>,
    /// Cached plaintext for any referenced event; missing entries are
    /// re-decrypted by the caller.
    pub cleartexts: BTreeMap<EventHash, Vec<u8>>,
    pub snapshot: Snapshot,
    /// Older miniblocks pulled in by scrollback, oldest first.
    pub prepended_miniblocks: Vec<Miniblock>,
    pub prev_snapshot_miniblock_num: i64,
}

/// Result of a batch load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedStreams {
    /// `None` for a stream whose cache is absent or inconsistent.
    pub streams: BTreeMap<StreamId, Option<LoadedStream>>,
    pub last_accessed_at: BTreeMap<StreamId, i64>,
}

/// Record counts per model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    pub cleartexts: usize,
    pub synced_streams: usize,
    pub miniblocks: usize,
    pub snapshots: usize,
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
