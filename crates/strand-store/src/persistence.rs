//! Sync persistence: the durable cache a stream resumes from.
//!
//! A cached stream is only handed out when it is provably consistent: the
//! sync pointer agrees with its cookie, every miniblock from the last
//! snapshot to the last miniblock is present, and the stored snapshot is
//! the one the pointer names. Anything less and [`SyncPersistenceStore::load_stream`]
//! returns `None`, which means "fetch from the network".

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use strand_core::{EventHash, Miniblock, Snapshot, StreamId};

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::model::{
    decode, encode, Filter, LoadedStream, LoadedStreams, Model, PersistedSyncedStream,
    PersistenceStats, RecordKey, ScratchData, StoredSnapshot, SCRATCH_ID,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::scratch::{apply_updates, ScratchQueue, ScratchUpdate};
use crate::traits::{Records, StorageAdapter, TxMode};

/// Persistence for synced streams over any [`StorageAdapter`].
pub struct SyncPersistenceStore<A> {
    adapter: Arc<A>,
    config: PersistenceConfig,
    retry: RetryPolicy,
    scratch: Arc<ScratchQueue>,
}

impl<A: StorageAdapter> SyncPersistenceStore<A> {
    pub fn new(adapter: A, config: PersistenceConfig) -> Self {
        let retry = config.retry_policy();
        Self {
            adapter: Arc::new(adapter),
            config,
            retry,
            scratch: Arc::new(ScratchQueue::new()),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────────

    /// Load a consistency-checked starting point for a stream.
    ///
    /// `pointer` is read from storage when not supplied.
    pub async fn load_stream(
        &self,
        stream_id: &StreamId,
        pointer: Option<PersistedSyncedStream>,
    ) -> Result<Option<LoadedStream>> {
        let stream_id = *stream_id;
        let hops = self.config.max_scrollback_hops;
        self.read(move |tx| load_stream_in(tx, &stream_id, pointer.clone(), hops))
            .await
    }

    /// Load several streams and the access times as of one instant.
    pub async fn load_streams(&self, stream_ids: &[StreamId]) -> Result<LoadedStreams> {
        let stream_ids = stream_ids.to_vec();
        let hops = self.config.max_scrollback_hops;
        self.read(move |tx| {
            let scratch = read_scratch(tx)?;
            let mut pointers = read_synced_streams(tx, &stream_ids)?;

            let mut streams = BTreeMap::new();
            for stream_id in &stream_ids {
                let loaded = match pointers.remove(stream_id) {
                    Some(pointer) => load_stream_in(tx, stream_id, Some(pointer), hops)?,
                    None => None,
                };
                streams.insert(*stream_id, loaded);
            }

            Ok(LoadedStreams {
                streams,
                last_accessed_at: scratch.last_accessed_at,
            })
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synced stream pointers
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_synced_stream(
        &self,
        stream_id: &StreamId,
    ) -> Result<Option<PersistedSyncedStream>> {
        let stream_id = *stream_id;
        self.read(move |tx| read_synced_stream(tx, &stream_id)).await
    }

    pub async fn load_synced_streams(
        &self,
        stream_ids: &[StreamId],
    ) -> Result<BTreeMap<StreamId, PersistedSyncedStream>> {
        let stream_ids = stream_ids.to_vec();
        self.read(move |tx| read_synced_streams(tx, &stream_ids)).await
    }

    pub async fn save_synced_stream(&self, synced: &PersistedSyncedStream) -> Result<()> {
        debug!(
            stream_id = %synced.stream_id,
            last_miniblock_num = synced.last_miniblock_num,
            "saving synced stream"
        );
        let key = RecordKey::id(synced.stream_id.to_hex());
        let data = encode(synced)?;
        self.adapter.upsert(Model::SyncedStreams, key, data).await
    }

    /// Drop a stream's pointer, miniblocks and snapshot together.
    pub async fn delete_synced_stream(&self, stream_id: &StreamId) -> Result<bool> {
        let id = stream_id.to_hex();
        let removed = self
            .adapter
            .transaction(TxMode::Write, move |tx| {
                let pointer = tx.delete(Model::SyncedStreams, &Filter::Id(id.clone()))?;
                tx.delete(Model::Miniblocks, &Filter::Id(id.clone()))?;
                tx.delete(Model::Snapshots, &Filter::Id(id))?;
                Ok(pointer > 0)
            })
            .await?;
        if removed {
            info!(stream_id = %stream_id, "discarded cached stream");
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Miniblocks and snapshots
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn save_miniblock(&self, miniblock: &Miniblock) -> Result<()> {
        debug!(
            stream_id = %miniblock.stream_id,
            miniblock_num = miniblock.miniblock_num,
            "saving miniblock"
        );
        let key = miniblock_key(&miniblock.stream_id, miniblock.miniblock_num);
        let data = encode(miniblock)?;
        self.adapter.upsert(Model::Miniblocks, key, data).await
    }

    /// Save a batch of miniblocks in one transaction.
    pub async fn save_miniblocks(&self, miniblocks: &[Miniblock]) -> Result<()> {
        let rows = miniblocks
            .iter()
            .map(|mb| Ok((miniblock_key(&mb.stream_id, mb.miniblock_num), encode(mb)?)))
            .collect::<Result<Vec<_>>>()?;
        let count = rows.len();
        self.adapter
            .transaction(TxMode::Write, move |tx| {
                for (key, data) in rows {
                    tx.upsert(Model::Miniblocks, key, data)?;
                }
                Ok(())
            })
            .await?;
        debug!(count, "saved miniblocks");
        Ok(())
    }

    pub async fn get_miniblock(
        &self,
        stream_id: &StreamId,
        miniblock_num: i64,
    ) -> Result<Option<Miniblock>> {
        let key = miniblock_key(stream_id, miniblock_num);
        self.read(move |tx| {
            tx.find_one(Model::Miniblocks, &key)?
                .map(|bytes| decode(&bytes))
                .transpose()
        })
        .await
    }

    /// Miniblocks `from..=to`. Empty unless every one of them is present.
    pub async fn get_miniblocks(
        &self,
        stream_id: &StreamId,
        from: i64,
        to: i64,
    ) -> Result<Vec<Miniblock>> {
        let stream_id = *stream_id;
        self.read(move |tx| read_miniblocks(tx, &stream_id, from, to))
            .await
    }

    /// Store a snapshot if it is strictly newer than the stored one.
    /// Returns whether it was written.
    pub async fn save_snapshot(
        &self,
        stream_id: &StreamId,
        miniblock_num: i64,
        snapshot: &Snapshot,
    ) -> Result<bool> {
        let key = RecordKey::id(stream_id.to_hex());
        let data = encode(&StoredSnapshot {
            miniblock_num,
            snapshot: snapshot.clone(),
        })?;

        let written = self
            .adapter
            .transaction(TxMode::Write, move |tx| {
                match tx.find_one(Model::Snapshots, &key)? {
                    Some(bytes) => {
                        let existing: StoredSnapshot = decode(&bytes)?;
                        if existing.miniblock_num >= miniblock_num {
                            return Ok(false);
                        }
                        tx.update(Model::Snapshots, &key, data)
                    }
                    None => tx.create(Model::Snapshots, key, data).map(|_| true),
                }
            })
            .await?;

        if written {
            debug!(stream_id = %stream_id, miniblock_num, "saved snapshot");
        }
        Ok(written)
    }

    pub async fn get_snapshot(&self, stream_id: &StreamId) -> Result<Option<StoredSnapshot>> {
        let stream_id = *stream_id;
        self.read(move |tx| read_snapshot(tx, &stream_id)).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cleartext cache
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn save_cleartext(&self, event_id: &EventHash, cleartext: &[u8]) -> Result<()> {
        self.adapter
            .upsert(
                Model::Cleartexts,
                RecordKey::id(event_id.to_hex()),
                cleartext.to_vec(),
            )
            .await
    }

    pub async fn get_cleartext(&self, event_id: &EventHash) -> Result<Option<Vec<u8>>> {
        let key = RecordKey::id(event_id.to_hex());
        self.read(move |tx| tx.find_one(Model::Cleartexts, &key))
            .await
    }

    /// Cached plaintext for whichever of `event_ids` are present.
    pub async fn get_cleartexts(
        &self,
        event_ids: &[EventHash],
    ) -> Result<BTreeMap<EventHash, Vec<u8>>> {
        let event_ids = event_ids.to_vec();
        self.read(move |tx| read_cleartexts(tx, event_ids.iter().copied()))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scratch
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark streams as recently accessed.
    ///
    /// The write is deferred: calls within the debounce window coalesce into
    /// one flush. Without a tokio runtime the updates wait for
    /// [`SyncPersistenceStore::flush_scratch`].
    pub fn set_high_priority_streams(&self, stream_ids: &[StreamId]) {
        let schedule = self.scratch.push(ScratchUpdate {
            stream_ids: stream_ids.to_vec(),
            at_ms: now_ms(),
        });
        if !schedule {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let adapter = Arc::clone(&self.adapter);
                let queue = Arc::clone(&self.scratch);
                let debounce = self.config.scratch_debounce;
                handle.spawn(run_scheduled_flush(adapter, queue, debounce));
            }
            Err(_) => {
                self.scratch.clear_scheduled();
                debug!("no runtime; scratch updates wait for an explicit flush");
            }
        }
    }

    /// Write all queued access-time updates now. Returns how many were
    /// applied.
    pub async fn flush_scratch(&self) -> Result<usize> {
        flush_scratch_queue(&*self.adapter, &self.scratch).await
    }

    pub async fn last_accessed_at(&self) -> Result<BTreeMap<StreamId, i64>> {
        self.read(|tx| read_scratch(tx).map(|s| s.last_accessed_at))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stats
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn stats(&self) -> Result<PersistenceStats> {
        let stats = self
            .read(|tx| {
                Ok(PersistenceStats {
                    cleartexts: tx.count(Model::Cleartexts, &Filter::All)?,
                    synced_streams: tx.count(Model::SyncedStreams, &Filter::All)?,
                    miniblocks: tx.count(Model::Miniblocks, &Filter::All)?,
                    snapshots: tx.count(Model::Snapshots, &Filter::All)?,
                })
            })
            .await?;
        info!(
            cleartexts = stats.cleartexts,
            synced_streams = stats.synced_streams,
            miniblocks = stats.miniblocks,
            snapshots = stats.snapshots,
            "persistence stats"
        );
        Ok(stats)
    }

    /// A read transaction under the retry policy.
    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&dyn Records) -> Result<T> + Clone + Send + 'static,
    {
        with_retry(&self.retry, || {
            let f = f.clone();
            self.adapter.transaction(TxMode::Read, move |tx| f(&*tx))
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reads inside a transaction
// ─────────────────────────────────────────────────────────────────────────────

fn miniblock_key(stream_id: &StreamId, miniblock_num: i64) -> RecordKey {
    RecordKey::numbered(stream_id.to_hex(), miniblock_num)
}

fn load_stream_in(
    tx: &dyn Records,
    stream_id: &StreamId,
    pointer: Option<PersistedSyncedStream>,
    max_scrollback_hops: usize,
) -> Result<Option<LoadedStream>> {
    let pointer = match pointer {
        Some(pointer) => pointer,
        None => match read_synced_stream(tx, stream_id)? {
            Some(pointer) => pointer,
            None => return Ok(None),
        },
    };

    if !pointer.is_consistent() {
        warn!(
            stream_id = %stream_id,
            last_miniblock_num = pointer.last_miniblock_num,
            generation = pointer.sync_cookie.generation,
            "persisted miniblock num does not match sync cookie"
        );
        return Ok(None);
    }

    let miniblocks = read_miniblocks(
        tx,
        stream_id,
        pointer.last_snapshot_miniblock_num,
        pointer.last_miniblock_num,
    )?;
    let Some(first) = miniblocks.first() else {
        warn!(
            stream_id = %stream_id,
            from = pointer.last_snapshot_miniblock_num,
            to = pointer.last_miniblock_num,
            "persisted miniblock range incomplete"
        );
        return Ok(None);
    };

    let Some(stored) = read_snapshot(tx, stream_id)? else {
        warn!(stream_id = %stream_id, "persisted snapshot missing");
        return Ok(None);
    };
    if stored.miniblock_num != pointer.last_snapshot_miniblock_num {
        warn!(
            stream_id = %stream_id,
            snapshot_miniblock_num = stored.miniblock_num,
            expected = pointer.last_snapshot_miniblock_num,
            "persisted snapshot miniblock num mismatch"
        );
        return Ok(None);
    }

    let prev_snapshot_miniblock_num = first.header.prev_snapshot_miniblock_num;
    let channel_like = stream_id.kind().is_some_and(|k| k.is_channel_like());
    let prepended_miniblocks =
        if channel_like && !miniblocks.iter().any(Miniblock::has_top_level_message) {
            scrollback(
                tx,
                stream_id,
                prev_snapshot_miniblock_num,
                first.miniblock_num,
                max_scrollback_hops,
            )?
        } else {
            Vec::new()
        };

    let event_ids = pointer
        .minipool_events
        .iter()
        .map(|e| e.hash)
        .chain(miniblocks.iter().flat_map(|mb| mb.events.iter().map(|e| e.hash)))
        .chain(stored.snapshot.event_ids())
        .chain(
            prepended_miniblocks
                .iter()
                .flat_map(|mb| mb.events.iter().map(|e| e.hash)),
        );
    let cleartexts = read_cleartexts(tx, event_ids)?;

    Ok(Some(LoadedStream {
        persisted_synced_stream: pointer,
        miniblocks,
        cleartexts,
        snapshot: stored.snapshot,
        prepended_miniblocks,
        prev_snapshot_miniblock_num,
    }))
}

/// Walk back snapshot boundary by snapshot boundary until a renderable
/// message turns up or the hop budget runs out.
fn scrollback(
    tx: &dyn Records,
    stream_id: &StreamId,
    mut from: i64,
    mut to_exclusive: i64,
    max_hops: usize,
) -> Result<Vec<Miniblock>> {
    let mut prepended: Vec<Miniblock> = Vec::new();
    for _ in 0..max_hops {
        if to_exclusive <= 0 {
            break;
        }
        let hop = read_miniblocks(tx, stream_id, from, to_exclusive - 1)?;
        let Some(first) = hop.first() else {
            break;
        };
        from = first.header.prev_snapshot_miniblock_num;
        to_exclusive = first.miniblock_num;
        let found = hop.iter().any(Miniblock::has_top_level_message);
        prepended.splice(0..0, hop);
        if found {
            break;
        }
    }
    debug!(stream_id = %stream_id, count = prepended.len(), "cached scrollback");
    Ok(prepended)
}

fn read_miniblocks(
    tx: &dyn Records,
    stream_id: &StreamId,
    from: i64,
    to: i64,
) -> Result<Vec<Miniblock>> {
    if from > to {
        return Ok(Vec::new());
    }
    let rows = tx.find_many(
        Model::Miniblocks,
        &Filter::Range {
            id: stream_id.to_hex(),
            from,
            to,
        },
    )?;
    // All or nothing
    let expected = to.checked_sub(from).and_then(|span| span.checked_add(1));
    if expected != i64::try_from(rows.len()).ok() {
        return Ok(Vec::new());
    }
    rows.iter().map(|(_, bytes)| decode(bytes)).collect()
}

fn read_snapshot(tx: &dyn Records, stream_id: &StreamId) -> Result<Option<StoredSnapshot>> {
    tx.find_one(Model::Snapshots, &RecordKey::id(stream_id.to_hex()))?
        .map(|bytes| decode(&bytes))
        .transpose()
}

fn read_synced_stream(
    tx: &dyn Records,
    stream_id: &StreamId,
) -> Result<Option<PersistedSyncedStream>> {
    tx.find_one(Model::SyncedStreams, &RecordKey::id(stream_id.to_hex()))?
        .map(|bytes| decode(&bytes))
        .transpose()
}

fn read_synced_streams(
    tx: &dyn Records,
    stream_ids: &[StreamId],
) -> Result<BTreeMap<StreamId, PersistedSyncedStream>> {
    let ids = stream_ids.iter().map(StreamId::to_hex).collect();
    tx.find_many(Model::SyncedStreams, &Filter::Ids(ids))?
        .into_iter()
        .map(|(_, bytes)| {
            let synced: PersistedSyncedStream = decode(&bytes)?;
            Ok((synced.stream_id, synced))
        })
        .collect()
}

fn read_cleartexts(
    tx: &dyn Records,
    event_ids: impl IntoIterator<Item = EventHash>,
) -> Result<BTreeMap<EventHash, Vec<u8>>> {
    let by_hex: BTreeMap<String, EventHash> = event_ids
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|id| (id.to_hex(), id))
        .collect();
    if by_hex.is_empty() {
        return Ok(BTreeMap::new());
    }

    let rows = tx.find_many(Model::Cleartexts, &Filter::Ids(by_hex.keys().cloned().collect()))?;
    Ok(rows
        .into_iter()
        .filter_map(|(key, data)| by_hex.get(&key.id).map(|id| (*id, data)))
        .collect())
}

fn read_scratch(tx: &dyn Records) -> Result<ScratchData> {
    match tx.find_one(Model::Scratch, &RecordKey::id(SCRATCH_ID))? {
        Some(bytes) => decode(&bytes),
        None => Ok(ScratchData::default()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scratch flushing
// ─────────────────────────────────────────────────────────────────────────────

async fn flush_scratch_queue<A: StorageAdapter>(adapter: &A, queue: &ScratchQueue) -> Result<usize> {
    let updates = queue.take();
    if updates.is_empty() {
        return Ok(0);
    }
    let count = updates.len();

    let pending = updates.clone();
    let written = adapter
        .transaction(TxMode::Write, move |tx| {
            let mut data = read_scratch(&*tx)?;
            apply_updates(&pending, &mut data);
            tx.upsert(Model::Scratch, RecordKey::id(SCRATCH_ID), encode(&data)?)
        })
        .await;
    if let Err(e) = written {
        warn!(updates = count, error = %e, "scratch flush failed, requeued updates");
        queue.restore(updates);
        return Err(e);
    }

    debug!(updates = count, "flushed scratch queue");
    Ok(count)
}

/// Wait until pushes stop for one debounce window, then flush once.
async fn run_scheduled_flush<A: StorageAdapter>(
    adapter: Arc<A>,
    queue: Arc<ScratchQueue>,
    debounce: Duration,
) {
    loop {
        let seen = queue.pushes();
        tokio::time::sleep(debounce).await;
        if queue.pushes() == seen {
            break;
        }
    }
    queue.clear_scheduled();
    if let Err(e) = flush_scratch_queue(&*adapter, &queue).await {
        error!(error = %e, "failed to flush scratch queue");
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use crate::sqlite::SqliteAdapter;
    use strand_core::{
        Address, Event, EventBuilder, Keypair, MemberSnapshot, MessageBody, MessagePayload,
        MiniblockHeader, Payload, SignerContext, StreamKind, SyncCookie,
    };

    fn message(ctx: &SignerContext, reply_to: Option<EventHash>) -> Event {
        EventBuilder::new(Payload::Message(MessagePayload {
            reply_to,
            body: MessageBody::Text("hello".into()),
        }))
        .prev(EventHash([1; 32]))
        .sign(ctx)
        .unwrap()
    }

    fn reply(ctx: &SignerContext) -> Event {
        message(ctx, Some(EventHash([2; 32])))
    }

    fn miniblock(stream_id: StreamId, num: i64, prev_snapshot: i64, events: Vec<Event>) -> Miniblock {
        Miniblock {
            stream_id,
            miniblock_num: num,
            header: MiniblockHeader {
                prev_miniblock_hash: EventHash::ZERO,
                prev_snapshot_miniblock_num: prev_snapshot,
                snapshot: None,
            },
            events,
        }
    }

    /// Previous snapshot for a chain with a snapshot every `interval` blocks.
    /// A snapshot block points at the one before it.
    fn prev_snapshot(num: i64, interval: i64) -> i64 {
        if num % interval == 0 {
            (num - interval).max(0)
        } else {
            num / interval * interval
        }
    }

    fn snapshot(stream_id: StreamId, num: i64) -> Snapshot {
        Snapshot {
            stream_id,
            miniblock_num: num,
            members: vec![MemberSnapshot {
                user: Address([7; 20]),
                username_event: Some(EventHash([0xaa; 32])),
                display_name_event: None,
            }],
            channel_properties_event: None,
        }
    }

    fn pointer(stream_id: StreamId, last_snapshot: i64, last: i64) -> PersistedSyncedStream {
        PersistedSyncedStream {
            stream_id,
            sync_cookie: SyncCookie {
                stream_id,
                generation: last + 1,
            },
            last_snapshot_miniblock_num: last_snapshot,
            last_miniblock_num: last,
            minipool_events: vec![],
        }
    }

    fn store() -> SyncPersistenceStore<MemoryAdapter> {
        SyncPersistenceStore::new(MemoryAdapter::new(), PersistenceConfig::default())
    }

    /// Snapshots at 0 and 3, miniblocks 0..=5, a top-level message in 4.
    async fn seed_channel(store: &SyncPersistenceStore<impl StorageAdapter>) -> StreamId {
        let ctx = SignerContext::new(Keypair::generate());
        let stream_id = StreamId::random(StreamKind::Channel);
        let blocks: Vec<Miniblock> = (0..=5)
            .map(|num| {
                let events = if num == 4 {
                    vec![message(&ctx, None)]
                } else {
                    vec![reply(&ctx)]
                };
                miniblock(stream_id, num, prev_snapshot(num, 3), events)
            })
            .collect();
        store.save_miniblocks(&blocks).await.unwrap();
        store.save_snapshot(&stream_id, 3, &snapshot(stream_id, 3)).await.unwrap();
        store.save_synced_stream(&pointer(stream_id, 3, 5)).await.unwrap();
        stream_id
    }

    #[tokio::test]
    async fn test_load_stream_consistent() {
        let store = store();
        let stream_id = seed_channel(&store).await;

        let loaded = store.load_stream(&stream_id, None).await.unwrap().unwrap();
        let nums: Vec<i64> = loaded.miniblocks.iter().map(|m| m.miniblock_num).collect();
        assert_eq!(nums, vec![3, 4, 5]);
        assert_eq!(loaded.snapshot.miniblock_num, 3);
        assert_eq!(loaded.prev_snapshot_miniblock_num, 0);
        assert!(loaded.prepended_miniblocks.is_empty());
    }

    #[tokio::test]
    async fn test_inconsistent_pointer_is_unavailable() {
        let store = store();
        let stream_id = seed_channel(&store).await;

        let mut bad = pointer(stream_id, 3, 5);
        bad.sync_cookie.generation = 7;
        assert!(store.load_stream(&stream_id, Some(bad)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_miniblock_is_unavailable() {
        let store = store();
        let stream_id = seed_channel(&store).await;
        store
            .adapter()
            .delete(
                Model::Miniblocks,
                Filter::Range {
                    id: stream_id.to_hex(),
                    from: 4,
                    to: 4,
                },
            )
            .await
            .unwrap();

        assert!(store.get_miniblocks(&stream_id, 3, 5).await.unwrap().is_empty());
        assert!(store.load_stream(&stream_id, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_mismatch_is_unavailable() {
        let store = store();
        let stream_id = seed_channel(&store).await;

        // Pointer claims the snapshot is at 4; the stored one is at 3
        let moved = pointer(stream_id, 4, 5);
        assert!(store.load_stream(&stream_id, Some(moved)).await.unwrap().is_none());

        let other = StreamId::random(StreamKind::Channel);
        store
            .save_miniblock(&miniblock(other, 0, 0, vec![]))
            .await
            .unwrap();
        store.save_synced_stream(&pointer(other, 0, 0)).await.unwrap();
        assert!(store.load_stream(&other, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scrollback_until_message() {
        let store = store();
        let ctx = SignerContext::new(Keypair::generate());
        let stream_id = StreamId::random(StreamKind::Channel);

        // Snapshots at 0, 3 and 6; the only top-level message is in 1
        let blocks: Vec<Miniblock> = (0..=8)
            .map(|num| {
                let events = if num == 1 {
                    vec![message(&ctx, None)]
                } else {
                    vec![reply(&ctx)]
                };
                miniblock(stream_id, num, prev_snapshot(num, 3), events)
            })
            .collect();
        store.save_miniblocks(&blocks).await.unwrap();
        store.save_snapshot(&stream_id, 6, &snapshot(stream_id, 6)).await.unwrap();
        store.save_synced_stream(&pointer(stream_id, 6, 8)).await.unwrap();

        let loaded = store.load_stream(&stream_id, None).await.unwrap().unwrap();
        let prepended: Vec<i64> = loaded
            .prepended_miniblocks
            .iter()
            .map(|m| m.miniblock_num)
            .collect();
        assert_eq!(prepended, vec![0, 1, 2, 3, 4, 5]);

        // One hop only reaches the previous snapshot boundary
        let short = SyncPersistenceStore::new(
            store.adapter().clone(),
            PersistenceConfig {
                max_scrollback_hops: 1,
                ..PersistenceConfig::default()
            },
        );
        let loaded = short.load_stream(&stream_id, None).await.unwrap().unwrap();
        let prepended: Vec<i64> = loaded
            .prepended_miniblocks
            .iter()
            .map(|m| m.miniblock_num)
            .collect();
        assert_eq!(prepended, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_no_scrollback_for_non_message_streams() {
        let store = store();
        let stream_id = StreamId::random(StreamKind::Space);
        for num in 0..=3 {
            let block = miniblock(stream_id, num, prev_snapshot(num, 2), vec![]);
            store.save_miniblock(&block).await.unwrap();
        }
        store.save_snapshot(&stream_id, 2, &snapshot(stream_id, 2)).await.unwrap();
        store.save_synced_stream(&pointer(stream_id, 2, 3)).await.unwrap();

        let loaded = store.load_stream(&stream_id, None).await.unwrap().unwrap();
        assert!(loaded.prepended_miniblocks.is_empty());
    }

    #[tokio::test]
    async fn test_cleartexts_collected_from_every_source() {
        let store = store();
        let stream_id = seed_channel(&store).await;
        let ctx = SignerContext::new(Keypair::generate());

        let pending = message(&ctx, None);
        let mut synced = pointer(stream_id, 3, 5);
        synced.minipool_events.push(pending.clone());
        store.save_synced_stream(&synced).await.unwrap();

        let in_block = store.get_miniblock(&stream_id, 4).await.unwrap().unwrap().events[0].hash;
        let member_event = EventHash([0xaa; 32]);
        let unrelated = EventHash([0xbb; 32]);
        for id in [pending.hash, in_block, member_event, unrelated] {
            store.save_cleartext(&id, id.to_hex().as_bytes()).await.unwrap();
        }

        let loaded = store.load_stream(&stream_id, None).await.unwrap().unwrap();
        let ids: BTreeSet<EventHash> = loaded.cleartexts.keys().copied().collect();
        assert_eq!(ids, BTreeSet::from([pending.hash, in_block, member_event]));
        assert_eq!(loaded.cleartexts[&in_block], in_block.to_hex().into_bytes());
    }

    #[tokio::test]
    async fn test_snapshot_writes_are_monotonic() {
        let store = store();
        let stream_id = StreamId::random(StreamKind::Channel);

        assert!(store.save_snapshot(&stream_id, 5, &snapshot(stream_id, 5)).await.unwrap());
        assert!(!store.save_snapshot(&stream_id, 5, &snapshot(stream_id, 5)).await.unwrap());
        assert!(!store.save_snapshot(&stream_id, 4, &snapshot(stream_id, 4)).await.unwrap());
        assert!(store.save_snapshot(&stream_id, 6, &snapshot(stream_id, 6)).await.unwrap());
        assert_eq!(store.get_snapshot(&stream_id).await.unwrap().unwrap().miniblock_num, 6);
    }

    #[tokio::test]
    async fn test_load_streams_batch() {
        let store = store();
        let cached = seed_channel(&store).await;
        let missing = StreamId::random(StreamKind::Dm);

        store.set_high_priority_streams(&[cached]);
        store.flush_scratch().await.unwrap();

        let loaded = store.load_streams(&[cached, missing]).await.unwrap();
        assert!(loaded.streams[&cached].is_some());
        assert!(loaded.streams[&missing].is_none());
        assert!(loaded.last_accessed_at.contains_key(&cached));
    }

    #[tokio::test]
    async fn test_scratch_updates_coalesce() {
        let store = SyncPersistenceStore::new(
            MemoryAdapter::new(),
            PersistenceConfig {
                scratch_debounce: Duration::from_millis(20),
                ..PersistenceConfig::default()
            },
        );
        let streams: Vec<StreamId> = (0..3).map(|_| StreamId::random(StreamKind::Channel)).collect();
        for stream_id in &streams {
            store.set_high_priority_streams(&[*stream_id]);
        }
        assert_eq!(store.adapter().count(Model::Scratch, Filter::All).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let accessed = store.last_accessed_at().await.unwrap();
        assert_eq!(accessed.len(), 3);
        assert_eq!(store.flush_scratch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let store = store();
        assert_eq!(store.flush_scratch().await.unwrap(), 0);
        assert!(store.last_accessed_at().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_synced_stream_discards_everything() {
        let store = store();
        let stream_id = seed_channel(&store).await;
        assert!(store.delete_synced_stream(&stream_id).await.unwrap());
        assert!(!store.delete_synced_stream(&stream_id).await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.miniblocks, 0);
        assert_eq!(stats.snapshots, 0);
        assert_eq!(stats.synced_streams, 0);
    }

    #[tokio::test]
    async fn test_sqlite_backed_load() {
        let store = SyncPersistenceStore::new(
            SqliteAdapter::open_memory().unwrap(),
            PersistenceConfig::default(),
        );
        let stream_id = seed_channel(&store).await;

        let synced = store.load_synced_streams(&[stream_id]).await.unwrap();
        assert_eq!(synced[&stream_id].last_miniblock_num, 5);

        let loaded = store.load_stream(&stream_id, None).await.unwrap().unwrap();
        assert_eq!(loaded.miniblocks.len(), 3);
        assert_eq!(store.stats().await.unwrap().miniblocks, 6);
    }

    /// Memory adapter whose write transactions can be switched off.
    #[derive(Default)]
    struct FlakyAdapter {
        inner: MemoryAdapter,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl StorageAdapter for FlakyAdapter {
        async fn transaction<T, F>(&self, mode: TxMode, f: F) -> Result<T>
        where
            T: Send + 'static,
            F: FnOnce(&mut dyn Records) -> Result<T> + Send + 'static,
        {
            if mode == TxMode::Write
                && self.fail_writes.load(std::sync::atomic::Ordering::SeqCst)
            {
                return Err(crate::error::StoreError::Aborted("writes disabled".into()));
            }
            self.inner.transaction(mode, f).await
        }
    }

    #[tokio::test]
    async fn test_failed_scratch_flush_keeps_updates() {
        let adapter = FlakyAdapter::default();
        adapter
            .fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let store = SyncPersistenceStore::new(adapter, PersistenceConfig::default());
        let stream_id = StreamId::random(StreamKind::Channel);

        store.set_high_priority_streams(&[stream_id]);
        assert!(store.flush_scratch().await.is_err());
        assert_eq!(store.scratch.len(), 1);

        store
            .adapter()
            .fail_writes
            .store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(store.flush_scratch().await.unwrap(), 1);
        assert!(store.last_accessed_at().await.unwrap().contains_key(&stream_id));
    }

    #[tokio::test]
    async fn test_hostile_pointer_range_is_unavailable() {
        let store = store();
        let stream_id = seed_channel(&store).await;

        let mut hostile = pointer(stream_id, i64::MIN, 5);
        assert!(store
            .load_stream(&stream_id, Some(hostile.clone()))
            .await
            .unwrap()
            .is_none());

        hostile.last_snapshot_miniblock_num = 3;
        hostile.sync_cookie.generation = i64::MIN;
        assert!(store
            .load_stream(&stream_id, Some(hostile))
            .await
            .unwrap()
            .is_none());
    }
}
