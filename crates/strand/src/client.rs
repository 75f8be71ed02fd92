//! The stream client: authenticated events in, decrypted timeline out.
//!
//! `StreamClient` ties the components together in the order data flows
//! through them. Events are verified, folded into a per-stream view,
//! decrypted with the group layer, and their cleartexts cached. Miniblocks
//! advance the persisted sync pointer so the stream can later resume from
//! the cache instead of the network.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use strand_core::{
    verify_event, EncryptedData, Event, EventBuilder, EventHash, FoldOptions, MessageBody,
    MessagePayload, Miniblock, Payload, SignerContext, Snapshot, StreamId, StreamKind,
    StreamStateView, SyncCookie, VerifyOptions,
};
use strand_crypto::{CryptoStore, EncryptionConfig, EncryptionSessionManager};
use strand_store::{PersistedSyncedStream, PersistenceConfig, StorageAdapter, SyncPersistenceStore};

use crate::error::{ClientError, Result};

/// Configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whether to verify hash and signature of ingested events.
    pub verify_on_ingest: bool,
    /// Whether decrypted plaintext is written to the cleartext cache.
    pub cache_cleartexts: bool,
    /// Used by [`StreamClient::open`].
    pub persistence: PersistenceConfig,
    /// Used by [`StreamClient::open`].
    pub encryption: EncryptionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            verify_on_ingest: true,
            cache_cleartexts: true,
            persistence: PersistenceConfig::default(),
            encryption: EncryptionConfig::default(),
        }
    }
}

/// A stream restored from the cache.
#[derive(Debug, Clone)]
pub struct ResumedStream {
    pub view: StreamStateView,
    pub cleartexts: BTreeMap<EventHash, Vec<u8>>,
    /// Older miniblocks loaded for scrollback. They are not folded into
    /// the view, which starts at the snapshot.
    pub scrollback: Vec<Miniblock>,
}

/// Outcome of folding and decrypting a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Events new to the view.
    pub folded: usize,
    pub decrypted: BTreeMap<EventHash, Vec<u8>>,
    /// Encrypted messages whose key is missing or whose ciphertext failed.
    /// They stay in the view and can be retried after a key import.
    pub undecryptable: Vec<EventHash>,
}

/// One signer's client over persistence and encryption.
pub struct StreamClient<A, S> {
    signer: SignerContext,
    persistence: SyncPersistenceStore<A>,
    crypto: EncryptionSessionManager<S>,
    config: ClientConfig,
    views: Mutex<BTreeMap<StreamId, StreamStateView>>,
    /// Serializes read-modify-write of persisted sync pointers.
    pointer_guard: Mutex<()>,
}

impl<A: StorageAdapter, S: CryptoStore> StreamClient<A, S> {
    /// Create a client over already constructed components.
    pub fn new(
        signer: SignerContext,
        persistence: SyncPersistenceStore<A>,
        crypto: EncryptionSessionManager<S>,
        config: ClientConfig,
    ) -> Self {
        Self {
            signer,
            persistence,
            crypto,
            config,
            views: Mutex::new(BTreeMap::new()),
            pointer_guard: Mutex::new(()),
        }
    }

    /// Build the components from `config` and initialize the device.
    pub async fn open(
        signer: SignerContext,
        adapter: A,
        crypto_store: S,
        config: ClientConfig,
    ) -> Result<Self> {
        let persistence = SyncPersistenceStore::new(adapter, config.persistence.clone());
        let mut crypto = EncryptionSessionManager::new(crypto_store, config.encryption.clone());
        crypto.init().await?;
        info!(creator = %signer.creator_address(), "stream client ready");
        Ok(Self::new(signer, persistence, crypto, config))
    }

    pub fn signer(&self) -> &SignerContext {
        &self.signer
    }

    pub fn persistence(&self) -> &SyncPersistenceStore<A> {
        &self.persistence
    }

    pub fn crypto(&self) -> &EncryptionSessionManager<S> {
        &self.crypto
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A copy of the current view of a stream.
    pub async fn view(&self, stream_id: &StreamId) -> Option<StreamStateView> {
        self.views.lock().await.get(stream_id).cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Streams
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a new stream of `kind` with a locally signed inception.
    pub async fn create_stream(&self, kind: StreamKind) -> Result<StreamId> {
        let stream_id = StreamId::random(kind);
        let inception = EventBuilder::new(Payload::inception(stream_id, kind)).sign(&self.signer)?;

        let mut view = StreamStateView::new(stream_id);
        view.add_events([inception], None, FoldOptions::initial())?;
        self.views.lock().await.insert(stream_id, view);

        info!(stream_id = %stream_id, kind = ?kind, "created stream");
        Ok(stream_id)
    }

    /// Resume a stream from the cache.
    ///
    /// Returns `None` when nothing consistent is cached; the caller then
    /// fetches the stream from the network.
    pub async fn load_stream(&self, stream_id: &StreamId) -> Result<Option<ResumedStream>> {
        let Some(loaded) = self.persistence.load_stream(stream_id, None).await? else {
            debug!(stream_id = %stream_id, "no usable cache for stream");
            return Ok(None);
        };

        let mut view = StreamStateView::from_snapshot(&loaded.snapshot)?;
        let events: Vec<Event> = loaded
            .miniblocks
            .iter()
            .flat_map(|mb| mb.events.iter())
            .chain(loaded.persisted_synced_stream.minipool_events.iter())
            .filter(|e| !e.payload().is_inception())
            .cloned()
            .collect();
        view.add_events(
            events,
            None,
            FoldOptions {
                is_initial_load: true,
                ignore_existing: true,
            },
        )?;
        self.views.lock().await.insert(*stream_id, view.clone());

        info!(
            stream_id = %stream_id,
            events = view.event_count(),
            cleartexts = loaded.cleartexts.len(),
            scrollback = loaded.prepended_miniblocks.len(),
            "resumed stream from cache"
        );
        Ok(Some(ResumedStream {
            view,
            cleartexts: loaded.cleartexts,
            scrollback: loaded.prepended_miniblocks,
        }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify, fold and decrypt a batch of events for one stream.
    ///
    /// The fold is all or nothing: if any event is rejected the view is
    /// left as it was. Decryption failures are reported, not returned.
    pub async fn ingest_events(
        &self,
        stream_id: &StreamId,
        events: Vec<Event>,
    ) -> Result<IngestReport> {
        if self.config.verify_on_ingest {
            let options = VerifyOptions::default();
            for event in &events {
                verify_event(event, &options)?;
            }
        }

        let fresh = {
            let mut views = self.views.lock().await;
            let mut view = views
                .get(stream_id)
                .cloned()
                .unwrap_or_else(|| StreamStateView::new(*stream_id));

            let mut seen = HashSet::new();
            let fresh: Vec<Event> = events
                .into_iter()
                .filter(|e| view.event(&e.hash).is_none() && seen.insert(e.hash))
                .collect();

            let options = FoldOptions {
                is_initial_load: !view.is_initialized(),
                ignore_existing: true,
            };
            view.add_events(fresh.iter().cloned(), None, options)?;
            views.insert(*stream_id, view);
            fresh
        };

        self.append_minipool(stream_id, &fresh).await?;

        let mut report = IngestReport {
            folded: fresh.len(),
            ..IngestReport::default()
        };
        for event in &fresh {
            if let Payload::Message(MessagePayload {
                body: MessageBody::Encrypted(data),
                ..
            }) = event.payload()
            {
                self.decrypt_into(stream_id, event.hash, data, &mut report)
                    .await?;
            }
        }

        debug!(
            stream_id = %stream_id,
            folded = report.folded,
            decrypted = report.decrypted.len(),
            undecryptable = report.undecryptable.len(),
            "ingested events"
        );
        Ok(report)
    }

    /// Try again on every encrypted message of the stream without a cached
    /// cleartext. Call after importing session keys.
    pub async fn retry_decryption(&self, stream_id: &StreamId) -> Result<IngestReport> {
        let pending: Vec<(EventHash, EncryptedData)> = {
            let views = self.views.lock().await;
            let view = views
                .get(stream_id)
                .ok_or(ClientError::StreamNotLoaded(*stream_id))?;
            view.messages()
                .iter()
                .filter_map(|(hash, message)| match &message.body {
                    MessageBody::Encrypted(data) => Some((*hash, data.clone())),
                    MessageBody::Text(_) => None,
                })
                .collect()
        };

        let ids: Vec<EventHash> = pending.iter().map(|(hash, _)| *hash).collect();
        let cached = self.persistence.get_cleartexts(&ids).await?;

        let mut report = IngestReport::default();
        for (hash, data) in pending.iter().filter(|(hash, _)| !cached.contains_key(hash)) {
            self.decrypt_into(stream_id, *hash, data, &mut report).await?;
        }
        Ok(report)
    }

    /// Encrypt `text` for the stream, sign it over the current leaves, and
    /// fold it locally. Returns the new event's hash.
    pub async fn send_message(
        &self,
        stream_id: &StreamId,
        text: &str,
        reply_to: Option<EventHash>,
    ) -> Result<EventHash> {
        if !self.views.lock().await.contains_key(stream_id) {
            return Err(ClientError::StreamNotLoaded(*stream_id));
        }

        let encrypted = self
            .crypto
            .encrypt_group_event(stream_id, text.as_bytes())
            .await?;

        let event = {
            let mut views = self.views.lock().await;
            let view = views
                .get_mut(stream_id)
                .ok_or(ClientError::StreamNotLoaded(*stream_id))?;
            let event = EventBuilder::new(Payload::Message(MessagePayload {
                reply_to,
                body: MessageBody::Encrypted(encrypted),
            }))
            .prevs(view.leaf_event_hashes())
            .sign(&self.signer)?;
            view.add_event(event.clone(), None)?;
            event
        };

        if self.config.cache_cleartexts {
            self.persistence
                .save_cleartext(&event.hash, text.as_bytes())
                .await?;
        }
        self.append_minipool(stream_id, std::slice::from_ref(&event))
            .await?;

        debug!(stream_id = %stream_id, event = %event.hash, "sent message");
        Ok(event.hash)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a miniblock and advance the stream's sync pointer to it.
    ///
    /// The cookie must describe this miniblock:
    /// `miniblock_num == cookie.generation - 1`. Once a pointer exists,
    /// miniblocks must arrive contiguously. A miniblock at or below the
    /// pointer was already applied and is ignored; returns whether the
    /// pointer moved.
    pub async fn apply_miniblock(&self, miniblock: &Miniblock, cookie: SyncCookie) -> Result<bool> {
        let stream_id = miniblock.stream_id;
        if cookie.stream_id != stream_id
            || cookie.generation.checked_sub(1) != Some(miniblock.miniblock_num)
        {
            return Err(ClientError::CookieMismatch {
                stream_id,
                miniblock_num: miniblock.miniblock_num,
                generation: cookie.generation,
            });
        }
        if self.config.verify_on_ingest {
            let options = VerifyOptions::default();
            for event in &miniblock.events {
                verify_event(event, &options)?;
            }
        }

        let _guard = self.pointer_guard.lock().await;
        let existing = self.persistence.get_synced_stream(&stream_id).await?;
        if let Some(synced) = &existing {
            if miniblock.miniblock_num <= synced.last_miniblock_num {
                debug!(
                    stream_id = %stream_id,
                    miniblock_num = miniblock.miniblock_num,
                    last_miniblock_num = synced.last_miniblock_num,
                    "miniblock already applied"
                );
                return Ok(false);
            }
            let expected = synced.last_miniblock_num.checked_add(1);
            if expected != Some(miniblock.miniblock_num) {
                return Err(ClientError::MiniblockGap {
                    stream_id,
                    last_miniblock_num: synced.last_miniblock_num,
                    miniblock_num: miniblock.miniblock_num,
                });
            }
        }

        self.persistence.save_miniblock(miniblock).await?;
        let mut synced = existing.unwrap_or_else(|| PersistedSyncedStream {
            stream_id,
            sync_cookie: cookie.clone(),
            last_snapshot_miniblock_num: miniblock.header.prev_snapshot_miniblock_num,
            last_miniblock_num: miniblock.miniblock_num,
            minipool_events: Vec::new(),
        });

        if let Some(snapshot) = &miniblock.header.snapshot {
            self.persistence
                .save_snapshot(&stream_id, miniblock.miniblock_num, snapshot)
                .await?;
            synced.last_snapshot_miniblock_num = miniblock.miniblock_num;
        }

        let included: HashSet<EventHash> = miniblock.events.iter().map(|e| e.hash).collect();
        synced
            .minipool_events
            .retain(|e| !included.contains(&e.hash));
        synced.last_miniblock_num = miniblock.miniblock_num;
        synced.sync_cookie = cookie;
        self.persistence.save_synced_stream(&synced).await?;

        if let Some(view) = self.views.lock().await.get_mut(&stream_id) {
            let mut next = view.clone();
            next.add_events(
                miniblock.events.iter().cloned(),
                None,
                FoldOptions {
                    is_initial_load: false,
                    ignore_existing: true,
                },
            )?;
            *view = next;
        }

        debug!(
            stream_id = %stream_id,
            miniblock_num = miniblock.miniblock_num,
            minipool = synced.minipool_events.len(),
            "applied miniblock"
        );
        Ok(true)
    }

    /// Store a snapshot if it is newer than the cached one.
    pub async fn save_snapshot(
        &self,
        stream_id: &StreamId,
        miniblock_num: i64,
        snapshot: &Snapshot,
    ) -> Result<bool> {
        Ok(self
            .persistence
            .save_snapshot(stream_id, miniblock_num, snapshot)
            .await?)
    }

    pub fn set_high_priority_streams(&self, stream_ids: &[StreamId]) {
        self.persistence.set_high_priority_streams(stream_ids);
    }

    /// Write queued access times now.
    pub async fn flush(&self) -> Result<usize> {
        Ok(self.persistence.flush_scratch().await?)
    }

    async fn decrypt_into(
        &self,
        stream_id: &StreamId,
        hash: EventHash,
        data: &EncryptedData,
        report: &mut IngestReport,
    ) -> Result<()> {
        match self.crypto.decrypt_group_event(stream_id, data).await {
            Ok(cleartext) => {
                if self.config.cache_cleartexts {
                    self.persistence.save_cleartext(&hash, &cleartext).await?;
                }
                report.decrypted.insert(hash, cleartext);
            }
            Err(e) => {
                warn!(
                    stream_id = %stream_id,
                    event = %hash,
                    session_id = %data.session_id,
                    error = %e,
                    "could not decrypt message"
                );
                report.undecryptable.push(hash);
            }
        }
        Ok(())
    }

    /// Track events not yet in a miniblock on the persisted pointer.
    async fn append_minipool(&self, stream_id: &StreamId, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let _guard = self.pointer_guard.lock().await;
        let Some(mut synced) = self.persistence.get_synced_stream(stream_id).await? else {
            return Ok(());
        };

        let known: HashSet<EventHash> = synced.minipool_events.iter().map(|e| e.hash).collect();
        synced
            .minipool_events
            .extend(events.iter().filter(|e| !known.contains(&e.hash)).cloned());
        self.persistence.save_synced_stream(&synced).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::{ErrorCode, Keypair};
    use strand_crypto::MemoryCryptoStore;
    use strand_store::MemoryAdapter;
    use strand_testkit::StreamFixture;

    async fn client(adapter: MemoryAdapter) -> StreamClient<MemoryAdapter, MemoryCryptoStore> {
        StreamClient::open(
            SignerContext::new(Keypair::generate()),
            adapter,
            MemoryCryptoStore::new(),
            ClientConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_message_folds_and_caches() {
        let client = client(MemoryAdapter::new()).await;
        let stream_id = client.create_stream(StreamKind::Channel).await.unwrap();

        let first = client.send_message(&stream_id, "hello", None).await.unwrap();
        let second = client
            .send_message(&stream_id, "reply", Some(first))
            .await
            .unwrap();

        let view = client.view(&stream_id).await.unwrap();
        assert_eq!(view.messages().len(), 2);
        assert_eq!(view.leaf_event_hashes(), vec![second]);
        assert!(view.messages()[&first].is_top_level());

        let cached = client.persistence().get_cleartext(&first).await.unwrap();
        assert_eq!(cached, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_send_requires_loaded_stream() {
        let client = client(MemoryAdapter::new()).await;
        let unknown = StreamId::random(StreamKind::Channel);
        let err = client.send_message(&unknown, "hi", None).await.unwrap_err();
        assert!(matches!(err, ClientError::StreamNotLoaded(id) if id == unknown));
        assert_eq!(err.code(), None);
    }

    #[tokio::test]
    async fn test_ingest_rejects_tampered_event() {
        let alice = client(MemoryAdapter::new()).await;
        let bob = client(MemoryAdapter::new()).await;
        let stream_id = alice.create_stream(StreamKind::Channel).await.unwrap();

        let mut events: Vec<Event> = alice.view(&stream_id).await.unwrap().timeline().cloned().collect();
        events[0].base.created_at_epoch_ms += 1;

        let err = bob.ingest_events(&stream_id, events).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BadEventId));
        assert!(bob.view(&stream_id).await.is_none());
    }

    #[tokio::test]
    async fn test_ingest_batch_is_atomic() {
        let alice = client(MemoryAdapter::new()).await;
        let bob = client(MemoryAdapter::new()).await;
        let stream_id = alice.create_stream(StreamKind::Channel).await.unwrap();
        let inception: Vec<Event> = alice.view(&stream_id).await.unwrap().timeline().cloned().collect();
        bob.ingest_events(&stream_id, inception.clone()).await.unwrap();

        let ok = EventBuilder::new(Payload::text("fine"))
            .prev(inception[0].hash)
            .sign(alice.signer())
            .unwrap();
        let second_inception = EventBuilder::new(Payload::inception(stream_id, StreamKind::Channel))
            .sign(alice.signer())
            .unwrap();

        let err = bob
            .ingest_events(&stream_id, vec![ok, second_inception])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::StreamBadEvent));
        assert_eq!(bob.view(&stream_id).await.unwrap().event_count(), 1);
    }

    #[tokio::test]
    async fn test_undecryptable_until_key_import() {
        let alice = client(MemoryAdapter::new()).await;
        let bob = client(MemoryAdapter::new()).await;
        let stream_id = alice.create_stream(StreamKind::Channel).await.unwrap();
        let hash = alice.send_message(&stream_id, "secret", None).await.unwrap();

        let events: Vec<Event> = alice.view(&stream_id).await.unwrap().timeline().cloned().collect();
        let report = bob.ingest_events(&stream_id, events.clone()).await.unwrap();
        assert_eq!(report.folded, 2);
        assert_eq!(report.undecryptable, vec![hash]);

        // Re-ingesting known events is a no-op
        let again = bob.ingest_events(&stream_id, events).await.unwrap();
        assert_eq!(again, IngestReport::default());

        let keys = alice.crypto().export_group_sessions(&stream_id).await.unwrap();
        let imported = bob.crypto().import_session_keys(&stream_id, &keys).await;
        assert_eq!(imported.imported, 1);

        let report = bob.retry_decryption(&stream_id).await.unwrap();
        assert_eq!(report.decrypted[&hash], b"secret".to_vec());
        assert!(report.undecryptable.is_empty());

        // Cached now, so nothing is left to retry
        let report = bob.retry_decryption(&stream_id).await.unwrap();
        assert!(report.decrypted.is_empty());
    }

    #[tokio::test]
    async fn test_apply_miniblock_checks_cookie() {
        let client = client(MemoryAdapter::new()).await;
        let stream_id = client.create_stream(StreamKind::Channel).await.unwrap();
        let events: Vec<Event> = client.view(&stream_id).await.unwrap().timeline().cloned().collect();
        let miniblock = Miniblock {
            stream_id,
            miniblock_num: 0,
            header: strand_core::MiniblockHeader {
                prev_miniblock_hash: EventHash::ZERO,
                prev_snapshot_miniblock_num: 0,
                snapshot: None,
            },
            events,
        };

        let err = client
            .apply_miniblock(
                &miniblock,
                SyncCookie {
                    stream_id,
                    generation: 2,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::CookieMismatch { generation: 2, .. }));
        assert!(client.persistence().get_miniblock(&stream_id, 0).await.unwrap().is_none());
    }

    fn cookie_for(miniblock: &Miniblock) -> SyncCookie {
        SyncCookie {
            stream_id: miniblock.stream_id,
            generation: miniblock.miniblock_num + 1,
        }
    }

    #[tokio::test]
    async fn test_reapplied_miniblock_does_not_move_pointer_back() {
        let client = client(MemoryAdapter::new()).await;
        let mut stream = StreamFixture::new(StreamKind::Channel);
        stream.message("zero");
        let mb0 = stream.seal_miniblock(true);
        stream.message("one");
        let mb1 = stream.seal_miniblock(false);
        stream.message("two");
        let mb2 = stream.seal_miniblock(false);

        for mb in [&mb0, &mb1, &mb2] {
            assert!(client.apply_miniblock(mb, cookie_for(mb)).await.unwrap());
        }
        assert!(!client.apply_miniblock(&mb1, cookie_for(&mb1)).await.unwrap());

        let synced = client
            .persistence()
            .get_synced_stream(&stream.stream_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(synced.last_miniblock_num, 2);
        assert_eq!(synced.sync_cookie.generation, 3);
        assert!(client.load_stream(&stream.stream_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_miniblock_gap_is_rejected() {
        let client = client(MemoryAdapter::new()).await;
        let mut stream = StreamFixture::new(StreamKind::Channel);
        stream.message("zero");
        let mb0 = stream.seal_miniblock(true);
        stream.message("one");
        stream.seal_miniblock(false);
        stream.message("two");
        let mb2 = stream.seal_miniblock(false);

        client.apply_miniblock(&mb0, cookie_for(&mb0)).await.unwrap();
        let err = client
            .apply_miniblock(&mb2, cookie_for(&mb2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::MiniblockGap {
                last_miniblock_num: 0,
                miniblock_num: 2,
                ..
            }
        ));

        // Nothing of the rejected miniblock was persisted
        assert!(client
            .persistence()
            .get_miniblock(&stream.stream_id, 2)
            .await
            .unwrap()
            .is_none());
        assert!(client.load_stream(&stream.stream_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_miniblock_rejects_tampered_event() {
        let client = client(MemoryAdapter::new()).await;
        let mut stream = StreamFixture::new(StreamKind::Channel);
        stream.message("hello");
        let mut mb0 = stream.seal_miniblock(true);
        mb0.events[1].base.created_at_epoch_ms += 1;

        let err = client
            .apply_miniblock(&mb0, cookie_for(&mb0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BadEventId));
        assert!(client
            .persistence()
            .get_synced_stream(&stream.stream_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cookie_generation_overflow_is_a_mismatch() {
        let client = client(MemoryAdapter::new()).await;
        let mut stream = StreamFixture::new(StreamKind::Channel);
        let mb0 = stream.seal_miniblock(true);
        let cookie = SyncCookie {
            stream_id: stream.stream_id,
            generation: i64::MIN,
        };
        let err = client.apply_miniblock(&mb0, cookie).await.unwrap_err();
        assert!(matches!(err, ClientError::CookieMismatch { .. }));
    }
}
