//! Test fixtures and helpers.
//!
//! Wallets for signing, and a stream builder that produces chained events,
//! miniblocks and sync pointers the way a node would hand them out.

use std::collections::BTreeSet;

use strand_core::{
    Address, Event, EventBuilder, EventHash, Keypair, MemberSnapshot, MembershipOp, MessageBody,
    MessagePayload, Miniblock, MiniblockHeader, Payload, SignerContext, Snapshot, StreamId,
    StreamKind, SyncCookie,
};
use strand_store::PersistedSyncedStream;

/// A signing identity.
#[derive(Debug, Clone)]
pub struct TestWallet {
    pub keypair: Keypair,
    pub context: SignerContext,
}

impl TestWallet {
    /// A wallet with a random key.
    pub fn new() -> Self {
        Self::from_keypair(Keypair::generate())
    }

    /// A wallet with a fixed secret scalar.
    pub fn with_secret(secret: [u8; 32]) -> Self {
        Self::from_keypair(Keypair::from_secret_bytes(&secret).expect("secret scalar in range"))
    }

    /// A wallet whose events are signed by a delegate key on behalf of
    /// `keypair`.
    pub fn delegated() -> Self {
        let keypair = Keypair::generate();
        let context =
            SignerContext::delegated(&keypair, Keypair::generate()).expect("delegate signature");
        Self { keypair, context }
    }

    fn from_keypair(keypair: Keypair) -> Self {
        Self {
            context: SignerContext::new(keypair.clone()),
            keypair,
        }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }
}

impl Default for TestWallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic wallets for multi-party tests.
pub fn test_wallets(count: usize) -> Vec<TestWallet> {
    (0..count)
        .map(|i| {
            let mut secret = [0u8; 32];
            secret[31] = i as u8 + 1;
            TestWallet::with_secret(secret)
        })
        .collect()
}

/// Builds one stream's history: events chained over the current leaf,
/// sealed into numbered miniblocks on demand.
#[derive(Debug, Clone)]
pub struct StreamFixture {
    pub wallet: TestWallet,
    pub stream_id: StreamId,
    pub inception: Event,
    pending: Vec<Event>,
    leaf: EventHash,
    members: BTreeSet<Address>,
    next_miniblock: i64,
    last_snapshot: i64,
    prev_miniblock_hash: EventHash,
}

impl StreamFixture {
    pub fn new(kind: StreamKind) -> Self {
        Self::with_wallet(TestWallet::new(), kind)
    }

    pub fn with_wallet(wallet: TestWallet, kind: StreamKind) -> Self {
        let stream_id = StreamId::random(kind);
        let inception = EventBuilder::new(Payload::inception(stream_id, kind))
            .sign(&wallet.context)
            .expect("sign inception");
        Self {
            wallet,
            stream_id,
            leaf: inception.hash,
            pending: vec![inception.clone()],
            inception,
            members: BTreeSet::new(),
            next_miniblock: 0,
            last_snapshot: 0,
            prev_miniblock_hash: EventHash::ZERO,
        }
    }

    /// Sign `payload` over the current leaf and queue it.
    pub fn push(&mut self, payload: Payload) -> EventHash {
        let event = EventBuilder::new(payload)
            .prev(self.leaf)
            .sign(&self.wallet.context)
            .expect("sign event");
        self.leaf = event.hash;
        self.pending.push(event);
        self.leaf
    }

    pub fn message(&mut self, text: &str) -> EventHash {
        self.push(Payload::text(text))
    }

    pub fn reply(&mut self, text: &str, to: EventHash) -> EventHash {
        self.push(Payload::Message(MessagePayload {
            reply_to: Some(to),
            body: MessageBody::Text(text.to_string()),
        }))
    }

    pub fn join(&mut self, user: Address) -> EventHash {
        self.members.insert(user);
        self.push(Payload::membership(MembershipOp::Join, user))
    }

    /// Events not sealed into a miniblock yet.
    pub fn pending(&self) -> &[Event] {
        &self.pending
    }

    /// Seal the pending events into the next miniblock, optionally with a
    /// snapshot of the current members.
    pub fn seal_miniblock(&mut self, with_snapshot: bool) -> Miniblock {
        let miniblock_num = self.next_miniblock;
        let snapshot = with_snapshot.then(|| self.snapshot_at(miniblock_num));
        let events = std::mem::take(&mut self.pending);

        let miniblock = Miniblock {
            stream_id: self.stream_id,
            miniblock_num,
            header: MiniblockHeader {
                prev_miniblock_hash: self.prev_miniblock_hash,
                prev_snapshot_miniblock_num: self.last_snapshot,
                snapshot,
            },
            events,
        };

        if with_snapshot {
            self.last_snapshot = miniblock_num;
        }
        self.prev_miniblock_hash = miniblock
            .events
            .last()
            .map(|e| e.hash)
            .unwrap_or(self.prev_miniblock_hash);
        self.next_miniblock += 1;
        miniblock
    }

    pub fn snapshot_at(&self, miniblock_num: i64) -> Snapshot {
        Snapshot {
            stream_id: self.stream_id,
            miniblock_num,
            members: self
                .members
                .iter()
                .map(|user| MemberSnapshot {
                    user: *user,
                    username_event: None,
                    display_name_event: None,
                })
                .collect(),
            channel_properties_event: None,
        }
    }

    /// Cookie after the last sealed miniblock.
    pub fn cookie(&self) -> SyncCookie {
        SyncCookie {
            stream_id: self.stream_id,
            generation: self.next_miniblock,
        }
    }

    /// A consistent sync pointer for everything sealed so far, with the
    /// pending events as the minipool.
    pub fn pointer(&self) -> PersistedSyncedStream {
        PersistedSyncedStream {
            stream_id: self.stream_id,
            sync_cookie: self.cookie(),
            last_snapshot_miniblock_num: self.last_snapshot,
            last_miniblock_num: self.next_miniblock - 1,
            minipool_events: self.pending.clone(),
        }
    }
}
