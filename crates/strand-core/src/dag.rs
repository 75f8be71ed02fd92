//! Stream DAG: folds authenticated events into a materialized stream view.
//!
//! Events form a DAG through `prev_events`. The view tracks the leaf set,
//! the events that no other known event references yet. New events should
//! extend exactly those leaves.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::StreamError;
use crate::event::Event;
use crate::miniblock::Snapshot;
use crate::payload::{ChannelOp, MembershipOp, MessagePayload, Payload};
use crate::stream::{StreamId, StreamKind};
use crate::types::{Address, EventHash};

/// Notifications emitted while folding events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamNotification {
    /// The inception fixed the stream kind.
    Inception { kind: StreamKind },
    /// Someone was invited to, joined, or left this stream.
    Membership { op: MembershipOp, user: Address },
    /// User-stream marker for another stream changed.
    UserStreamMembership { op: MembershipOp, stream_id: StreamId },
    /// A channel was created or deleted in this space.
    Channel { op: ChannelOp, channel_id: StreamId },
    /// A message was stored.
    Message { event: EventHash, top_level: bool },
    /// A batch completed and this was the stream's first load.
    Initialized,
    /// A batch completed on an already loaded stream.
    Updated,
}

/// Receives notifications from a [`StreamStateView`].
pub trait StreamObserver {
    fn notify(&mut self, stream_id: &StreamId, notification: StreamNotification);
}

impl StreamObserver for Vec<StreamNotification> {
    fn notify(&mut self, _stream_id: &StreamId, notification: StreamNotification) {
        self.push(notification);
    }
}

/// Options for folding a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldOptions {
    /// Emit `Initialized` instead of `Updated` after the batch.
    pub is_initial_load: bool,
    /// Skip events already folded instead of failing with `DUPLICATE_EVENT`.
    pub ignore_existing: bool,
}

impl FoldOptions {
    pub fn initial() -> Self {
        Self {
            is_initial_load: true,
            ignore_existing: false,
        }
    }

    pub fn update() -> Self {
        Self::default()
    }
}

/// Materialized projection of one stream. Mutated only by folding events.
#[derive(Debug, Clone)]
pub struct StreamStateView {
    stream_id: StreamId,
    kind: Option<StreamKind>,
    events: HashMap<EventHash, Event>,
    /// Fold order.
    timeline: Vec<EventHash>,
    leaves: BTreeSet<EventHash>,
    /// Every hash named as a prev by a folded event, seen or not.
    referenced: HashSet<EventHash>,
    joined: BTreeSet<Address>,
    invited: BTreeSet<Address>,
    messages: BTreeMap<EventHash, MessagePayload>,
    channels: BTreeSet<StreamId>,
    /// Latest user-stream marker per referenced stream.
    user_streams: BTreeMap<StreamId, MembershipOp>,
}

impl StreamStateView {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            kind: None,
            events: HashMap::new(),
            timeline: Vec::new(),
            leaves: BTreeSet::new(),
            referenced: HashSet::new(),
            joined: BTreeSet::new(),
            invited: BTreeSet::new(),
            messages: BTreeMap::new(),
            channels: BTreeSet::new(),
            user_streams: BTreeMap::new(),
        }
    }

    /// Seed a view from a snapshot instead of an inception.
    ///
    /// Events folded afterwards continue from the snapshot's membership.
    /// Pre-snapshot history is not part of the view.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, StreamError> {
        let kind = snapshot.stream_id.kind().ok_or_else(|| {
            StreamError::Internal(format!("unknown kind for stream {}", snapshot.stream_id))
        })?;
        let mut view = Self::new(snapshot.stream_id);
        view.kind = Some(kind);
        view.joined = snapshot.members.iter().map(|m| m.user).collect();
        Ok(view)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Folding
    // ─────────────────────────────────────────────────────────────────────────

    /// Fold one event into the view.
    pub fn add_event(
        &mut self,
        event: Event,
        observer: Option<&mut dyn StreamObserver>,
    ) -> Result<(), StreamError> {
        if self.events.contains_key(&event.hash) {
            return Err(StreamError::DuplicateEvent(event.hash));
        }
        self.check_payload_allowed(event.payload())?;

        let hash = event.hash;
        for prev in event.prev_events() {
            self.leaves.remove(prev);
            self.referenced.insert(*prev);
        }
        // A child folded earlier already supersedes this event
        if !self.referenced.contains(&hash) {
            self.leaves.insert(hash);
        }
        self.timeline.push(hash);
        let payload = event.base.payload.clone();
        self.events.insert(hash, event);

        let notification = self.apply_payload(hash, payload)?;
        if let Some(observer) = observer {
            observer.notify(&self.stream_id, notification);
        }
        Ok(())
    }

    /// Fold a batch in order, then emit one batch-level notification.
    pub fn add_events(
        &mut self,
        events: impl IntoIterator<Item = Event>,
        mut observer: Option<&mut dyn StreamObserver>,
        options: FoldOptions,
    ) -> Result<(), StreamError> {
        for event in events {
            if options.ignore_existing && self.events.contains_key(&event.hash) {
                continue;
            }
            let reborrowed = match observer {
                Some(ref mut o) => Some(&mut **o as &mut dyn StreamObserver),
                None => None,
            };
            self.add_event(event, reborrowed)?;
        }
        if let Some(observer) = observer {
            let batch = if options.is_initial_load {
                StreamNotification::Initialized
            } else {
                StreamNotification::Updated
            };
            observer.notify(&self.stream_id, batch);
        }
        Ok(())
    }

    fn check_payload_allowed(&self, payload: &Payload) -> Result<(), StreamError> {
        match (self.kind, payload) {
            (None, Payload::Inception(inception)) => {
                let expected = self.stream_id.kind();
                if expected != Some(inception.kind) || inception.stream_id != self.stream_id {
                    return Err(StreamError::InceptionKindMismatch {
                        declared: inception.kind,
                        expected,
                    });
                }
                Ok(())
            }
            (None, other) => Err(StreamError::NonInceptionFirst(other.kind())),
            (Some(_), Payload::Inception(_)) => Err(StreamError::DuplicateInception),
            (Some(kind), other) if !kind.allows(other.kind()) => {
                Err(StreamError::PayloadNotAllowed {
                    kind,
                    payload: other.kind(),
                })
            }
            (Some(_), _) => Ok(()),
        }
    }

    fn apply_payload(
        &mut self,
        hash: EventHash,
        payload: Payload,
    ) -> Result<StreamNotification, StreamError> {
        if self.kind.is_none() && !payload.is_inception() {
            return Err(StreamError::Internal(format!(
                "{:?} folded before inception",
                payload.kind()
            )));
        }

        let notification = match payload {
            Payload::Inception(inception) => {
                self.kind = Some(inception.kind);
                StreamNotification::Inception {
                    kind: inception.kind,
                }
            }
            Payload::Membership(m) => {
                match m.op {
                    MembershipOp::Invite => {
                        self.invited.insert(m.user);
                    }
                    MembershipOp::Join => {
                        self.invited.remove(&m.user);
                        self.joined.insert(m.user);
                    }
                    MembershipOp::Leave => {
                        self.invited.remove(&m.user);
                        self.joined.remove(&m.user);
                    }
                }
                StreamNotification::Membership {
                    op: m.op,
                    user: m.user,
                }
            }
            Payload::UserMembership(m) => {
                self.user_streams.insert(m.stream_id, m.op);
                StreamNotification::UserStreamMembership {
                    op: m.op,
                    stream_id: m.stream_id,
                }
            }
            Payload::Channel(c) => {
                match c.op {
                    ChannelOp::Created => {
                        self.channels.insert(c.channel_id);
                    }
                    ChannelOp::Deleted => {
                        self.channels.remove(&c.channel_id);
                    }
                }
                StreamNotification::Channel {
                    op: c.op,
                    channel_id: c.channel_id,
                }
            }
            Payload::Message(message) => {
                let top_level = message.is_top_level();
                self.messages.insert(hash, message);
                StreamNotification::Message {
                    event: hash,
                    top_level,
                }
            }
        };
        Ok(notification)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// The kind fixed by the inception, if folded.
    pub fn kind(&self) -> Option<StreamKind> {
        self.kind
    }

    pub fn is_initialized(&self) -> bool {
        self.kind.is_some()
    }

    pub fn event(&self, hash: &EventHash) -> Option<&Event> {
        self.events.get(hash)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Events in fold order.
    pub fn timeline(&self) -> impl Iterator<Item = &Event> {
        self.timeline.iter().filter_map(|h| self.events.get(h))
    }

    /// Current heads: the `prev_events` for the next event.
    pub fn leaf_event_hashes(&self) -> Vec<EventHash> {
        self.leaves.iter().copied().collect()
    }

    pub fn joined_users(&self) -> &BTreeSet<Address> {
        &self.joined
    }

    pub fn invited_users(&self) -> &BTreeSet<Address> {
        &self.invited
    }

    pub fn messages(&self) -> &BTreeMap<EventHash, MessagePayload> {
        &self.messages
    }

    pub fn channels(&self) -> &BTreeSet<StreamId> {
        &self.channels
    }

    /// Latest user-stream marker for `stream_id`.
    pub fn user_stream_membership(&self, stream_id: &StreamId) -> Option<MembershipOp> {
        self.user_streams.get(stream_id).copied()
    }
}

/// Compute the leaf set of an arbitrary event list, in input order.
pub fn find_leaf_event_hashes(events: &[Event]) -> Result<Vec<EventHash>, StreamError> {
    if events.is_empty() {
        return Err(StreamError::StreamEmpty);
    }

    let referenced: HashSet<&EventHash> = events.iter().flat_map(|e| e.prev_events()).collect();
    let leaves: Vec<EventHash> = events
        .iter()
        .map(|e| e.hash)
        .filter(|h| !referenced.contains(h))
        .collect();

    if leaves.is_empty() {
        return Err(StreamError::NoLeavesFound);
    }
    Ok(leaves)
}
