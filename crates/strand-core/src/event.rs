//! Event: the atomic, signed unit of a stream.
//!
//! An event is immutable. Its hash binds every base field, and its signature
//! recovers either the creator's key or an authorized delegate key.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_base_bytes;
use crate::crypto::{domain_hash, Keypair, PublicKey, Signature};
use crate::error::CoreError;
use crate::payload::Payload;
use crate::types::{Address, EventHash};

/// Length of the per-event uniqueness salt.
pub const SALT_LEN: usize = 16;

/// The signed portion of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBase {
    /// Account that authored the event.
    pub creator_address: Address,

    /// Present when the event is signed by a delegate key.
    pub delegate_sig: Option<Signature>,

    /// Random nonce, so identical payloads yield distinct events.
    pub salt: [u8; SALT_LEN],

    /// Hashes this event extends, in order.
    pub prev_events: Vec<EventHash>,

    /// Author-claimed creation time (Unix milliseconds). Untrusted.
    pub created_at_epoch_ms: i64,

    pub payload: Payload,
}

impl EventBase {
    /// Recompute `domain_hash(canonical_base_bytes(self))`.
    pub fn compute_hash(&self) -> Result<EventHash, CoreError> {
        Ok(domain_hash(&canonical_base_bytes(self)?))
    }
}

/// A signed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub hash: EventHash,
    pub signature: Signature,
    pub base: EventBase,
}

impl Event {
    pub fn creator(&self) -> &Address {
        &self.base.creator_address
    }

    pub fn prev_events(&self) -> &[EventHash] {
        &self.base.prev_events
    }

    pub fn payload(&self) -> &Payload {
        &self.base.payload
    }
}

/// Everything needed to author events: the signing key plus, for delegated
/// keys, the creator address and the proof that the creator authorized it.
#[derive(Clone)]
pub struct SignerContext {
    signer: Keypair,
    creator_address: Address,
    delegate_sig: Option<Signature>,
}

impl SignerContext {
    /// Sign directly with the primary account key.
    pub fn new(primary: Keypair) -> Self {
        let creator_address = primary.address();
        Self {
            signer: primary,
            creator_address,
            delegate_sig: None,
        }
    }

    /// Sign with `delegate`, authorized by `primary`.
    pub fn delegated(primary: &Keypair, delegate: Keypair) -> Result<Self, CoreError> {
        let delegate_sig = make_delegate_sig(primary, &delegate.public_key())?;
        Ok(Self {
            creator_address: primary.address(),
            signer: delegate,
            delegate_sig: Some(delegate_sig),
        })
    }

    /// Rebuild a delegated context from stored parts.
    pub fn from_parts(delegate: Keypair, creator_address: Address, delegate_sig: Signature) -> Self {
        Self {
            signer: delegate,
            creator_address,
            delegate_sig: Some(delegate_sig),
        }
    }

    pub fn creator_address(&self) -> Address {
        self.creator_address
    }

    pub fn signer_public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    pub fn delegate_sig(&self) -> Option<&Signature> {
        self.delegate_sig.as_ref()
    }

    /// Sign an arbitrary 32-byte hash with the context's key.
    pub fn sign_hash(&self, hash: &EventHash) -> Result<Signature, CoreError> {
        self.signer.sign(hash.as_bytes())
    }
}

impl std::fmt::Debug for SignerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerContext")
            .field("creator_address", &self.creator_address)
            .field("delegated", &self.delegate_sig.is_some())
            .finish()
    }
}

/// The primary key signs `domain_hash(delegate_public_key)`.
pub fn make_delegate_sig(primary: &Keypair, delegate: &PublicKey) -> Result<Signature, CoreError> {
    let hash = domain_hash(delegate.as_bytes());
    primary.sign(hash.as_bytes())
}

/// Builder for creating events.
pub struct EventBuilder {
    payload: Payload,
    prev_events: Vec<EventHash>,
    created_at_epoch_ms: Option<i64>,
    salt: Option<[u8; SALT_LEN]>,
}

impl EventBuilder {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            prev_events: Vec::new(),
            created_at_epoch_ms: None,
            salt: None,
        }
    }

    /// Add a previous event hash.
    pub fn prev(mut self, hash: EventHash) -> Self {
        self.prev_events.push(hash);
        self
    }

    /// Set all previous event hashes.
    pub fn prevs(mut self, hashes: impl IntoIterator<Item = EventHash>) -> Self {
        self.prev_events = hashes.into_iter().collect();
        self
    }

    /// Set the creation timestamp (defaults to now).
    pub fn created_at(mut self, epoch_ms: i64) -> Self {
        self.created_at_epoch_ms = Some(epoch_ms);
        self
    }

    /// Set the salt (defaults to random). Only useful for fixed test vectors.
    pub fn salt(mut self, salt: [u8; SALT_LEN]) -> Self {
        self.salt = Some(salt);
        self
    }

    /// Build the base, hash it, and sign it.
    pub fn sign(self, context: &SignerContext) -> Result<Event, CoreError> {
        if self.prev_events.is_empty() && !self.payload.is_inception() {
            return Err(CoreError::BadPrevEvents(
                "prev events are required for non-inception payloads".into(),
            ));
        }

        let salt = self.salt.unwrap_or_else(|| {
            let mut salt = [0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            salt
        });

        let base = EventBase {
            creator_address: context.creator_address,
            delegate_sig: context.delegate_sig,
            salt,
            prev_events: self.prev_events,
            created_at_epoch_ms: self.created_at_epoch_ms.unwrap_or_else(now_millis),
            payload: self.payload,
        };

        let hash = base.compute_hash()?;
        let signature = context.sign_hash(&hash)?;
        Ok(Event {
            hash,
            signature,
            base,
        })
    }
}

/// Create and sign an event.
///
/// `prev_events` must be strict `0x` + 64 lowercase hex hashes; it may only be
/// empty for an inception payload.
pub fn make_event<S: AsRef<str>>(
    context: &SignerContext,
    payload: Payload,
    prev_events: &[S],
) -> Result<Event, CoreError> {
    let prevs = prev_events
        .iter()
        .map(|s| EventHash::parse(s.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    EventBuilder::new(payload).prevs(prevs).sign(context)
}

/// Sign each payload against the same `prev_events`.
pub fn make_events<S: AsRef<str>>(
    context: &SignerContext,
    payloads: Vec<Payload>,
    prev_events: &[S],
) -> Result<Vec<Event>, CoreError> {
    payloads
        .into_iter()
        .map(|payload| make_event(context, payload, prev_events))
        .collect()
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::stream::{StreamId, StreamKind};

    const PREV: &str = "0x8dc27dbd6fc775e3a05c509c6eb1c63c4ab5bc6e7010bf9a9a80a42ae1ea56b0";

    #[test]
    fn test_make_event_hash_matches_base() {
        let ctx = SignerContext::new(Keypair::generate());
        let event = make_event(&ctx, Payload::text("Hello, World!"), &[PREV]).unwrap();
        assert_eq!(event.hash, event.base.compute_hash().unwrap());
        assert_eq!(event.base.creator_address, ctx.creator_address());
        assert_eq!(event.prev_events()[0].to_hex(), PREV);
    }

    #[test]
    fn test_salt_makes_events_distinct() {
        let ctx = SignerContext::new(Keypair::generate());
        let a = make_event(&ctx, Payload::text("Hello, World!"), &[PREV]).unwrap();
        let b = make_event(&ctx, Payload::text("Hello, World!"), &[PREV]).unwrap();
        assert_ne!(a.hash, b.hash);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_empty_prevs_only_for_inception() {
        let ctx = SignerContext::new(Keypair::generate());
        let err = make_event::<&str>(&ctx, Payload::text("hi"), &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadPrevEvents);

        let stream_id = StreamId::random(StreamKind::Channel);
        let inception = make_event::<&str>(
            &ctx,
            Payload::inception(stream_id, StreamKind::Channel),
            &[],
        );
        assert!(inception.is_ok());
    }

    #[test]
    fn test_malformed_prev_rejected_before_signing() {
        let ctx = SignerContext::new(Keypair::generate());
        for bad in [
            PREV.to_uppercase(),
            PREV[..PREV.len() - 1].to_string(),
            format!("{}0", PREV),
        ] {
            let err = make_event(&ctx, Payload::text("hi"), &[bad]).unwrap_err();
            assert_eq!(err.code(), ErrorCode::BadHashFormat);
        }
    }

    #[test]
    fn test_delegated_context_records_sig() {
        let primary = Keypair::generate();
        let ctx = SignerContext::delegated(&primary, Keypair::generate()).unwrap();
        let event = make_event(&ctx, Payload::text("from device"), &[PREV]).unwrap();
        assert_eq!(event.base.creator_address, primary.address());
        assert!(event.base.delegate_sig.is_some());
    }

    #[test]
    fn test_make_events_batch() {
        let ctx = SignerContext::new(Keypair::generate());
        let events = make_events(
            &ctx,
            vec![Payload::text("a"), Payload::text("b")],
            &[PREV],
        )
        .unwrap();
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].hash, events[1].hash);
    }
}
