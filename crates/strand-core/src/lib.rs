//! # Strand Core
//!
//! Pure primitives for Strand: event hashing, signing, verification, and the
//! stream DAG.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over signed event data.
//!
//! ## Key Types
//!
//! - [`Event`] - The atomic, signed unit of a stream
//! - [`EventHash`] - Domain-separated Keccak-256 of the canonical event base
//! - [`SignerContext`] - Signing key plus optional delegate authorization
//! - [`StreamId`] - Stream identifier; its first byte encodes the [`StreamKind`]
//! - [`StreamStateView`] - Materialized projection of a stream's events
//!
//! ## Canonicalization
//!
//! Event bases are encoded using deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod dag;
pub mod error;
pub mod event;
pub mod miniblock;
pub mod payload;
pub mod stream;
pub mod types;
pub mod validation;

pub use canonical::canonical_base_bytes;
pub use crypto::{
    domain_hash, keccak256, public_key_to_address, recover_public_key, snapshot_hash,
    verify_signature, Keypair, PublicKey, Signature,
};
pub use dag::{find_leaf_event_hashes, FoldOptions, StreamNotification, StreamObserver, StreamStateView};
pub use error::{CoreError, ErrorCode, StreamError, ValidationError};
pub use event::{make_delegate_sig, make_event, make_events, Event, EventBase, EventBuilder, SignerContext};
pub use miniblock::{MemberSnapshot, Miniblock, MiniblockHeader, Snapshot, SyncCookie};
pub use payload::{
    ChannelOp, ChannelPayload, EncryptedData, InceptionPayload, MembershipOp, MembershipPayload,
    MessageBody, MessagePayload, Payload, PayloadKind, UserMembershipPayload,
};
pub use stream::{StreamId, StreamKind};
pub use types::{Address, EventHash};
pub use validation::{check_delegate_sig, check_event, check_event_signature, check_events, verify_event, VerifyOptions};
