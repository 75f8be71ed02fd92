//! # Strand
//!
//! Client-side core of a decentralized chat protocol: signed event streams,
//! end-to-end encryption, and a local cache to resume streams from.
//!
//! ## Overview
//!
//! - **Events**: signed, hash-addressed units that form a DAG per stream
//! - **Streams**: folded into a [`StreamStateView`] of members, channels and messages
//! - **Encryption**: group-ratchet sessions per stream, keys shared over pairwise sessions
//! - **Persistence**: miniblocks, snapshots and cleartexts cached behind a consistency gate
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strand::{ClientConfig, StreamClient};
//! use strand::core::{Keypair, SignerContext, StreamKind};
//! use strand::crypto::MemoryCryptoStore;
//! use strand::store::SqliteAdapter;
//!
//! async fn example() {
//!     let signer = SignerContext::new(Keypair::generate());
//!     let adapter = SqliteAdapter::open("strand.db").unwrap();
//!
//!     let client = StreamClient::open(signer, adapter, MemoryCryptoStore::new(), ClientConfig::default())
//!         .await
//!         .unwrap();
//!
//!     let stream_id = client.create_stream(StreamKind::Channel).await.unwrap();
//!     let event = client.send_message(&stream_id, "hello", None).await.unwrap();
//!     println!("sent {event}");
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `strand::core` - Events, hashing, verification, the stream DAG
//! - `strand::crypto` - Encryption session manager
//! - `strand::store` - Sync persistence and storage adapters

pub mod client;
pub mod error;

pub use strand_core as core;
pub use strand_crypto as crypto;
pub use strand_store as store;

pub use client::{ClientConfig, IngestReport, ResumedStream, StreamClient};
pub use error::{ClientError, Result};

pub use strand_core::{
    Address, ErrorCode, Event, EventBuilder, EventHash, Keypair, Miniblock, Payload,
    SignerContext, Snapshot, StreamId, StreamKind, StreamStateView, SyncCookie,
};
