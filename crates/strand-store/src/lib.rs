//! # Strand Store
//!
//! Durable cache of synced streams. A client resumes a stream from here
//! instead of refetching it, as long as the cached state is consistent.
//!
//! ## Overview
//!
//! Storage is split in two layers. A [`StorageAdapter`] exposes five record
//! models (cleartexts, synced streams, miniblocks, snapshots, scratch) with
//! transactional CRUD. [`SyncPersistenceStore`] sits on top and implements
//! the stream semantics: consistency-gated loading, cached scrollback,
//! monotonic snapshots, and debounced access-time tracking.
//!
//! ## Key Types
//!
//! - [`SyncPersistenceStore`] - Stream-level persistence operations
//! - [`StorageAdapter`] - The async trait for transactional record access
//! - [`SqliteAdapter`] - SQLite-based persistent storage
//! - [`MemoryAdapter`] - In-memory storage for tests
//! - [`LoadedStream`] - A consistency-checked starting point for a stream
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strand_store::{PersistenceConfig, SqliteAdapter, SyncPersistenceStore};
//! use strand_core::{StreamId, StreamKind};
//!
//! async fn example() {
//!     let adapter = SqliteAdapter::open("strand.db").unwrap();
//!     let store = SyncPersistenceStore::new(adapter, PersistenceConfig::default());
//!
//!     let stream_id = StreamId::random(StreamKind::Channel);
//!     match store.load_stream(&stream_id, None).await.unwrap() {
//!         Some(loaded) => println!("resuming at {}", loaded.persisted_synced_stream.last_miniblock_num),
//!         None => println!("nothing usable cached, fetch from the network"),
//!     }
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **All or nothing**: a miniblock range with any gap reads as empty
//! - **Monotonic snapshots**: an older or equal snapshot never replaces a newer one
//! - **Retried reads**: transient read failures are retried per [`RetryPolicy`]

pub mod config;
pub mod error;
pub mod memory;
pub mod migration;
pub mod model;
pub mod persistence;
pub mod retry;
pub mod scratch;
pub mod sqlite;
pub mod traits;

pub use config::PersistenceConfig;
pub use error::{Result, StoreError};
pub use memory::MemoryAdapter;
pub use model::{
    Filter, LoadedStream, LoadedStreams, Model, PersistedSyncedStream, PersistenceStats,
    RecordKey, ScratchData, StoredSnapshot, SCRATCH_ID,
};
pub use persistence::SyncPersistenceStore;
pub use retry::{with_retry, RetryPolicy};
pub use scratch::{apply_updates, ScratchQueue, ScratchUpdate};
pub use sqlite::SqliteAdapter;
pub use traits::{Records, StorageAdapter, TxMode};
