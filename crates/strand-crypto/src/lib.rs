//! # Strand Crypto
//!
//! End-to-end encryption for strand streams.
//!
//! ## Overview
//!
//! Encryption runs in two layers:
//!
//! 1. **Bootstrap sessions**: pairwise sessions between two devices, started
//!    from the recipient's published fallback key. Every message on this
//!    path is a pre-key message, so the recipient can always derive the
//!    session from the message alone. The bootstrap layer carries group
//!    session keys, never stream content.
//! 2. **Group sessions**: one outbound ratchet per stream per device. Stream
//!    events are encrypted with it, and its session key is shared with the
//!    other members over bootstrap sessions.
//!
//! [`EncryptionSessionManager`] ties both layers to a [`CryptoStore`].
//! Everything persisted is sealed with a [`PickleKey`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strand_crypto::{EncryptionConfig, EncryptionSessionManager, MemoryCryptoStore};
//! use strand_core::{StreamId, StreamKind};
//!
//! # async fn run() -> strand_crypto::Result<()> {
//! let mut device = EncryptionSessionManager::new(MemoryCryptoStore::new(), EncryptionConfig::default());
//! device.init().await?;
//!
//! let stream_id = StreamId::random(StreamKind::Channel);
//! let encrypted = device.encrypt_group_event(&stream_id, b"hello").await?;
//! let plaintext = device.decrypt_group_event(&stream_id, &encrypted).await?;
//! assert_eq!(plaintext, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod bootstrap;
pub mod config;
pub mod envelope;
pub mod error;
pub mod group;
pub mod keys;
pub mod manager;
pub mod store;

pub use account::Account;
pub use bootstrap::{BootstrapMessage, BootstrapSession, ChainMessage, MessageType, PreKeyMessage};
pub use config::EncryptionConfig;
pub use envelope::{EncryptionFormat, PickleKey, Sealed};
pub use error::{CryptoError, Result};
pub use group::{GroupAlgorithm, GroupMessage, InboundGroupSession, OutboundGroupSession, SessionKey};
pub use keys::{Curve25519PublicKey, Curve25519SecretKey, MessageKey, MessageNonce, SharedSecret};
pub use manager::{
    AddInboundOutcome, BootstrapCiphertext, DeviceRecipient, EncryptionDevice,
    EncryptionSessionManager, ExportedDevice, ExportedGroupSession, ExportedOutboundSession,
    ImportReport,
};
pub use store::{CryptoStore, MemoryCryptoStore, StoredGroupSession};
