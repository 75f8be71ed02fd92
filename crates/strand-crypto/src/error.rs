//! Error types for the encryption layer.

use thiserror::Error;

/// Errors that can occur during session or encryption operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// `init()` has not produced an account yet.
    #[error("device account is not initialized")]
    AccountNotInitialized,

    /// The account exists but publishes no fallback key.
    #[error("device has no fallback key")]
    MissingFallbackKey,

    /// A pre-key message referenced a fallback key we no longer hold.
    #[error("unknown fallback key: {0}")]
    UnknownFallbackKey(String),

    /// The bootstrap path produced or received an established-session
    /// message where only pre-key messages are allowed.
    #[error("unexpected {got} message for device {device}")]
    UnexpectedMessageType { device: String, got: &'static str },

    /// No outbound group session exists for the stream.
    #[error("no outbound group session for stream {0}")]
    NoOutboundSession(String),

    /// The group key for a message has not arrived yet.
    #[error("missing group session {session_id} for stream {stream_id}")]
    KeyMissing {
        stream_id: String,
        session_id: String,
    },

    /// An imported session key decodes to a different session id.
    #[error("session id mismatch: claimed {claimed}, key is for {actual}")]
    SessionIdMismatch { claimed: String, actual: String },

    /// The message index precedes the first index we hold a key for.
    #[error("message index {index} is older than first known index {first_known}")]
    MessageIndexTooOld { index: u32, first_known: u32 },

    /// The message index would require advancing a ratchet too far.
    #[error("message index {index} is too far ahead of {current}")]
    MessageIndexTooFar { index: u32, current: u32 },

    /// Plaintext exceeds the configured maximum.
    #[error("plaintext too long: {len} bytes (max {max})")]
    PlaintextTooLong { len: usize, max: usize },

    /// Malformed key material.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Crypto store failure.
    #[error("crypto store error: {0}")]
    Store(String),
}

impl CryptoError {
    /// True for errors that mean "retry once the key arrives".
    pub fn is_key_missing(&self) -> bool {
        matches!(self, CryptoError::KeyMissing { .. })
    }
}

/// Result type for encryption operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
