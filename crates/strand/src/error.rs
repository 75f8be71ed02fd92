//! Error types for the stream client.

use strand_core::{CoreError, ErrorCode, StreamError, StreamId, ValidationError};
use strand_crypto::CryptoError;
use strand_store::StoreError;
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The stream has no view in this client; load or ingest it first.
    #[error("stream not loaded: {0}")]
    StreamNotLoaded(StreamId),

    /// A miniblock arrived with a cookie that does not describe it.
    #[error("miniblock {miniblock_num} of {stream_id} does not match cookie generation {generation}")]
    CookieMismatch {
        stream_id: StreamId,
        miniblock_num: i64,
        generation: i64,
    },

    /// A miniblock would leave a hole after the stream's sync pointer.
    #[error("miniblock {miniblock_num} of {stream_id} does not follow {last_miniblock_num}")]
    MiniblockGap {
        stream_id: StreamId,
        last_miniblock_num: i64,
        miniblock_num: i64,
    },
}

impl ClientError {
    /// Wire code for protocol errors. Encryption and storage failures are
    /// local and carry none.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Validation(e) => Some(e.code()),
            ClientError::Stream(e) => Some(e.code()),
            ClientError::Core(e) => Some(e.code()),
            ClientError::Crypto(_) | ClientError::Store(_) => None,
            ClientError::StreamNotLoaded(_)
            | ClientError::CookieMismatch { .. }
            | ClientError::MiniblockGap { .. } => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
