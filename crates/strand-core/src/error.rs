//! Error types for Strand Core.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::payload::PayloadKind;
use crate::stream::StreamKind;
use crate::types::EventHash;

/// Wire-stable error codes shared by every Strand component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    BadPublicKey,
    BadHashFormat,
    BadSignatureFormat,
    BadPrevEvents,
    BadEventId,
    BadEventSignature,
    BadDelegateSig,
    BadPayload,
    StreamEmpty,
    StreamBadEvent,
    DuplicateEvent,
    NoLeavesFound,
    InternalError,
}

impl ErrorCode {
    /// The SCREAMING_SNAKE name used in logs and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadPublicKey => "BAD_PUBLIC_KEY",
            ErrorCode::BadHashFormat => "BAD_HASH_FORMAT",
            ErrorCode::BadSignatureFormat => "BAD_SIGNATURE_FORMAT",
            ErrorCode::BadPrevEvents => "BAD_PREV_EVENTS",
            ErrorCode::BadEventId => "BAD_EVENT_ID",
            ErrorCode::BadEventSignature => "BAD_EVENT_SIGNATURE",
            ErrorCode::BadDelegateSig => "BAD_DELEGATE_SIG",
            ErrorCode::BadPayload => "BAD_PAYLOAD",
            ErrorCode::StreamEmpty => "STREAM_EMPTY",
            ErrorCode::StreamBadEvent => "STREAM_BAD_EVENT",
            ErrorCode::DuplicateEvent => "DUPLICATE_EVENT",
            ErrorCode::NoLeavesFound => "NO_LEAVES_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the hashing and signing primitives and from event construction.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("bad public key: {0}")]
    BadPublicKey(String),

    #[error("bad hash format: {0}")]
    BadHashFormat(String),

    #[error("invalid {what} length: expected {expected}, got {got}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("bad prev events: {0}")]
    BadPrevEvents(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("public key recovery failed")]
    RecoveryFailed,

    #[error("encoding error: {0}")]
    EncodingError(String),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::BadPublicKey(_) => ErrorCode::BadPublicKey,
            CoreError::BadHashFormat(_) => ErrorCode::BadHashFormat,
            CoreError::InvalidLength { what: "hash", .. } => ErrorCode::BadHashFormat,
            CoreError::InvalidLength { what: "public key", .. } => ErrorCode::BadPublicKey,
            CoreError::InvalidLength { .. } => ErrorCode::BadSignatureFormat,
            CoreError::BadPrevEvents(_) => ErrorCode::BadPrevEvents,
            CoreError::SigningFailed(_) | CoreError::RecoveryFailed => {
                ErrorCode::BadEventSignature
            }
            CoreError::EncodingError(_) => ErrorCode::InternalError,
        }
    }
}

/// Verification errors for signed events.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("bad prev events: expected exactly [{expected}], got {got:?}")]
    BadPrevEvents {
        expected: EventHash,
        got: Vec<EventHash>,
    },

    #[error("event id mismatch: claimed {claimed}, computed {computed}")]
    BadEventId {
        claimed: EventHash,
        computed: EventHash,
    },

    #[error("event signature is not valid")]
    BadEventSignature,

    #[error("delegate signature does not match creator address")]
    BadDelegateSig,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ValidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::BadPrevEvents { .. } => ErrorCode::BadPrevEvents,
            ValidationError::BadEventId { .. } => ErrorCode::BadEventId,
            ValidationError::BadEventSignature => ErrorCode::BadEventSignature,
            ValidationError::BadDelegateSig => ErrorCode::BadDelegateSig,
            ValidationError::Core(e) => e.code(),
        }
    }
}

/// Errors raised while folding events into a stream view.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream is empty")]
    StreamEmpty,

    #[error("first event of a stream must be an inception, got {0:?}")]
    NonInceptionFirst(PayloadKind),

    #[error("stream already has an inception event")]
    DuplicateInception,

    #[error("inception kind {declared:?} does not match stream id kind {expected:?}")]
    InceptionKindMismatch {
        declared: StreamKind,
        expected: Option<StreamKind>,
    },

    #[error("payload {payload:?} is not allowed in {kind:?} streams")]
    PayloadNotAllowed {
        kind: StreamKind,
        payload: PayloadKind,
    },

    #[error("event {0} already exists in stream")]
    DuplicateEvent(EventHash),

    #[error("no leaf events found")]
    NoLeavesFound,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl StreamError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StreamError::StreamEmpty => ErrorCode::StreamEmpty,
            StreamError::NonInceptionFirst(_)
            | StreamError::DuplicateInception
            | StreamError::InceptionKindMismatch { .. } => ErrorCode::StreamBadEvent,
            StreamError::PayloadNotAllowed { .. } => ErrorCode::BadPayload,
            StreamError::DuplicateEvent(_) => ErrorCode::DuplicateEvent,
            StreamError::NoLeavesFound => ErrorCode::NoLeavesFound,
            StreamError::Internal(_) => ErrorCode::InternalError,
        }
    }
}
