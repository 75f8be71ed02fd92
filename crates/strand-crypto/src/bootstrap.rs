//! Pairwise bootstrap sessions.
//!
//! A device that wants to send key material to another device agrees on a
//! root secret with three X25519 exchanges against the peer's identity key
//! and published fallback key:
//!
//! ```text
//! DH(I_a, F_b) || DH(E_a, I_b) || DH(E_a, F_b)
//! ```
//!
//! The root seeds one symmetric hash chain per direction. Until the
//! initiator hears back, every message it sends is a pre-key message that
//! carries everything the recipient needs to derive the same session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::envelope::{from_cbor, to_cbor, Sealed};
use crate::error::{CryptoError, Result};
use crate::keys::{kdf, ratchet_step, Curve25519PublicKey, Curve25519SecretKey, MessageKey};

const ROOT_CONTEXT: &str = "strand-bootstrap-v1-root";
const SESSION_ID_CONTEXT: &str = "strand-bootstrap-v1-session-id";
const INITIATOR_CHAIN_CONTEXT: &str = "strand-bootstrap-v1-initiator-chain";
const RESPONDER_CHAIN_CONTEXT: &str = "strand-bootstrap-v1-responder-chain";

/// Wire subtype of a bootstrap message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Carries the key agreement; can create a session on the receiving side.
    PreKey = 0,
    /// Needs an already established session.
    Normal = 1,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::PreKey => "pre-key",
            MessageType::Normal => "normal",
        }
    }
}

/// One message on a hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMessage {
    pub index: u32,
    pub sealed: Sealed,
}

/// Everything the recipient needs to derive the initiator's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMessage {
    pub session_id: String,
    pub identity_key: Curve25519PublicKey,
    pub ephemeral_key: Curve25519PublicKey,
    pub fallback_key: Curve25519PublicKey,
    pub message: ChainMessage,
}

/// A bootstrap message as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapMessage {
    PreKey(PreKeyMessage),
    Normal {
        session_id: String,
        message: ChainMessage,
    },
}

impl BootstrapMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            BootstrapMessage::PreKey(_) => MessageType::PreKey,
            BootstrapMessage::Normal { .. } => MessageType::Normal,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            BootstrapMessage::PreKey(m) => &m.session_id,
            BootstrapMessage::Normal { session_id, .. } => session_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}

/// Key agreement parameters the initiator repeats in every pre-key message.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreKeyInfo {
    identity_key: Curve25519PublicKey,
    ephemeral_key: Curve25519PublicKey,
    fallback_key: Curve25519PublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SendingChain {
    key: [u8; 32],
    index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReceivingChain {
    key: [u8; 32],
    index: u32,
    /// Message keys for indices we skipped over, by index.
    skipped: BTreeMap<u32, [u8; 32]>,
}

/// A pairwise session with one peer device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSession {
    session_id: String,
    their_identity_key: Curve25519PublicKey,
    their_fallback_key: Option<Curve25519PublicKey>,
    sending: SendingChain,
    receiving: ReceivingChain,
    /// Present until the initiator receives a reply.
    pending_prekey: Option<PreKeyInfo>,
}

impl BootstrapSession {
    /// Start a session as the initiator.
    pub fn outbound(
        our_identity: &Curve25519SecretKey,
        their_identity_key: &Curve25519PublicKey,
        their_fallback_key: &Curve25519PublicKey,
    ) -> Self {
        let ephemeral = Curve25519SecretKey::generate();
        let dh1 = our_identity.diffie_hellman(their_fallback_key);
        let dh2 = ephemeral.diffie_hellman(their_identity_key);
        let dh3 = ephemeral.diffie_hellman(their_fallback_key);
        let root = kdf(
            ROOT_CONTEXT,
            &[&dh1.as_bytes()[..], &dh2.as_bytes()[..], &dh3.as_bytes()[..]],
        );

        let identity_key = our_identity.public_key();
        let ephemeral_key = ephemeral.public_key();
        Self {
            session_id: session_id(&identity_key, &ephemeral_key, their_fallback_key),
            their_identity_key: *their_identity_key,
            their_fallback_key: Some(*their_fallback_key),
            sending: SendingChain {
                key: kdf(INITIATOR_CHAIN_CONTEXT, &[&root[..]]),
                index: 0,
            },
            receiving: ReceivingChain {
                key: kdf(RESPONDER_CHAIN_CONTEXT, &[&root[..]]),
                index: 0,
                skipped: BTreeMap::new(),
            },
            pending_prekey: Some(PreKeyInfo {
                identity_key,
                ephemeral_key,
                fallback_key: *their_fallback_key,
            }),
        }
    }

    /// Derive the responder side from a pre-key message.
    ///
    /// `our_fallback` must be the secret matching `message.fallback_key`.
    pub fn inbound(
        our_identity: &Curve25519SecretKey,
        our_fallback: &Curve25519SecretKey,
        message: &PreKeyMessage,
    ) -> Result<Self> {
        let dh1 = our_fallback.diffie_hellman(&message.identity_key);
        let dh2 = our_identity.diffie_hellman(&message.ephemeral_key);
        let dh3 = our_fallback.diffie_hellman(&message.ephemeral_key);
        let root = kdf(
            ROOT_CONTEXT,
            &[&dh1.as_bytes()[..], &dh2.as_bytes()[..], &dh3.as_bytes()[..]],
        );

        let expected = session_id(
            &message.identity_key,
            &message.ephemeral_key,
            &message.fallback_key,
        );
        if expected != message.session_id {
            return Err(CryptoError::DecryptionError(format!(
                "pre-key message session id {} does not match its keys",
                message.session_id
            )));
        }

        Ok(Self {
            session_id: expected,
            their_identity_key: message.identity_key,
            their_fallback_key: None,
            sending: SendingChain {
                key: kdf(RESPONDER_CHAIN_CONTEXT, &[&root[..]]),
                index: 0,
            },
            receiving: ReceivingChain {
                key: kdf(INITIATOR_CHAIN_CONTEXT, &[&root[..]]),
                index: 0,
                skipped: BTreeMap::new(),
            },
            pending_prekey: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn their_identity_key(&self) -> &Curve25519PublicKey {
        &self.their_identity_key
    }

    /// The fallback key an outbound session was created against.
    pub fn their_fallback_key(&self) -> Option<&Curve25519PublicKey> {
        self.their_fallback_key.as_ref()
    }

    /// True while outgoing messages are still pre-key messages.
    pub fn sends_prekey_messages(&self) -> bool {
        self.pending_prekey.is_some()
    }

    /// Encrypt and advance the sending chain.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<BootstrapMessage> {
        let (message_key, next) = ratchet_step(&self.sending.key);
        let message = ChainMessage {
            index: self.sending.index,
            sealed: Sealed::seal(plaintext, &message_key)?,
        };
        self.sending.key = next;
        self.sending.index += 1;

        Ok(match &self.pending_prekey {
            Some(info) => BootstrapMessage::PreKey(PreKeyMessage {
                session_id: self.session_id.clone(),
                identity_key: info.identity_key,
                ephemeral_key: info.ephemeral_key,
                fallback_key: info.fallback_key,
                message,
            }),
            None => BootstrapMessage::Normal {
                session_id: self.session_id.clone(),
                message,
            },
        })
    }

    /// Decrypt a message on the receiving chain.
    ///
    /// State only advances when the message authenticates. At most
    /// `max_skipped` message keys are held for out-of-order delivery.
    pub fn decrypt(&mut self, message: &ChainMessage, max_skipped: usize) -> Result<Vec<u8>> {
        let mut chain = self.receiving.clone();

        let message_key = if message.index < chain.index {
            let key = chain.skipped.remove(&message.index).ok_or(
                CryptoError::MessageIndexTooOld {
                    index: message.index,
                    first_known: chain.index,
                },
            )?;
            MessageKey::from_bytes(key)
        } else {
            let gap = (message.index - chain.index) as usize;
            if gap > max_skipped {
                return Err(CryptoError::MessageIndexTooFar {
                    index: message.index,
                    current: chain.index,
                });
            }
            while chain.index < message.index {
                let (skipped_key, next) = ratchet_step(&chain.key);
                chain.skipped.insert(chain.index, *skipped_key.as_bytes());
                chain.key = next;
                chain.index += 1;
            }
            let (message_key, next) = ratchet_step(&chain.key);
            chain.key = next;
            chain.index += 1;
            message_key
        };

        // Oldest skipped keys go first
        while chain.skipped.len() > max_skipped {
            chain.skipped.pop_first();
        }

        let plaintext = message.sealed.open(&message_key)?;
        self.receiving = chain;
        self.pending_prekey = None;
        Ok(plaintext)
    }
}

fn session_id(
    identity_key: &Curve25519PublicKey,
    ephemeral_key: &Curve25519PublicKey,
    fallback_key: &Curve25519PublicKey,
) -> String {
    hex::encode(kdf(
        SESSION_ID_CONTEXT,
        &[
            &identity_key.as_bytes()[..],
            &ephemeral_key.as_bytes()[..],
            &fallback_key.as_bytes()[..],
        ],
    ))
}
