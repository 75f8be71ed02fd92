//! Device account: the long-term identity key plus rotating fallback keys.

use serde::{Deserialize, Serialize};

use crate::bootstrap::{BootstrapSession, PreKeyMessage};
use crate::error::{CryptoError, Result};
use crate::keys::{Curve25519PublicKey, Curve25519SecretKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FallbackKey {
    secret: Curve25519SecretKey,
    created_at_ms: i64,
    published: bool,
}

/// Key material owned by one device.
///
/// A rotated-out fallback key is kept until [`Account::forget_old_fallback_key`]
/// so that pre-key messages already in flight can still be answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    identity: Curve25519SecretKey,
    fallback: Option<FallbackKey>,
    previous_fallback: Option<FallbackKey>,
}

impl Account {
    /// New account with a fresh identity key and no fallback key.
    pub fn new() -> Self {
        Self {
            identity: Curve25519SecretKey::generate(),
            fallback: None,
            previous_fallback: None,
        }
    }

    /// The device key peers address bootstrap messages to.
    pub fn identity_key(&self) -> Curve25519PublicKey {
        self.identity.public_key()
    }

    /// The current fallback key, if one was generated.
    pub fn fallback_key(&self) -> Option<Curve25519PublicKey> {
        self.fallback.as_ref().map(|f| f.secret.public_key())
    }

    /// Creation time of the current fallback key.
    pub fn fallback_key_created_at(&self) -> Option<i64> {
        self.fallback.as_ref().map(|f| f.created_at_ms)
    }

    pub fn fallback_key_published(&self) -> bool {
        self.fallback.as_ref().is_some_and(|f| f.published)
    }

    /// Rotate: the current fallback key becomes the previous one.
    pub fn generate_fallback_key(&mut self, now_ms: i64) -> Curve25519PublicKey {
        let fresh = FallbackKey {
            secret: Curve25519SecretKey::generate(),
            created_at_ms: now_ms,
            published: false,
        };
        let public = fresh.secret.public_key();
        self.previous_fallback = self.fallback.replace(fresh);
        public
    }

    /// Drop the previous fallback key after rotation.
    pub fn forget_old_fallback_key(&mut self) -> bool {
        self.previous_fallback.take().is_some()
    }

    pub fn mark_keys_as_published(&mut self) {
        if let Some(fallback) = self.fallback.as_mut() {
            fallback.published = true;
        }
    }

    /// Start a bootstrap session to a peer device.
    pub fn create_outbound_session(
        &self,
        their_identity_key: &Curve25519PublicKey,
        their_fallback_key: &Curve25519PublicKey,
    ) -> BootstrapSession {
        BootstrapSession::outbound(&self.identity, their_identity_key, their_fallback_key)
    }

    /// Answer a pre-key message from `their_identity_key`.
    pub fn create_inbound_session(
        &self,
        their_identity_key: &Curve25519PublicKey,
        message: &PreKeyMessage,
    ) -> Result<BootstrapSession> {
        if message.identity_key != *their_identity_key {
            return Err(CryptoError::DecryptionError(format!(
                "pre-key message identity {} does not match sender {}",
                message.identity_key, their_identity_key
            )));
        }
        let fallback = self
            .find_fallback_secret(&message.fallback_key)
            .ok_or_else(|| CryptoError::UnknownFallbackKey(message.fallback_key.to_hex()))?;
        BootstrapSession::inbound(&self.identity, fallback, message)
    }

    fn find_fallback_secret(&self, public: &Curve25519PublicKey) -> Option<&Curve25519SecretKey> {
        [self.fallback.as_ref(), self.previous_fallback.as_ref()]
            .into_iter()
            .flatten()
            .map(|f| &f.secret)
            .find(|secret| secret.public_key() == *public)
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapMessage;

    fn prekey_from(sender: &Account, recipient: &Account) -> PreKeyMessage {
        let mut session = sender.create_outbound_session(
            &recipient.identity_key(),
            &recipient.fallback_key().unwrap(),
        );
        match session.encrypt(b"hello").unwrap() {
            BootstrapMessage::PreKey(m) => m,
            other => panic!("unexpected {:?}", other.message_type()),
        }
    }

    #[test]
    fn test_fallback_rotation() {
        let mut account = Account::new();
        assert!(account.fallback_key().is_none());

        let first = account.generate_fallback_key(1);
        assert_eq!(account.fallback_key(), Some(first));
        let second = account.generate_fallback_key(2);
        assert_ne!(first, second);
        assert_eq!(account.fallback_key_created_at(), Some(2));

        assert!(account.forget_old_fallback_key());
        assert!(!account.forget_old_fallback_key());
    }

    #[test]
    fn test_previous_fallback_still_answers_until_forgotten() {
        let alice = {
            let mut a = Account::new();
            a.generate_fallback_key(0);
            a
        };
        let mut bob = Account::new();
        bob.generate_fallback_key(0);

        let in_flight = prekey_from(&alice, &bob);
        bob.generate_fallback_key(1);

        let mut session = bob
            .create_inbound_session(&alice.identity_key(), &in_flight)
            .unwrap();
        assert_eq!(session.decrypt(&in_flight.message, 10).unwrap(), b"hello");

        bob.forget_old_fallback_key();
        let err = bob
            .create_inbound_session(&alice.identity_key(), &in_flight)
            .unwrap_err();
        assert!(matches!(err, CryptoError::UnknownFallbackKey(_)));
    }

    #[test]
    fn test_sender_identity_must_match() {
        let alice = Account::new();
        let mut bob = Account::new();
        bob.generate_fallback_key(0);
        let message = prekey_from(&alice, &bob);

        let mallory = Account::new();
        assert!(bob
            .create_inbound_session(&mallory.identity_key(), &message)
            .is_err());
    }

    #[test]
    fn test_publish_flag() {
        let mut account = Account::new();
        account.generate_fallback_key(0);
        assert!(!account.fallback_key_published());
        account.mark_keys_as_published();
        assert!(account.fallback_key_published());
    }
}
