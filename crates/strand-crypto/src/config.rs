//! Session manager configuration.

use std::time::Duration;

/// Configuration passed to [`crate::EncryptionSessionManager::new`].
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// Secret the pickle key is derived from. Seals the persisted account
    /// and sessions.
    pub pickle_key: Vec<u8>,

    /// Longest plaintext accepted for encryption.
    pub max_plaintext_len: usize,

    /// Message keys held per bootstrap session for out-of-order delivery.
    pub max_skipped_message_keys: usize,

    /// How far an inbound group session may advance to reach a message.
    pub max_group_ratchet_advance: u32,

    /// Age after which the fallback key is rotated.
    pub fallback_key_max_age: Duration,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            pickle_key: b"DEFAULT_KEY".to_vec(),
            max_plaintext_len: 65536 * 3 / 4,
            max_skipped_message_keys: 1000,
            max_group_ratchet_advance: 100_000,
            fallback_key_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
