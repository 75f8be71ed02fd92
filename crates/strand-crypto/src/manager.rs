//! The encryption session manager.
//!
//! Owns this device's account, its pairwise bootstrap sessions and its
//! per-stream group sessions. All state lives in a [`CryptoStore`], sealed
//! with the pickle key from [`EncryptionConfig`].

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use strand_core::{EncryptedData, StreamId};

use crate::account::Account;
use crate::bootstrap::{BootstrapMessage, BootstrapSession, MessageType};
use crate::config::EncryptionConfig;
use crate::envelope::PickleKey;
use crate::error::{CryptoError, Result};
use crate::group::{GroupAlgorithm, GroupMessage, InboundGroupSession, OutboundGroupSession, SessionKey};
use crate::keys::Curve25519PublicKey;
use crate::store::{CryptoStore, StoredGroupSession};

/// A device to encrypt for, as published in its owner's device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecipient {
    pub device_key: Curve25519PublicKey,
    pub fallback_key: Curve25519PublicKey,
}

/// Ciphertext for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapCiphertext {
    pub message_type: MessageType,
    pub body: Vec<u8>,
}

/// A shareable group session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedGroupSession {
    pub stream_id: StreamId,
    pub session_id: String,
    /// Hex-encoded [`SessionKey`].
    pub session_key: String,
    pub algorithm: String,
}

/// Everything needed to recreate this device elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedDevice {
    pub pickle_key: Vec<u8>,
    pub pickled_account: Vec<u8>,
    pub inbound_sessions: Vec<ExportedGroupSession>,
    pub outbound_sessions: Vec<ExportedOutboundSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedOutboundSession {
    pub stream_id: StreamId,
    pub pickle: Vec<u8>,
}

/// What happened to one inbound session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddInboundOutcome {
    Stored,
    /// An existing session already reaches back at least as far.
    KeptExisting,
}

/// Outcome of [`EncryptionSessionManager::import_session_keys`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub kept_existing: usize,
    /// Session ids whose import failed.
    pub failed: Vec<String>,
}

/// Inbound sessions are stored with the stream they were shared for.
#[derive(Serialize, Deserialize)]
struct InboundGroupSessionRecord {
    stream_id: StreamId,
    session: InboundGroupSession,
}

/// Pairwise and group encryption for one device.
pub struct EncryptionSessionManager<S> {
    store: S,
    config: EncryptionConfig,
    pickle_key: PickleKey,
    device_key: Option<Curve25519PublicKey>,
    /// Serializes account read-modify-write.
    account_guard: Mutex<()>,
    /// Serializes bootstrap session updates.
    bootstrap_guard: Mutex<()>,
    /// Serializes every write to the group-session tables.
    group_guard: Mutex<()>,
}

/// Name used by callers that think of the manager as "the device".
pub type EncryptionDevice<S> = EncryptionSessionManager<S>;

impl<S: CryptoStore> EncryptionSessionManager<S> {
    pub fn new(store: S, config: EncryptionConfig) -> Self {
        let pickle_key = PickleKey::derive(&config.pickle_key);
        Self {
            store,
            config,
            pickle_key,
            device_key: None,
            account_guard: Mutex::new(()),
            bootstrap_guard: Mutex::new(()),
            group_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// This device's identity key, once initialized.
    pub fn device_key(&self) -> Option<Curve25519PublicKey> {
        self.device_key
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Account
    // ─────────────────────────────────────────────────────────────────────────

    /// Load or create the account.
    ///
    /// A stored account that cannot be unpickled is left alone and the
    /// device stays degraded: encryption calls fail until it is fixed.
    pub async fn init(&mut self) -> Result<()> {
        let account = match self.store.load_account().await? {
            Some(bytes) => match self.pickle_key.unpickle::<Account>(&bytes) {
                Ok(account) => Some(account),
                Err(e) => {
                    warn!(error = %e, "stored account could not be unpickled");
                    None
                }
            },
            None => {
                let account = Account::new();
                info!(device_key = %account.identity_key(), "created device account");
                Some(account)
            }
        };

        let mut fallback_key = None;
        if let Some(mut account) = account {
            if account.fallback_key().is_none() {
                account.generate_fallback_key(now_ms());
            }
            self.save_account(&account).await?;
            self.device_key = Some(account.identity_key());
            fallback_key = account.fallback_key();
        }

        if self.device_key.is_none() {
            warn!("device identity key missing after init; encryption is unavailable");
        }
        if fallback_key.is_none() {
            warn!("device fallback key missing after init; peers cannot start sessions");
        }
        debug!(device_key = ?self.device_key, fallback_key = ?fallback_key, "device initialized");
        Ok(())
    }

    /// The fallback key peers use to start sessions with this device.
    pub async fn fallback_key(&self) -> Result<Curve25519PublicKey> {
        self.require_account()
            .await?
            .fallback_key()
            .ok_or(CryptoError::MissingFallbackKey)
    }

    /// Generate a new fallback key; the old one keeps working until forgotten.
    pub async fn rotate_fallback_key(&self) -> Result<Curve25519PublicKey> {
        let _guard = self.account_guard.lock().await;
        let mut account = self.require_account().await?;
        let key = account.generate_fallback_key(now_ms());
        self.save_account(&account).await?;
        info!(fallback_key = %key, "rotated fallback key");
        Ok(key)
    }

    /// Rotate when the current fallback key is older than the configured age.
    pub async fn rotate_fallback_key_if_needed(&self) -> Result<bool> {
        let created_at = self.require_account().await?.fallback_key_created_at();
        let max_age = self.config.fallback_key_max_age.as_millis() as i64;
        match created_at {
            Some(created_at) if now_ms() - created_at < max_age => Ok(false),
            _ => self.rotate_fallback_key().await.map(|_| true),
        }
    }

    /// Drop the previous fallback key.
    pub async fn forget_old_fallback_key(&self) -> Result<bool> {
        let _guard = self.account_guard.lock().await;
        let mut account = self.require_account().await?;
        let forgotten = account.forget_old_fallback_key();
        if forgotten {
            self.save_account(&account).await?;
        }
        Ok(forgotten)
    }

    pub async fn mark_keys_as_published(&self) -> Result<()> {
        let _guard = self.account_guard.lock().await;
        let mut account = self.require_account().await?;
        account.mark_keys_as_published();
        self.save_account(&account).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bootstrap layer
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt `payload` for every recipient device except this one.
    ///
    /// Every ciphertext must be a pre-key message; this path exists to
    /// bootstrap sessions.
    pub async fn encrypt_with_device_keys(
        &self,
        payload: &[u8],
        recipients: &[DeviceRecipient],
    ) -> Result<BTreeMap<String, BootstrapCiphertext>> {
        self.check_plaintext_len(payload.len())?;
        let account = self.require_account().await?;
        let own_key = account.identity_key();

        let mut targets: BTreeMap<Curve25519PublicKey, &DeviceRecipient> = BTreeMap::new();
        for recipient in recipients {
            if recipient.device_key == own_key {
                continue;
            }
            targets.insert(recipient.device_key, recipient);
        }

        let _guard = self.bootstrap_guard.lock().await;
        let results = join_all(
            targets
                .values()
                .map(|recipient| self.encrypt_for_device(&account, recipient, payload)),
        )
        .await;

        let mut ciphertexts = BTreeMap::new();
        for (device_key, result) in targets.keys().zip(results) {
            let ciphertext = result?;
            if ciphertext.message_type != MessageType::PreKey {
                return Err(CryptoError::UnexpectedMessageType {
                    device: device_key.to_hex(),
                    got: ciphertext.message_type.as_str(),
                });
            }
            ciphertexts.insert(device_key.to_hex(), ciphertext);
        }
        debug!(recipients = ciphertexts.len(), "encrypted payload for devices");
        Ok(ciphertexts)
    }

    async fn encrypt_for_device(
        &self,
        account: &Account,
        recipient: &DeviceRecipient,
        payload: &[u8],
    ) -> Result<BootstrapCiphertext> {
        let device = recipient.device_key.to_hex();
        let mut session = match self
            .reusable_outbound_session(&device, &recipient.fallback_key)
            .await?
        {
            Some(session) => session,
            None => account.create_outbound_session(&recipient.device_key, &recipient.fallback_key),
        };

        let message = session.encrypt(payload)?;
        self.save_bootstrap_session(&session).await?;
        self.store
            .set_outbound_bootstrap_session_id(&device, session.session_id())
            .await?;

        Ok(BootstrapCiphertext {
            message_type: message.message_type(),
            body: message.to_bytes()?,
        })
    }

    /// The stored outbound session for `device`, if it targets the same
    /// fallback key the device publishes now.
    async fn reusable_outbound_session(
        &self,
        device: &str,
        fallback_key: &Curve25519PublicKey,
    ) -> Result<Option<BootstrapSession>> {
        let Some(session_id) = self.store.outbound_bootstrap_session_id(device).await? else {
            return Ok(None);
        };
        Ok(self
            .load_bootstrap_session(&session_id)
            .await?
            .filter(|session| session.their_fallback_key() == Some(fallback_key)))
    }

    /// Decrypt a pre-key message from `sender_key`, creating or advancing
    /// the matching inbound session.
    pub async fn decrypt_with_device_key(
        &self,
        ciphertext: &BootstrapCiphertext,
        sender_key: &Curve25519PublicKey,
    ) -> Result<Vec<u8>> {
        let message = BootstrapMessage::from_bytes(&ciphertext.body)?;
        if message.message_type() != ciphertext.message_type {
            return Err(CryptoError::DecryptionError(format!(
                "declared {} message carries a {} body",
                ciphertext.message_type.as_str(),
                message.message_type().as_str()
            )));
        }
        let BootstrapMessage::PreKey(prekey) = message else {
            return Err(CryptoError::UnexpectedMessageType {
                device: sender_key.to_hex(),
                got: MessageType::Normal.as_str(),
            });
        };

        let _guard = self.bootstrap_guard.lock().await;
        let mut session = match self.load_bootstrap_session(&prekey.session_id).await? {
            Some(session) if session.their_identity_key() == sender_key => session,
            Some(_) => {
                return Err(CryptoError::DecryptionError(format!(
                    "session {} belongs to another device",
                    prekey.session_id
                )))
            }
            None => {
                let account = self.require_account().await?;
                let session = account.create_inbound_session(sender_key, &prekey)?;
                debug!(session_id = %session.session_id(), sender = %sender_key, "created inbound bootstrap session");
                session
            }
        };

        let plaintext = session.decrypt(&prekey.message, self.config.max_skipped_message_keys)?;
        self.save_bootstrap_session(&session).await?;
        Ok(plaintext)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Group layer
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new outbound session for the stream, replacing any current one.
    pub async fn create_outbound_group_session(&self, stream_id: &StreamId) -> Result<String> {
        let _guard = self.group_guard.lock().await;
        let session = self.create_outbound_group_session_locked(stream_id).await?;
        Ok(session.session_id())
    }

    /// The stream's outbound session key, creating the session if absent.
    /// Share the result with other devices over bootstrap sessions.
    pub async fn ensure_outbound_session(&self, stream_id: &StreamId) -> Result<ExportedGroupSession> {
        let _guard = self.group_guard.lock().await;
        let session = self.outbound_group_session_locked(stream_id).await?;
        Ok(ExportedGroupSession {
            stream_id: *stream_id,
            session_id: session.session_id(),
            session_key: session.session_key().encode()?,
            algorithm: GroupAlgorithm::RatchetV1.as_str().to_string(),
        })
    }

    /// Encrypt with the stream's outbound session.
    pub async fn encrypt_group_event(
        &self,
        stream_id: &StreamId,
        payload: &[u8],
    ) -> Result<EncryptedData> {
        self.check_plaintext_len(payload.len())?;
        let device_key = self.device_key.ok_or(CryptoError::AccountNotInitialized)?;

        let _guard = self.group_guard.lock().await;
        let mut session = self.outbound_group_session_locked(stream_id).await?;
        let message = session.encrypt(payload)?;
        self.save_outbound_group_session(stream_id, &session).await?;

        Ok(EncryptedData {
            algorithm: GroupAlgorithm::RatchetV1.as_str().to_string(),
            sender_key: device_key.to_hex(),
            session_id: session.session_id(),
            ciphertext: message.to_bytes()?,
        })
    }

    /// Decrypt group ciphertext.
    ///
    /// Fails with [`CryptoError::KeyMissing`] when the session key has not
    /// arrived yet; callers keep the event and retry after an import.
    pub async fn decrypt_group_event(
        &self,
        stream_id: &StreamId,
        content: &EncryptedData,
    ) -> Result<Vec<u8>> {
        if GroupAlgorithm::parse(&content.algorithm).is_none() {
            return Err(CryptoError::DecryptionError(format!(
                "unsupported algorithm {}",
                content.algorithm
            )));
        }
        let session = self
            .load_inbound_group_session(stream_id, &content.session_id)
            .await?
            .ok_or_else(|| CryptoError::KeyMissing {
                stream_id: stream_id.to_hex(),
                session_id: content.session_id.clone(),
            })?;
        let message = GroupMessage::from_bytes(&content.ciphertext)?;
        session.decrypt(&message, self.config.max_group_ratchet_advance)
    }

    /// Import a batch of group session keys for a stream.
    ///
    /// Each key is imported on its own; a bad key is logged and skipped.
    pub async fn import_session_keys(
        &self,
        stream_id: &StreamId,
        keys: &[ExportedGroupSession],
    ) -> ImportReport {
        let _guard = self.group_guard.lock().await;
        let mut report = ImportReport::default();

        for key in keys {
            match self.import_one_locked(stream_id, key).await {
                Ok(AddInboundOutcome::Stored) => report.imported += 1,
                Ok(AddInboundOutcome::KeptExisting) => report.kept_existing += 1,
                Err(e) => {
                    warn!(
                        stream_id = %stream_id,
                        session_id = %key.session_id,
                        error = %e,
                        "failed to import group session key"
                    );
                    report.failed.push(key.session_id.clone());
                }
            }
        }

        debug!(
            stream_id = %stream_id,
            imported = report.imported,
            kept = report.kept_existing,
            failed = report.failed.len(),
            "imported group session keys"
        );
        report
    }

    async fn import_one_locked(
        &self,
        stream_id: &StreamId,
        key: &ExportedGroupSession,
    ) -> Result<AddInboundOutcome> {
        if key.stream_id != *stream_id {
            return Err(CryptoError::InvalidKey(format!(
                "key for stream {} imported into {}",
                key.stream_id, stream_id
            )));
        }
        if GroupAlgorithm::parse(&key.algorithm).is_none() {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported algorithm {}",
                key.algorithm
            )));
        }
        self.add_inbound_group_session_locked(stream_id, &key.session_id, &key.session_key)
            .await
    }

    /// Add one inbound session. An existing session that can decrypt at
    /// least as far back is kept.
    pub async fn add_inbound_group_session(
        &self,
        stream_id: &StreamId,
        session_id: &str,
        session_key: &str,
    ) -> Result<AddInboundOutcome> {
        let _guard = self.group_guard.lock().await;
        self.add_inbound_group_session_locked(stream_id, session_id, session_key)
            .await
    }

    async fn add_inbound_group_session_locked(
        &self,
        stream_id: &StreamId,
        session_id: &str,
        session_key: &str,
    ) -> Result<AddInboundOutcome> {
        let key = SessionKey::decode(session_key)?;
        let actual = key.session_id_hex();
        if actual != session_id {
            return Err(CryptoError::SessionIdMismatch {
                claimed: session_id.to_string(),
                actual,
            });
        }
        let session = InboundGroupSession::new(key);

        if let Some(existing) = self.load_inbound_group_session(stream_id, session_id).await? {
            if existing.first_known_index() <= session.first_known_index() {
                debug!(stream_id = %stream_id, session_id, "keeping existing group session");
                return Ok(AddInboundOutcome::KeptExisting);
            }
        }

        debug!(
            stream_id = %stream_id,
            session_id,
            first_known_index = session.first_known_index(),
            "storing group session"
        );
        self.save_inbound_group_session(stream_id, &session).await?;
        Ok(AddInboundOutcome::Stored)
    }

    /// Export every inbound session of a stream at its first known index.
    pub async fn export_group_sessions(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<ExportedGroupSession>> {
        let _guard = self.group_guard.lock().await;
        let stored = self.store.inbound_group_sessions(stream_id).await?;
        self.export_stored_sessions(stored)
    }

    /// True when a session key for `(stream_id, session_id)` is present.
    pub async fn has_session_key(&self, stream_id: &StreamId, session_id: &str) -> Result<bool> {
        let _guard = self.group_guard.lock().await;
        Ok(self
            .load_inbound_group_session(stream_id, session_id)
            .await?
            .is_some())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Device export / import
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn export_device(&self) -> Result<ExportedDevice> {
        let pickled_account = self
            .store
            .load_account()
            .await?
            .ok_or(CryptoError::AccountNotInitialized)?;

        let _guard = self.group_guard.lock().await;
        let inbound_sessions =
            self.export_stored_sessions(self.store.all_inbound_group_sessions().await?)?;
        let outbound_sessions = self
            .store
            .all_outbound_group_sessions()
            .await?
            .into_iter()
            .map(|(stream_id, pickle)| ExportedOutboundSession { stream_id, pickle })
            .collect();

        Ok(ExportedDevice {
            pickle_key: self.config.pickle_key.clone(),
            pickled_account,
            inbound_sessions,
            outbound_sessions,
        })
    }

    /// Recreate an exported device in this manager's (fresh) store.
    pub async fn import_device(&mut self, exported: ExportedDevice) -> Result<()> {
        let pickle_key = PickleKey::derive(&exported.pickle_key);
        // Fail before writing anything if the export is unreadable
        pickle_key.unpickle::<Account>(&exported.pickled_account)?;

        self.pickle_key = pickle_key;
        self.config.pickle_key = exported.pickle_key;
        self.store.save_account(exported.pickled_account).await?;

        for outbound in exported.outbound_sessions {
            self.pickle_key
                .unpickle::<OutboundGroupSession>(&outbound.pickle)?;
            self.store
                .save_outbound_group_session(&outbound.stream_id, outbound.pickle)
                .await?;
        }

        let mut by_stream: BTreeMap<StreamId, Vec<ExportedGroupSession>> = BTreeMap::new();
        for session in exported.inbound_sessions {
            by_stream.entry(session.stream_id).or_default().push(session);
        }
        for (stream_id, keys) in by_stream {
            self.import_session_keys(&stream_id, &keys).await;
        }

        self.init().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn check_plaintext_len(&self, len: usize) -> Result<()> {
        if len > self.config.max_plaintext_len {
            return Err(CryptoError::PlaintextTooLong {
                len,
                max: self.config.max_plaintext_len,
            });
        }
        Ok(())
    }

    async fn require_account(&self) -> Result<Account> {
        let bytes = self
            .store
            .load_account()
            .await?
            .ok_or(CryptoError::AccountNotInitialized)?;
        self.pickle_key
            .unpickle(&bytes)
            .map_err(|_| CryptoError::AccountNotInitialized)
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        self.store.save_account(self.pickle_key.pickle(account)?).await
    }

    async fn load_bootstrap_session(&self, session_id: &str) -> Result<Option<BootstrapSession>> {
        match self.store.load_bootstrap_session(session_id).await? {
            Some(bytes) => self.pickle_key.unpickle(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn save_bootstrap_session(&self, session: &BootstrapSession) -> Result<()> {
        self.store
            .save_bootstrap_session(session.session_id(), self.pickle_key.pickle(session)?)
            .await
    }

    async fn create_outbound_group_session_locked(
        &self,
        stream_id: &StreamId,
    ) -> Result<OutboundGroupSession> {
        let session = OutboundGroupSession::new(now_ms());
        self.save_outbound_group_session(stream_id, &session).await?;
        // Inbound copy at index 0 so our own messages stay readable and exportable
        let inbound = InboundGroupSession::new(session.session_key());
        self.save_inbound_group_session(stream_id, &inbound).await?;
        info!(stream_id = %stream_id, session_id = %session.session_id(), "created outbound group session");
        Ok(session)
    }

    async fn outbound_group_session_locked(
        &self,
        stream_id: &StreamId,
    ) -> Result<OutboundGroupSession> {
        match self.store.load_outbound_group_session(stream_id).await? {
            Some(bytes) => self.pickle_key.unpickle(&bytes),
            None => self.create_outbound_group_session_locked(stream_id).await,
        }
    }

    async fn save_outbound_group_session(
        &self,
        stream_id: &StreamId,
        session: &OutboundGroupSession,
    ) -> Result<()> {
        self.store
            .save_outbound_group_session(stream_id, self.pickle_key.pickle(session)?)
            .await
    }

    async fn load_inbound_group_session(
        &self,
        stream_id: &StreamId,
        session_id: &str,
    ) -> Result<Option<InboundGroupSession>> {
        let Some(bytes) = self
            .store
            .load_inbound_group_session(stream_id, session_id)
            .await?
        else {
            return Ok(None);
        };
        let record: InboundGroupSessionRecord = self.pickle_key.unpickle(&bytes)?;
        if record.stream_id != *stream_id {
            warn!(
                stream_id = %stream_id,
                stored_stream_id = %record.stream_id,
                session_id,
                "group session stored under the wrong stream"
            );
            return Ok(None);
        }
        Ok(Some(record.session))
    }

    async fn save_inbound_group_session(
        &self,
        stream_id: &StreamId,
        session: &InboundGroupSession,
    ) -> Result<()> {
        let record = InboundGroupSessionRecord {
            stream_id: *stream_id,
            session: session.clone(),
        };
        self.store
            .save_inbound_group_session(StoredGroupSession {
                stream_id: *stream_id,
                session_id: session.session_id(),
                pickle: self.pickle_key.pickle(&record)?,
            })
            .await
    }

    fn export_stored_sessions(
        &self,
        stored: Vec<StoredGroupSession>,
    ) -> Result<Vec<ExportedGroupSession>> {
        let mut exported = Vec::with_capacity(stored.len());
        for entry in stored {
            let record: InboundGroupSessionRecord = match self.pickle_key.unpickle(&entry.pickle) {
                Ok(record) => record,
                Err(e) => {
                    warn!(session_id = %entry.session_id, error = %e, "skipping unreadable group session");
                    continue;
                }
            };
            exported.push(ExportedGroupSession {
                stream_id: record.stream_id,
                session_id: entry.session_id,
                session_key: record.session.export().encode()?,
                algorithm: GroupAlgorithm::RatchetV1.as_str().to_string(),
            });
        }
        Ok(exported)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
