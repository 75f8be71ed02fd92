//! Crypto store: persistence for pickled account and session state.
//!
//! Everything stored here is already sealed with the device's pickle key,
//! so implementations only ever see opaque bytes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use strand_core::StreamId;

use crate::error::{CryptoError, Result};

/// A pickled inbound group session and the stream it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredGroupSession {
    pub stream_id: StreamId,
    pub session_id: String,
    pub pickle: Vec<u8>,
}

/// Async storage interface for the session manager.
///
/// Writes to the group-session tables are serialized by the manager, so
/// implementations need no extra locking beyond their own consistency.
#[async_trait]
pub trait CryptoStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Account
    // ─────────────────────────────────────────────────────────────────────────

    async fn load_account(&self) -> Result<Option<Vec<u8>>>;

    async fn save_account(&self, pickle: Vec<u8>) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Bootstrap sessions
    // ─────────────────────────────────────────────────────────────────────────

    async fn load_bootstrap_session(&self, session_id: &str) -> Result<Option<Vec<u8>>>;

    async fn save_bootstrap_session(&self, session_id: &str, pickle: Vec<u8>) -> Result<()>;

    /// Session id of the outbound session we reuse for `device_key`.
    async fn outbound_bootstrap_session_id(&self, device_key: &str) -> Result<Option<String>>;

    async fn set_outbound_bootstrap_session_id(
        &self,
        device_key: &str,
        session_id: &str,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Group sessions
    // ─────────────────────────────────────────────────────────────────────────

    async fn load_outbound_group_session(&self, stream_id: &StreamId) -> Result<Option<Vec<u8>>>;

    async fn save_outbound_group_session(&self, stream_id: &StreamId, pickle: Vec<u8>)
        -> Result<()>;

    async fn all_outbound_group_sessions(&self) -> Result<Vec<(StreamId, Vec<u8>)>>;

    async fn load_inbound_group_session(
        &self,
        stream_id: &StreamId,
        session_id: &str,
    ) -> Result<Option<Vec<u8>>>;

    async fn save_inbound_group_session(&self, session: StoredGroupSession) -> Result<()>;

    /// All inbound sessions of one stream.
    async fn inbound_group_sessions(&self, stream_id: &StreamId)
        -> Result<Vec<StoredGroupSession>>;

    async fn all_inbound_group_sessions(&self) -> Result<Vec<StoredGroupSession>>;
}

/// In-memory crypto store. All state is lost when dropped.
#[derive(Default)]
pub struct MemoryCryptoStore {
    inner: RwLock<MemoryCryptoStoreInner>,
}

#[derive(Default)]
struct MemoryCryptoStoreInner {
    account: Option<Vec<u8>>,
    bootstrap_sessions: HashMap<String, Vec<u8>>,
    outbound_bootstrap_by_device: HashMap<String, String>,
    outbound_group_sessions: BTreeMap<StreamId, Vec<u8>>,
    /// stream -> session id -> pickle
    inbound_group_sessions: BTreeMap<StreamId, BTreeMap<String, Vec<u8>>>,
}

impl MemoryCryptoStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryCryptoStoreInner>> {
        self.inner
            .read()
            .map_err(|e| CryptoError::Store(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryCryptoStoreInner>> {
        self.inner
            .write()
            .map_err(|e| CryptoError::Store(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl CryptoStore for MemoryCryptoStore {
    async fn load_account(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.account.clone())
    }

    async fn save_account(&self, pickle: Vec<u8>) -> Result<()> {
        self.write()?.account = Some(pickle);
        Ok(())
    }

    async fn load_bootstrap_session(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.bootstrap_sessions.get(session_id).cloned())
    }

    async fn save_bootstrap_session(&self, session_id: &str, pickle: Vec<u8>) -> Result<()> {
        self.write()?
            .bootstrap_sessions
            .insert(session_id.to_string(), pickle);
        Ok(())
    }

    async fn outbound_bootstrap_session_id(&self, device_key: &str) -> Result<Option<String>> {
        Ok(self
            .read()?
            .outbound_bootstrap_by_device
            .get(device_key)
            .cloned())
    }

    async fn set_outbound_bootstrap_session_id(
        &self,
        device_key: &str,
        session_id: &str,
    ) -> Result<()> {
        self.write()?
            .outbound_bootstrap_by_device
            .insert(device_key.to_string(), session_id.to_string());
        Ok(())
    }

    async fn load_outbound_group_session(&self, stream_id: &StreamId) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.outbound_group_sessions.get(stream_id).cloned())
    }

    async fn save_outbound_group_session(
        &self,
        stream_id: &StreamId,
        pickle: Vec<u8>,
    ) -> Result<()> {
        self.write()?
            .outbound_group_sessions
            .insert(*stream_id, pickle);
        Ok(())
    }

    async fn all_outbound_group_sessions(&self) -> Result<Vec<(StreamId, Vec<u8>)>> {
        Ok(self
            .read()?
            .outbound_group_sessions
            .iter()
            .map(|(id, pickle)| (*id, pickle.clone()))
            .collect())
    }

    async fn load_inbound_group_session(
        &self,
        stream_id: &StreamId,
        session_id: &str,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read()?
            .inbound_group_sessions
            .get(stream_id)
            .and_then(|sessions| sessions.get(session_id))
            .cloned())
    }

    async fn save_inbound_group_session(&self, session: StoredGroupSession) -> Result<()> {
        self.write()?
            .inbound_group_sessions
            .entry(session.stream_id)
            .or_default()
            .insert(session.session_id, session.pickle);
        Ok(())
    }

    async fn inbound_group_sessions(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<StoredGroupSession>> {
        let inner = self.read()?;
        Ok(inner
            .inbound_group_sessions
            .get(stream_id)
            .into_iter()
            .flat_map(|sessions| sessions.iter())
            .map(|(session_id, pickle)| StoredGroupSession {
                stream_id: *stream_id,
                session_id: session_id.clone(),
                pickle: pickle.clone(),
            })
            .collect())
    }

    async fn all_inbound_group_sessions(&self) -> Result<Vec<StoredGroupSession>> {
        let inner = self.read()?;
        Ok(inner
            .inbound_group_sessions
            .iter()
            .flat_map(|(stream_id, sessions)| {
                sessions.iter().map(move |(session_id, pickle)| StoredGroupSession {
                    stream_id: *stream_id,
                    session_id: session_id.clone(),
                    pickle: pickle.clone(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::StreamKind;

    #[tokio::test]
    async fn test_inbound_sessions_are_scoped_by_stream() {
        let store = MemoryCryptoStore::new();
        let a = StreamId::random(StreamKind::Channel);
        let b = StreamId::random(StreamKind::Channel);

        for (stream_id, session_id) in [(a, "s1"), (a, "s2"), (b, "s1")] {
            store
                .save_inbound_group_session(StoredGroupSession {
                    stream_id,
                    session_id: session_id.into(),
                    pickle: vec![1, 2, 3],
                })
                .await
                .unwrap();
        }

        assert_eq!(store.inbound_group_sessions(&a).await.unwrap().len(), 2);
        assert_eq!(store.inbound_group_sessions(&b).await.unwrap().len(), 1);
        assert_eq!(store.all_inbound_group_sessions().await.unwrap().len(), 3);
        assert!(store
            .load_inbound_group_session(&b, "s2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_account_overwrite() {
        let store = MemoryCryptoStore::new();
        assert!(store.load_account().await.unwrap().is_none());
        store.save_account(vec![1]).await.unwrap();
        store.save_account(vec![2]).await.unwrap();
        assert_eq!(store.load_account().await.unwrap(), Some(vec![2]));
    }
}
