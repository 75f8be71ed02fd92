//! The storage adapter contract.
//!
//! The persistence store only ever talks to a [`StorageAdapter`], which
//! exposes keyed byte records in a handful of named [`Model`]s. Records are
//! opaque to the adapter; encoding belongs to the persistence layer.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Filter, Model, RecordKey};

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Read,
    Write,
}

/// Record operations available inside a transaction.
///
/// Writes inside a [`TxMode::Read`] transaction fail with
/// [`crate::StoreError::ReadOnly`].
pub trait Records {
    fn find_one(&self, model: Model, key: &RecordKey) -> Result<Option<Vec<u8>>>;

    /// Matching records ordered by key.
    fn find_many(&self, model: Model, filter: &Filter) -> Result<Vec<(RecordKey, Vec<u8>)>>;

    /// Insert a new record; fails if the key is taken.
    fn create(&mut self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<()>;

    fn upsert(&mut self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<()>;

    /// Replace an existing record. Returns false if there was none.
    fn update(&mut self, model: Model, key: &RecordKey, data: Vec<u8>) -> Result<bool>;

    /// Returns the number of records removed.
    fn delete(&mut self, model: Model, filter: &Filter) -> Result<usize>;

    fn count(&self, model: Model, filter: &Filter) -> Result<usize>;
}

/// A storage backend.
///
/// Everything happens inside [`StorageAdapter::transaction`]: the closure
/// sees one consistent state and its writes commit together, or not at all
/// if it returns an error. The single-operation helpers each run their own
/// transaction.
#[async_trait]
pub trait StorageAdapter: Send + Sync + 'static {
    async fn transaction<T, F>(&self, mode: TxMode, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Records) -> Result<T> + Send + 'static;

    async fn find_one(&self, model: Model, key: RecordKey) -> Result<Option<Vec<u8>>> {
        self.transaction(TxMode::Read, move |tx| tx.find_one(model, &key))
            .await
    }

    async fn find_many(&self, model: Model, filter: Filter) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        self.transaction(TxMode::Read, move |tx| tx.find_many(model, &filter))
            .await
    }

    async fn create(&self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<()> {
        self.transaction(TxMode::Write, move |tx| tx.create(model, key, data))
            .await
    }

    async fn upsert(&self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<()> {
        self.transaction(TxMode::Write, move |tx| tx.upsert(model, key, data))
            .await
    }

    async fn update(&self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<bool> {
        self.transaction(TxMode::Write, move |tx| tx.update(model, &key, data))
            .await
    }

    async fn delete(&self, model: Model, filter: Filter) -> Result<usize> {
        self.transaction(TxMode::Write, move |tx| tx.delete(model, &filter))
            .await
    }

    async fn count(&self, model: Model, filter: Filter) -> Result<usize> {
        self.transaction(TxMode::Read, move |tx| tx.count(model, &filter))
            .await
    }
}
