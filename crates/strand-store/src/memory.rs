//! In-memory implementation of the StorageAdapter trait.
//!
//! Same semantics as SQLite, no persistence. Write transactions mutate the
//! tables in place and keep an undo log that is replayed if the closure
//! fails.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::model::{Filter, Model, RecordKey};
use crate::traits::{Records, StorageAdapter, TxMode};

type Tables = BTreeMap<Model, BTreeMap<RecordKey, Vec<u8>>>;
type Table = BTreeMap<RecordKey, Vec<u8>>;

/// A record's value before a write; `None` if it did not exist.
type Undo = (Model, RecordKey, Option<Vec<u8>>);

/// In-memory adapter. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

enum TablesRef<'a> {
    Read(&'a Tables),
    Write(&'a mut Tables),
}

struct MemoryRecords<'a> {
    tables: TablesRef<'a>,
    undo: Vec<Undo>,
}

impl<'a> MemoryRecords<'a> {
    fn new(tables: TablesRef<'a>) -> Self {
        Self {
            tables,
            undo: Vec::new(),
        }
    }

    fn table(&self, model: Model) -> Option<&Table> {
        match &self.tables {
            TablesRef::Read(t) => t.get(&model),
            TablesRef::Write(t) => t.get(&model),
        }
    }

    fn table_mut(&mut self, model: Model) -> Result<(&mut Table, &mut Vec<Undo>)> {
        match &mut self.tables {
            TablesRef::Read(_) => Err(StoreError::ReadOnly(model)),
            TablesRef::Write(t) => Ok((t.entry(model).or_default(), &mut self.undo)),
        }
    }
}

/// Put back every record touched by a failed transaction, newest first.
fn roll_back(tables: &mut Tables, undo: Vec<Undo>) {
    for (model, key, previous) in undo.into_iter().rev() {
        let table = tables.entry(model).or_default();
        match previous {
            Some(data) => {
                table.insert(key, data);
            }
            None => {
                table.remove(&key);
            }
        }
    }
}

impl Records for MemoryRecords<'_> {
    fn find_one(&self, model: Model, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        Ok(self.table(model).and_then(|t| t.get(key)).cloned())
    }

    fn find_many(&self, model: Model, filter: &Filter) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        Ok(self
            .table(model)
            .into_iter()
            .flat_map(|t| t.iter())
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, data)| (key.clone(), data.clone()))
            .collect())
    }

    fn create(&mut self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<()> {
        let (table, undo) = self.table_mut(model)?;
        if table.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                model,
                key: key.to_string(),
            });
        }
        table.insert(key.clone(), data);
        undo.push((model, key, None));
        Ok(())
    }

    fn upsert(&mut self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<()> {
        let (table, undo) = self.table_mut(model)?;
        let previous = table.insert(key.clone(), data);
        undo.push((model, key, previous));
        Ok(())
    }

    fn update(&mut self, model: Model, key: &RecordKey, data: Vec<u8>) -> Result<bool> {
        let (table, undo) = self.table_mut(model)?;
        match table.get_mut(key) {
            Some(existing) => {
                let previous = std::mem::replace(existing, data);
                undo.push((model, key.clone(), Some(previous)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&mut self, model: Model, filter: &Filter) -> Result<usize> {
        let (table, undo) = self.table_mut(model)?;
        let doomed: Vec<RecordKey> = table.keys().filter(|key| filter.matches(key)).cloned().collect();
        for key in &doomed {
            if let Some(previous) = table.remove(key) {
                undo.push((model, key.clone(), Some(previous)));
            }
        }
        Ok(doomed.len())
    }

    fn count(&self, model: Model, filter: &Filter) -> Result<usize> {
        Ok(self
            .table(model)
            .map(|t| t.keys().filter(|key| filter.matches(key)).count())
            .unwrap_or(0))
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn transaction<T, F>(&self, mode: TxMode, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Records) -> Result<T> + Send + 'static,
    {
        match mode {
            TxMode::Read => {
                let tables = self
                    .tables
                    .read()
                    .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
                f(&mut MemoryRecords::new(TablesRef::Read(&tables)))
            }
            TxMode::Write => {
                let mut tables = self
                    .tables
                    .write()
                    .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
                let mut records = MemoryRecords::new(TablesRef::Write(&mut *tables));
                let result = f(&mut records);
                if result.is_err() {
                    let undo = std::mem::take(&mut records.undo);
                    roll_back(&mut *tables, undo);
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crud() {
        let adapter = MemoryAdapter::new();
        let key = RecordKey::id("a");

        adapter.create(Model::Cleartexts, key.clone(), vec![1]).await.unwrap();
        assert!(matches!(
            adapter.create(Model::Cleartexts, key.clone(), vec![2]).await,
            Err(StoreError::AlreadyExists { .. })
        ));
        assert!(adapter.update(Model::Cleartexts, key.clone(), vec![3]).await.unwrap());
        assert!(!adapter
            .update(Model::Cleartexts, RecordKey::id("b"), vec![3])
            .await
            .unwrap());
        assert_eq!(
            adapter.find_one(Model::Cleartexts, key.clone()).await.unwrap(),
            Some(vec![3])
        );

        // Models are separate namespaces
        assert_eq!(adapter.find_one(Model::Snapshots, key.clone()).await.unwrap(), None);

        assert_eq!(adapter.delete(Model::Cleartexts, Filter::All).await.unwrap(), 1);
        assert_eq!(adapter.count(Model::Cleartexts, Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_range_queries_are_ordered() {
        let adapter = MemoryAdapter::new();
        for num in [3, 1, 2, 7] {
            adapter
                .upsert(Model::Miniblocks, RecordKey::numbered("s", num), vec![num as u8])
                .await
                .unwrap();
        }
        adapter
            .upsert(Model::Miniblocks, RecordKey::numbered("t", 2), vec![0])
            .await
            .unwrap();

        let rows = adapter
            .find_many(Model::Miniblocks, Filter::Range { id: "s".into(), from: 1, to: 3 })
            .await
            .unwrap();
        let nums: Vec<i64> = rows.iter().map(|(k, _)| k.num).collect();
        assert_eq!(nums, vec![1, 2, 3]);
        assert_eq!(
            adapter.count(Model::Miniblocks, Filter::Id("s".into())).await.unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let adapter = MemoryAdapter::new();
        let result: Result<()> = adapter
            .transaction(TxMode::Write, |tx| {
                tx.upsert(Model::Scratch, RecordKey::id("0"), vec![1])?;
                Err(StoreError::Aborted("test".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(adapter.count(Model::Scratch, Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rollback_restores_overwritten_and_deleted_records() {
        let adapter = MemoryAdapter::new();
        adapter.upsert(Model::Cleartexts, RecordKey::id("a"), vec![1]).await.unwrap();
        adapter.upsert(Model::Cleartexts, RecordKey::id("b"), vec![2]).await.unwrap();

        let result: Result<()> = adapter
            .transaction(TxMode::Write, |tx| {
                tx.upsert(Model::Cleartexts, RecordKey::id("a"), vec![10])?;
                tx.update(Model::Cleartexts, &RecordKey::id("a"), vec![11])?;
                tx.delete(Model::Cleartexts, &Filter::Id("b".into()))?;
                tx.create(Model::Cleartexts, RecordKey::id("c"), vec![3])?;
                tx.create(Model::Cleartexts, RecordKey::id("c"), vec![4])
            })
            .await;
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));

        let rows = adapter.find_many(Model::Cleartexts, Filter::All).await.unwrap();
        assert_eq!(
            rows,
            vec![(RecordKey::id("a"), vec![1]), (RecordKey::id("b"), vec![2])]
        );
    }

    #[tokio::test]
    async fn test_read_transaction_rejects_writes() {
        let adapter = MemoryAdapter::new();
        let result = adapter
            .transaction(TxMode::Read, |tx| {
                tx.upsert(Model::Scratch, RecordKey::id("0"), vec![1])
            })
            .await;
        assert!(matches!(result, Err(StoreError::ReadOnly(Model::Scratch))));
    }
}
