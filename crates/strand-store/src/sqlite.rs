//! SQLite implementation of the StorageAdapter trait.
//!
//! The primary persistent backend. Uses rusqlite with bundled SQLite; every
//! transaction runs on a blocking thread via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::model::{Filter, Model, RecordKey};
use crate::traits::{Records, StorageAdapter, TxMode};

/// SQLite-based adapter.
///
/// Thread-safe via an internal Mutex around the single connection.
#[derive(Clone)]
pub struct SqliteAdapter {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAdapter {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

struct SqliteRecords<'a> {
    tx: &'a rusqlite::Transaction<'a>,
    writable: bool,
}

impl SqliteRecords<'_> {
    fn check_writable(&self, model: Model) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StoreError::ReadOnly(model))
        }
    }
}

/// Ids bound per statement, well under SQLite's host parameter limit.
const MAX_IDS_PER_QUERY: usize = 500;

/// Split large id lists so each statement stays under the parameter limit.
/// Ids are deduplicated so chunks never return the same row twice.
fn split_filter(filter: &Filter) -> Vec<Filter> {
    match filter {
        Filter::Ids(ids) if ids.len() > MAX_IDS_PER_QUERY => {
            let unique: Vec<String> = ids
                .iter()
                .cloned()
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            unique
                .chunks(MAX_IDS_PER_QUERY)
                .map(|chunk| Filter::Ids(chunk.to_vec()))
                .collect()
        }
        other => vec![other.clone()],
    }
}

/// `WHERE` clause and parameters for a filter.
fn where_clause(filter: &Filter) -> (String, Vec<Value>) {
    match filter {
        Filter::All => ("1 = 1".to_string(), vec![]),
        Filter::Id(id) => ("id = ?1".to_string(), vec![Value::Text(id.clone())]),
        Filter::Ids(ids) if ids.is_empty() => ("0 = 1".to_string(), vec![]),
        Filter::Ids(ids) => {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            (
                format!("id IN ({})", placeholders.join(", ")),
                ids.iter().cloned().map(Value::Text).collect(),
            )
        }
        Filter::Range { id, from, to } => (
            "id = ?1 AND num >= ?2 AND num <= ?3".to_string(),
            vec![
                Value::Text(id.clone()),
                Value::Integer(*from),
                Value::Integer(*to),
            ],
        ),
    }
}

impl Records for SqliteRecords<'_> {
    fn find_one(&self, model: Model, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        Ok(self
            .tx
            .query_row(
                &format!("SELECT data FROM {} WHERE id = ?1 AND num = ?2", model.table()),
                params![key.id, key.num],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn find_many(&self, model: Model, filter: &Filter) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        let mut rows = Vec::new();
        for part in split_filter(filter) {
            let (clause, values) = where_clause(&part);
            let mut stmt = self.tx.prepare(&format!(
                "SELECT id, num, data FROM {} WHERE {clause} ORDER BY id, num",
                model.table()
            ))?;
            let found = stmt
                .query_map(params_from_iter(values), |row| {
                    Ok((
                        RecordKey {
                            id: row.get(0)?,
                            num: row.get(1)?,
                        },
                        row.get(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.extend(found);
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    fn create(&mut self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<()> {
        self.check_writable(model)?;
        let inserted = self.tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (id, num, data) VALUES (?1, ?2, ?3)",
                model.table()
            ),
            params![key.id, key.num, data],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists {
                model,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn upsert(&mut self, model: Model, key: RecordKey, data: Vec<u8>) -> Result<()> {
        self.check_writable(model)?;
        self.tx.execute(
            &format!(
                "INSERT INTO {} (id, num, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id, num) DO UPDATE SET data = excluded.data",
                model.table()
            ),
            params![key.id, key.num, data],
        )?;
        Ok(())
    }

    fn update(&mut self, model: Model, key: &RecordKey, data: Vec<u8>) -> Result<bool> {
        self.check_writable(model)?;
        let updated = self.tx.execute(
            &format!("UPDATE {} SET data = ?3 WHERE id = ?1 AND num = ?2", model.table()),
            params![key.id, key.num, data],
        )?;
        Ok(updated > 0)
    }

    fn delete(&mut self, model: Model, filter: &Filter) -> Result<usize> {
        self.check_writable(model)?;
        let mut removed = 0;
        for part in split_filter(filter) {
            let (clause, values) = where_clause(&part);
            removed += self.tx.execute(
                &format!("DELETE FROM {} WHERE {clause}", model.table()),
                params_from_iter(values),
            )?;
        }
        Ok(removed)
    }

    fn count(&self, model: Model, filter: &Filter) -> Result<usize> {
        let mut total = 0;
        for part in split_filter(filter) {
            let (clause, values) = where_clause(&part);
            let count: i64 = self.tx.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE {clause}", model.table()),
                params_from_iter(values),
                |row| row.get(0),
            )?;
            total += count as usize;
        }
        Ok(total)
    }
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn transaction<T, F>(&self, mode: TxMode, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Records) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(format!("sqlite connection: {e}")))?;

            let behavior = match mode {
                TxMode::Read => TransactionBehavior::Deferred,
                TxMode::Write => TransactionBehavior::Immediate,
            };
            let tx = conn.transaction_with_behavior(behavior)?;
            let out = f(&mut SqliteRecords {
                tx: &tx,
                writable: mode == TxMode::Write,
            })?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crud() {
        let adapter = SqliteAdapter::open_memory().unwrap();
        let key = RecordKey::id("event");

        adapter.create(Model::Cleartexts, key.clone(), b"hi".to_vec()).await.unwrap();
        assert!(matches!(
            adapter.create(Model::Cleartexts, key.clone(), b"again".to_vec()).await,
            Err(StoreError::AlreadyExists { .. })
        ));

        adapter.upsert(Model::Cleartexts, key.clone(), b"hello".to_vec()).await.unwrap();
        assert_eq!(
            adapter.find_one(Model::Cleartexts, key.clone()).await.unwrap(),
            Some(b"hello".to_vec())
        );

        assert!(adapter.update(Model::Cleartexts, key.clone(), b"x".to_vec()).await.unwrap());
        assert!(!adapter
            .update(Model::Cleartexts, RecordKey::id("missing"), b"x".to_vec())
            .await
            .unwrap());

        assert_eq!(adapter.delete(Model::Cleartexts, Filter::Id("event".into())).await.unwrap(), 1);
        assert_eq!(adapter.find_one(Model::Cleartexts, key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_filters() {
        let adapter = SqliteAdapter::open_memory().unwrap();
        for num in 0..5 {
            adapter
                .upsert(Model::Miniblocks, RecordKey::numbered("a", num), vec![num as u8])
                .await
                .unwrap();
        }
        adapter
            .upsert(Model::Miniblocks, RecordKey::numbered("b", 0), vec![9])
            .await
            .unwrap();

        let range = adapter
            .find_many(Model::Miniblocks, Filter::Range { id: "a".into(), from: 1, to: 3 })
            .await
            .unwrap();
        assert_eq!(range.iter().map(|(k, _)| k.num).collect::<Vec<_>>(), vec![1, 2, 3]);

        let ids = adapter
            .find_many(Model::Miniblocks, Filter::Ids(vec!["b".into(), "c".into()]))
            .await
            .unwrap();
        assert_eq!(ids, vec![(RecordKey::numbered("b", 0), vec![9])]);

        assert_eq!(adapter.count(Model::Miniblocks, Filter::All).await.unwrap(), 6);
        assert_eq!(adapter.count(Model::Miniblocks, Filter::Ids(vec![])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let adapter = SqliteAdapter::open_memory().unwrap();
        let result: Result<()> = adapter
            .transaction(TxMode::Write, |tx| {
                tx.upsert(Model::Snapshots, RecordKey::id("s"), vec![1])?;
                Err(StoreError::InvalidData("stop".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(adapter.count(Model::Snapshots, Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strand.db");

        {
            let adapter = SqliteAdapter::open(&path).unwrap();
            adapter
                .upsert(Model::SyncedStreams, RecordKey::id("s"), vec![4, 2])
                .await
                .unwrap();
        }

        let adapter = SqliteAdapter::open(&path).unwrap();
        assert_eq!(
            adapter.find_one(Model::SyncedStreams, RecordKey::id("s")).await.unwrap(),
            Some(vec![4, 2])
        );
    }

    #[tokio::test]
    async fn test_large_id_lists_are_chunked() {
        let adapter = SqliteAdapter::open_memory().unwrap();
        adapter
            .transaction(TxMode::Write, |tx| {
                for i in 0..1200 {
                    tx.upsert(Model::Cleartexts, RecordKey::id(format!("e{i:05}")), vec![1])?;
                }
                Ok(())
            })
            .await
            .unwrap();

        // More ids than SQLite binds in one statement, with repeats and misses
        let mut ids: Vec<String> = (0..40_000).map(|i| format!("e{i:05}")).collect();
        ids.extend((0..10).map(|i| format!("e{i:05}")));

        let rows = adapter
            .find_many(Model::Cleartexts, Filter::Ids(ids.clone()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1200);
        assert!(rows.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(adapter.count(Model::Cleartexts, Filter::Ids(ids.clone())).await.unwrap(), 1200);
        assert_eq!(adapter.delete(Model::Cleartexts, Filter::Ids(ids)).await.unwrap(), 1200);
    }
}
