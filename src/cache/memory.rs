//! In-memory store engine
//!
//! Used for tests and for sessions that should not touch the disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::store::{LocalStore, Record, StorageError, StoreResult, Table};

#[derive(Default)]
struct Tables {
    files: HashMap<String, Record>,
    roots: HashMap<String, Record>,
    blobs: HashMap<String, Record>,
    values: HashMap<String, String>,
}

impl Tables {
    fn table(&self, table: Table) -> &HashMap<String, Record> {
        match table {
            Table::Files => &self.files,
            Table::Roots => &self.roots,
            Table::Blobs => &self.blobs,
        }
    }

    fn table_mut(&mut self, table: Table) -> &mut HashMap<String, Record> {
        match table {
            Table::Files => &mut self.files,
            Table::Roots => &mut self.roots,
            Table::Blobs => &mut self.blobs,
        }
    }
}

/// Volatile [`LocalStore`] backed by hash maps
#[derive(Default)]
pub struct MemoryStore {
    initialized: AtomicBool,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_ready(&self) -> StoreResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn init(&self) -> StoreResult<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<Record>> {
        self.ensure_ready()?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.table(table).get(key).cloned())
    }

    async fn put(&self, record: Record) -> StoreResult<()> {
        self.ensure_ready()?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .table_mut(record.table())
            .insert(record.key().to_string(), record);
        Ok(())
    }

    async fn get_all(&self, table: Table) -> StoreResult<Vec<Record>> {
        self.ensure_ready()?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.table(table).values().cloned().collect())
    }

    async fn count(&self, table: Table, key: &str) -> StoreResult<usize> {
        self.ensure_ready()?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(usize::from(tables.table(table).contains_key(key)))
    }

    async fn delete(&self, table: Table, key: &str) -> StoreResult<()> {
        self.ensure_ready()?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.table_mut(table).remove(key);
        Ok(())
    }

    async fn read_value(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_ready()?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.values.get(key).cloned())
    }

    async fn write_value(&self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_ready()?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_value(&self, key: &str) -> StoreResult<()> {
        self.ensure_ready()?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::StoreExt;
    use crate::drive::FileEntry;

    #[tokio::test]
    async fn test_requires_init() {
        let store = MemoryStore::new();
        let err = store.get(Table::Files, "a").await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));

        store.init().await.unwrap();
        assert!(store.get(Table::Files, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_round_trip() {
        let store = MemoryStore::new();
        store.init().await.unwrap();

        let entry = FileEntry::track("t1", "song.flac", Some("f1".into()), "audio/flac");
        store.put_file(entry.clone()).await.unwrap();
        assert_eq!(store.get_file("t1").await.unwrap(), Some(entry));

        // Last writer wins
        let renamed = FileEntry::track("t1", "renamed.flac", Some("f1".into()), "audio/flac");
        store.put_file(renamed.clone()).await.unwrap();
        assert_eq!(store.get_file("t1").await.unwrap(), Some(renamed));
        assert_eq!(store.count(Table::Files, "t1").await.unwrap(), 1);
        assert_eq!(store.count(Table::Files, "missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tables_are_independent() {
        let store = MemoryStore::new();
        store.init().await.unwrap();

        store.add_root("r1").await.unwrap();
        store.put_blob("r1", vec![1, 2, 3]).await.unwrap();

        assert!(store.get_file("r1").await.unwrap().is_none());
        assert_eq!(store.root_ids().await.unwrap(), vec!["r1".to_string()]);
        assert_eq!(store.get_blob("r1").await.unwrap(), Some(vec![1, 2, 3]));

        store.remove_root("r1").await.unwrap();
        assert!(store.root_ids().await.unwrap().is_empty());
        assert!(store.has_blob("r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_values() {
        let store = MemoryStore::new();
        store.init().await.unwrap();

        store
            .write_value("graph.account", "me@example.com")
            .await
            .unwrap();
        assert_eq!(
            store.read_value("graph.account").await.unwrap().as_deref(),
            Some("me@example.com")
        );
        store.remove_value("graph.account").await.unwrap();
        assert!(store.read_value("graph.account").await.unwrap().is_none());
    }
}
