//! Local Cache Store contract
//!
//! Three keyed tables (`files`, `roots`, `blobs`) plus a small string value
//! area for credential records. Every engine implements [`LocalStore`]; the
//! typed helpers in [`StoreExt`] come for free.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::drive::FileEntry;

/// Local storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Local store is not initialized")]
    NotInitialized,

    #[error("Local store I/O failure: {0}")]
    Io(String),

    #[error("Corrupted record {key} in {table}: {reason}")]
    Corrupt {
        table: Table,
        key: String,
        reason: String,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StorageError>;

/// Logical tables of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Files,
    Roots,
    Blobs,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Files, Table::Roots, Table::Blobs];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Files => "files",
            Table::Roots => "roots",
            Table::Blobs => "blobs",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Presence-only marker in the `roots` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMarker {
    pub id: String,
}

/// A record of one of the three tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    File(FileEntry),
    Root(RootMarker),
    Blob { id: String, data: Vec<u8> },
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Record::File(_) => Table::Files,
            Record::Root(_) => Table::Roots,
            Record::Blob { .. } => Table::Blobs,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Record::File(entry) => &entry.id,
            Record::Root(marker) => &marker.id,
            Record::Blob { id, .. } => id,
        }
    }
}

/// Durable keyed persistence for entries, root markers and blobs.
///
/// Operations are atomic per key and upserts are last-writer-wins. Nothing
/// spans tables.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Prepare the storage medium. Every other call fails with
    /// [`StorageError::NotInitialized`] until this succeeds.
    async fn init(&self) -> StoreResult<()>;

    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<Record>>;

    /// Insert or replace the record under its own key
    async fn put(&self, record: Record) -> StoreResult<()>;

    async fn get_all(&self, table: Table) -> StoreResult<Vec<Record>>;

    /// Number of records stored under `key` (0 or 1)
    async fn count(&self, table: Table, key: &str) -> StoreResult<usize>;

    async fn delete(&self, table: Table, key: &str) -> StoreResult<()>;

    async fn read_value(&self, key: &str) -> StoreResult<Option<String>>;

    async fn write_value(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn remove_value(&self, key: &str) -> StoreResult<()>;
}

fn mismatch(table: Table, key: &str, record: &Record) -> StorageError {
    StorageError::Corrupt {
        table,
        key: key.to_string(),
        reason: format!("found a {} record", record.table()),
    }
}

/// Typed access on top of [`LocalStore`]
#[async_trait]
pub trait StoreExt: LocalStore {
    async fn get_file(&self, id: &str) -> StoreResult<Option<FileEntry>> {
        match self.get(Table::Files, id).await? {
            None => Ok(None),
            Some(Record::File(entry)) => Ok(Some(entry)),
            Some(other) => Err(mismatch(Table::Files, id, &other)),
        }
    }

    async fn put_file(&self, entry: FileEntry) -> StoreResult<()> {
        self.put(Record::File(entry)).await
    }

    async fn all_files(&self) -> StoreResult<Vec<FileEntry>> {
        Ok(self
            .get_all(Table::Files)
            .await?
            .into_iter()
            .filter_map(|record| match record {
                Record::File(entry) => Some(entry),
                _ => None,
            })
            .collect())
    }

    async fn get_blob(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.get(Table::Blobs, id).await? {
            None => Ok(None),
            Some(Record::Blob { data, .. }) => Ok(Some(data)),
            Some(other) => Err(mismatch(Table::Blobs, id, &other)),
        }
    }

    async fn put_blob(&self, id: &str, data: Vec<u8>) -> StoreResult<()> {
        self.put(Record::Blob {
            id: id.to_string(),
            data,
        })
        .await
    }

    async fn has_blob(&self, id: &str) -> StoreResult<bool> {
        Ok(self.count(Table::Blobs, id).await? > 0)
    }

    async fn root_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .get_all(Table::Roots)
            .await?
            .into_iter()
            .map(|record| record.key().to_string())
            .collect())
    }

    async fn is_root(&self, id: &str) -> StoreResult<bool> {
        Ok(self.count(Table::Roots, id).await? > 0)
    }

    async fn add_root(&self, id: &str) -> StoreResult<()> {
        self.put(Record::Root(RootMarker { id: id.to_string() }))
            .await
    }

    async fn remove_root(&self, id: &str) -> StoreResult<()> {
        self.delete(Table::Roots, id).await
    }
}

impl<S: LocalStore + ?Sized> StoreExt for S {}
