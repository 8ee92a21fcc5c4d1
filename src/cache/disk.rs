//! File-backed store engine
//!
//! One directory per table under the cache root, one file per key. Writes go
//! through a temp file and a rename so a crash never leaves a half-written
//! record behind. Blobs carry a SHA-1 sidecar that is checked on every read.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use super::metadata::EntryCache;
use super::store::{LocalStore, Record, RootMarker, StorageError, StoreResult, Table};
use crate::drive::FileEntry;

const VALUES_FILE: &str = "values.json";
const TMP_SUFFIX: &str = ".tmp";

/// Durable [`LocalStore`] on the local filesystem
pub struct DiskStore {
    /// Cache root; one subdirectory per table
    root: PathBuf,
    /// Set once `init` has created the table directories
    initialized: AtomicBool,
    /// Recently used file entries
    hot: EntryCache,
    /// Serializes read-modify-write of the values file
    values_lock: Mutex<()>,
}

impl DiskStore {
    /// Create a store rooted at `root`. Directories are created by `init`.
    ///
    /// # Arguments
    /// * `root` - Cache directory, usually `AppConfig::cache_dir()`
    pub fn with_dir(root: PathBuf) -> Self {
        Self {
            root,
            initialized: AtomicBool::new(false),
            hot: EntryCache::new(),
            values_lock: Mutex::new(()),
        }
    }

    /// Hit/miss statistics of the hot entry cache
    pub fn entry_cache(&self) -> &EntryCache {
        &self.hot
    }

    fn ensure_ready(&self) -> StoreResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    fn table_dir(&self, table: Table) -> PathBuf {
        self.root.join(table.name())
    }

    fn record_path(&self, table: Table, key: &str) -> PathBuf {
        let file_name = encode_key(key);
        let dir = self.table_dir(table);
        match table {
            Table::Files | Table::Roots => dir.join(format!("{}.json", file_name)),
            Table::Blobs => dir.join(format!("{}.bin", file_name)),
        }
    }

    fn digest_path(&self, key: &str) -> PathBuf {
        self.table_dir(Table::Blobs)
            .join(format!("{}.sha1", encode_key(key)))
    }

    /// Remove temp files left by interrupted writes
    fn cleanup(&self) {
        for table in Table::ALL {
            let Ok(read_dir) = fs::read_dir(self.table_dir(table)) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.to_string_lossy().ends_with(TMP_SUFFIX) {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }

    fn read_values(&self) -> StoreResult<BTreeMap<String, String>> {
        let path = self.root.join(VALUES_FILE);
        match read_optional(&path)? {
            None => Ok(BTreeMap::new()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Io(format!("Unreadable {}: {}", VALUES_FILE, e))),
        }
    }

    fn write_values(&self, values: &BTreeMap<String, String>) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(values)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        write_atomic(&self.root.join(VALUES_FILE), &json)
    }
}

/// Make a key safe to use as a file name
fn encode_key(key: &str) -> String {
    urlencoding::encode(key).replace('.', "%2E")
}

fn decode_key(file_name: &str) -> Option<String> {
    urlencoding::decode(file_name).ok().map(|k| k.into_owned())
}

fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_optional(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::Io(format!("No parent directory for {:?}", path)))?;
    let mut tmp = tempfile::Builder::new()
        .suffix(TMP_SUFFIX)
        .tempfile_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path)
        .map_err(|e| StorageError::Io(e.to_string()))?;
    Ok(())
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn corrupt(table: Table, key: &str, reason: impl ToString) -> StorageError {
    StorageError::Corrupt {
        table,
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn decode_record(table: Table, key: &str, bytes: &[u8]) -> StoreResult<Record> {
    match table {
        Table::Files => serde_json::from_slice::<FileEntry>(bytes)
            .map(Record::File)
            .map_err(|e| corrupt(table, key, e)),
        Table::Roots => serde_json::from_slice::<RootMarker>(bytes)
            .map(Record::Root)
            .map_err(|e| corrupt(table, key, e)),
        Table::Blobs => Ok(Record::Blob {
            id: key.to_string(),
            data: bytes.to_vec(),
        }),
    }
}

/// Run a blocking filesystem operation off the async workers
async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Io(format!("Storage task failed: {}", e)))?
}

#[async_trait]
impl LocalStore for DiskStore {
    async fn init(&self) -> StoreResult<()> {
        for table in Table::ALL {
            let dir = self.table_dir(table);
            fs::create_dir_all(&dir)
                .map_err(|e| StorageError::Io(format!("Failed to create {:?}: {}", dir, e)))?;
        }
        self.cleanup();
        self.initialized.store(true, Ordering::Release);

        info!(root = %self.root.display(), "Disk store initialized");
        Ok(())
    }

    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<Record>> {
        self.ensure_ready()?;

        if table == Table::Files {
            if let Some(entry) = self.hot.get(key) {
                return Ok(Some(Record::File(entry)));
            }
        }

        let path = self.record_path(table, key);
        let digest_path = self.digest_path(key);
        let owned_key = key.to_string();
        let record = blocking(move || {
            let Some(bytes) = read_optional(&path)? else {
                return Ok(None);
            };
            if table == Table::Blobs {
                let expected = read_optional(&digest_path)?
                    .map(|d| String::from_utf8_lossy(&d).trim().to_string());
                let actual = sha1_hex(&bytes);
                if expected.as_deref() != Some(actual.as_str()) {
                    return Err(corrupt(table, &owned_key, "checksum mismatch"));
                }
            }
            decode_record(table, &owned_key, &bytes).map(Some)
        })
        .await?;

        if let Some(Record::File(entry)) = &record {
            self.hot.insert(entry.clone());
        }
        Ok(record)
    }

    async fn put(&self, record: Record) -> StoreResult<()> {
        self.ensure_ready()?;

        let table = record.table();
        let key = record.key().to_string();
        let path = self.record_path(table, &key);

        match record {
            Record::File(entry) => {
                let json = serde_json::to_vec(&entry)
                    .map_err(|e| corrupt(table, &key, e))?;
                blocking(move || write_atomic(&path, &json)).await?;
                self.hot.insert(entry);
            }
            Record::Root(marker) => {
                let json = serde_json::to_vec(&marker)
                    .map_err(|e| corrupt(table, &key, e))?;
                blocking(move || write_atomic(&path, &json)).await?;
            }
            Record::Blob { data, .. } => {
                let digest_path = self.digest_path(&key);
                let size = data.len();
                // Payload first: a torn overwrite reads as corrupt and is
                // fetched again
                blocking(move || {
                    write_atomic(&path, &data)?;
                    write_atomic(&digest_path, sha1_hex(&data).as_bytes())
                })
                .await?;
                debug!(id = %key, size = size, "Stored blob");
                return Ok(());
            }
        }

        debug!(table = %table, key = %key, "Stored record");
        Ok(())
    }

    async fn get_all(&self, table: Table) -> StoreResult<Vec<Record>> {
        self.ensure_ready()?;

        let dir = self.table_dir(table);
        let mut records = Vec::new();
        let mut keys = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let stem = match table {
                Table::Files | Table::Roots => file_name.strip_suffix(".json"),
                Table::Blobs => file_name.strip_suffix(".bin"),
            };
            match stem.and_then(decode_key) {
                Some(key) => keys.push(key),
                None => {
                    if !file_name.ends_with(".sha1") && !file_name.ends_with(TMP_SUFFIX) {
                        warn!(path = %path.display(), "Skipping unrecognized cache file");
                    }
                }
            }
        }

        for key in keys {
            if let Some(record) = self.get(table, &key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn count(&self, table: Table, key: &str) -> StoreResult<usize> {
        self.ensure_ready()?;
        if table == Table::Files && self.hot.get(key).is_some() {
            return Ok(1);
        }
        Ok(usize::from(self.record_path(table, key).exists()))
    }

    async fn delete(&self, table: Table, key: &str) -> StoreResult<()> {
        self.ensure_ready()?;
        if table == Table::Files {
            self.hot.invalidate(key);
        }
        let path = self.record_path(table, key);
        let digest_path = (table == Table::Blobs).then(|| self.digest_path(key));
        blocking(move || {
            remove_optional(&path)?;
            if let Some(digest_path) = digest_path {
                remove_optional(&digest_path)?;
            }
            Ok(())
        })
        .await
    }

    async fn read_value(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_ready()?;
        let _guard = self
            .values_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_values()?.get(key).cloned())
    }

    async fn write_value(&self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_ready()?;
        let _guard = self
            .values_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_values()?;
        values.insert(key.to_string(), value.to_string());
        self.write_values(&values)
    }

    async fn remove_value(&self, key: &str) -> StoreResult<()> {
        self.ensure_ready()?;
        let _guard = self
            .values_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_values()?;
        if values.remove(key).is_some() {
            self.write_values(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::StoreExt;
    use crate::drive::EntryKind;

    async fn open(dir: &tempfile::TempDir) -> DiskStore {
        let store = DiskStore::with_dir(dir.path().to_path_buf());
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::with_dir(dir.path().to_path_buf());
        assert!(matches!(
            store.get_file("x").await,
            Err(StorageError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut folder = FileEntry::folder("folder:1/a.b", "Albums", None);
        folder.kind = EntryKind::Folder {
            children_ids: Some(["t1".to_string()].into_iter().collect()),
        };

        {
            let store = open(&dir).await;
            store.put_file(folder.clone()).await.unwrap();
            store.add_root("folder:1/a.b").await.unwrap();
        }

        let store = open(&dir).await;
        assert_eq!(store.get_file("folder:1/a.b").await.unwrap(), Some(folder));
        assert_eq!(
            store.root_ids().await.unwrap(),
            vec!["folder:1/a.b".to_string()]
        );
        assert_eq!(store.all_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blob_checksum_verified() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store
            .put_blob("t1", b"audio bytes".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.get_blob("t1").await.unwrap(),
            Some(b"audio bytes".to_vec())
        );
        assert_eq!(store.count(Table::Blobs, "t1").await.unwrap(), 1);

        // Tamper with the payload behind the store's back
        fs::write(store.record_path(Table::Blobs, "t1"), b"garbage").unwrap();
        assert!(matches!(
            store.get_blob("t1").await,
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_torn_blob_overwrite_heals_on_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.put_blob("t1", b"old".to_vec()).await.unwrap();

        // Payload replaced, checksum still describing the old one
        fs::write(store.record_path(Table::Blobs, "t1"), b"new").unwrap();
        assert!(matches!(
            store.get_blob("t1").await,
            Err(StorageError::Corrupt { .. })
        ));

        store.put_blob("t1", b"new".to_vec()).await.unwrap();
        assert_eq!(store.get_blob("t1").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_stale_temp_files_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let files_dir = dir.path().join("files");
        fs::create_dir_all(&files_dir).unwrap();
        let stale = files_dir.join("abc123.tmp");
        fs::write(&stale, b"partial").unwrap();

        let store = open(&dir).await;
        assert!(!stale.exists());
        assert!(store.all_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        store
            .put_file(FileEntry::file("f", "f.txt", None))
            .await
            .unwrap();
        store.delete(Table::Files, "f").await.unwrap();
        assert!(store.get_file("f").await.unwrap().is_none());
        assert_eq!(store.count(Table::Files, "f").await.unwrap(), 0);

        store
            .write_value("picker.refreshToken", "r-1")
            .await
            .unwrap();
        store.write_value("picker.account", "a@b.c").await.unwrap();
        store.remove_value("picker.refreshToken").await.unwrap();
        assert!(store
            .read_value("picker.refreshToken")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.read_value("picker.account").await.unwrap().as_deref(),
            Some("a@b.c")
        );
    }
}
