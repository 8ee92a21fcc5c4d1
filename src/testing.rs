//! Test doubles for the drive, token endpoint, login flow and store

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use crate::cache::{LocalStore, MemoryStore, Record, StorageError, StoreResult, Table};
use crate::config::BackendKind;
use crate::drive::types::audio_mime_for;
use crate::drive::{
    AuthError, Authorizer, DriveError, DriveMode, DriveResult, FileEntry, FolderAccess, PickedItem,
    PickerIngest, RefreshError, RemoteDrive, TokenGrant, TokenSource,
};

pub fn grant(
    access: &str,
    refresh: Option<&str>,
    lifetime_secs: i64,
    account: Option<&str>,
) -> TokenGrant {
    TokenGrant {
        access_token: SecretString::from(access.to_string()),
        refresh_token: refresh.map(|r| SecretString::from(r.to_string())),
        expires_at: Utc::now() + chrono::Duration::seconds(lifetime_secs),
        account: account.map(str::to_string),
    }
}

pub fn picked(id: &str, name: &str, parent: Option<&str>) -> PickedItem {
    PickedItem {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: audio_mime_for(name)
            .unwrap_or("application/octet-stream")
            .to_string(),
        parent_id: parent.map(str::to_string),
    }
}

enum Outcome {
    Succeed(String),
    Refuse,
    Unreachable,
}

/// Token endpoint double counting refresh calls
pub struct FakeTokenSource {
    outcome: Outcome,
    rotate_to: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
    last_refresh_token: Mutex<Option<String>>,
}

impl FakeTokenSource {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            rotate_to: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_refresh_token: Mutex::new(None),
        }
    }

    pub fn succeeding(access: &str) -> Self {
        Self::with_outcome(Outcome::Succeed(access.to_string()))
    }

    /// Answers `invalid_grant`
    pub fn refusing() -> Self {
        Self::with_outcome(Outcome::Refuse)
    }

    pub fn unreachable() -> Self {
        Self::with_outcome(Outcome::Unreachable)
    }

    pub fn with_delay(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    pub fn rotating(mut self, refresh_token: &str) -> Self {
        self.rotate_to = Some(refresh_token.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenSource for FakeTokenSource {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.expose_secret().to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.outcome {
            Outcome::Succeed(access) => Ok(grant(access, self.rotate_to.as_deref(), 3600, None)),
            Outcome::Refuse => Err(RefreshError::InteractionRequired("invalid_grant".to_string())),
            Outcome::Unreachable => Err(RefreshError::Transport("connection refused".to_string())),
        }
    }
}

/// Interactive login double
pub struct FakeAuthorizer {
    grant: Option<TokenGrant>,
    calls: AtomicUsize,
}

impl FakeAuthorizer {
    pub fn new(grant: TokenGrant) -> Self {
        Self {
            grant: Some(grant),
            calls: AtomicUsize::new(0),
        }
    }

    /// The user closes the login window
    pub fn failing() -> Self {
        Self {
            grant: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    async fn authorize(&self) -> Result<TokenGrant, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.grant
            .clone()
            .ok_or_else(|| AuthError::Interactive("cancelled by user".to_string()))
    }
}

/// In-memory remote drive. Hierarchical or ingest mode.
pub struct FakeDrive {
    ingest: bool,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    folders: Mutex<HashMap<String, Vec<FileEntry>>>,
    files: Mutex<HashMap<String, FileEntry>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    access: Mutex<HashMap<String, String>>,
    selection: Mutex<Vec<PickedItem>>,
    delay: Mutex<Duration>,
    remote_calls: AtomicUsize,
    access_checks: AtomicUsize,
    resets: AtomicUsize,
}

impl FakeDrive {
    fn with_mode(ingest: bool) -> Self {
        Self {
            ingest,
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            folders: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            blobs: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            access: Mutex::new(HashMap::new()),
            selection: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            remote_calls: AtomicUsize::new(0),
            access_checks: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    pub fn hierarchical() -> Self {
        Self::with_mode(false)
    }

    pub fn ingest() -> Self {
        Self::with_mode(true)
    }

    /// Replace a folder's remote listing
    pub fn set_children(&self, folder_id: &str, children: Vec<FileEntry>) {
        let mut files = self.files.lock().unwrap();
        for child in &children {
            files.insert(child.id.clone(), child.clone());
        }
        self.folders
            .lock()
            .unwrap()
            .insert(folder_id.to_string(), children);
    }

    pub fn add_blob(&self, id: &str, data: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(id.to_string(), data.to_vec());
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_folder(&self, folder_id: &str) {
        self.failing.lock().unwrap().insert(folder_id.to_string());
    }

    pub fn set_delay(&self, millis: u64) {
        *self.delay.lock().unwrap() = Duration::from_millis(millis);
    }

    pub fn grant_access(&self, folder_id: &str, name: &str) {
        self.access
            .lock()
            .unwrap()
            .insert(folder_id.to_string(), name.to_string());
    }

    pub fn set_selection(&self, items: Vec<PickedItem>) {
        *self.selection.lock().unwrap() = items;
    }

    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }

    pub fn access_checks(&self) -> usize {
        self.access_checks.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    async fn remote_call(&self, id: &str) -> DriveResult<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(id) {
            return Err(DriveError::Network("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDrive for FakeDrive {
    fn kind(&self) -> BackendKind {
        if self.ingest {
            BackendKind::Picker
        } else {
            BackendKind::Graph
        }
    }

    fn mode(&self) -> DriveMode<'_> {
        if self.ingest {
            DriveMode::Ingest(self)
        } else {
            DriveMode::Hierarchical
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> DriveResult<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AuthError::NotSignedIn.into());
        }
        self.set_connected(true);
        Ok(())
    }

    async fn reauthorize(&self) -> DriveResult<()> {
        self.fail_connect.store(false, Ordering::SeqCst);
        self.set_connected(true);
        Ok(())
    }

    fn root_folder_id(&self) -> &str {
        if self.ingest {
            crate::drive::picker::ROOT_ID
        } else {
            crate::drive::graph::ROOT_ID
        }
    }

    async fn get_file(&self, id: &str) -> DriveResult<FileEntry> {
        if self.ingest {
            return Err(DriveError::NotSupported("ingest mode"));
        }
        self.remote_call(id).await?;
        self.files
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(id.to_string()))
    }

    async fn get_children(&self, folder_id: &str) -> DriveResult<Vec<FileEntry>> {
        if self.ingest {
            return Err(DriveError::NotSupported("ingest mode"));
        }
        self.remote_call(folder_id).await?;
        self.folders
            .lock()
            .unwrap()
            .get(folder_id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(folder_id.to_string()))
    }

    async fn fetch_blob(&self, track_id: &str) -> DriveResult<Vec<u8>> {
        self.remote_call(track_id).await?;
        self.blobs
            .lock()
            .unwrap()
            .get(track_id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(track_id.to_string()))
    }

    async fn reset_user(&self) -> DriveResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);
        Ok(())
    }
}

#[async_trait]
impl PickerIngest for FakeDrive {
    async fn pick(&self) -> DriveResult<Vec<PickedItem>> {
        Ok(self.selection.lock().unwrap().clone())
    }

    async fn check_folder_access(&self, folder_id: &str) -> DriveResult<FolderAccess> {
        self.access_checks.fetch_add(1, Ordering::SeqCst);
        let name = self.access.lock().unwrap().get(folder_id).cloned();
        Ok(FolderAccess {
            has_access: name.is_some(),
            folder_name: name,
        })
    }
}

/// Memory store that refuses to write selected file entries
pub struct FailingStore {
    inner: MemoryStore,
    refused: HashSet<String>,
}

impl FailingStore {
    pub fn refusing(ids: &[&str]) -> Self {
        Self {
            inner: MemoryStore::new(),
            refused: ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[async_trait]
impl LocalStore for FailingStore {
    async fn init(&self) -> StoreResult<()> {
        self.inner.init().await
    }

    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<Record>> {
        self.inner.get(table, key).await
    }

    async fn put(&self, record: Record) -> StoreResult<()> {
        if record.table() == Table::Files && self.refused.contains(record.key()) {
            return Err(StorageError::Io("disk full".to_string()));
        }
        self.inner.put(record).await
    }

    async fn get_all(&self, table: Table) -> StoreResult<Vec<Record>> {
        self.inner.get_all(table).await
    }

    async fn count(&self, table: Table, key: &str) -> StoreResult<usize> {
        self.inner.count(table, key).await
    }

    async fn delete(&self, table: Table, key: &str) -> StoreResult<()> {
        self.inner.delete(table, key).await
    }

    async fn read_value(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.read_value(key).await
    }

    async fn write_value(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.write_value(key, value).await
    }

    async fn remove_value(&self, key: &str) -> StoreResult<()> {
        self.inner.remove_value(key).await
    }
}
