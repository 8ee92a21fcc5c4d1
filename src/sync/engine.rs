//! File Store orchestrator
//!
//! Decides per read whether to answer from the local cache or to fetch from
//! the remote drive and merge the result back. Owns the configured
//! lifecycle: load the cached roots, connect, sync the root folder.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::ingest::{self, IngestReport};
use crate::cache::{LocalStore, StorageError, StoreExt, StoreResult};
use crate::drive::types::EntryKind;
use crate::drive::{DriveMode, FileEntry, PickedItem, RemoteDrive};
use crate::error::{CacheError, CacheResult};
use crate::notice::{Notice, Notices};
use crate::tags;

/// Display name of a root folder synthesized before it was ever fetched
const ROOT_NAME: &str = "Root";

/// Lifecycle of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    LoadingLocal,
    /// Root list loaded from cache
    LocalReady,
    Connecting,
    Syncing,
    Ready,
    /// Reads served from cache, downloads refused
    ReadyOffline,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::LoadingLocal => "loading-local",
            SyncState::LocalReady => "local-ready",
            SyncState::Connecting => "connecting",
            SyncState::Syncing => "syncing",
            SyncState::Ready => "ready",
            SyncState::ReadyOffline => "ready-offline",
        };
        f.write_str(name)
    }
}

/// Cache façade over one store and at most one drive
pub struct FileStore {
    /// Authoritative local copy of entries, roots and blobs
    store: Arc<dyn LocalStore>,
    /// Remote drive, absent for a cache-only session
    drive: Option<Arc<dyn RemoteDrive>>,
    /// Persistent and transient user notices
    notices: Notices,
    /// Current lifecycle state
    state: RwLock<SyncState>,
    /// Network reachability as last reported
    online: AtomicBool,
    /// Root entries, sorted by name
    roots: RwLock<Vec<FileEntry>>,
    /// Tag parsing still running after `request_blob` returned
    metadata_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FileStore {
    /// Create an orchestrator. Nothing is read until [`FileStore::configure`].
    ///
    /// # Arguments
    /// * `store` - Local store engine
    /// * `drive` - Remote drive, or `None` to serve the cache only
    /// * `notices` - Channel for user-facing notices
    pub fn new(
        store: Arc<dyn LocalStore>,
        drive: Option<Arc<dyn RemoteDrive>>,
        notices: Notices,
    ) -> Self {
        Self {
            store,
            drive,
            notices,
            state: RwLock::new(SyncState::Uninitialized),
            online: AtomicBool::new(true),
            roots: RwLock::new(Vec::new()),
            metadata_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SyncState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            info!(from = %*state, to = %next, "File store state changed");
            *state = next;
        }
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Snapshot of the root entries, sorted by name
    pub fn roots(&self) -> Vec<FileEntry> {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Report network reachability. Going offline degrades `Ready`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
        match (self.state(), online) {
            (SyncState::Ready, false) => self.set_state(SyncState::ReadyOffline),
            (SyncState::ReadyOffline, true) if self.connected_drive().is_some() => {
                self.set_state(SyncState::Ready)
            }
            _ => {}
        }
    }

    /// Connected drive, if the network is up
    fn connected_drive(&self) -> Option<&Arc<dyn RemoteDrive>> {
        if !self.online.load(Ordering::Acquire) {
            return None;
        }
        self.drive.as_ref().filter(|drive| drive.is_connected())
    }

    /// Connected drive that can enumerate folders
    fn sync_drive(&self) -> Option<&Arc<dyn RemoteDrive>> {
        self.connected_drive()
            .filter(|drive| matches!(drive.mode(), DriveMode::Hierarchical))
    }

    fn require_drive(&self) -> CacheResult<&Arc<dyn RemoteDrive>> {
        self.drive
            .as_ref()
            .ok_or_else(|| CacheError::NotSupported("no remote drive configured".to_string()))
    }

    /// Cold start: load cached roots, then connect and sync when possible.
    ///
    /// A failed connect leaves the store serving from cache; the failure is
    /// reported through notices.
    pub async fn configure(&self, cancel: &CancellationToken) -> CacheResult<()> {
        self.set_state(SyncState::LoadingLocal);
        self.store.init().await?;
        self.refresh_roots().await?;
        self.set_state(SyncState::LocalReady);

        let Some(drive) = self.drive.as_ref() else {
            info!("No remote drive configured, serving from cache");
            self.set_state(SyncState::ReadyOffline);
            return Ok(());
        };
        if !self.online.load(Ordering::Acquire) {
            info!("Network unavailable, serving from cache");
            self.set_state(SyncState::ReadyOffline);
            return Ok(());
        }

        self.set_state(SyncState::Connecting);
        let connected = tokio::select! {
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            result = drive.connect() => result,
        };
        if let Err(e) = connected {
            let e = CacheError::from(e);
            self.report("connect", &e);
            self.set_state(SyncState::ReadyOffline);
            return Ok(());
        }

        if matches!(drive.mode(), DriveMode::Hierarchical) {
            self.set_state(SyncState::Syncing);
            if let Err(e) = self.sync_roots(cancel).await {
                self.set_state(SyncState::Ready);
                return Err(e);
            }
        }
        self.set_state(SyncState::Ready);
        Ok(())
    }

    /// Re-list the remote root folder and reconcile the root set with it
    pub async fn sync_roots(&self, cancel: &CancellationToken) -> CacheResult<Vec<FileEntry>> {
        let drive = self.sync_drive().ok_or(CacheError::Offline)?;
        let root_id = drive.root_folder_id().to_string();

        let result = self
            .sync_folder(drive.as_ref(), &root_id, true, cancel)
            .await;
        if let Err(e) = &result {
            self.report("sync roots", e);
        }
        result?;
        self.refresh_roots().await?;
        Ok(self.roots())
    }

    /// List a folder: from the remote when connected, otherwise from cache
    pub async fn get_children(
        &self,
        folder_id: &str,
        cancel: &CancellationToken,
    ) -> CacheResult<Vec<FileEntry>> {
        let Some(drive) = self.sync_drive() else {
            return self.cached_children(folder_id).await;
        };

        let is_root = folder_id == drive.root_folder_id();
        let result = self
            .sync_folder(drive.as_ref(), folder_id, is_root, cancel)
            .await;
        match result {
            Ok(children) => {
                if is_root {
                    self.refresh_roots().await?;
                }
                Ok(children)
            }
            Err(e) => {
                self.report("list folder", &e);
                Err(e)
            }
        }
    }

    /// Root ids, sorted by entry name
    pub async fn get_root_ids(&self) -> CacheResult<Vec<String>> {
        Ok(self
            .get_root_entries()
            .await?
            .into_iter()
            .map(|entry| entry.id)
            .collect())
    }

    /// Root entries from the store, sorted by name
    pub async fn get_root_entries(&self) -> CacheResult<Vec<FileEntry>> {
        self.refresh_roots().await?;
        Ok(self.roots())
    }

    pub async fn get_file(&self, id: &str) -> CacheResult<FileEntry> {
        self.store
            .get_file(id)
            .await?
            .ok_or_else(|| CacheError::NotFound(id.to_string()))
    }

    /// Blob of a track: cached copy, or download and cache it.
    ///
    /// Tags are parsed in the background whenever the track has none yet;
    /// the blob is returned without waiting for them. A cached copy that
    /// fails its checksum is downloaded again.
    pub async fn request_blob(
        &self,
        track_id: &str,
        cancel: &CancellationToken,
    ) -> CacheResult<Vec<u8>> {
        match self.store.get_blob(track_id).await {
            Ok(Some(blob)) => {
                trace!(track = %track_id, "Blob cache hit");
                if let Some(entry) = self.store.get_file(track_id).await? {
                    if entry.is_track() && entry.metadata().is_none() {
                        self.spawn_metadata(track_id, blob.clone());
                    }
                }
                return Ok(blob);
            }
            Ok(None) => {}
            Err(StorageError::Corrupt { reason, .. }) => {
                warn!(
                    track = %track_id,
                    reason = %reason,
                    "Cached blob unreadable, downloading again"
                );
            }
            Err(e) => return Err(e.into()),
        }

        let entry = self.get_file(track_id).await?;
        let drive = self.connected_drive().ok_or(CacheError::Offline)?;

        debug!(track = %track_id, "Blob cache miss, downloading");
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            result = drive.fetch_blob(track_id) => result,
        };
        let data = match fetched {
            Ok(data) => data,
            Err(e) => {
                let e = CacheError::from(e);
                self.report("download", &e);
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        self.store.put_blob(track_id, data.clone()).await?;
        debug!(track = %track_id, size = data.len(), "Blob cached");

        if entry.is_track() {
            self.spawn_metadata(track_id, data.clone());
        }
        Ok(data)
    }

    /// Wait for tag parsing started by [`FileStore::request_blob`]
    pub async fn flush_metadata(&self) {
        let pending = std::mem::take(&mut *self.metadata_tasks());
        for task in pending {
            if let Err(e) = task.await {
                warn!(error = %e, "Metadata task failed");
            }
        }
    }

    fn metadata_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.metadata_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_metadata(&self, track_id: &str, blob: Vec<u8>) {
        let store = self.store.clone();
        let id = track_id.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = attach_metadata(store, &id, &blob).await {
                warn!(track = %id, error = %e, "Failed to store track metadata");
            }
        });

        let mut tasks = self.metadata_tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Ask the user to pick items, confirm their parents and ingest them
    pub async fn pick_and_ingest(&self, cancel: &CancellationToken) -> CacheResult<IngestReport> {
        let drive = self.require_drive()?;
        let DriveMode::Ingest(picker) = drive.mode() else {
            return Err(CacheError::NotSupported(
                "picker ingestion on a hierarchical drive".to_string(),
            ));
        };

        let items = tokio::select! {
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            result = picker.pick() => result?,
        };
        let parents: BTreeSet<String> = ingest::group_by_parent(items.clone())
            .into_keys()
            .collect();
        let names = tokio::select! {
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            names = ingest::resolve_parent_names(picker, &parents) => names,
        };
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        self.ingest_selection(items, &names).await
    }

    /// Add a user selection to the cache.
    ///
    /// Each distinct parent becomes a folder whose child set grows by the
    /// selected items, and a root if it was not one already. A failure on one
    /// item is logged and counted; the rest of the batch continues.
    pub async fn ingest_picker_selection(
        &self,
        items: Vec<PickedItem>,
        parent_name_overrides: &HashMap<String, String>,
    ) -> CacheResult<IngestReport> {
        let drive = self.require_drive()?;
        if !matches!(drive.mode(), DriveMode::Ingest(_)) {
            return Err(CacheError::NotSupported(
                "picker ingestion on a hierarchical drive".to_string(),
            ));
        }
        self.ingest_selection(items, parent_name_overrides).await
    }

    async fn ingest_selection(
        &self,
        items: Vec<PickedItem>,
        names: &HashMap<String, String>,
    ) -> CacheResult<IngestReport> {
        let root_id = self.require_drive()?.root_folder_id().to_string();
        let mut report = IngestReport::default();

        for (parent_id, group) in ingest::group_by_parent(items) {
            let existing = self.store.get_file(&parent_id).await?;
            let mut children: BTreeSet<String> = existing
                .as_ref()
                .and_then(|entry| entry.children_ids())
                .cloned()
                .unwrap_or_default();

            for item in &group {
                if item.id == parent_id {
                    warn!(item = %item.id, "Skipping item listed as its own parent");
                    report.failed += 1;
                    continue;
                }
                match self.ingest_item(item, &parent_id).await {
                    Ok(()) => {
                        children.insert(item.id.clone());
                        report.ingested += 1;
                    }
                    Err(e) => {
                        warn!(
                            item = %item.id,
                            folder = %parent_id,
                            error = %e,
                            "Failed to ingest item"
                        );
                        report.failed += 1;
                    }
                }
            }

            let name = names
                .get(&parent_id)
                .cloned()
                .or_else(|| existing.as_ref().map(|entry| entry.name.clone()))
                .unwrap_or_else(|| ingest::fallback_name(&parent_id));
            let parent_of_parent = existing
                .as_ref()
                .and_then(|entry| entry.parent_id.clone())
                .or_else(|| Some(root_id.clone()));

            self.store
                .put_file(FileEntry {
                    id: parent_id.clone(),
                    name,
                    parent_id: parent_of_parent,
                    kind: EntryKind::Folder {
                        children_ids: Some(children),
                    },
                })
                .await?;
            if !self.store.is_root(&parent_id).await? {
                self.store.add_root(&parent_id).await?;
                debug!(folder = %parent_id, "Added root");
            }
            report.folders += 1;
        }

        self.refresh_roots().await?;
        info!(
            folders = report.folders,
            ingested = report.ingested,
            failed = report.failed,
            "Ingested picker selection"
        );
        Ok(report)
    }

    async fn ingest_item(&self, item: &PickedItem, parent_id: &str) -> StoreResult<()> {
        let entry = ingest::map_picked(item, parent_id);
        let previous = self.store.get_file(&entry.id).await?;
        self.store
            .put_file(entry.merged_over(previous.as_ref()))
            .await
    }

    /// Forget the signed-in user; cached entries stay readable
    pub async fn reset_user(&self) -> CacheResult<()> {
        let drive = self.require_drive()?;
        drive.reset_user().await?;
        self.set_state(SyncState::LocalReady);
        info!(backend = %drive.kind(), "User reset");
        Ok(())
    }

    /// Interactive login, then resume syncing
    pub async fn reauthorize(&self, cancel: &CancellationToken) -> CacheResult<()> {
        let drive = self.require_drive()?;
        if let Err(e) = drive.reauthorize().await {
            let e = CacheError::from(e);
            self.report("reauthorize", &e);
            return Err(e);
        }

        let online = self.online.load(Ordering::Acquire);
        if matches!(drive.mode(), DriveMode::Hierarchical) && online {
            self.set_state(SyncState::Syncing);
            let synced = self.sync_roots(cancel).await;
            self.set_state(SyncState::Ready);
            synced?;
        } else if online {
            self.set_state(SyncState::Ready);
        }
        Ok(())
    }

    /// Fetch a folder's children and commit them together with the folder's
    /// new child set. Nothing is written if the pass is cancelled before the
    /// commit starts; once started the commit runs to completion.
    async fn sync_folder(
        &self,
        drive: &dyn RemoteDrive,
        folder_id: &str,
        as_root: bool,
        cancel: &CancellationToken,
    ) -> CacheResult<Vec<FileEntry>> {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            result = drive.get_children(folder_id) => result?,
        };

        let parent = match self.store.get_file(folder_id).await? {
            Some(parent) => parent,
            None if folder_id == drive.root_folder_id() => {
                FileEntry::folder(folder_id, ROOT_NAME, None)
            }
            None => tokio::select! {
                _ = cancel.cancelled() => return Err(CacheError::Cancelled),
                result = drive.get_file(folder_id) => result?,
            },
        };

        if cancel.is_cancelled() {
            debug!(folder = %folder_id, "Sync pass cancelled before commit");
            return Err(CacheError::Cancelled);
        }

        let store = self.store.clone();
        let commit = tokio::spawn(commit_listing(store, parent, fetched, as_root));
        let children = match commit.await {
            Ok(result) => result?,
            Err(e) => {
                error!(folder = %folder_id, error = %e, "Commit task failed");
                let e = StorageError::Io(format!("commit task failed: {}", e));
                return Err(e.into());
            }
        };

        debug!(folder = %folder_id, count = children.len(), "Folder synced");
        Ok(children)
    }

    async fn cached_children(&self, folder_id: &str) -> CacheResult<Vec<FileEntry>> {
        let folder = self.get_file(folder_id).await?;
        let Some(ids) = folder.children_ids() else {
            return Err(CacheError::NotFound(format!("children of {}", folder_id)));
        };

        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_file(id).await? {
                Some(child) => children.push(child),
                None => debug!(folder = %folder_id, child = %id, "Child entry missing from cache"),
            }
        }
        sort_by_name(&mut children);
        trace!(folder = %folder_id, count = children.len(), "Served children from cache");
        Ok(children)
    }

    /// Reload the in-memory root view from the store
    async fn refresh_roots(&self) -> CacheResult<()> {
        let mut entries = Vec::new();
        for id in self.store.root_ids().await? {
            match self.store.get_file(&id).await? {
                Some(entry) => entries.push(entry),
                None => debug!(root = %id, "Root marker without entry"),
            }
        }
        sort_by_name(&mut entries);
        *self.roots.write().unwrap_or_else(PoisonError::into_inner) = entries;
        Ok(())
    }

    fn report(&self, operation: &str, err: &CacheError) {
        match err {
            CacheError::Cancelled => debug!(operation, "Cancelled"),
            // The token manager already raised the persistent notice
            e if e.needs_reauth() => warn!(operation, "Reauthorization required"),
            e => {
                error!(operation, error = %e, "Operation failed");
                self.notices
                    .transient(format!("Failed to {}: {}", operation, e));
            }
        }
    }
}

fn sort_by_name(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Children first, then the parent with its full-replace child set, then
/// the root markers when this is the root folder. Each child is merged over
/// the stored row at commit time so locally derived fields survive.
async fn commit_listing(
    store: Arc<dyn LocalStore>,
    mut parent: FileEntry,
    fetched: Vec<FileEntry>,
    as_root: bool,
) -> CacheResult<Vec<FileEntry>> {
    let fresh: BTreeSet<String> = fetched.iter().map(|child| child.id.clone()).collect();
    let mut children = Vec::with_capacity(fetched.len());
    for child in fetched {
        let previous = store.get_file(&child.id).await?;
        let child = child.merged_over(previous.as_ref());
        store.put_file(child.clone()).await?;
        children.push(child);
    }

    parent.kind = EntryKind::Folder {
        children_ids: Some(fresh.clone()),
    };
    let parent_id = parent.id.clone();
    store.put_file(parent).await?;

    if as_root {
        let existing: BTreeSet<String> = store.root_ids().await?.into_iter().collect();
        for stale in existing.difference(&fresh) {
            store.remove_root(stale).await?;
        }
        for added in fresh.difference(&existing) {
            store.add_root(added).await?;
        }
        debug!(root = %parent_id, count = fresh.len(), "Root set reconciled");
    }
    Ok(children)
}

async fn attach_metadata(
    store: Arc<dyn LocalStore>,
    track_id: &str,
    blob: &[u8],
) -> CacheResult<()> {
    let Some(parsed) = tags::parse(blob) else {
        trace!(track = %track_id, "No embedded tags");
        return Ok(());
    };
    // Re-read so a concurrent sync of the entry is not overwritten
    let Some(mut entry) = store.get_file(track_id).await? else {
        return Ok(());
    };
    if let EntryKind::AudioTrack { metadata, .. } = &mut entry.kind {
        *metadata = Some(parsed);
        store.put_file(entry).await?;
        debug!(track = %track_id, "Track metadata stored");
    }
    Ok(())
}
