//! Remote Drive Client
//!
//! One contract over two structurally different backends. Hierarchical
//! backends enumerate folders freely; ingest backends only learn about items
//! the user picks. [`RemoteDrive::mode`] says which path the orchestrator
//! must take.

pub mod errors;
pub mod graph;
pub mod oauth;
pub mod picker;
pub mod token;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;

pub use errors::{AuthError, DriveError, DriveResult};
pub use graph::GraphDrive;
pub use oauth::{NoInteractiveLogin, OAuthClient};
pub use picker::{NoSelectionSource, PickerDrive};
pub use token::{AuthState, Authorizer, RefreshError, TokenGrant, TokenManager, TokenSource};
pub use types::{AudioMetadata, EntryKind, FileEntry};

use crate::cache::LocalStore;
use crate::config::{AppConfig, BackendKind};
use crate::notice::Notices;

/// How items reach the cache for a backend
pub enum DriveMode<'a> {
    /// `get_children` and `get_file` work
    Hierarchical,
    /// Items only arrive through a user selection
    Ingest(&'a dyn PickerIngest),
}

/// Shared capability set of every backend
#[async_trait]
pub trait RemoteDrive: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn mode(&self) -> DriveMode<'_>;

    /// A usable credential is held
    fn is_connected(&self) -> bool;

    /// Establish a usable credential. Idempotent.
    async fn connect(&self) -> DriveResult<()>;

    /// Interactive login, from any credential state
    async fn reauthorize(&self) -> DriveResult<()>;

    fn root_folder_id(&self) -> &str;

    async fn get_file(&self, id: &str) -> DriveResult<FileEntry>;

    /// Full, authoritative child list of a folder
    async fn get_children(&self, folder_id: &str) -> DriveResult<Vec<FileEntry>>;

    async fn fetch_blob(&self, track_id: &str) -> DriveResult<Vec<u8>>;

    /// Forget all credential state; the next `connect` needs a fresh login
    async fn reset_user(&self) -> DriveResult<()>;
}

/// One item from a user selection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickedItem {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Result of a folder access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderAccess {
    pub has_access: bool,
    pub folder_name: Option<String>,
}

/// Ingest-mode extras
#[async_trait]
pub trait PickerIngest: Send + Sync {
    /// Ask the user to pick items
    async fn pick(&self) -> DriveResult<Vec<PickedItem>>;

    /// Confirm read access to a parent folder, one grant at a time
    async fn check_folder_access(&self, folder_id: &str) -> DriveResult<FolderAccess>;
}

/// The picker UI itself, provided by the host
#[async_trait]
pub trait SelectionSource: Send + Sync {
    async fn select(&self) -> DriveResult<Vec<PickedItem>>;
}

/// Send a request, turning non-success statuses into [`DriveError`]
pub(crate) async fn send_checked(request: RequestBuilder) -> DriveResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DriveError::from_status(status.as_u16(), &body))
}

/// Build the configured backend
pub fn from_config(
    config: &AppConfig,
    store: Arc<dyn LocalStore>,
    authorizer: Arc<dyn Authorizer>,
    notices: Notices,
) -> Arc<dyn RemoteDrive> {
    let kind = config.drive.kind;
    let tokens = TokenManager::new(
        kind,
        store,
        Arc::new(OAuthClient::from_config(config)),
        authorizer,
        notices,
    );
    match kind {
        BackendKind::Graph => Arc::new(GraphDrive::new(config.api_base(), tokens)),
        BackendKind::Picker => Arc::new(PickerDrive::new(
            config.api_base(),
            tokens,
            Arc::new(NoSelectionSource),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    #[test]
    fn test_picked_item_shape() {
        let item: PickedItem = serde_json::from_str(
            r#"{"id":"f1","name":"song.mp3","mimeType":"audio/mpeg","parentId":"p1"}"#,
        )
        .unwrap();
        assert_eq!(item.parent_id.as_deref(), Some("p1"));

        let item: PickedItem =
            serde_json::from_str(r#"{"id":"f2","name":"a.txt","mimeType":"text/plain"}"#).unwrap();
        assert!(item.parent_id.is_none());
    }

    #[test]
    fn test_from_config_selects_variant() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let mut config = AppConfig::default();

        let drive = from_config(
            &config,
            store.clone(),
            Arc::new(NoInteractiveLogin),
            Notices::new(),
        );
        assert_eq!(drive.kind(), BackendKind::Graph);
        assert!(matches!(drive.mode(), DriveMode::Hierarchical));
        assert_eq!(drive.root_folder_id(), "root");

        config.drive.kind = BackendKind::Picker;
        let drive = from_config(&config, store, Arc::new(NoInteractiveLogin), Notices::new());
        assert_eq!(drive.kind(), BackendKind::Picker);
        assert!(matches!(drive.mode(), DriveMode::Ingest(_)));
        assert!(!drive.is_connected());
    }
}
