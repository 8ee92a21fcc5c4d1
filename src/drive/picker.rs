//! Picker-ingest drive
//!
//! The app only sees files the user picked, so there is no enumeration.
//! Items enter the cache through [`PickerIngest::pick`] and the
//! orchestrator's ingestion path.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info};

use super::errors::{DriveError, DriveResult};
use super::token::TokenManager;
use super::types::FileEntry;
use super::{
    send_checked, DriveMode, FolderAccess, PickedItem, PickerIngest, RemoteDrive, SelectionSource,
};
use crate::config::BackendKind;

/// Virtual root grouping every ingested folder
pub const ROOT_ID: &str = "picker-root";

const INGEST_MODE: &str = "ingest mode";

#[derive(Debug, Deserialize)]
struct FolderMetadata {
    name: Option<String>,
}

/// Variant B: consent-scoped backend fed by user selections
pub struct PickerDrive {
    http: Client,
    /// Files API base without a trailing slash
    api_base: String,
    /// Credential for the consent-scoped grant
    tokens: TokenManager,
    /// Host hook that shows the picker
    selection: Arc<dyn SelectionSource>,
}

impl PickerDrive {
    /// Create a picker drive
    ///
    /// # Arguments
    /// * `api_base` - Files API base URL
    /// * `tokens` - Token manager for the picker backend
    /// * `selection` - Source of user selections
    pub fn new(
        api_base: impl Into<String>,
        tokens: TokenManager,
        selection: Arc<dyn SelectionSource>,
    ) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            tokens,
            selection,
        }
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.api_base, urlencoding::encode(id))
    }
}

#[async_trait]
impl RemoteDrive for PickerDrive {
    fn kind(&self) -> BackendKind {
        BackendKind::Picker
    }

    fn mode(&self) -> DriveMode<'_> {
        DriveMode::Ingest(self)
    }

    fn is_connected(&self) -> bool {
        self.tokens.is_connected()
    }

    async fn connect(&self) -> DriveResult<()> {
        self.tokens.connect().await
    }

    async fn reauthorize(&self) -> DriveResult<()> {
        self.tokens.reauthorize().await
    }

    fn root_folder_id(&self) -> &str {
        ROOT_ID
    }

    async fn get_file(&self, _id: &str) -> DriveResult<FileEntry> {
        Err(DriveError::NotSupported(INGEST_MODE))
    }

    async fn get_children(&self, _folder_id: &str) -> DriveResult<Vec<FileEntry>> {
        Err(DriveError::NotSupported(INGEST_MODE))
    }

    async fn fetch_blob(&self, track_id: &str) -> DriveResult<Vec<u8>> {
        let url = format!("{}?alt=media", self.file_url(track_id));
        let bytes = self
            .tokens
            .authorized(|token| {
                let request = self.http.get(&url).bearer_auth(token.expose_secret());
                async move {
                    let response = send_checked(request).await?;
                    Ok(response.bytes().await?)
                }
            })
            .await?;

        info!(track = %track_id, size = bytes.len(), "Downloaded blob");
        Ok(bytes.to_vec())
    }

    async fn reset_user(&self) -> DriveResult<()> {
        self.tokens.reset().await
    }
}

#[async_trait]
impl PickerIngest for PickerDrive {
    async fn pick(&self) -> DriveResult<Vec<PickedItem>> {
        let items = self.selection.select().await?;
        debug!(count = items.len(), "User picked items");
        Ok(items)
    }

    async fn check_folder_access(&self, folder_id: &str) -> DriveResult<FolderAccess> {
        let url = format!("{}?fields=id,name", self.file_url(folder_id));
        let metadata = self
            .tokens
            .authorized(|token| {
                let request = self.http.get(&url).bearer_auth(token.expose_secret());
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    match status {
                        // No grant for this folder; not a credential problem
                        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
                        _ if status.is_success() => response
                            .json::<FolderMetadata>()
                            .await
                            .map(Some)
                            .map_err(|e| DriveError::Decode(e.to_string())),
                        _ => {
                            let body = response.text().await.unwrap_or_default();
                            Err(DriveError::from_status(status.as_u16(), &body))
                        }
                    }
                }
            })
            .await?;

        debug!(folder = %folder_id, has_access = metadata.is_some(), "Checked folder access");
        Ok(access_from(metadata))
    }
}

fn access_from(metadata: Option<FolderMetadata>) -> FolderAccess {
    match metadata {
        Some(metadata) => FolderAccess {
            has_access: true,
            folder_name: metadata.name,
        },
        None => FolderAccess {
            has_access: false,
            folder_name: None,
        },
    }
}

/// Selection source for hosts without a picker UI
pub struct NoSelectionSource;

#[async_trait]
impl SelectionSource for NoSelectionSource {
    async fn select(&self) -> DriveResult<Vec<PickedItem>> {
        Err(DriveError::NotSupported("headless mode"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::drive::oauth::NoInteractiveLogin;
    use crate::notice::Notices;
    use crate::testing::FakeTokenSource;

    fn drive() -> PickerDrive {
        let tokens = TokenManager::new(
            BackendKind::Picker,
            Arc::new(MemoryStore::new()),
            Arc::new(FakeTokenSource::succeeding("t")),
            Arc::new(NoInteractiveLogin),
            Notices::new(),
        );
        PickerDrive::new(
            "https://drive.example/v3/",
            tokens,
            Arc::new(NoSelectionSource),
        )
    }

    #[tokio::test]
    async fn test_enumeration_unsupported() {
        let drive = drive();
        assert!(matches!(
            drive.get_children(ROOT_ID).await,
            Err(DriveError::NotSupported(_))
        ));
        assert!(matches!(drive.get_file("x").await, Err(DriveError::NotSupported(_))));
        assert_eq!(drive.root_folder_id(), ROOT_ID);
    }

    #[test]
    fn test_urls() {
        let drive = drive();
        assert_eq!(
            drive.file_url("a/b"),
            "https://drive.example/v3/files/a%2Fb"
        );
    }

    #[test]
    fn test_access_mapping() {
        let metadata: FolderMetadata =
            serde_json::from_str(r#"{"id":"p1","name":"Field recordings"}"#).unwrap();
        assert_eq!(
            access_from(Some(metadata)),
            FolderAccess {
                has_access: true,
                folder_name: Some("Field recordings".to_string())
            }
        );
        assert!(!access_from(None).has_access);
    }

    #[tokio::test]
    async fn test_headless_pick_fails() {
        assert!(matches!(drive().pick().await, Err(DriveError::NotSupported(_))));
    }
}
