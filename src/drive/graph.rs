//! Hierarchical Graph-style drive
//!
//! Items live under `/me/drive/items/{id}`. Children listings are paged via
//! `@odata.nextLink`; content downloads redirect to a pre-authenticated URL.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use super::errors::{DriveError, DriveResult};
use super::token::TokenManager;
use super::types::{classify, FileEntry};
use super::{send_checked, DriveMode, RemoteDrive};
use crate::config::BackendKind;

/// Id the API accepts for the drive root
pub const ROOT_ID: &str = "root";

/// `parentReference.path` of items that sit directly under the drive root
const ROOT_PATH: &str = "/drive/root:";

/// Remote item as returned by the API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: String,
    #[serde(default)]
    folder: Option<serde_json::Value>,
    /// Present only on the drive root itself
    #[serde(default)]
    root: Option<serde_json::Value>,
    #[serde(default)]
    parent_reference: Option<ParentReference>,
}

#[derive(Debug, Deserialize)]
struct ParentReference {
    id: Option<String>,
    path: Option<String>,
}

impl ParentReference {
    /// Parent id, with the drive's opaque root id replaced by [`ROOT_ID`]
    fn normalized_id(self) -> Option<String> {
        if self.path.as_deref() == Some(ROOT_PATH) {
            return Some(ROOT_ID.to_string());
        }
        self.id
    }
}

/// One page of a children listing
#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

fn map_item(item: DriveItem, parent_id: Option<String>) -> FileEntry {
    if item.root.is_some() {
        return FileEntry::folder(ROOT_ID, &item.name, None);
    }
    let reference = item.parent_reference;
    let parent_id = parent_id.or_else(|| reference?.normalized_id());
    classify(&item.id, &item.name, parent_id, item.folder.is_some())
}

/// Variant A: free enumeration against a remote tree
pub struct GraphDrive {
    /// HTTP client shared by all requests
    http: Client,
    /// API base URL without a trailing slash
    api_base: String,
    /// Credential for every call against the API
    tokens: TokenManager,
}

impl GraphDrive {
    pub fn new(api_base: impl Into<String>, tokens: TokenManager) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn item_url(&self, id: &str) -> String {
        let id = urlencoding::encode(id);
        format!("{}/me/drive/items/{}", self.api_base, id)
    }

    async fn get_json<T>(&self, url: &str) -> DriveResult<T>
    where
        T: DeserializeOwned + Send,
    {
        self.tokens
            .authorized(|token| {
                let request = self.http.get(url).bearer_auth(token.expose_secret());
                async move {
                    let response = send_checked(request).await?;
                    response
                        .json::<T>()
                        .await
                        .map_err(|e| DriveError::Decode(e.to_string()))
                }
            })
            .await
    }
}

#[async_trait]
impl RemoteDrive for GraphDrive {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    fn mode(&self) -> DriveMode<'_> {
        DriveMode::Hierarchical
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

    async fn get_file(&self, id: &str) -> DriveResult<FileEntry> {
        let item: DriveItem = self.get_json(&self.item_url(id)).await?;
        Ok(map_item(item, None))
    }

    async fn get_children(&self, folder_id: &str) -> DriveResult<Vec<FileEntry>> {
        let mut url = format!("{}/children", self.item_url(folder_id));
        let mut entries = Vec::new();
        let mut pages = 0;

        loop {
            let page: ChildrenPage = self.get_json(&url).await?;
            pages += 1;
            entries.extend(
                page.value
                    .into_iter()
                    .map(|item| map_item(item, Some(folder_id.to_string()))),
            );
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!(folder = %folder_id, count = entries.len(), pages, "Listed children");
        Ok(entries)
    }

    async fn fetch_blob(&self, track_id: &str) -> DriveResult<Vec<u8>> {
        let url = format!("{}/content", self.item_url(track_id));
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
