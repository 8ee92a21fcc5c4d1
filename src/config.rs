//! Configuration
//!
//! Selects the backend variant and carries the OAuth client settings.
//! Read from `<config_dir>/drivecache/config.json`, then overridden by
//! environment variables.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Remote drive variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hierarchical Graph-style API with free enumeration
    #[default]
    Graph,
    /// Consent-scoped picker API; items arrive only through user selection
    Picker,
}

impl BackendKind {
    /// Namespace for credential keys and the cache directory
    pub fn namespace(&self) -> &'static str {
        match self {
            BackendKind::Graph => "graph",
            BackendKind::Picker => "picker",
        }
    }

    pub fn default_api_base(&self) -> &'static str {
        match self {
            BackendKind::Graph => "https://graph.microsoft.com/v1.0",
            BackendKind::Picker => "https://www.googleapis.com/drive/v3",
        }
    }

    pub fn default_token_url(&self) -> &'static str {
        match self {
            BackendKind::Graph => "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            BackendKind::Picker => "https://oauth2.googleapis.com/token",
        }
    }

    pub fn default_scopes(&self) -> Vec<String> {
        match self {
            BackendKind::Graph => vec![
                "Files.Read".to_string(),
                "User.Read".to_string(),
                "offline_access".to_string(),
            ],
            BackendKind::Picker => vec!["https://www.googleapis.com/auth/drive.file".to_string()],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Graph => write!(f, "OneDrive"),
            BackendKind::Picker => write!(f, "Google Drive"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "graph" | "onedrive" => Ok(BackendKind::Graph),
            "picker" | "google" | "googledrive" => Ok(BackendKind::Picker),
            other => Err(anyhow!("Unknown backend type: {}", other)),
        }
    }
}

/// Which Remote Drive Client to construct at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DriveConfig {
    /// Serialized as `type` to match the settings file
    #[serde(rename = "type")]
    pub kind: BackendKind,
}

/// Full application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub drive: DriveConfig,
    /// OAuth application id
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Overrides the backend's token endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// Overrides the backend's API base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Defaults to a per-backend directory under the user cache dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("drivecache").join("config.json"))
    }

    /// Load from the default location plus environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env()?;
        info!(backend = %config.drive.kind, "Configuration loaded");
        Ok(config)
    }

    /// Parse a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid config file: {:?}", path))
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = env::var("DRIVECACHE_BACKEND") {
            self.drive.kind = backend.parse()?;
        }
        if let Ok(client_id) = env::var("DRIVECACHE_CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Ok(secret) = env::var("DRIVECACHE_CLIENT_SECRET") {
            self.client_secret = Some(secret);
        }
        if let Ok(dir) = env::var("DRIVECACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn api_base(&self) -> String {
        self.api_base
            .clone()
            .unwrap_or_else(|| self.drive.kind.default_api_base().to_string())
    }

    pub fn token_url(&self) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| self.drive.kind.default_token_url().to_string())
    }

    pub fn scopes(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            self.drive.kind.default_scopes()
        } else {
            self.scopes.clone()
        }
    }

    /// Cache directory for the configured backend
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("drivecache")
                .join(self.drive.kind.namespace())
        })
    }
}
