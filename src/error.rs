//! Orchestrator error taxonomy

use crate::cache::StorageError;
use crate::drive::{AuthError, DriveError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Local persistence unavailable or corrupted
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Unrecoverable without interactive reauthorization
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Operation invalid for the active backend variant
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Transient network or API failure
    #[error("Remote fetch failed: {0}")]
    RemoteFetch(DriveError),

    /// Entry absent from the cache when it was required
    #[error("Not in cache: {0}")]
    NotFound(String),

    /// Download needs a connected drive
    #[error("Offline")]
    Offline,

    #[error("Cancelled")]
    Cancelled,
}

impl From<DriveError> for CacheError {
    fn from(err: DriveError) -> Self {
        match err {
            // The token endpoint was unreachable; the credential is intact
            refresh @ DriveError::Auth(AuthError::RefreshFailed(_)) => {
                CacheError::RemoteFetch(refresh)
            }
            DriveError::Auth(auth) => CacheError::Auth(auth),
            DriveError::Unauthorized(_) => CacheError::Auth(AuthError::Rejected),
            DriveError::NotSupported(what) => {
                CacheError::NotSupported(format!("operation unsupported in {}", what))
            }
            DriveError::Storage(storage) => CacheError::Storage(storage),
            other => CacheError::RemoteFetch(other),
        }
    }
}

impl CacheError {
    /// Whether the user has to sign in again
    pub fn needs_reauth(&self) -> bool {
        matches!(self, CacheError::Auth(AuthError::ReauthRequired))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
