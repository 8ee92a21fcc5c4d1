//! Token lifecycle manager
//!
//! Each drive client embeds one of these. It acquires a credential (silently
//! from a stored refresh token, or interactively), keeps the access token in
//! memory only, refreshes it before expiry or after the server rejects it,
//! and falls back to a reauthorization notice when silent refresh is no
//! longer possible.
//!
//! State machine:
//!
//! ```text
//! NoCredential -> Connecting -> Connected
//! Connected -> Expiring -> SilentRefreshing -> Connected
//! SilentRefreshing -> ReauthRequired -> Connecting
//! any -> NoCredential (reset)
//! ```

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::errors::{AuthError, DriveResult};
use crate::cache::LocalStore;
use crate::config::BackendKind;
use crate::notice::{Notice, Notices};

/// Tokens this close to expiry are refreshed before use
const EXPIRY_BUFFER_SECS: i64 = 300;

/// Result of a successful login or refresh
#[derive(Debug, Clone)]
pub struct TokenGrant {
    /// Bearer token for API calls
    pub access_token: SecretString,
    /// Present when the server issued or rotated the refresh token
    pub refresh_token: Option<SecretString>,
    /// When the access token stops being accepted
    pub expires_at: DateTime<Utc>,
    /// Signed-in account, when the server reported one
    pub account: Option<String>,
}

/// Why a silent refresh did not produce a token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// The refresh token is no longer accepted; only the user can fix this
    #[error("Interaction required: {0}")]
    InteractionRequired(String),

    #[error("Refresh transport failure: {0}")]
    Transport(String),
}

/// Exchanges a refresh token for a fresh access token
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, RefreshError>;
}

/// Runs the interactive login flow (browser redirect, device code, ...)
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self) -> Result<TokenGrant, AuthError>;
}

/// Credential lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    NoCredential,
    Connecting,
    Connected,
    Expiring,
    SilentRefreshing,
    ReauthRequired,
}

#[derive(Default)]
struct Credential {
    state: AuthState,
    access_token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
    account: Option<String>,
    /// Bumped on every grant so concurrent refreshers can tell one landed
    generation: u64,
    /// Persisted record has been read into memory
    loaded: bool,
}

impl Credential {
    fn effective_state(&self) -> AuthState {
        match (self.state, self.expires_at) {
            (AuthState::Connected, Some(expires_at))
                if expires_at <= Utc::now() + Duration::seconds(EXPIRY_BUFFER_SECS) =>
            {
                AuthState::Expiring
            }
            (state, _) => state,
        }
    }

    /// A known account that lost its refresh token still owes a
    /// reauthorization
    fn owes_reauth(&self) -> bool {
        self.refresh_token.is_none() && self.account.is_some()
    }
}

/// Per-backend credential keys in the local store
struct CredentialKeys {
    account: String,
    refresh_token: String,
    expires_at: String,
}

impl CredentialKeys {
    fn new(namespace: &str) -> Self {
        Self {
            account: format!("{}.account", namespace),
            refresh_token: format!("{}.refreshToken", namespace),
            expires_at: format!("{}.expiresAt", namespace),
        }
    }
}

/// Token lifecycle for one backend
pub struct TokenManager {
    /// Backend the credential belongs to
    backend: BackendKind,
    /// Store keys of the persisted credential
    keys: CredentialKeys,
    /// Where the refresh token, account and expiry survive restarts
    store: Arc<dyn LocalStore>,
    /// Token endpoint for silent refresh
    source: Arc<dyn TokenSource>,
    /// Interactive login flow
    authorizer: Arc<dyn Authorizer>,
    /// Receives the reauthorization notice
    notices: Notices,
    /// In-memory credential; never held across an await
    credential: RwLock<Credential>,
    /// Serializes refresh, reauthorization and reset
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    /// Create a manager for `backend`.
    ///
    /// # Arguments
    /// * `store` - Local store holding the persisted credential
    /// * `source` - Token endpoint used for silent refresh
    /// * `authorizer` - Interactive login flow
    /// * `notices` - Channel that receives `Notice::ReauthRequired`
    pub fn new(
        backend: BackendKind,
        store: Arc<dyn LocalStore>,
        source: Arc<dyn TokenSource>,
        authorizer: Arc<dyn Authorizer>,
        notices: Notices,
    ) -> Self {
        Self {
            backend,
            keys: CredentialKeys::new(backend.namespace()),
            store,
            source,
            authorizer,
            notices,
            credential: RwLock::new(Credential::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Credential> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Credential> {
        self.credential
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> AuthState {
        self.read().effective_state()
    }

    pub fn account(&self) -> Option<String> {
        self.read().account.clone()
    }

    /// A usable, or silently renewable, access token is held
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            AuthState::Connected | AuthState::Expiring | AuthState::SilentRefreshing
        )
    }

    /// Establish a usable credential. Safe to call when already connected.
    pub async fn connect(&self) -> DriveResult<()> {
        match self.state() {
            AuthState::Connected => return Ok(()),
            AuthState::ReauthRequired => return Err(AuthError::ReauthRequired.into()),
            _ => {}
        }

        self.load_persisted().await?;

        let (has_refresh_token, generation) = {
            let credential = self.read();
            (credential.refresh_token.is_some(), credential.generation)
        };

        if has_refresh_token {
            debug!(backend = %self.backend, "Connecting with stored refresh token");
            return self.refresh(generation).await;
        }

        let _guard = self.refresh_lock.lock().await;
        self.interactive().await
    }

    /// Run the interactive login again, whatever the current state
    pub async fn reauthorize(&self) -> DriveResult<()> {
        let _guard = self.refresh_lock.lock().await;
        self.interactive().await
    }

    /// Forget every credential for this backend, in memory and on disk
    pub async fn reset(&self) -> DriveResult<()> {
        let _guard = self.refresh_lock.lock().await;
        {
            let mut credential = self.write();
            let generation = credential.generation + 1;
            *credential = Credential {
                generation,
                loaded: true,
                ..Credential::default()
            };
        }
        self.store.remove_value(&self.keys.account).await?;
        self.store.remove_value(&self.keys.refresh_token).await?;
        self.store.remove_value(&self.keys.expires_at).await?;

        info!(backend = %self.backend, "Credentials reset");
        Ok(())
    }

    /// Adopt a refresh token obtained out of band. The next `connect`
    /// refreshes with it silently.
    pub async fn seed(&self, refresh_token: &str, account: Option<&str>) -> DriveResult<()> {
        let _guard = self.refresh_lock.lock().await;
        {
            let mut credential = self.write();
            let generation = credential.generation + 1;
            let account = account.map(str::to_string).or(credential.account.take());
            *credential = Credential {
                refresh_token: Some(SecretString::from(refresh_token.to_string())),
                account,
                generation,
                loaded: true,
                ..Credential::default()
            };
        }
        self.store
            .write_value(&self.keys.refresh_token, refresh_token)
            .await?;
        self.store.remove_value(&self.keys.expires_at).await?;
        if let Some(account) = account {
            self.store.write_value(&self.keys.account, account).await?;
        }
        info!(backend = %self.backend, "Refresh token stored");
        Ok(())
    }

    /// Run `op` with a bearer token, retrying exactly once after a silent
    /// refresh if the server rejects the token.
    pub async fn authorized<T, F, Fut>(&self, op: F) -> DriveResult<T>
    where
        F: Fn(SecretString) -> Fut + Send + Sync,
        Fut: Future<Output = DriveResult<T>> + Send,
        T: Send,
    {
        let (token, generation) = self.bearer().await?;
        match op(token).await {
            Err(err) if err.is_auth_rejection() => {
                warn!(backend = %self.backend, error = %err, "Access token rejected, refreshing");
                self.refresh(generation).await?;
                let (token, _) = self.bearer().await?;
                match op(token).await {
                    Err(err) if err.is_auth_rejection() => Err(AuthError::Rejected.into()),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Current access token and its generation, refreshing first if it is
    /// about to expire
    async fn bearer(&self) -> DriveResult<(SecretString, u64)> {
        for _ in 0..2 {
            let (state, token, generation) = {
                let credential = self.read();
                (
                    credential.effective_state(),
                    credential.access_token.clone(),
                    credential.generation,
                )
            };

            match (state, token) {
                (AuthState::ReauthRequired, _) => return Err(AuthError::ReauthRequired.into()),
                (AuthState::Connected, Some(token)) => return Ok((token, generation)),
                (AuthState::Expiring | AuthState::SilentRefreshing, _) => {
                    self.refresh(generation).await?;
                }
                _ => return Err(AuthError::NotSignedIn.into()),
            }
        }
        Err(AuthError::NotSignedIn.into())
    }

    /// Silent refresh. A caller that observed `generation` and lost the race
    /// to another refresher reuses that result instead of refreshing again.
    async fn refresh(&self, generation: u64) -> DriveResult<()> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let mut credential = self.write();
            if credential.state == AuthState::ReauthRequired {
                return Err(AuthError::ReauthRequired.into());
            }
            if credential.generation != generation
                && credential.effective_state() == AuthState::Connected
            {
                debug!(backend = %self.backend, "Refresh already completed by another caller");
                return Ok(());
            }
            let token = credential.refresh_token.clone();
            if token.is_some() {
                credential.state = AuthState::SilentRefreshing;
            }
            token
        };
        let Some(refresh_token) = refresh_token else {
            return self.require_reauth().await;
        };

        info!(backend = %self.backend, "Refreshing access token");
        match self.source.refresh(&refresh_token).await {
            Ok(grant) => self.apply_grant(grant).await,
            Err(RefreshError::InteractionRequired(reason)) => {
                warn!(backend = %self.backend, reason = %reason, "Silent refresh refused");
                self.require_reauth().await
            }
            Err(RefreshError::Transport(reason)) => {
                warn!(backend = %self.backend, reason = %reason, "Silent refresh failed");
                let mut credential = self.write();
                credential.state = if credential.access_token.is_some() {
                    AuthState::Expiring
                } else {
                    AuthState::NoCredential
                };
                Err(AuthError::RefreshFailed(reason).into())
            }
        }
    }

    /// Caller must hold `refresh_lock`
    async fn interactive(&self) -> DriveResult<()> {
        let previous = {
            let mut credential = self.write();
            let previous = credential.state;
            credential.state = AuthState::Connecting;
            previous
        };
        info!(backend = %self.backend, "Starting interactive login");

        let err = match self.authorizer.authorize().await {
            Ok(grant) => return self.apply_grant(grant).await,
            Err(err) => err,
        };
        warn!(backend = %self.backend, error = %err, "Interactive login failed");

        let mut credential = self.write();
        if credential.owes_reauth() {
            drop(credential);
            return self.enter_reauth_required();
        }
        credential.state = if credential.refresh_token.is_some() {
            previous
        } else {
            AuthState::NoCredential
        };
        Err(err.into())
    }

    async fn apply_grant(&self, grant: TokenGrant) -> DriveResult<()> {
        let (account, refresh_token, expires_at) = {
            let mut credential = self.write();
            credential.access_token = Some(grant.access_token);
            if let Some(rotated) = grant.refresh_token {
                credential.refresh_token = Some(rotated);
            }
            if let Some(account) = grant.account {
                credential.account = Some(account);
            }
            credential.expires_at = Some(grant.expires_at);
            credential.state = AuthState::Connected;
            credential.generation += 1;
            (
                credential.account.clone(),
                credential
                    .refresh_token
                    .as_ref()
                    .map(|t| t.expose_secret().to_string()),
                grant.expires_at,
            )
        };

        if let Some(account) = &account {
            self.store.write_value(&self.keys.account, account).await?;
        }
        if let Some(refresh_token) = &refresh_token {
            self.store
                .write_value(&self.keys.refresh_token, refresh_token)
                .await?;
        }
        self.store
            .write_value(&self.keys.expires_at, &expires_at.to_rfc3339())
            .await?;

        info!(
            backend = %self.backend,
            account = account.as_deref().unwrap_or("unknown"),
            expires_at = %expires_at,
            "Access token acquired"
        );
        Ok(())
    }

    /// Drop tokens, in memory and on disk, and ask the user to sign in again
    async fn require_reauth(&self) -> DriveResult<()> {
        let result = self.enter_reauth_required();
        self.store.remove_value(&self.keys.refresh_token).await?;
        self.store.remove_value(&self.keys.expires_at).await?;
        result
    }

    /// Move to `ReauthRequired` and raise the persistent notice. The account
    /// identity is kept.
    fn enter_reauth_required(&self) -> DriveResult<()> {
        {
            let mut credential = self.write();
            credential.state = AuthState::ReauthRequired;
            credential.access_token = None;
            credential.refresh_token = None;
            credential.expires_at = None;
        }
        warn!(backend = %self.backend, "Reauthorization required");
        self.notices.publish(Notice::ReauthRequired {
            backend: self.backend,
        });
        Err(AuthError::ReauthRequired.into())
    }

    async fn load_persisted(&self) -> DriveResult<()> {
        if self.read().loaded {
            return Ok(());
        }

        let account = self.store.read_value(&self.keys.account).await?;
        let refresh_token = self.store.read_value(&self.keys.refresh_token).await?;
        let expires_at = self
            .store
            .read_value(&self.keys.expires_at)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let mut credential = self.write();
        if credential.loaded {
            return Ok(());
        }
        if credential.account.is_none() {
            credential.account = account;
        }
        if credential.refresh_token.is_none() {
            credential.refresh_token = refresh_token.map(SecretString::from);
        }
        if credential.expires_at.is_none() {
            credential.expires_at = expires_at;
        }
        credential.loaded = true;
        debug!(
            backend = %self.backend,
            has_refresh_token = credential.refresh_token.is_some(),
            "Loaded persisted credential"
        );
        Ok(())
    }
}
