//! OAuth2 refresh-token grant
//!
//! Implements [`TokenSource`] against a standard token endpoint. The
//! interactive authorization-code flow belongs to whatever front end hosts
//! the cache; it plugs in through [`Authorizer`].

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use super::errors::AuthError;
use super::token::{Authorizer, RefreshError, TokenGrant, TokenSource};
use crate::config::AppConfig;

/// Error codes that mean the refresh token is dead and only the user can help
const INTERACTION_CODES: &[&str] = &[
    "invalid_grant",
    "interaction_required",
    "login_required",
    "consent_required",
];

/// Used when the server omits `expires_in`
const DEFAULT_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    id_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    preferred_username: Option<String>,
    email: Option<String>,
}

/// OAuth2 client for the refresh-token grant
pub struct OAuthClient {
    http: Client,
    /// Token endpoint of the identity provider
    token_url: String,
    /// Registered application id
    client_id: String,
    /// Only set for confidential clients
    client_secret: Option<SecretString>,
    /// Scopes requested on every refresh
    scopes: Vec<String>,
}

impl OAuthClient {
    /// Create a client for one token endpoint
    ///
    /// # Arguments
    /// * `token_url` - Token endpoint URL
    /// * `client_id` - Application id
    /// * `client_secret` - Secret for confidential clients, if any
    /// * `scopes` - Scopes sent with each refresh
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.map(SecretString::from),
            scopes,
        }
    }

    /// Client for the configured backend
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.token_url(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.scopes(),
        )
    }
}

#[async_trait]
impl TokenSource for OAuthClient {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, RefreshError> {
        let scope = self.scopes.join(" ");
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.expose_secret()),
            ("scope", scope.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }

        debug!(token_url = %self.token_url, "Requesting token refresh");
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Token endpoint refused refresh");
            return Err(classify_token_error(status.as_u16(), &body));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshError::Transport(format!("Malformed token response: {}", e)))?;
        Ok(grant_from_response(token))
    }
}

fn grant_from_response(token: TokenResponse) -> TokenGrant {
    let lifetime = token.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);
    TokenGrant {
        access_token: SecretString::from(token.access_token),
        // None keeps the current refresh token
        refresh_token: token.refresh_token.map(SecretString::from),
        expires_at: Utc::now() + Duration::seconds(lifetime),
        account: token.id_token.as_deref().and_then(account_from_id_token),
    }
}

/// Sort a token endpoint failure into "needs the user" or "try again later"
pub fn classify_token_error(status: u16, body: &str) -> RefreshError {
    let parsed: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let detail = parsed
        .error_description
        .clone()
        .unwrap_or_else(|| format!("HTTP {}", status));

    if INTERACTION_CODES.contains(&parsed.error.as_str()) {
        RefreshError::InteractionRequired(format!("{}: {}", parsed.error, detail))
    } else {
        RefreshError::Transport(format!("HTTP {}: {}", status, body))
    }
}

/// Account identity from the unverified payload of an id_token
pub fn account_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes).ok()?;
    claims.preferred_username.or(claims.email)
}

/// Authorizer for hosts without an interactive flow. Fails with a hint to
/// seed a refresh token instead.
pub struct NoInteractiveLogin;

#[async_trait]
impl Authorizer for NoInteractiveLogin {
    async fn authorize(&self) -> Result<TokenGrant, AuthError> {
        Err(AuthError::Interactive(
            "no interactive login available; run `drivecache login <refresh-token>`".to_string(),
        ))
    }
}
