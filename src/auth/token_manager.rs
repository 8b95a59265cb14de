//! Refresh-token credential lifecycle
//!
//! Holds the current bearer credential for one source, refreshes it before it
//! gets close to expiry, and persists every refreshed credential so the next
//! run starts from it.

use super::types::Credential;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::state::CredentialStore;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Lifetime assumed when the refresh endpoint omits `expires_in` (28 days)
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 28 * 24 * 60 * 60;

/// Bearer credential with proactive refresh
pub struct TokenManager {
    source: String,
    refresh_url: String,
    refresh_token: String,
    margin: Duration,
    seed: Option<Credential>,
    http_client: Client,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<Credential>>,
    refreshes: AtomicU32,
}

impl TokenManager {
    /// Create a manager for one source
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: impl Into<String>,
        refresh_url: impl Into<String>,
        refresh_token: impl Into<String>,
        margin: Duration,
        seed: Option<Credential>,
        http_client: Client,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source: source.into(),
            refresh_url: refresh_url.into(),
            refresh_token: refresh_token.into(),
            margin,
            seed,
            http_client,
            store,
            clock,
            cached: RwLock::new(None),
            refreshes: AtomicU32::new(0),
        }
    }

    /// A credential valid for at least the safety margin
    pub async fn current(&self) -> Result<Credential> {
        {
            let cached = self.cached.read().await;
            if let Some(credential) = cached.as_ref() {
                if credential.is_usable(self.clock.now(), self.margin) {
                    return Ok(credential.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;

        if cached.is_none() {
            *cached = match self.store.load(&self.source).await? {
                Some(stored) => Some(stored),
                None => self.seed.clone(),
            };
        }

        // Double-check after acquiring write lock
        if let Some(credential) = cached.as_ref() {
            if credential.is_usable(self.clock.now(), self.margin) {
                return Ok(credential.clone());
            }
            let now = self.clock.now();
            info!(
                source = %self.source,
                expires_at = ?credential.expires_at,
                expired = credential.is_expired(now),
                "Access token expired or close to expiry, refreshing"
            );
        }

        let credential = self.exchange().await?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Exchange the refresh token for a new access token unconditionally
    pub async fn refresh(&self) -> Result<Credential> {
        let mut cached = self.cached.write().await;
        let credential = self.exchange().await?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Number of refreshes performed so far
    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn exchange(&self) -> Result<Credential> {
        let response = self
            .http_client
            .post(&self.refresh_url)
            .json(&serde_json::json!({ "refresh_token": self.refresh_token }))
            .send()
            .await
            .map_err(|e| Error::TokenRefresh {
                message: format!("refresh request failed: {e}"),
            })?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            warn!(source = %self.source, status = status.as_u16(), "Refresh token rejected");
            return Err(Error::auth(format!(
                "refresh token for '{}' was rejected (HTTP {}); re-authorize the app manually \
                 and put the new refresh token in the secrets file",
                self.source,
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenRefresh {
                message: format!("refresh endpoint returned HTTP {}: {body}", status.as_u16()),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| Error::TokenRefresh {
            message: format!("invalid refresh response: {e}"),
        })?;

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let credential = Credential::expires_in(token.access_token, lifetime, self.clock.now());

        self.store.save(&self.source, &credential).await?;
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        info!(
            source = %self.source,
            expires_at = ?credential.expires_at,
            "Access token refreshed"
        );
        Ok(credential)
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("source", &self.source)
            .field("refresh_url", &self.refresh_url)
            .field("margin", &self.margin)
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

/// Refresh endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}
