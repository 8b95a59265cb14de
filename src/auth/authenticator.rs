//! Authenticator implementation
//!
//! Handles applying authentication to requests and reacting to a provider
//! rejecting the credential.

use super::token_manager::TokenManager;
use super::types::{AuthConfig, Credential};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::state::CredentialStore;
use reqwest::{Client, RequestBuilder};
use std::sync::Arc;

/// Authenticator handles applying authentication to HTTP requests
#[derive(Debug)]
pub struct Authenticator {
    method: Method,
}

#[derive(Debug)]
enum Method {
    None,
    ApiKey {
        header: String,
        value: String,
    },
    Bearer(String),
    Refreshing(TokenManager),
}

impl Authenticator {
    /// Create an authenticator for one source
    pub fn new(
        source: &str,
        config: AuthConfig,
        http_client: Client,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let method = match config {
            AuthConfig::None => Method::None,
            AuthConfig::ApiKey {
                header,
                prefix,
                value,
            } => Method::ApiKey {
                header,
                value: format!("{}{}", prefix.as_deref().unwrap_or(""), value),
            },
            AuthConfig::Bearer { token } => Method::Bearer(token),
            AuthConfig::RefreshToken {
                refresh_url,
                refresh_token,
                access_token,
                expires_at,
                margin,
            } => Method::Refreshing(TokenManager::new(
                source,
                refresh_url,
                refresh_token,
                margin,
                access_token.map(|token| Credential::new(token, expires_at)),
                http_client,
                store,
                clock,
            )),
        };
        Self { method }
    }

    /// Authenticator that adds nothing
    pub fn none() -> Self {
        Self { method: Method::None }
    }

    /// Apply authentication to a request builder
    pub async fn apply(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        match &self.method {
            Method::None => Ok(req),
            Method::ApiKey { header, value } => Ok(req.header(header.as_str(), value.as_str())),
            Method::Bearer(token) => Ok(req.bearer_auth(token)),
            Method::Refreshing(manager) => {
                let credential = manager.current().await?;
                Ok(req.bearer_auth(credential.access_token))
            }
        }
    }

    /// React to the provider rejecting the credential as expired
    ///
    /// Refreshing credentials are exchanged once; static ones cannot recover.
    pub async fn on_auth_expired(&self) -> Result<()> {
        match &self.method {
            Method::Refreshing(manager) => manager.refresh().await.map(|_| ()),
            Method::None => Err(Error::auth(
                "provider requires authentication but none is configured",
            )),
            Method::ApiKey { .. } | Method::Bearer(_) => Err(Error::auth(
                "static access token was rejected; issue a new token and update the secrets file",
            )),
        }
    }

    /// Proactively refresh now (the `refresh-token` command)
    pub async fn refresh(&self) -> Result<Option<Credential>> {
        match &self.method {
            Method::Refreshing(manager) => manager.refresh().await.map(Some),
            _ => Ok(None),
        }
    }

    /// Number of credential refreshes so far
    pub fn refresh_count(&self) -> u32 {
        match &self.method {
            Method::Refreshing(manager) => manager.refresh_count(),
            _ => 0,
        }
    }

    /// Whether this authenticator can refresh its credential
    pub fn can_refresh(&self) -> bool {
        matches!(self.method, Method::Refreshing(_))
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::none()
    }
}
