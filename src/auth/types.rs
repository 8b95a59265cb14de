//! Auth configuration types
//!
//! These types represent the runtime auth configuration after template
//! interpolation has been applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default proactive refresh margin (ShipHero tokens last 28 days)
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(24 * 60 * 60);

/// Authentication configuration (after template interpolation)
#[derive(Clone, Default)]
pub enum AuthConfig {
    /// No authentication required
    #[default]
    None,

    /// Static key in a header, e.g. `X-Shopify-Access-Token`
    ApiKey {
        /// Header name
        header: String,
        /// Prefix to add before the value (e.g., "Bearer ")
        prefix: Option<String>,
        /// The API key value
        value: String,
    },

    /// Static bearer token
    Bearer {
        /// The bearer token
        token: String,
    },

    /// Bearer token with expiry, renewed through a refresh endpoint
    RefreshToken {
        /// Refresh endpoint URL
        refresh_url: String,
        /// Long-lived refresh credential
        refresh_token: String,
        /// Access token to start from when nothing is stored yet
        access_token: Option<String>,
        /// Expiry of `access_token`, if known
        expires_at: Option<DateTime<Utc>>,
        /// Refresh this long before expiry
        margin: Duration,
    },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .finish_non_exhaustive(),
            Self::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
            Self::RefreshToken {
                refresh_url,
                expires_at,
                margin,
                ..
            } => f
                .debug_struct("RefreshToken")
                .field("refresh_url", refresh_url)
                .field("expires_at", expires_at)
                .field("margin", margin)
                .finish_non_exhaustive(),
        }
    }
}

/// Bearer credential with expiry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The access token
    pub access_token: String,
    /// When the token expires
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create a new credential
    pub fn new(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// Create a credential that expires `seconds` after `now`
    pub fn expires_in(access_token: impl Into<String>, seconds: i64, now: DateTime<Utc>) -> Self {
        Self::new(access_token, Some(now + chrono::Duration::seconds(seconds)))
    }

    /// Whether the credential can still be used at `now` without refreshing
    ///
    /// A credential with unknown expiry is never usable.
    pub fn is_usable(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at >= now + crate::clock::to_chrono(margin))
    }

    /// Whether the credential has passed its expiry, or its expiry is unknown
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp < now)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
