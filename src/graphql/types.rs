//! GraphQL request, response and provider-profile types

use crate::budget::Usage;
use crate::types::{JsonObject, JsonValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A GraphQL POST body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlRequest {
    /// Query document
    pub query: String,
    /// Bound variables
    #[serde(default, skip_serializing_if = "JsonObject::is_empty")]
    pub variables: JsonObject,
}

impl GraphQlRequest {
    /// Create a request with no variables
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: JsonObject::new(),
        }
    }

    /// Bind a variable
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// One-line summary for logs (query name and variables)
    pub fn summary(&self) -> String {
        let operation = self
            .query
            .split(['(', '{'])
            .next()
            .map(|head| head.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|head| !head.is_empty())
            .unwrap_or_else(|| "query".to_string());
        format!("{operation} {}", JsonValue::Object(self.variables.clone()))
    }
}

/// Where a provider reports usage and how it signals throttling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageProfile {
    /// Path to the declared query cost
    #[serde(default)]
    pub requested_path: Option<String>,
    /// Path to the charged query cost
    #[serde(default)]
    pub consumed_path: Option<String>,
    /// Path to the points left
    #[serde(default)]
    pub available_path: Option<String>,
    /// Path to the bucket size
    #[serde(default)]
    pub max_path: Option<String>,
    /// Path to the restore rate
    #[serde(default)]
    pub restore_rate_path: Option<String>,

    /// Error codes that mean "slow down and retry"
    #[serde(default)]
    pub throttle_codes: Vec<String>,
    /// Error codes that mean the credential expired
    #[serde(default)]
    pub auth_expired_codes: Vec<String>,
    /// Path of the code inside each `errors[]` entry
    #[serde(default = "default_error_code_path")]
    pub error_code_path: String,
    /// Regex with one capture group holding the wait in seconds
    #[serde(default)]
    pub throttle_wait_pattern: Option<String>,
    /// Wait used when a throttle error carries no usable hint
    #[serde(default = "default_throttle_wait_secs")]
    pub default_throttle_wait_secs: u64,
}

fn default_error_code_path() -> String {
    "extensions.code".to_string()
}

fn default_throttle_wait_secs() -> u64 {
    10
}

impl Default for UsageProfile {
    fn default() -> Self {
        Self {
            requested_path: None,
            consumed_path: None,
            available_path: None,
            max_path: None,
            restore_rate_path: None,
            throttle_codes: Vec::new(),
            auth_expired_codes: Vec::new(),
            error_code_path: default_error_code_path(),
            throttle_wait_pattern: None,
            default_throttle_wait_secs: default_throttle_wait_secs(),
        }
    }
}

impl UsageProfile {
    /// Overlay per-resource paths on top of the source profile
    #[must_use]
    pub fn merged_with(&self, overrides: &UsagePaths) -> Self {
        let mut merged = self.clone();
        let pick = |o: &Option<String>, base: &mut Option<String>| {
            if o.is_some() {
                base.clone_from(o);
            }
        };
        pick(&overrides.requested_path, &mut merged.requested_path);
        pick(&overrides.consumed_path, &mut merged.consumed_path);
        pick(&overrides.available_path, &mut merged.available_path);
        pick(&overrides.max_path, &mut merged.max_path);
        pick(&overrides.restore_rate_path, &mut merged.restore_rate_path);
        merged
    }

    /// Default throttle wait as a duration
    pub fn default_throttle_wait(&self) -> Duration {
        Duration::from_secs(self.default_throttle_wait_secs)
    }
}

/// Per-resource usage path overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsagePaths {
    #[serde(default)]
    pub requested_path: Option<String>,
    #[serde(default)]
    pub consumed_path: Option<String>,
    #[serde(default)]
    pub available_path: Option<String>,
    #[serde(default)]
    pub max_path: Option<String>,
    #[serde(default)]
    pub restore_rate_path: Option<String>,
}

/// GraphQL-level failure carried in a 200 response
#[derive(Debug, Clone, PartialEq)]
pub enum GraphQlFailure {
    /// Provider asked us to wait
    Throttled(Duration),
    /// Credential no longer accepted
    AuthExpired,
    /// Any other query error
    Rejected(String),
}

/// One page of a cursor connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Raw item nodes in response order
    pub items: Vec<JsonValue>,
    /// Cursor for the following page
    pub cursor: Option<String>,
    /// Whether the provider reports more pages
    pub has_next: bool,
    /// Usage metadata from the same response
    pub usage: Usage,
}

impl Page {
    /// Number of items on the page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page carries no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
