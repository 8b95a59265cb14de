//! Error types for commerce-extract
//!
//! This module defines the error hierarchy for the whole engine.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! Transport classifications that survive the retry policy surface as the
//! `RateLimited`, `Throttled`, `AuthExpired`, `ServerError`, `ClientError` and
//! `Network` variants. `Auth` is fatal for the run and always carries an
//! operator instruction.

use std::time::Duration;
use thiserror::Error;

/// The main error type for commerce-extract
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Authentication Errors
    // ============================================================================
    /// Refresh credential rejected. Needs an operator to re-authorize.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Token refresh failed: {message}")]
    TokenRefresh { message: String },

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Throttled by provider, wait {wait_seconds}s")]
    Throttled { wait_seconds: u64 },

    #[error("Credential rejected as expired after refresh")]
    AuthExpired,

    #[error("Server error HTTP {status} after {attempts} attempts: {body}")]
    ServerError {
        status: u16,
        attempts: u32,
        body: String,
    },

    #[error("Client error HTTP {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("Network error after {attempts} attempts: {message}")]
    Network { message: String, attempts: u32 },

    #[error("GraphQL error: {message}")]
    GraphQl { message: String },

    // ============================================================================
    // Budget Errors
    // ============================================================================
    #[error("Wait of {required:?} exceeds ceiling of {ceiling:?}")]
    BudgetExceeded { required: Duration, ceiling: Duration },

    // ============================================================================
    // Data Processing Errors
    // ============================================================================
    #[error("JSONPath error: {message}")]
    JsonPath { message: String },

    #[error("Failed to flatten '{resource}': {message}")]
    Flatten { resource: String, message: String },

    #[error("Pagination error for '{resource}': {message}")]
    Pagination { resource: String, message: String },

    #[error("Loader rejected batch for '{resource}': {message}")]
    Loader { resource: String, message: String },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("State error: {message}")]
    State { message: String },

    // ============================================================================
    // Template Errors
    // ============================================================================
    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Undefined variable in template: {variable}")]
    UndefinedVariable { variable: String },

    // ============================================================================
    // Run Control
    // ============================================================================
    #[error("Extraction cancelled")]
    Cancelled,

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a JSONPath error
    pub fn json_path(message: impl Into<String>) -> Self {
        Self::JsonPath {
            message: message.into(),
        }
    }

    /// Create a flatten error
    pub fn flatten(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Flatten {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a pagination error
    pub fn pagination(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pagination {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a loader error
    pub fn loader(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Loader {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create an undefined variable error
    pub fn undefined_var(variable: impl Into<String>) -> Self {
        Self::UndefinedVariable {
            variable: variable.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Check if this error is retryable by the transport
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_)
            | Error::Network { .. }
            | Error::RateLimited { .. }
            | Error::Throttled { .. } => true,
            Error::ServerError { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Check if this error needs operator action before the next run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }
}

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Result type alias for commerce-extract
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
