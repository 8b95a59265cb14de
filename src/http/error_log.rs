//! Error log sink
//!
//! Every non-success transport classification is appended here, including the
//! ones the retry policy recovers from. Entries carry request summaries only;
//! credentials never reach the log.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Transport classification of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Success,
    RateLimited,
    Throttled,
    AuthExpired,
    ServerError,
    ClientError,
    NetworkError,
}

impl Classification {
    /// Tag used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::Throttled => "throttled",
            Self::AuthExpired => "auth_expired",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::NetworkError => "network_error",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub resource: String,
    pub classification: Classification,
    /// 1-based attempt number within the request
    pub attempt: u32,
    /// Operation name and variables
    pub request: String,
    /// Status and truncated body or error text
    pub response: String,
}

/// Append-only sink for failed attempts
#[async_trait]
pub trait ErrorLog: Send + Sync + std::fmt::Debug {
    /// Append one entry
    async fn append(&self, entry: &ErrorLogEntry) -> Result<()>;
}

/// JSON Lines file sink
#[derive(Debug)]
pub struct FileErrorLog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileErrorLog {
    /// Log to `path`, creating it on first append
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ErrorLog for FileErrorLog {
    async fn append(&self, entry: &ErrorLogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Other(format!("Failed to open error log {}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct MemoryErrorLog {
    entries: Mutex<Vec<ErrorLogEntry>>,
}

impl MemoryErrorLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far
    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ErrorLog for MemoryErrorLog {
    async fn append(&self, entry: &ErrorLogEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}
