//! Watermark stores
//!
//! A watermark is only ever moved by the orchestrator after a resource
//! completed; stores never advance it on their own.

use super::persist::{read_json_or_default, write_json_atomic};
use super::types::WatermarkState;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Per-resource high-water mark persistence
#[async_trait]
pub trait WatermarkStore: Send + Sync + std::fmt::Debug {
    /// Stored watermark, or the store's default when none is stored
    async fn get(&self, resource: &str) -> Result<DateTime<Utc>>;

    /// Replace the stored watermark
    async fn set(&self, resource: &str, watermark: DateTime<Utc>) -> Result<()>;
}

/// Watermarks in a JSON file
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    default: DateTime<Utc>,
    state: RwLock<WatermarkState>,
}

impl FileWatermarkStore {
    /// Open a store, loading existing watermarks if the file exists
    pub fn open(path: impl AsRef<Path>, default: DateTime<Utc>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = read_json_or_default(&path)?;
        Ok(Self {
            path,
            default,
            state: RwLock::new(state),
        })
    }

    /// Path to the state file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, resource: &str) -> Result<DateTime<Utc>> {
        Ok(self.state.read().await.get(resource).unwrap_or(self.default))
    }

    async fn set(&self, resource: &str, watermark: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.set(resource, watermark, Utc::now());
        write_json_atomic(&self.path, &next).await?;
        *state = next;

        debug!(resource, %watermark, path = %self.path.display(), "Watermark saved");
        Ok(())
    }
}

/// Watermarks held in memory
#[derive(Debug)]
pub struct MemoryWatermarkStore {
    default: DateTime<Utc>,
    state: RwLock<WatermarkState>,
}

impl MemoryWatermarkStore {
    /// Create an empty store
    pub fn new(default: DateTime<Utc>) -> Self {
        Self {
            default,
            state: RwLock::new(WatermarkState::new()),
        }
    }

    /// Snapshot of everything stored
    pub async fn snapshot(&self) -> WatermarkState {
        self.state.read().await.clone()
    }

    /// Whether anything was stored for a resource
    pub async fn contains(&self, resource: &str) -> bool {
        self.state.read().await.get(resource).is_some()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, resource: &str) -> Result<DateTime<Utc>> {
        Ok(self.state.read().await.get(resource).unwrap_or(self.default))
    }

    async fn set(&self, resource: &str, watermark: DateTime<Utc>) -> Result<()> {
        self.state.write().await.set(resource, watermark, Utc::now());
        Ok(())
    }
}
