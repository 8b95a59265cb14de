//! Credential stores

use super::persist::{read_json_or_default, write_json_atomic};
use super::types::CredentialState;
use crate::auth::Credential;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Persistence for refreshed access tokens
#[async_trait]
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Stored credential for a source
    async fn load(&self, source: &str) -> Result<Option<Credential>>;

    /// Replace the stored credential for a source
    async fn save(&self, source: &str, credential: &Credential) -> Result<()>;
}

/// Credentials in a JSON file
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    state: RwLock<CredentialState>,
}

impl FileCredentialStore {
    /// Open a store, loading existing credentials if the file exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = read_json_or_default(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, source: &str) -> Result<Option<Credential>> {
        Ok(self.state.read().await.sources.get(source).cloned())
    }

    async fn save(&self, source: &str, credential: &Credential) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.sources.insert(source.to_string(), credential.clone());
        write_json_atomic(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

/// Credentials held in memory
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: RwLock<CredentialState>,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, source: &str) -> Result<Option<Credential>> {
        Ok(self.state.read().await.sources.get(source).cloned())
    }

    async fn save(&self, source: &str, credential: &Credential) -> Result<()> {
        self.state
            .write()
            .await
            .sources
            .insert(source.to_string(), credential.clone());
        Ok(())
    }
}
