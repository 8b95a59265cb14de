//! JSON file persistence with atomic writes

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read a JSON file, or the default value when it does not exist
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::State {
        message: format!("Failed to read state file {}: {e}", path.display()),
    })?;

    serde_json::from_str(&contents).map_err(|e| Error::State {
        message: format!("Failed to parse state file {}: {e}", path.display()),
    })
}

/// Write a JSON file through a temp file and rename
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value).map_err(|e| Error::State {
        message: format!("Failed to serialize state: {e}"),
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::State {
                message: format!("Failed to create state directory: {e}"),
            })?;
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, &contents)
        .await
        .map_err(|e| Error::State {
            message: format!("Failed to write state file: {e}"),
        })?;

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| Error::State {
            message: format!("Failed to rename state file: {e}"),
        })?;

    Ok(())
}
