//! State types persisted between runs
//!
//! These types are serialized to JSON in the state directory.

use crate::auth::Credential;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Watermarks for every resource of one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatermarkState {
    /// Per-resource watermark
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceWatermark>,
}

impl WatermarkState {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored watermark for a resource
    pub fn get(&self, resource: &str) -> Option<DateTime<Utc>> {
        self.resources.get(resource).map(|r| r.watermark)
    }

    /// Store a watermark for a resource
    pub fn set(&mut self, resource: &str, watermark: DateTime<Utc>, updated_at: DateTime<Utc>) {
        self.resources.insert(
            resource.to_string(),
            ResourceWatermark {
                watermark,
                updated_at,
            },
        );
    }
}

/// High-water mark of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceWatermark {
    /// Greatest incremental-field value delivered
    pub watermark: DateTime<Utc>,
    /// When the watermark was written
    pub updated_at: DateTime<Utc>,
}

/// Persisted credentials keyed by source name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialState {
    #[serde(default)]
    pub sources: BTreeMap<String, Credential>,
}
