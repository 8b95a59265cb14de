//! State management module
//!
//! Everything that survives between runs: per-resource watermarks and
//! refreshed credentials. Files are written atomically (temp file + rename)
//! so a crash mid-write never leaves a truncated state file.
//!
//! # Overview
//!
//! - `WatermarkStore` - high-water mark per resource, file or in-memory
//! - `CredentialStore` - refreshed access tokens, file or in-memory

mod credentials;
mod persist;
mod types;
mod watermark;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use types::{CredentialState, ResourceWatermark, WatermarkState};
pub use watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore};
