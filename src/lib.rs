//! # commerce-extract
//!
//! Rate-governed, cursor-paginated extraction from GraphQL commerce and
//! logistics APIs into flat, loader-ready tables.
//!
//! ## Features
//!
//! - **Budget-aware pacing**: tracks points or complexity budgets and waits before the API says no
//! - **Resilient transport**: retry with backoff, throttle waits, one credential refresh per rejection
//! - **Cursor pagination**: explicit page walker with termination and repeated-cursor detection
//! - **Flattening**: nested connections become parent and child tables with stable keys
//! - **Incremental runs**: per-resource watermarks advance only after a resource completes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use commerce_extract::config::load_source;
//! use commerce_extract::engine::{Orchestrator, Source};
//! use commerce_extract::loader::JsonlLoader;
//! use commerce_extract::state::FileWatermarkStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> commerce_extract::Result<()> {
//!     let config = load_source("shopify")?;
//!     let watermarks = FileWatermarkStore::open(".state/shopify/watermarks.json", config.start_date)?;
//!     let secrets = serde_json::json!({ "shop_domain": "acme.myshopify.com", "access_token": "shpat_..." });
//!     let source = Source::resolve(config, &secrets)?;
//!
//!     let orchestrator = Orchestrator::new(Arc::new(JsonlLoader::new("output")), Arc::new(watermarks));
//!     let report = orchestrator.run(&source).await;
//!     println!("{} failed", report.failed_count());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Extraction Orchestrator                     │
//! │   windows → walk pages → flatten → Loader::load → watermark      │
//! └──────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌────────────┬───────────────┬───┴──────────┬───────────┬──────────┐
//! │   Budget   │   Transport   │  Page Walker │ Flattener │  State   │
//! ├────────────┼───────────────┼──────────────┼───────────┼──────────┤
//! │ Points     │ Retry/backoff │ Cursor       │ Columns   │ Watermark│
//! │ Complexity │ Throttle wait │ Cancellation │ Children  │ Tokens   │
//! │ Recharge   │ Token refresh │ Max pages    │ Privacy   │ Atomic   │
//! └────────────┴───────────────┴──────────────┴───────────┴──────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Time source for waits
pub mod clock;

/// Cooperative cancellation
pub mod cancel;

/// Authentication and credential refresh
pub mod auth;

/// Rate and complexity budget tracking
pub mod budget;

/// GraphQL response inspection
pub mod graphql;

/// HTTP transport with retry and throttle handling
pub mod http;

/// Cursor pagination
pub mod pagination;

/// Nested records to flat tables
pub mod flatten;

/// Loader boundary and bundled loaders
pub mod loader;

/// Watermark and credential persistence
pub mod state;

/// Extraction orchestration
pub mod engine;

/// Source definitions
pub mod config;

/// Template interpolation
pub mod template;

/// Built-in source definitions
pub mod connectors;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use config::{load_source, SourceConfig};
pub use engine::{ExtractionReport, Orchestrator, Source};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
