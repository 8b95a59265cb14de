//! HTTP transport module
//!
//! Provides the GraphQL transport with response classification, retry and
//! backoff, plus the error log every failed attempt is appended to.
//!
//! # Features
//!
//! - **Classification**: success, rate limited, throttled, auth expired, server,
//!   client and network errors
//! - **Retries**: bounded attempts with jittered backoff for transient failures
//! - **Throttle waits**: provider-declared waits, bounded by a ceiling
//! - **Authentication**: integration with the auth module

mod client;
mod error_log;

pub use client::{build_http_client, GraphQlResponse, Transport, TransportConfig, TransportConfigBuilder};
pub use error_log::{Classification, ErrorLog, ErrorLogEntry, FileErrorLog, MemoryErrorLog};
