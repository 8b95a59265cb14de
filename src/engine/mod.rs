//! Extraction engine module
//!
//! Turns a source definition into loader batches and watermark updates.
//!
//! # Overview
//!
//! - `Source` - a definition rendered against its secrets
//! - `Orchestrator` - runs a source resource by resource and reports
//! - `ExtractionReport` / `ResourceReport` - per-run and per-resource outcome
//! - `split_windows` - range splitting for APIs that cap the query span
//!
//! Resource lifecycle:
//!
//! ```text
//! Idle -> Fetching -> Flattening -> Delivering -> Fetching ... -> Completed
//!            \             \             \
//!             +-------------+-------------+--> Failed
//! ```
//!
//! Only `Completed` writes the watermark.

mod orchestrator;
mod source;
mod types;

pub use orchestrator::{run_concurrently, Orchestrator};
pub use source::Source;
pub use types::{split_windows, ExtractionReport, ResourcePhase, ResourceReport, TimeWindow};

#[cfg(test)]
mod tests;
