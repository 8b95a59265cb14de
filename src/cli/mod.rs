//! CLI module
//!
//! Command-line interface for running extractions.
//!
//! # Commands
//!
//! - `run` - Extract one or more sources into JSONL tables
//! - `validate` - Check source definitions and their templates
//! - `list` - List built-in sources
//! - `refresh-token` - Refresh and store a source's access token

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::{prepare_runs, select_resources, Runner, SharedSinks};
