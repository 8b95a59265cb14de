//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rate-governed GraphQL extraction
#[derive(Parser, Debug)]
#[command(name = "commerce-extract")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Secrets file (JSON); a top-level key per source scopes its secrets
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for watermarks and refreshed credentials
    #[arg(long, global = true, default_value = ".state")]
    pub state_dir: PathBuf,

    /// Report format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract every resource of one or more sources
    Run {
        /// Built-in source name or path to a YAML definition (repeatable)
        #[arg(short, long = "source", required = true)]
        sources: Vec<String>,

        /// Resources to extract (comma-separated, `name` or `source.name`; empty = all)
        #[arg(long, value_delimiter = ',')]
        resources: Vec<String>,

        /// Directory receiving one JSONL file per table
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Error log (JSONL); defaults to `errors.jsonl` in the state directory
        #[arg(long)]
        error_log: Option<PathBuf>,
    },

    /// Validate source definitions (and their templates when secrets are given)
    Validate {
        /// Built-in source name or path to a YAML definition (repeatable)
        #[arg(short, long = "source", required = true)]
        sources: Vec<String>,
    },

    /// List built-in sources
    List,

    /// Refresh and store the access token of a refresh-token source
    RefreshToken {
        /// Built-in source name or path to a YAML definition
        #[arg(short, long)]
        source: String,
    },
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One JSON document per line
    Json,
    /// Indented JSON
    Pretty,
}
