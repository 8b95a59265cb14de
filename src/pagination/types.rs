//! Pagination types and traits

use crate::error::Result;
use crate::graphql::Page;
use crate::types::JsonObject;
use async_trait::async_trait;

/// Where the walker is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkState {
    /// More pages may follow
    #[default]
    Ready,
    /// Provider reported the last page
    Finished,
    /// Page limit hit while the provider still had more pages
    Truncated,
    /// A fetch failed; nothing more will be yielded
    Failed,
}

impl WalkState {
    /// Whether the walker will yield nothing further
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Ready)
    }
}

/// Fetches one page for a cursor
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the page after `cursor` (`None` for the first page)
    async fn fetch(&self, cursor: Option<&str>) -> Result<Page>;
}

/// A resource query bound to one time window
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    /// Resource name (logs and errors)
    pub resource: String,
    /// GraphQL document
    pub query: String,
    /// Variables already rendered for the window
    pub variables: JsonObject,
    /// Variable that carries the cursor
    pub cursor_variable: String,
    /// Variable that carries the page size
    pub page_size_variable: String,
    /// Items per page
    pub page_size: u32,
    /// Dotted path to the connection object
    pub connection_path: String,
}
