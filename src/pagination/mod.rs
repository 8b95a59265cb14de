//! Pagination module
//!
//! Cursor pagination over GraphQL connections.
//!
//! # Overview
//!
//! A `PageSource` fetches one page for a cursor; `GraphQlPageSource` does it
//! through the transport for a window-bound `QuerySpec`. The `PageWalker`
//! drives a source to exhaustion, waiting on the budget before every fetch
//! and checking for cancellation between pages.

mod source;
mod types;
mod walker;

pub use source::GraphQlPageSource;
pub use types::{PageSource, QuerySpec, WalkState};
pub use walker::PageWalker;
