//! Cursor walker
//!
//! Drives one resource's pagination to exhaustion. The walker is a plain
//! state object: each `next_page` call performs at most one fetch, and once
//! it has finished or failed it yields nothing further.

use super::types::{PageSource, WalkState};
use crate::budget::BudgetTracker;
use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::graphql::Page;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Lazy, finite, non-restartable sequence of pages
pub struct PageWalker<'a> {
    resource: String,
    source: &'a dyn PageSource,
    budget: &'a mut BudgetTracker,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    cursor: Option<String>,
    seen_cursors: HashSet<String>,
    state: WalkState,
    pages: u32,
    max_pages: Option<u32>,
}

impl<'a> PageWalker<'a> {
    /// Start a walk from the first page
    pub fn new(
        resource: impl Into<String>,
        source: &'a dyn PageSource,
        budget: &'a mut BudgetTracker,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resource: resource.into(),
            source,
            budget,
            clock,
            cancel,
            cursor: None,
            seen_cursors: HashSet::new(),
            state: WalkState::Ready,
            pages: 0,
            max_pages: None,
        }
    }

    /// Stop after this many pages
    #[must_use]
    pub fn max_pages(mut self, limit: Option<u32>) -> Self {
        self.max_pages = limit;
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> WalkState {
        self.state
    }

    /// Whether the page limit cut the walk short
    pub fn is_truncated(&self) -> bool {
        self.state == WalkState::Truncated
    }

    /// Pages yielded so far
    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    /// Cursor the next fetch will use
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Fetch the next page, or `None` once the walk is over
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.state.is_terminal() {
            return Ok(None);
        }

        if self.max_pages.is_some_and(|limit| self.pages >= limit) {
            info!(resource = %self.resource, pages = self.pages, "Page limit reached with pages remaining");
            self.state = WalkState::Truncated;
            return Ok(None);
        }

        if self.cancel.is_cancelled() {
            return self.fail(Error::Cancelled);
        }

        let wait = self.budget.before_request();
        if wait.capped {
            return self.fail(Error::BudgetExceeded {
                required: wait.required,
                ceiling: wait.duration,
            });
        }

        tokio::select! {
            () = self.cancel.cancelled() => return self.fail(Error::Cancelled),
            () = self.clock.sleep(wait.duration) => {}
        }

        let page = match self.source.fetch(self.cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => return self.fail(e),
        };

        self.budget.observe(&page.usage);
        self.pages += 1;

        debug!(
            resource = %self.resource,
            page = self.pages,
            items = page.len(),
            has_next = page.has_next,
            wait_ms = wait.duration.as_millis() as u64,
            "Fetched page"
        );

        match (&page.cursor, page.has_next) {
            (Some(next), true) => {
                if !self.seen_cursors.insert(next.clone()) {
                    return self.fail(Error::pagination(
                        &self.resource,
                        format!("cursor '{next}' repeated after page {}", self.pages),
                    ));
                }
                self.cursor = Some(next.clone());
            }
            _ => self.state = WalkState::Finished,
        }

        Ok(Some(page))
    }

    fn fail(&mut self, error: Error) -> Result<Option<Page>> {
        self.state = WalkState::Failed;
        Err(error)
    }
}

impl std::fmt::Debug for PageWalker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWalker")
            .field("resource", &self.resource)
            .field("state", &self.state)
            .field("pages", &self.pages)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}
