//! Engine types
//!
//! Per-resource lifecycle, the run report and extraction windows.

use crate::error::Error;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Lifecycle of one resource within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePhase {
    #[default]
    Idle,
    Fetching,
    Flattening,
    Delivering,
    Completed,
    Failed,
}

impl ResourcePhase {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor
    pub fn can_advance_to(self, next: Self) -> bool {
        use ResourcePhase::{Completed, Delivering, Failed, Fetching, Flattening, Idle};
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Fetching | Completed) => true,
            (Fetching, Flattening | Completed) => true,
            (Flattening, Delivering | Fetching) => true,
            (Delivering, Fetching) => true,
            _ => false,
        }
    }

    /// Tag used in logs and reports
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Flattening => "flattening",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ResourcePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceReport {
    pub resource: String,
    /// Final phase: `Completed` or `Failed`
    pub phase: ResourcePhase,
    /// Phase the failure happened in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<ResourcePhase>,
    pub windows: u32,
    pub pages: u32,
    /// Top-level records delivered
    pub records: usize,
    /// Child rows delivered
    pub child_rows: usize,
    pub batches: u64,
    pub watermark_before: Option<DateTime<Utc>>,
    /// Watermark after the run; unchanged on failure or truncation
    pub watermark_after: Option<DateTime<Utc>>,
    /// A page limit left records unfetched
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ResourceReport {
    /// Empty report for a resource that has not started
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            phase: ResourcePhase::Idle,
            failed_in: None,
            windows: 0,
            pages: 0,
            records: 0,
            child_rows: 0,
            batches: 0,
            watermark_before: None,
            watermark_after: None,
            truncated: false,
            error: None,
            duration_ms: 0,
        }
    }

    /// Report for a resource that failed before fetching anything
    pub fn failed_before_start(resource: impl Into<String>, error: &Error) -> Self {
        let mut report = Self::new(resource);
        report.failed_in = Some(ResourcePhase::Idle);
        report.phase = ResourcePhase::Failed;
        report.error = Some(error.to_string());
        report
    }

    /// Whether the resource completed
    pub fn is_completed(&self) -> bool {
        self.phase == ResourcePhase::Completed
    }

    /// Whether the resource failed
    pub fn is_failed(&self) -> bool {
        self.phase == ResourcePhase::Failed
    }
}

/// Outcome of one source run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per resource, in definition order
    pub resources: Vec<ResourceReport>,
}

impl ExtractionReport {
    /// Report for a source that could not be set up: every resource failed
    pub fn setup_failed<'a>(
        source: impl Into<String>,
        resources: impl IntoIterator<Item = &'a str>,
        error: &Error,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            started_at: at,
            finished_at: at,
            resources: resources
                .into_iter()
                .map(|name| ResourceReport::failed_before_start(name, error))
                .collect(),
        }
    }

    /// Report for a single resource
    pub fn resource(&self, name: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.resource == name)
    }

    pub fn failed_count(&self) -> usize {
        self.resources.iter().filter(|r| r.is_failed()).count()
    }

    pub fn completed_count(&self) -> usize {
        self.resources.iter().filter(|r| r.is_completed()).count()
    }

    /// Whether every resource completed
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Total top-level records delivered
    pub fn total_records(&self) -> usize {
        self.resources.iter().map(|r| r.records).sum()
    }
}

/// Half-open time range `[start, end)` covered by one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Template values: `window.start`, `window.end`
    pub fn to_value(&self) -> Value {
        json!({
            "start": self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            "end": self.end.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

/// Split `[start, end)` into consecutive windows no longer than `span`
///
/// Empty when `start >= end`. Without a span the whole range is one window.
pub fn split_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    span: Option<Duration>,
) -> Vec<TimeWindow> {
    if start >= end {
        return Vec::new();
    }
    let Some(span) = span.filter(|s| *s > Duration::zero()) else {
        return vec![TimeWindow::new(start, end)];
    };

    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + span).min(end);
        windows.push(TimeWindow::new(cursor, next));
        cursor = next;
    }
    windows
}
