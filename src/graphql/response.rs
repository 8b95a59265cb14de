//! Response inspection: usage metadata, error classification, page extraction

use super::path::{as_f64, find_all, select, select_f64, select_string};
use super::types::{GraphQlFailure, Page, UsageProfile};
use crate::budget::Usage;
use crate::error::{Error, Result};
use crate::types::OptionStringExt;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Reads provider-specific metadata out of GraphQL responses
#[derive(Debug, Clone)]
pub struct ResponseInspector {
    profile: UsageProfile,
    wait_pattern: Option<Regex>,
}

impl ResponseInspector {
    /// Compile a profile
    pub fn new(profile: UsageProfile) -> Result<Self> {
        let wait_pattern = profile
            .throttle_wait_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::invalid_value("throttle_wait_pattern", e.to_string()))?;
        Ok(Self {
            profile,
            wait_pattern,
        })
    }

    /// The profile this inspector was built from
    pub fn profile(&self) -> &UsageProfile {
        &self.profile
    }

    /// Usage metadata reported in the response body
    pub fn usage(&self, body: &Value) -> Result<Usage> {
        let read = |path: &Option<String>| -> Result<Option<f64>> {
            match path {
                Some(p) => select_f64(body, p),
                None => Ok(None),
            }
        };
        Ok(Usage {
            requested: read(&self.profile.requested_path)?,
            consumed: read(&self.profile.consumed_path)?,
            available: read(&self.profile.available_path)?,
            max: read(&self.profile.max_path)?,
            restore_rate: read(&self.profile.restore_rate_path)?,
        })
    }

    /// Classify the `errors` array, if any
    ///
    /// Throttle codes win over auth codes, which win over anything else.
    pub fn failure(&self, body: &Value, usage: &Usage) -> Option<GraphQlFailure> {
        let errors = body.get("errors")?.as_array()?;
        if errors.is_empty() {
            return None;
        }

        let code_of = |err: &Value| select_string(err, &self.profile.error_code_path);

        if let Some(throttled) = errors.iter().find(|err| {
            code_of(err).is_some_and(|code| self.profile.throttle_codes.contains(&code))
        }) {
            let message = throttled
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Some(GraphQlFailure::Throttled(self.throttle_wait(message, usage)));
        }

        if errors.iter().any(|err| {
            code_of(err).is_some_and(|code| self.profile.auth_expired_codes.contains(&code))
        }) {
            return Some(GraphQlFailure::AuthExpired);
        }

        let messages: Vec<&str> = errors
            .iter()
            .map(|err| err.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
            .collect();
        Some(GraphQlFailure::Rejected(messages.join("; ")))
    }

    /// Wait demanded by a throttle error
    ///
    /// Order: message pattern, then `(requested - available) / restore_rate`,
    /// then the configured default.
    pub fn throttle_wait(&self, message: &str, usage: &Usage) -> Duration {
        if let Some(secs) = self
            .wait_pattern
            .as_ref()
            .and_then(|re| re.captures(message))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
        {
            return secs_ceil(secs);
        }

        if let (Some(requested), Some(available), Some(rate)) =
            (usage.requested, usage.available, usage.restore_rate)
        {
            if rate > 0.0 {
                return secs_ceil(((requested - available) / rate).max(0.0));
            }
        }

        self.profile.default_throttle_wait()
    }

    /// Pull the connection at `connection_path` out of a successful response
    pub fn page(&self, resource: &str, body: &Value, connection_path: &str, usage: Usage) -> Result<Page> {
        let connection = select(body, connection_path).ok_or_else(|| {
            Error::pagination(resource, format!("no connection at '{connection_path}'"))
        })?;

        if connection.is_null() {
            return Ok(Page {
                usage,
                ..Page::default()
            });
        }

        let (items, last_edge_cursor) = connection_items(resource, connection)?;

        let page_info = connection.get("pageInfo");
        let has_next = page_info
            .and_then(|info| info.get("hasNextPage"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let cursor = page_info
            .and_then(|info| info.get("endCursor"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(last_edge_cursor)
            .none_if_empty();

        debug!(
            resource,
            items = items.len(),
            has_next,
            cursor = cursor.as_deref().unwrap_or(""),
            "Extracted page"
        );

        Ok(Page {
            items,
            cursor,
            has_next,
            usage,
        })
    }

    /// Every error code in the response (diagnostics only)
    pub fn error_codes(&self, body: &Value) -> Vec<String> {
        let path = format!("$.errors[*].{}", self.profile.error_code_path);
        find_all(body, &path)
            .unwrap_or_default()
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                other => as_f64(other).map(|n| n.to_string()),
            })
            .collect()
    }
}

/// Nodes from `edges[].node` or `nodes[]`, plus the last edge cursor
fn connection_items(resource: &str, connection: &Value) -> Result<(Vec<Value>, Option<String>)> {
    if let Some(edges) = connection.get("edges").and_then(Value::as_array) {
        let mut items = Vec::with_capacity(edges.len());
        let mut last_cursor = None;
        for (index, edge) in edges.iter().enumerate() {
            let node = edge
                .get("node")
                .ok_or_else(|| Error::flatten(resource, format!("edge {index} without node")))?;
            items.push(node.clone());
            if let Some(cursor) = edge.get("cursor").and_then(Value::as_str) {
                last_cursor = Some(cursor.to_string());
            }
        }
        return Ok((items, last_cursor));
    }

    if let Some(nodes) = connection.get("nodes").and_then(Value::as_array) {
        return Ok((nodes.clone(), None));
    }

    match connection {
        Value::Array(items) => Ok((items.clone(), None)),
        _ => Err(Error::pagination(
            resource,
            "connection has neither edges nor nodes",
        )),
    }
}

fn secs_ceil(secs: f64) -> Duration {
    Duration::from_secs(secs.ceil().max(0.0) as u64)
}
