//! Column naming and value normalization helpers

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Convert a camelCase or PascalCase key to snake_case
///
/// Acronyms stay together: `SKU` becomes `sku`, `shipmentID` becomes
/// `shipment_id`, `HTTPStatus` becomes `http_status`.
pub fn snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(char::is_ascii_lowercase);
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower);
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }

    out.trim_end_matches('_').to_string()
}

/// Name of a nested column: `parent__child`
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}__{name}")
    }
}

/// Compiled field-name matcher (`name`, `*_suffix`, `prefix_*`)
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    exact: Vec<String>,
    suffixes: Vec<String>,
    prefixes: Vec<String>,
}

impl FieldSet {
    /// Compile patterns; each is normalized to snake_case first
    pub fn new(patterns: &[String]) -> Self {
        let mut set = Self::default();
        for pattern in patterns {
            if let Some(suffix) = pattern.strip_prefix('*') {
                set.suffixes.push(suffix.to_ascii_lowercase());
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                set.prefixes.push(prefix.to_ascii_lowercase());
            } else {
                set.exact.push(snake_case(pattern));
            }
        }
        set
    }

    /// Whether a snake_case leaf name matches
    pub fn matches(&self, name: &str) -> bool {
        self.exact.iter().any(|e| e == name)
            || self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
            || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

/// Parse a provider timestamp and render it as `YYYY-MM-DDTHH:MM:SS.mmmZ`
///
/// Offsets are converted to UTC; naive date-times and bare dates are taken
/// as UTC.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(|ts| format_timestamp(&ts))
}

/// Parse the timestamp shapes the supported providers emit
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Render a timestamp in the flat-record format
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
