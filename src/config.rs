//! Source definitions
//!
//! A source is one GraphQL API: its endpoint, auth, retry settings, budget
//! model, usage/throttle profile and the resources to extract. Definitions
//! are YAML; secrets come from a JSON file and reach the definition through
//! `{{ config.* }}` templates.

use crate::auth::{AuthConfig, DEFAULT_REFRESH_MARGIN};
use crate::budget::BudgetConfig;
use crate::connectors;
use crate::error::{Error, Result};
use crate::flatten::{parse_timestamp, FlattenRules};
use crate::graphql::{ResponseInspector, UsagePaths, UsageProfile};
use crate::http::TransportConfig;
use crate::template::{has_templates, render, render_value, TemplateContext};
use crate::types::{BackoffType, JsonObject, JsonValue, WriteDisposition};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use url::Url;

// ============================================================================
// Source
// ============================================================================

/// Complete source definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source name (e.g. "shopify"); also the state and output namespace
    pub name: String,

    /// Human-readable title
    #[serde(default)]
    pub title: Option<String>,

    /// Short description
    #[serde(default)]
    pub description: Option<String>,

    /// GraphQL endpoint (templated)
    pub endpoint: String,

    /// Authentication
    #[serde(default)]
    pub auth: AuthDef,

    /// HTTP client and retry settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Rate or complexity budget
    pub budget: BudgetConfig,

    /// Where usage metadata and throttle signals live in responses
    #[serde(default)]
    pub usage: UsageProfile,

    /// Watermark used when none is stored
    #[serde(default = "default_start_date")]
    pub start_date: DateTime<Utc>,

    /// Flatten rules shared by every resource
    #[serde(default)]
    pub flatten: FlattenRules,

    /// Resources to extract, in order
    pub resources: Vec<ResourceConfig>,
}

fn default_start_date() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

impl SourceConfig {
    /// Parse and validate a YAML definition
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse source YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a resource by name
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Keep only the named resources; unknown names are an error
    pub fn retain_resources(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if self.resource(name).is_none() {
                return Err(Error::config(format!(
                    "Source '{}' has no resource '{name}'",
                    self.name
                )));
            }
        }
        self.resources.retain(|r| names.contains(&r.name));
        Ok(())
    }

    /// Check everything that can be checked before secrets are applied
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::missing_field("name"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::missing_field("endpoint"));
        }
        if !has_templates(&self.endpoint) {
            Url::parse(&self.endpoint)
                .map_err(|e| Error::invalid_value("endpoint", e.to_string()))?;
        }

        self.auth.validate()?;
        self.http.validate()?;
        validate_budget(&self.budget)?;
        ResponseInspector::new(self.usage.clone())?;

        if self.resources.is_empty() {
            return Err(Error::config(format!(
                "Source '{}' must define at least one resource",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.name.as_str()) {
                return Err(Error::config(format!(
                    "Duplicate resource name '{}'",
                    resource.name
                )));
            }
            resource.validate()?;
        }
        Ok(())
    }

    /// Context holding the secrets
    pub fn context(secrets: &JsonValue) -> TemplateContext {
        TemplateContext::with_config(secrets.clone())
    }

    /// Endpoint with secrets applied
    pub fn render_endpoint(&self, ctx: &TemplateContext) -> Result<String> {
        let endpoint = render(&self.endpoint, ctx)?;
        Url::parse(&endpoint).map_err(|e| Error::invalid_value("endpoint", format!("{endpoint}: {e}")))?;
        Ok(endpoint)
    }

    /// Runtime auth settings with secrets applied
    pub fn render_auth(&self, ctx: &TemplateContext) -> Result<AuthConfig> {
        self.auth.render(ctx)
    }

    /// Transport settings with templated headers rendered
    pub fn transport_config(&self, ctx: &TemplateContext) -> Result<TransportConfig> {
        self.http.to_transport(ctx)
    }

    /// Usage profile for a resource after its overrides
    pub fn usage_for(&self, resource: &ResourceConfig) -> UsageProfile {
        self.usage.merged_with(&resource.usage)
    }

    /// Flatten rules for a resource: source rules plus its own lists
    pub fn flatten_rules_for(&self, resource: &ResourceConfig) -> FlattenRules {
        self.flatten
            .clone()
            .drop(resource.drop_fields.iter().cloned())
            .money(resource.money_fields.iter().cloned())
            .quantities(resource.quantity_fields.iter().cloned())
    }
}

fn validate_budget(budget: &BudgetConfig) -> Result<()> {
    if !(budget.max_capacity > 0.0) {
        return Err(Error::invalid_value("budget.max_capacity", "must be positive"));
    }
    match (budget.restore_rate, budget.recharge_window_secs) {
        (None, None) => {
            return Err(Error::invalid_value(
                "budget",
                "set either restore_rate or recharge_window_secs",
            ))
        }
        (Some(rate), _) if !(rate > 0.0) => {
            return Err(Error::invalid_value("budget.restore_rate", "must be positive"))
        }
        (_, Some(0)) => {
            return Err(Error::invalid_value(
                "budget.recharge_window_secs",
                "must be positive",
            ))
        }
        _ => {}
    }
    for (field, ratio) in [
        ("budget.slowdown_ratio", budget.slowdown_ratio),
        ("budget.low_water_ratio", budget.low_water_ratio),
    ] {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::invalid_value(field, "must be between 0 and 1"));
        }
    }
    if budget.fallback_cost < 0.0 {
        return Err(Error::invalid_value("budget.fallback_cost", "must not be negative"));
    }
    if budget.max_wait_secs == 0 {
        return Err(Error::invalid_value("budget.max_wait_secs", "must be positive"));
    }
    Ok(())
}

// ============================================================================
// Auth
// ============================================================================

/// Authentication as written in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthDef {
    /// No authentication
    #[default]
    None,

    /// Static key in a header
    ApiKey {
        header: String,
        #[serde(default)]
        prefix: Option<String>,
        value: String,
    },

    /// Static bearer token
    Bearer { token: String },

    /// Expiring bearer token renewed through a refresh endpoint
    RefreshToken {
        refresh_url: String,
        refresh_token: String,
        /// Access token to start from when none is stored
        #[serde(default)]
        access_token: Option<String>,
        /// Expiry of `access_token` (RFC 3339)
        #[serde(default)]
        expires_at: Option<String>,
        /// Refresh this many hours before expiry
        #[serde(default = "default_refresh_margin_hours")]
        refresh_margin_hours: u64,
    },
}

fn default_refresh_margin_hours() -> u64 {
    DEFAULT_REFRESH_MARGIN.as_secs() / 3600
}

impl AuthDef {
    /// Short name for listings
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ApiKey { .. } => "api_key",
            Self::Bearer { .. } => "bearer",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::ApiKey { header, .. } if header.trim().is_empty() => {
                Err(Error::missing_field("auth.header"))
            }
            Self::RefreshToken { refresh_url, .. } if !has_templates(refresh_url) => {
                Url::parse(refresh_url)
                    .map(|_| ())
                    .map_err(|e| Error::invalid_value("auth.refresh_url", e.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn render(&self, ctx: &TemplateContext) -> Result<AuthConfig> {
        Ok(match self {
            Self::None => AuthConfig::None,
            Self::ApiKey {
                header,
                prefix,
                value,
            } => AuthConfig::ApiKey {
                header: header.clone(),
                prefix: prefix.clone(),
                value: render(value, ctx)?,
            },
            Self::Bearer { token } => AuthConfig::Bearer {
                token: render(token, ctx)?,
            },
            Self::RefreshToken {
                refresh_url,
                refresh_token,
                access_token,
                expires_at,
                refresh_margin_hours,
            } => AuthConfig::RefreshToken {
                refresh_url: render(refresh_url, ctx)?,
                refresh_token: render(refresh_token, ctx)?,
                access_token: render_optional(access_token.as_deref(), ctx),
                expires_at: render_optional(expires_at.as_deref(), ctx)
                    .map(|raw| {
                        parse_timestamp(&raw)
                            .ok_or_else(|| Error::invalid_value("auth.expires_at", raw))
                    })
                    .transpose()?,
                margin: Duration::from_secs(refresh_margin_hours * 3600),
            },
        })
    }
}

/// Render an optional template; unresolved or empty values count as absent
fn render_optional(template: Option<&str>, ctx: &TemplateContext) -> Option<String> {
    template
        .and_then(|t| render(t, ctx).ok())
        .filter(|s| !s.trim().is_empty())
}

// ============================================================================
// HTTP
// ============================================================================

/// HTTP client and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts for server and network errors
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff strategy
    #[serde(default)]
    pub backoff: BackoffType,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Random extra per backoff, up to this many milliseconds
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Ceiling on a single rate-limit or throttle wait, in seconds
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Rate-limit or throttle waits allowed per request
    #[serde(default = "default_max_throttle_waits")]
    pub max_throttle_waits: u32,

    /// Headers sent with every request (templated)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// User agent override
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_max_wait_secs() -> u64 {
    300
}

fn default_max_throttle_waits() -> u32 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff: BackoffType::default(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_ms: default_jitter_ms(),
            max_wait_secs: default_max_wait_secs(),
            max_throttle_waits: default_max_throttle_waits(),
            headers: BTreeMap::new(),
            user_agent: None,
        }
    }
}

impl HttpConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_value("http.max_attempts", "must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(Error::invalid_value("http.timeout_secs", "must be positive"));
        }
        if self.max_wait_secs == 0 {
            return Err(Error::invalid_value("http.max_wait_secs", "must be positive"));
        }
        Ok(())
    }

    /// Build the transport config, rendering header templates
    pub fn to_transport(&self, ctx: &TemplateContext) -> Result<TransportConfig> {
        let mut builder = TransportConfig::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .max_attempts(self.max_attempts)
            .backoff(
                self.backoff,
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            )
            .jitter(Duration::from_millis(self.jitter_ms))
            .max_wait(Duration::from_secs(self.max_wait_secs))
            .max_throttle_waits(self.max_throttle_waits);

        for (name, value) in &self.headers {
            builder = builder.header(name, render(value, ctx)?);
        }
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent);
        }
        Ok(builder.build())
    }
}

// ============================================================================
// Resource
// ============================================================================

/// One resource (top-level table) of a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource name, also the top-level table name
    pub name: String,

    /// GraphQL document
    pub query: String,

    /// Dotted path to the connection object (e.g. `data.orders`)
    pub connection_path: String,

    /// Variables rendered per window (`{{ window.start }}`, `{{ config.x }}`)
    #[serde(default)]
    pub variables: JsonObject,

    /// Variable carrying the cursor
    #[serde(default = "default_cursor_variable")]
    pub cursor_variable: String,

    /// Variable carrying the page size
    #[serde(default = "default_page_size_variable")]
    pub page_size_variable: String,

    /// Items per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Primary key fields (payload names)
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Field whose greatest value becomes the next watermark
    #[serde(default)]
    pub incremental_field: Option<String>,

    /// Loader disposition
    #[serde(default)]
    pub write_disposition: WriteDisposition,

    /// Longest window a single query may span
    #[serde(default)]
    pub max_query_span_days: Option<u32>,

    /// Stop after this many pages per window
    #[serde(default)]
    pub max_pages: Option<u32>,

    /// Usage path overrides
    #[serde(default)]
    pub usage: UsagePaths,

    /// Extra fields to drop for this resource
    #[serde(default)]
    pub drop_fields: Vec<String>,

    /// Extra money fields for this resource
    #[serde(default)]
    pub money_fields: Vec<String>,

    /// Extra quantity fields for this resource
    #[serde(default)]
    pub quantity_fields: Vec<String>,
}

fn default_cursor_variable() -> String {
    "after".to_string()
}

fn default_page_size_variable() -> String {
    "first".to_string()
}

fn default_page_size() -> u32 {
    50
}

impl ResourceConfig {
    fn validate(&self) -> Result<()> {
        let field = |name: &str| format!("resources.{}.{name}", self.name);

        if self.name.trim().is_empty() {
            return Err(Error::missing_field("resources.name"));
        }
        if self.query.trim().is_empty() {
            return Err(Error::missing_field(field("query")));
        }
        if self.connection_path.trim().is_empty() {
            return Err(Error::missing_field(field("connection_path")));
        }
        if self.page_size == 0 {
            return Err(Error::invalid_value(field("page_size"), "must be positive"));
        }
        if self.write_disposition.requires_primary_key() && self.primary_key.is_empty() {
            return Err(Error::invalid_value(
                field("primary_key"),
                "merge disposition requires a primary key",
            ));
        }
        if self.max_query_span_days == Some(0) {
            return Err(Error::invalid_value(
                field("max_query_span_days"),
                "must be positive",
            ));
        }
        if self.max_pages == Some(0) {
            return Err(Error::invalid_value(field("max_pages"), "must be positive"));
        }
        Ok(())
    }

    /// Query variables rendered for one window
    pub fn render_variables(&self, ctx: &TemplateContext) -> Result<JsonObject> {
        match render_value(&JsonValue::Object(self.variables.clone()), ctx)? {
            JsonValue::Object(map) => Ok(map),
            _ => Ok(JsonObject::new()),
        }
    }

    /// Longest window span, if capped
    pub fn max_span(&self) -> Option<chrono::Duration> {
        self.max_query_span_days
            .map(|days| chrono::Duration::days(i64::from(days)))
    }

    /// Whether the resource tracks a watermark
    pub fn is_incremental(&self) -> bool {
        self.incremental_field.is_some()
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load a source by built-in name or YAML path
pub fn load_source(name_or_path: &str) -> Result<SourceConfig> {
    let looks_like_path = name_or_path.contains(['/', '\\'])
        || name_or_path.ends_with(".yaml")
        || name_or_path.ends_with(".yml");

    if !looks_like_path {
        if let Some(yaml) = connectors::get_builtin(name_or_path) {
            return SourceConfig::from_yaml(yaml);
        }
    }

    let path = Path::new(name_or_path);
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::config(format!(
                "Source '{name_or_path}' not found. Built-in sources: {}. Or provide a path to a YAML file.",
                connectors::list_builtin().join(", ")
            ))
        } else {
            Error::config(format!("Failed to read source file '{}': {e}", path.display()))
        }
    })?;
    SourceConfig::from_yaml(&content)
}

/// Read the JSON secrets file
///
/// A top-level key named after a source scopes its secrets, so one file can
/// serve several sources.
pub fn load_secrets(path: &Path) -> Result<JsonValue> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            Error::config(format!("Failed to read secrets '{}': {e}", path.display()))
        }
    })?;
    let secrets: JsonValue = serde_json::from_str(&content)
        .map_err(|e| Error::config(format!("Failed to parse secrets '{}': {e}", path.display())))?;
    if !secrets.is_object() {
        return Err(Error::config("Secrets file must contain a JSON object"));
    }
    Ok(secrets)
}

/// Secrets for one source: its own section when present, else the whole file
pub fn secrets_for(secrets: &JsonValue, source: &str) -> JsonValue {
    secrets
        .get(source)
        .filter(|scoped| scoped.is_object())
        .cloned()
        .unwrap_or_else(|| secrets.clone())
}
