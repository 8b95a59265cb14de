//! GraphQL transport with classification and retry
//!
//! Sends one GraphQL POST per attempt and sorts each outcome into a
//! classification:
//! - `ServerError` / `NetworkError` retry with backoff against a fixed attempt budget
//! - `RateLimited` / `Throttled` wait the declared time, outside the attempt budget
//! - `AuthExpired` refreshes the credential once per request
//! - `ClientError` surfaces immediately

use super::error_log::{Classification, ErrorLog, ErrorLogEntry};
use crate::auth::Authenticator;
use crate::budget::Usage;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::graphql::{GraphQlFailure, GraphQlRequest, ResponseInspector};
use crate::types::BackoffType;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response excerpt kept in error messages and the error log
const BODY_EXCERPT_LEN: usize = 500;

/// Configuration for the transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Total attempts for server and network errors
    pub max_attempts: u32,
    /// Initial delay for backoff
    pub initial_backoff: Duration,
    /// Maximum delay for backoff
    pub max_backoff: Duration,
    /// Type of backoff strategy
    pub backoff_type: BackoffType,
    /// Upper bound of the random extra added to each backoff
    pub jitter: Duration,
    /// Ceiling on a single rate-limit or throttle wait
    pub max_wait: Duration,
    /// Consecutive rate-limit or throttle waits allowed per request
    pub max_throttle_waits: u32,
    /// Wait used for HTTP 429 without a usable `Retry-After`
    pub default_retry_after: Duration,
    /// Headers sent with every request
    pub headers: BTreeMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_type: BackoffType::Exponential,
            jitter: Duration::from_millis(250),
            max_wait: Duration::from_secs(300),
            max_throttle_waits: 10,
            default_retry_after: Duration::from_secs(60),
            headers: BTreeMap::new(),
            user_agent: format!("commerce-extract/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TransportConfig {
    /// Create a new config builder
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }
}

/// Builder for transport config
#[derive(Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the total attempt budget
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts.max(1);
        self
    }

    /// Set backoff configuration
    pub fn backoff(mut self, backoff_type: BackoffType, initial: Duration, max: Duration) -> Self {
        self.config.backoff_type = backoff_type;
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    /// Set the jitter bound
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Set the wait ceiling
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = max_wait;
        self
    }

    /// Set the consecutive throttle wait limit
    pub fn max_throttle_waits(mut self, waits: u32) -> Self {
        self.config.max_throttle_waits = waits;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(key.into(), value.into());
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

/// Build the reqwest client shared by the transport and the token manager
pub fn build_http_client(config: &TransportConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .user_agent(&config.user_agent)
        .build()
        .map_err(Error::Http)
}

/// Successful GraphQL response
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlResponse {
    /// HTTP status
    pub status: u16,
    /// Full JSON body
    pub body: Value,
    /// Usage metadata read from the body
    pub usage: Usage,
}

/// Non-success classification of one attempt
#[derive(Debug)]
enum Failure {
    RateLimited(Duration),
    Throttled(Duration),
    AuthExpired,
    ServerError { status: u16, body: String },
    ClientError { status: u16, body: String },
    Rejected(String),
    Network(String),
}

/// Outcome of one attempt
type Attempt = std::result::Result<GraphQlResponse, Failure>;

impl Failure {
    fn classification(&self) -> Classification {
        match self {
            Self::RateLimited(_) => Classification::RateLimited,
            Self::Throttled(_) => Classification::Throttled,
            Self::AuthExpired => Classification::AuthExpired,
            Self::ServerError { .. } => Classification::ServerError,
            Self::ClientError { .. } | Self::Rejected(_) => Classification::ClientError,
            Self::Network(_) => Classification::NetworkError,
        }
    }

    fn summary(&self) -> String {
        match self {
            Self::RateLimited(wait) => format!("HTTP 429, retry after {}s", wait.as_secs()),
            Self::Throttled(wait) => format!("throttled, wait {}s", wait.as_secs()),
            Self::AuthExpired => "credential rejected".to_string(),
            Self::ServerError { status, body } | Self::ClientError { status, body } => {
                format!("HTTP {status}: {body}")
            }
            Self::Rejected(message) => format!("GraphQL errors: {message}"),
            Self::Network(message) => message.clone(),
        }
    }
}

/// Authenticated GraphQL transport for one source
pub struct Transport {
    client: Client,
    source: String,
    endpoint: String,
    config: TransportConfig,
    auth: Arc<Authenticator>,
    clock: Arc<dyn Clock>,
    error_log: Arc<dyn ErrorLog>,
}

impl Transport {
    /// Create a transport
    pub fn new(
        client: Client,
        source: impl Into<String>,
        endpoint: impl Into<String>,
        config: TransportConfig,
        auth: Arc<Authenticator>,
        clock: Arc<dyn Clock>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        Self {
            client,
            source: source.into(),
            endpoint: endpoint.into(),
            config,
            auth,
            clock,
            error_log,
        }
    }

    /// Source this transport talks to
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The authenticator in use
    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Send a request, applying the retry policy
    pub async fn send(
        &self,
        resource: &str,
        request: &GraphQlRequest,
        inspector: &ResponseInspector,
    ) -> Result<GraphQlResponse> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut failures = 0u32;
        let mut throttle_waits = 0u32;
        let mut refreshed = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let failure = match self.attempt(request, inspector).await? {
                Ok(response) => {
                    debug!(
                        source = %self.source,
                        resource,
                        attempt,
                        status = response.status,
                        "Request succeeded"
                    );
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            self.record(resource, request, &failure, attempt).await;
            let rate_limited = matches!(failure, Failure::RateLimited(_));

            match failure {
                Failure::RateLimited(wait) | Failure::Throttled(wait) => {
                    throttle_waits += 1;
                    if wait > self.config.max_wait {
                        return Err(Error::BudgetExceeded {
                            required: wait,
                            ceiling: self.config.max_wait,
                        });
                    }
                    if throttle_waits > self.config.max_throttle_waits {
                        return Err(if rate_limited {
                            Error::RateLimited {
                                retry_after_seconds: wait.as_secs(),
                            }
                        } else {
                            Error::Throttled {
                                wait_seconds: wait.as_secs(),
                            }
                        });
                    }
                    warn!(
                        source = %self.source,
                        resource,
                        wait_ms = wait.as_millis() as u64,
                        throttle_waits,
                        "Provider asked us to slow down"
                    );
                    self.clock.sleep(wait).await;
                }

                Failure::AuthExpired => {
                    if refreshed {
                        return Err(Error::AuthExpired);
                    }
                    refreshed = true;
                    warn!(source = %self.source, resource, "Credential rejected, refreshing");
                    self.auth.on_auth_expired().await?;
                }

                Failure::ServerError { status, body } => {
                    throttle_waits = 0;
                    failures += 1;
                    if failures >= max_attempts {
                        return Err(Error::ServerError {
                            status,
                            attempts: failures,
                            body,
                        });
                    }
                    self.back_off(resource, failures, max_attempts, &format!("HTTP {status}"))
                        .await;
                }

                Failure::Network(message) => {
                    throttle_waits = 0;
                    failures += 1;
                    if failures >= max_attempts {
                        return Err(Error::Network {
                            message,
                            attempts: failures,
                        });
                    }
                    self.back_off(resource, failures, max_attempts, &message).await;
                }

                Failure::ClientError { status, body } => {
                    return Err(Error::ClientError { status, body });
                }

                Failure::Rejected(message) => {
                    return Err(Error::GraphQl { message });
                }
            }
        }
    }

    /// One POST, classified
    async fn attempt(
        &self,
        request: &GraphQlRequest,
        inspector: &ResponseInspector,
    ) -> Result<Attempt> {
        let mut req = self.client.post(&self.endpoint).timeout(self.config.timeout);
        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        req = req.json(request);
        req = self.auth.apply(req).await?;

        let response = match req.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(Error::Http(e)),
            Err(e) => return Ok(Err(Failure::Network(e.to_string()))),
        };

        self.classify(response, inspector).await
    }

    async fn classify(&self, response: Response, inspector: &ResponseInspector) -> Result<Attempt> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after(&response).unwrap_or(self.config.default_retry_after);
            return Ok(Err(Failure::RateLimited(wait)));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Ok(Err(Failure::AuthExpired));
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return Ok(Err(Failure::Network(format!("failed to read body: {e}")))),
        };

        if status.is_server_error() {
            return Ok(Err(Failure::ServerError {
                status: status.as_u16(),
                body: excerpt(&text),
            }));
        }
        if !status.is_success() {
            return Ok(Err(Failure::ClientError {
                status: status.as_u16(),
                body: excerpt(&text),
            }));
        }

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(e) => return Ok(Err(Failure::Network(format!("invalid JSON body: {e}")))),
        };

        let usage = inspector.usage(&body)?;
        match inspector.failure(&body, &usage) {
            Some(GraphQlFailure::Throttled(wait)) => Ok(Err(Failure::Throttled(wait))),
            Some(GraphQlFailure::AuthExpired) => Ok(Err(Failure::AuthExpired)),
            Some(GraphQlFailure::Rejected(message)) => Ok(Err(Failure::Rejected(message))),
            None => Ok(Ok(GraphQlResponse {
                status: status.as_u16(),
                body,
                usage,
            })),
        }
    }

    async fn back_off(&self, resource: &str, failures: u32, max_attempts: u32, reason: &str) {
        let delay = self.calculate_backoff(failures - 1);
        warn!(
            source = %self.source,
            resource,
            reason,
            "Attempt {}/{} failed, retrying in {:?}",
            failures,
            max_attempts,
            delay
        );
        self.clock.sleep(delay).await;
    }

    async fn record(&self, resource: &str, request: &GraphQlRequest, failure: &Failure, attempt: u32) {
        let entry = ErrorLogEntry {
            timestamp: self.clock.now(),
            source: self.source.clone(),
            resource: resource.to_string(),
            classification: failure.classification(),
            attempt,
            request: request.summary(),
            response: failure.summary(),
        };
        if let Err(e) = self.error_log.append(&entry).await {
            warn!(error = %e, "Failed to write error log entry");
        }
    }

    /// Calculate backoff delay for a given retry (0-based), jitter included
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let delay = match self.config.backoff_type {
            BackoffType::Constant => self.config.initial_backoff,
            BackoffType::Linear => self.config.initial_backoff * (retry + 1),
            BackoffType::Exponential => {
                let factor = 2u32.saturating_pow(retry);
                self.config.initial_backoff.saturating_mul(factor)
            }
        };
        let delay = std::cmp::min(delay, self.config.max_backoff);

        if self.config.jitter.is_zero() {
            return delay;
        }
        delay + self.config.jitter.mul_f64(rand::random::<f64>())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("source", &self.source)
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Extract retry-after header value
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(|secs| Duration::from_secs(secs.ceil() as u64))
}

fn excerpt(text: &str) -> String {
    if text.len() <= BODY_EXCERPT_LEN {
        return text.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
