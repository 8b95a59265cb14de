//! Extraction orchestrator
//!
//! Runs every resource of a source in order: plan windows from the stored
//! watermark, walk pages, flatten, deliver, and advance the watermark only
//! once the resource has completed.

use super::source::Source;
use super::types::{split_windows, ExtractionReport, ResourcePhase, ResourceReport};
use crate::budget::BudgetTracker;
use crate::cancel::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::config::ResourceConfig;
use crate::error::{Error, Result};
use crate::flatten::{format_timestamp, parse_timestamp, snake_case, Flattener, Scalar};
use crate::graphql::ResponseInspector;
use crate::http::{build_http_client, ErrorLog, MemoryErrorLog, Transport};
use crate::loader::{LoadBatch, Loader};
use crate::pagination::{GraphQlPageSource, PageWalker, QuerySpec};
use crate::state::{CredentialStore, MemoryCredentialStore, WatermarkStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives sources from the first page to the watermark write
#[derive(Debug, Clone)]
pub struct Orchestrator {
    loader: Arc<dyn Loader>,
    watermarks: Arc<dyn WatermarkStore>,
    credentials: Arc<dyn CredentialStore>,
    error_log: Arc<dyn ErrorLog>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Orchestrator on wall time with in-memory credentials and error log
    pub fn new(loader: Arc<dyn Loader>, watermarks: Arc<dyn WatermarkStore>) -> Self {
        Self {
            loader,
            watermarks,
            credentials: Arc::new(MemoryCredentialStore::new()),
            error_log: Arc::new(MemoryErrorLog::new()),
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = error_log;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop between pages once `cancel` fires
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this orchestrator's runs
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Extract every resource of `source`
    ///
    /// Never fails as a whole: each resource ends `Completed` or `Failed`
    /// and the report lists all of them.
    pub async fn run(&self, source: &Source) -> ExtractionReport {
        let started_at = self.clock.now();
        let name = source.name();
        let resources = &source.config().resources;
        info!(source = name, resources = resources.len(), "Starting extraction");

        let transport = match self.transport(source) {
            Ok(transport) => transport,
            Err(e) => {
                error!(source = name, error = %e, "Failed to set up transport");
                return ExtractionReport::setup_failed(
                    name,
                    resources.iter().map(|r| r.name.as_str()),
                    &e,
                    started_at,
                );
            }
        };

        let mut report = ExtractionReport {
            source: name.to_string(),
            started_at,
            finished_at: started_at,
            resources: Vec::with_capacity(resources.len()),
        };

        let mut budget = BudgetTracker::new(source.config().budget.clone(), self.clock.clone());

        for resource in resources {
            let outcome = if self.cancel.is_cancelled() {
                ResourceReport::failed_before_start(&resource.name, &Error::Cancelled)
            } else {
                self.run_resource(source, resource, &transport, &mut budget, started_at)
                    .await
            };
            report.resources.push(outcome);
        }

        report.finished_at = self.clock.now();
        info!(
            source = name,
            completed = report.completed_count(),
            failed = report.failed_count(),
            records = report.total_records(),
            "Finished extraction"
        );
        report
    }

    fn transport(&self, source: &Source) -> Result<Transport> {
        let client = build_http_client(source.transport_config())?;
        let auth = source.authenticator(client.clone(), self.credentials.clone(), self.clock.clone());
        Ok(Transport::new(
            client,
            source.name(),
            source.endpoint(),
            source.transport_config().clone(),
            Arc::new(auth),
            self.clock.clone(),
            self.error_log.clone(),
        ))
    }

    async fn run_resource(
        &self,
        source: &Source,
        resource: &ResourceConfig,
        transport: &Transport,
        budget: &mut BudgetTracker,
        run_start: DateTime<Utc>,
    ) -> ResourceReport {
        let began = self.clock.now();
        let mut report = ResourceReport::new(&resource.name);

        let outcome = self
            .extract(source, resource, transport, budget, run_start, &mut report)
            .await;

        let mut report = match outcome {
            Ok(()) => {
                advance(&mut report, ResourcePhase::Completed);
                info!(
                    source = source.name(),
                    resource = %resource.name,
                    pages = report.pages,
                    records = report.records,
                    child_rows = report.child_rows,
                    "Resource completed"
                );
                report
            }
            Err(e) => {
                error!(
                    source = source.name(),
                    resource = %resource.name,
                    phase = %report.phase,
                    pages = report.pages,
                    error = %e,
                    "Resource failed"
                );
                failed(report, &e)
            }
        };
        report.duration_ms = u64::try_from((self.clock.now() - began).num_milliseconds()).unwrap_or(0);
        report
    }

    async fn extract(
        &self,
        source: &Source,
        resource: &ResourceConfig,
        transport: &Transport,
        budget: &mut BudgetTracker,
        run_start: DateTime<Utc>,
        report: &mut ResourceReport,
    ) -> Result<()> {
        let config = source.config();
        let name = resource.name.as_str();

        let previous = if resource.is_incremental() {
            Some(self.watermarks.get(name).await?)
        } else {
            None
        };
        report.watermark_before = previous;
        report.watermark_after = previous;

        let from = previous.unwrap_or(config.start_date);
        let windows = split_windows(from, run_start, resource.max_span());
        debug!(
            source = source.name(),
            resource = name,
            from = %from,
            to = %run_start,
            windows = windows.len(),
            "Planned extraction windows"
        );

        let inspector = ResponseInspector::new(config.usage_for(resource))?;
        let flattener = Flattener::new(name, &resource.primary_key, &config.flatten_rules_for(resource));
        let primary_key: Vec<String> = resource.primary_key.iter().map(|k| snake_case(k)).collect();
        let incremental_column = resource.incremental_field.as_deref().map(snake_case);
        let mut greatest: Option<DateTime<Utc>> = None;

        for window in &windows {
            let mut ctx = source.context().clone();
            ctx.set_window(window.to_value())
                .set_watermark(json!(format_timestamp(&from)))
                .set_resource(json!({ "name": name, "page_size": resource.page_size }));

            let spec = QuerySpec {
                resource: name.to_string(),
                query: resource.query.clone(),
                variables: resource.render_variables(&ctx)?,
                cursor_variable: resource.cursor_variable.clone(),
                page_size_variable: resource.page_size_variable.clone(),
                page_size: resource.page_size,
                connection_path: resource.connection_path.clone(),
            };
            let pages = GraphQlPageSource::new(transport, inspector.clone(), spec);
            let mut walker = PageWalker::new(name, &pages, budget, self.clock.clone(), self.cancel.clone())
                .max_pages(resource.max_pages);

            report.windows += 1;
            advance(report, ResourcePhase::Fetching);

            while let Some(page) = walker.next_page().await? {
                report.pages += 1;

                advance(report, ResourcePhase::Flattening);
                let records = flattener.flatten_page(&page, run_start)?;
                if let Some(column) = &incremental_column {
                    for record in &records {
                        let seen = record
                            .get(column)
                            .and_then(Scalar::as_str)
                            .and_then(parse_timestamp);
                        greatest = greatest.max(seen);
                    }
                }

                advance(report, ResourcePhase::Delivering);
                if !records.is_empty() {
                    let batch = LoadBatch {
                        source: source.name().to_string(),
                        resource: name.to_string(),
                        disposition: resource.write_disposition,
                        primary_key: primary_key.clone(),
                        sequence: report.batches,
                        records,
                    };
                    let parents = batch.records.len();
                    let children = batch.row_count() - parents;
                    let receipt = self.loader.load(batch).await?;

                    report.batches += 1;
                    report.records += parents;
                    report.child_rows += children;
                    debug!(
                        source = source.name(),
                        resource = name,
                        page = report.pages,
                        rows = receipt.rows,
                        tables = receipt.tables,
                        "Delivered batch"
                    );
                }

                advance(report, ResourcePhase::Fetching);
            }
            report.truncated |= walker.is_truncated();
        }

        if report.truncated {
            if previous.is_some() {
                warn!(
                    source = source.name(),
                    resource = name,
                    max_pages = resource.max_pages,
                    "Page limit left records unfetched; watermark unchanged"
                );
            }
            return Ok(());
        }

        if let Some(previous) = previous {
            let next = greatest.map_or(previous, |seen| seen.max(previous));
            if next > previous {
                self.watermarks.set(name, next).await?;
                info!(
                    source = source.name(),
                    resource = name,
                    watermark = %format_timestamp(&next),
                    "Advanced watermark"
                );
            } else if greatest.is_none() && report.records > 0 {
                warn!(
                    source = source.name(),
                    resource = name,
                    "No incremental values found; watermark unchanged"
                );
            }
            report.watermark_after = Some(next);
        }
        Ok(())
    }
}

fn advance(report: &mut ResourceReport, next: ResourcePhase) {
    if report.phase == next {
        return;
    }
    debug_assert!(
        report.phase.can_advance_to(next),
        "illegal transition {} -> {next}",
        report.phase
    );
    report.phase = next;
}

fn failed(mut report: ResourceReport, error: &Error) -> ResourceReport {
    report.failed_in = Some(report.phase);
    report.phase = ResourcePhase::Failed;
    report.error = Some(error.to_string());
    report.watermark_after = report.watermark_before;
    report
}

/// Run several sources concurrently, each with its own orchestrator
///
/// Budgets and credentials are never shared between sources. Reports come
/// back in input order.
pub async fn run_concurrently(runs: &[(Orchestrator, Source)]) -> Vec<ExtractionReport> {
    join_all(runs.iter().map(|(orchestrator, source)| orchestrator.run(source))).await
}
