//! CLI runner - executes commands

use crate::cancel::CancellationToken;
use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::clock::{Clock, SystemClock};
use crate::config::{load_secrets, load_source, SourceConfig};
use crate::connectors::list_builtin_info;
use crate::engine::{run_concurrently, ExtractionReport, Orchestrator, Source};
use crate::error::{Error, Result, ResultExt};
use crate::http::{build_http_client, ErrorLog, FileErrorLog};
use crate::loader::{JsonlLoader, Loader};
use crate::state::{FileCredentialStore, FileWatermarkStore};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    ///
    /// Returns `false` when the command finished but some resource failed.
    pub async fn run(&self) -> Result<bool> {
        match &self.cli.command {
            Commands::Run {
                sources,
                resources,
                output,
                error_log,
            } => {
                self.extract(sources, resources, output.clone(), error_log.clone())
                    .await
            }
            Commands::Validate { sources } => self.validate(sources).map(|()| true),
            Commands::List => self.list_sources().map(|()| true),
            Commands::RefreshToken { source } => self.refresh_token(source).await.map(|()| true),
        }
    }

    /// Load the secrets file, or an empty object when none was given
    fn load_secrets(&self) -> Result<Value> {
        match &self.cli.config {
            Some(path) => load_secrets(path),
            None => Ok(json!({})),
        }
    }

    fn source_state_dir(&self, source: &str) -> PathBuf {
        self.cli.state_dir.join(source)
    }

    async fn extract(
        &self,
        names: &[String],
        resources: &[String],
        output: PathBuf,
        error_log: Option<PathBuf>,
    ) -> Result<bool> {
        let configs = names
            .iter()
            .map(|name| load_source(name))
            .collect::<Result<Vec<_>>>()?;
        let configs = select_resources(configs, resources)?;
        let secrets = self.load_secrets()?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping after the current page");
                on_interrupt.cancel();
            }
        });

        let shared = SharedSinks {
            loader: Arc::new(JsonlLoader::new(&output)),
            error_log: Arc::new(FileErrorLog::new(
                error_log.unwrap_or_else(|| self.cli.state_dir.join("errors.jsonl")),
            )),
            clock: Arc::new(SystemClock),
            cancel,
        };
        let (runs, mut reports) = prepare_runs(configs, &secrets, &self.cli.state_dir, &shared);

        info!(
            sources = runs.len(),
            setup_failures = reports.len(),
            output = %output.display(),
            "Starting run"
        );
        reports.extend(run_concurrently(&runs).await);
        for report in &reports {
            self.output_report(report)?;
        }

        let failed: usize = reports.iter().map(ExtractionReport::failed_count).sum();
        if failed > 0 {
            warn!(failed, "Run finished with failed resources");
        }
        Ok(failed == 0)
    }

    /// Validate source definitions
    fn validate(&self, names: &[String]) -> Result<()> {
        let secrets = match &self.cli.config {
            Some(path) => Some(load_secrets(path)?),
            None => None,
        };

        for name in names {
            let config = load_source(name)?;
            if let Some(secrets) = &secrets {
                Source::resolve(config.clone(), secrets)?;
            }
            self.output(&json!({
                "source": config.name,
                "valid": true,
                "auth": config.auth.kind(),
                "resources": config.resources.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
                "secrets_checked": secrets.is_some(),
            }))?;
        }
        Ok(())
    }

    /// List built-in sources
    fn list_sources(&self) -> Result<()> {
        let sources: Vec<Value> = list_builtin_info()
            .into_iter()
            .map(|info| {
                json!({
                    "name": info.name,
                    "description": info.description,
                    "budget": info.budget,
                    "secrets": info.secrets.iter().map(|s| json!({
                        "name": s.name,
                        "required": s.required,
                        "description": s.description,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();

        self.output(&json!({ "sources": sources }))
    }

    /// Refresh a source's access token and store it
    async fn refresh_token(&self, name: &str) -> Result<()> {
        let config = load_source(name)?;
        let credentials =
            FileCredentialStore::open(self.source_state_dir(&config.name).join("credentials.json"))?;
        let source = Source::resolve(config, &self.load_secrets()?)?;

        let client = build_http_client(source.transport_config())?;
        let auth = source.authenticator(client, Arc::new(credentials), Arc::new(SystemClock));
        let credential = auth.refresh().await?.ok_or_else(|| {
            Error::config(format!(
                "Source '{}' uses {} auth, which has no refresh flow",
                source.name(),
                source.config().auth.kind()
            ))
        })?;

        info!(source = source.name(), "Stored refreshed access token");
        self.output(&json!({
            "source": source.name(),
            "refreshed": true,
            "expires_at": credential.expires_at,
        }))
    }

    fn output_report(&self, report: &ExtractionReport) -> Result<()> {
        self.output(&serde_json::to_value(report)?)
    }

    fn output(&self, value: &Value) -> Result<()> {
        let text = match self.cli.format {
            OutputFormat::Json => serde_json::to_string(value)?,
            OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
        };
        println!("{text}");
        Ok(())
    }
}

/// Sinks every source of one run shares
#[derive(Debug, Clone)]
pub struct SharedSinks {
    pub loader: Arc<dyn Loader>,
    pub error_log: Arc<dyn ErrorLog>,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancellationToken,
}

/// Build one orchestrator per source
///
/// A source whose secrets or state files cannot be loaded does not stop the
/// others: it comes back as a report with every resource failed.
pub fn prepare_runs(
    configs: Vec<SourceConfig>,
    secrets: &Value,
    state_dir: &Path,
    shared: &SharedSinks,
) -> (Vec<(Orchestrator, Source)>, Vec<ExtractionReport>) {
    let mut runs = Vec::with_capacity(configs.len());
    let mut failures = Vec::new();

    for config in configs {
        let name = config.name.clone();
        let resources: Vec<String> = config.resources.iter().map(|r| r.name.clone()).collect();
        match prepare_source(config, secrets, &state_dir.join(&name), shared) {
            Ok(run) => runs.push(run),
            Err(e) => {
                error!(source = %name, error = %e, "Source setup failed; skipping it");
                failures.push(ExtractionReport::setup_failed(
                    name,
                    resources.iter().map(String::as_str),
                    &e,
                    shared.clock.now(),
                ));
            }
        }
    }
    (runs, failures)
}

fn prepare_source(
    config: SourceConfig,
    secrets: &Value,
    state_dir: &Path,
    shared: &SharedSinks,
) -> Result<(Orchestrator, Source)> {
    let watermarks = FileWatermarkStore::open(state_dir.join("watermarks.json"), config.start_date)
        .with_context(|| format!("Source '{}'", config.name))?;
    let credentials = FileCredentialStore::open(state_dir.join("credentials.json"))
        .with_context(|| format!("Source '{}'", config.name))?;
    let source = Source::resolve(config, secrets)?;

    let orchestrator = Orchestrator::new(shared.loader.clone(), Arc::new(watermarks))
        .with_credentials(Arc::new(credentials))
        .with_error_log(shared.error_log.clone())
        .with_clock(shared.clock.clone())
        .with_cancellation(shared.cancel.clone());
    Ok((orchestrator, source))
}

/// Apply `--resources` to the loaded sources
///
/// Entries are `resource` (every source defining it) or `source.resource`.
/// Sources left with nothing to extract are dropped; an entry no source
/// defines is an error.
pub fn select_resources(configs: Vec<SourceConfig>, wanted: &[String]) -> Result<Vec<SourceConfig>> {
    if wanted.is_empty() {
        return Ok(configs);
    }

    let picks = |config: &SourceConfig, entry: &str| -> Option<String> {
        match entry.split_once('.') {
            Some((source, resource)) if source == config.name => {
                config.resource(resource).map(|r| r.name.clone())
            }
            Some(_) => None,
            None => config.resource(entry).map(|r| r.name.clone()),
        }
    };

    for entry in wanted {
        if !configs.iter().any(|config| picks(config, entry).is_some()) {
            return Err(Error::config(format!("No source defines resource '{entry}'")));
        }
    }

    let mut selected = Vec::with_capacity(configs.len());
    for mut config in configs {
        let names: Vec<String> = wanted
            .iter()
            .filter_map(|entry| picks(&config, entry))
            .collect();
        if names.is_empty() {
            continue;
        }
        config.retain_resources(&names)?;
        selected.push(config);
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connectors::get_builtin;
    use crate::engine::ResourcePhase;
    use crate::http::MemoryErrorLog;
    use crate::loader::MemoryLoader;
    use chrono::{TimeZone, Utc};

    fn builtin(name: &str) -> SourceConfig {
        SourceConfig::from_yaml(get_builtin(name).unwrap()).unwrap()
    }

    fn names(configs: &[SourceConfig]) -> Vec<(String, Vec<String>)> {
        configs
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    c.resources.iter().map(|r| r.name.clone()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_select_resources_keeps_all_without_filter() {
        let selected = select_resources(vec![builtin("shopify")], &[]).unwrap();
        assert_eq!(selected[0].resources.len(), 4);
    }

    #[test]
    fn test_select_resources_bare_and_qualified_names() {
        let selected = select_resources(
            vec![builtin("shopify"), builtin("shiphero")],
            &["customers".to_string(), "shiphero.shipments".to_string()],
        )
        .unwrap();

        assert_eq!(
            names(&selected),
            vec![
                ("shopify".to_string(), vec!["customers".to_string()]),
                ("shiphero".to_string(), vec!["shipments".to_string()]),
            ]
        );
    }

    #[test]
    fn test_select_resources_bare_name_matches_every_source() {
        let selected = select_resources(
            vec![builtin("shopify"), builtin("shiphero")],
            &["products".to_string()],
        )
        .unwrap();

        assert_eq!(
            names(&selected),
            vec![
                ("shopify".to_string(), vec!["products".to_string()]),
                ("shiphero".to_string(), vec!["products".to_string()]),
            ]
        );
    }

    #[test]
    fn test_select_resources_drops_sources_without_matches() {
        let selected = select_resources(
            vec![builtin("shopify"), builtin("shiphero")],
            &["customers".to_string()],
        )
        .unwrap();
        assert_eq!(names(&selected), vec![("shopify".to_string(), vec!["customers".to_string()])]);
    }

    #[test]
    fn test_select_resources_unknown_name() {
        let err = select_resources(vec![builtin("shopify")], &["invoices".to_string()]).unwrap_err();
        assert!(err.to_string().contains("invoices"));
    }

    fn sinks() -> SharedSinks {
        SharedSinks {
            loader: Arc::new(MemoryLoader::new()),
            error_log: Arc::new(MemoryErrorLog::new()),
            clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_prepare_runs_isolates_source_missing_secrets() {
        let state = tempfile::tempdir().unwrap();
        let secrets = json!({
            "shopify": { "shop_domain": "acme.myshopify.com", "access_token": "shpat_test" }
        });

        let (runs, failures) = prepare_runs(
            vec![builtin("shopify"), builtin("shiphero")],
            &secrets,
            state.path(),
            &sinks(),
        );

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].1.name(), "shopify");

        assert_eq!(failures.len(), 1);
        let shiphero = &failures[0];
        assert_eq!(shiphero.source, "shiphero");
        assert_eq!(shiphero.resources.len(), builtin("shiphero").resources.len());
        assert_eq!(shiphero.failed_count(), shiphero.resources.len());
        for resource in &shiphero.resources {
            assert_eq!(resource.phase, ResourcePhase::Failed);
            assert_eq!(resource.failed_in, Some(ResourcePhase::Idle));
            assert!(resource.error.as_deref().unwrap().contains("refresh_token"));
        }
    }

    #[test]
    fn test_prepare_runs_isolates_corrupt_state_file() {
        let state = tempfile::tempdir().unwrap();
        let shopify_state = state.path().join("shopify");
        std::fs::create_dir_all(&shopify_state).unwrap();
        std::fs::write(shopify_state.join("watermarks.json"), "{ not json").unwrap();
        let secrets = json!({
            "shopify": { "shop_domain": "acme.myshopify.com", "access_token": "shpat_test" },
            "shiphero": { "refresh_token": "long-lived" }
        });

        let (runs, failures) = prepare_runs(
            vec![builtin("shopify"), builtin("shiphero")],
            &secrets,
            state.path(),
            &sinks(),
        );

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].1.name(), "shiphero");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source, "shopify");
        assert!(!failures[0].is_success());
        assert!(failures[0].resources[0].error.as_deref().unwrap().contains("shopify"));
    }
}
