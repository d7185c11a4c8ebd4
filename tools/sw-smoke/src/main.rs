//! Smoke test harness for the Preciosa offline worker.
//!
//! Registers the worker against a live origin, requests every manifest
//! resource through it and prints a JSON report. When install fails but the
//! loaded cache snapshot already holds this version's store, the worker is
//! restored over that store instead, so an offline run replays the cache.
//!
//! ## Usage
//!
//! ```bash
//! # Install against a local dev server and keep the cache between runs
//! sw-smoke --scope http://localhost:8080/ --cache-file .preciosa-cache.json
//!
//! # Replay the same run with the network gone
//! sw-smoke --offline --cache-file .preciosa-cache.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use preciosa_common::{init_logging, LogConfig, LogFormat, OptionExt, PreciosaError, ResultExt};
use preciosa_net::{Fetcher, HttpFetcher, LoaderConfig, MemoryFetcher, Request, Url};
use preciosa_sw::{
    CacheStorage, ClientType, FetchStrategy, Host, ServiceWorkerContainer, WorkerConfig,
};
use tracing::{debug, info, warn};

mod report;

use report::{RegistrationSummary, RequestResult, SmokeReport};

#[derive(Parser)]
#[command(name = "sw-smoke")]
#[command(about = "Smoke test harness for the Preciosa offline worker")]
struct Cli {
    /// Worker config (JSON). Defaults apply to missing fields.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Registration scope, overriding the config
    #[arg(short, long)]
    scope: Option<Url>,

    /// Fetch strategy, overriding the config
    #[arg(long)]
    strategy: Option<FetchStrategy>,

    /// Worker version, overriding the config
    #[arg(long)]
    version: Option<u32>,

    /// Cache storage snapshot, loaded before and written after the run
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Run with the network unreachable
    #[arg(long)]
    offline: bool,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Log filter directives, e.g. "preciosa_sw=debug,reqwest=warn"
    #[arg(long)]
    log_filter: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_directives(filter);
    }
    init_logging(log_config.with_format(cli.log_format));

    let report = run(&cli).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> preciosa_common::Result<WorkerConfig> {
    let mut config = match &cli.config {
        Some(path) => WorkerConfig::from_json_file(path)
            .map_err(|e| PreciosaError::config_with_source(path.display().to_string(), e))?,
        None => WorkerConfig::default(),
    };
    if let Some(scope) = &cli.scope {
        config = config.with_scope(scope.clone());
    }
    if let Some(strategy) = cli.strategy {
        config = config.with_strategy(strategy);
    }
    if let Some(version) = cli.version {
        config = config.with_version(version);
    }
    config
        .validate()
        .map_err(|e| PreciosaError::config_with_source("invalid worker config", e))?;
    Ok(config)
}

fn load_caches(cli: &Cli) -> preciosa_common::Result<CacheStorage> {
    match &cli.cache_file {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Loading cache snapshot");
            CacheStorage::load_from_file(path).context("loading cache snapshot")
        }
        _ => Ok(CacheStorage::new()),
    }
}

fn network(offline: bool) -> preciosa_common::Result<Arc<dyn Fetcher>> {
    if offline {
        let unreachable = MemoryFetcher::new();
        unreachable.set_online(false);
        return Ok(Arc::new(unreachable));
    }
    let fetcher = HttpFetcher::new(LoaderConfig::default())
        .map_err(|e| PreciosaError::network_with_source("building HTTP client", e))?;
    Ok(Arc::new(fetcher))
}

/// Manifest entries that look like pages are requested as navigations.
fn is_page(url: &Url) -> bool {
    let path = url.path();
    path.ends_with('/') || path.ends_with(".html")
}

async fn run(cli: &Cli) -> preciosa_common::Result<SmokeReport> {
    let config = load_config(cli)?;
    let host = Host::with_caches(network(cli.offline)?, load_caches(cli)?);
    let (container, mut events) = ServiceWorkerContainer::with_host(host);

    let mut report = SmokeReport {
        scope: config.scope.to_string(),
        cache_name: config.cache_name(),
        strategy: config.strategy.to_string(),
        ..SmokeReport::default()
    };

    let scope = config.scope.clone();
    let urls = config
        .manifest_urls()
        .map_err(|e| PreciosaError::config_with_source("manifest", e))?;

    if let Err(e) = container.register(config.clone()).await {
        let stored = container.host().caches.read().await.has(&report.cache_name);
        if stored {
            warn!(
                error = %e,
                cache = %report.cache_name,
                "Install failed, restoring from snapshot"
            );
            container
                .restore(config)
                .await
                .map_err(|e| PreciosaError::worker_with_source("restoring worker", e))?;
            report.restored = true;
        } else {
            warn!(error = %e, "Registration failed");
            report.install_error = Some(e.to_string());
        }
    }

    let (page, _inbox) = container.connect_client(scope.clone(), ClientType::Window).await;
    for url in urls {
        let navigation = is_page(&url);
        let request = if navigation {
            Request::navigate(url.clone())
        } else {
            Request::get(url.clone())
        };
        let result = match container.fetch(request, Some(page.clone())).await {
            Ok(response) => RequestResult::answered(url.to_string(), navigation, &response),
            Err(e) => RequestResult::failed(url.to_string(), navigation, e),
        };
        report.requests.push(result);
    }
    container.settle().await;

    while let Ok(event) = events.try_recv() {
        debug!(?event, "Lifecycle event");
    }

    let snapshot = container
        .snapshot(scope.as_str())
        .await
        .ok_or_not_found(format!("registration for {scope}"))?;
    report.registration = Some(RegistrationSummary::from(&snapshot));

    let caches = container.host().caches.read().await;
    report.record_caches(&caches);
    if let Some(path) = &cli.cache_file {
        caches
            .save_to_file(path)
            .map_err(|e| PreciosaError::worker_with_source("saving cache snapshot", e))?;
        info!(path = %path.display(), "Cache snapshot written");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_overrides() {
        let cli = Cli::parse_from([
            "sw-smoke",
            "--scope",
            "https://example.com/app/",
            "--strategy",
            "cache-first",
            "--version",
            "5",
            "--log-format",
            "json",
            "--offline",
        ]);
        assert!(cli.offline);
        assert_eq!(cli.log_format, LogFormat::Json);

        let config = load_config(&cli).unwrap();
        assert_eq!(config.cache_name(), "preciosa-v5");
        assert_eq!(config.strategy, FetchStrategy::CacheFirst);
        assert_eq!(config.scope.as_str(), "https://example.com/app/");
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let cli = Cli::parse_from(["sw-smoke", "--version", "0"]);
        let err = load_config(&cli).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_page_detection() {
        let page = |s: &str| is_page(&Url::parse(s).unwrap());
        assert!(page("http://localhost:8080/"));
        assert!(page("http://localhost:8080/index.html"));
        assert!(!page("http://localhost:8080/icon.png"));
    }

    fn offline_cli(cache_file: &std::path::Path) -> Cli {
        Cli::parse_from([
            "sw-smoke",
            "--offline",
            "--cache-file",
            cache_file.to_str().unwrap(),
        ])
    }

    #[tokio::test]
    async fn test_offline_run_without_snapshot_fails_install() {
        let dir = tempfile::tempdir().unwrap();
        let cache_file = dir.path().join("caches.json");

        let report = run(&offline_cli(&cache_file)).await.unwrap();
        assert!(report.install_error.is_some());
        assert!(!report.restored);
        assert!(report.failed());
        assert_eq!(report.requests.len(), 5);
        assert!(cache_file.exists());
    }

    #[tokio::test]
    async fn test_offline_run_replays_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache_file = dir.path().join("caches.json");

        let config = WorkerConfig::default();
        let mut storage = CacheStorage::new();
        let cache = storage.open(&config.cache_name());
        for url in config.manifest_urls().unwrap() {
            let response =
                preciosa_net::Response::new(preciosa_net::StatusCode::OK, url.to_string());
            cache.put(&Request::get(url), &response).unwrap();
        }
        storage.save_to_file(&cache_file).unwrap();

        let report = run(&offline_cli(&cache_file)).await.unwrap();
        assert!(report.restored);
        assert!(report.install_error.is_none());
        assert!(!report.failed());
        assert_eq!(report.requests.len(), 5);
        for request in &report.requests {
            assert_eq!(request.source.as_deref(), Some("cache"), "{}", request.url);
            assert_eq!(request.status, Some(200));
        }
        assert!(report.registration.unwrap().active.is_some());
    }
}
