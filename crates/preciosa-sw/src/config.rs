//! Worker configuration.
//!
//! Everything that used to be a constant baked into the worker script lives
//! here, so that shipping a new version is a config change: bump `version`
//! whenever the manifest or the fetch strategy changes, or stale assets stay
//! cached forever.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::notification::NotificationConfig;
use crate::offline::OfflinePage;
use crate::strategy::FetchStrategy;
use crate::{Result, ServiceWorkerError};

/// Configuration of one deployed worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Application name, first half of the cache name.
    pub app_name: String,

    /// Deployed version, second half of the cache name.
    pub version: u32,

    /// Registration scope. Must end with `/`.
    pub scope: Url,

    /// Scope-relative resources pinned at install time.
    pub manifest: Vec<String>,

    /// Fetch strategy for this deployment.
    pub strategy: FetchStrategy,

    /// Skip the waiting phase as soon as install succeeds.
    pub skip_waiting_on_install: bool,

    /// Notification shown on push.
    pub notification: NotificationConfig,

    /// Page served to navigations when offline and uncached.
    pub offline_page: OfflinePage,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            app_name: "preciosa".to_string(),
            version: 2,
            scope: Url::parse("http://localhost:8080/").expect("static scope URL is valid"),
            manifest: [
                "./",
                "./index.html",
                "./manifest.json",
                "./icon.png",
                "./audio1.m4a",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            strategy: FetchStrategy::default(),
            skip_waiting_on_install: true,
            notification: NotificationConfig::default(),
            offline_page: OfflinePage::default(),
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::InvalidConfig(e.to_string()))
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_scope(mut self, scope: Url) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_manifest<I, S>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skip_waiting_on_install(mut self, skip: bool) -> Self {
        self.skip_waiting_on_install = skip;
        self
    }

    /// Name of the cache owned by this version, e.g. `preciosa-v2`.
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.app_name, self.version)
    }

    /// Resolve a scope-relative path; it must stay under the scope.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        let url = self
            .scope
            .join(path)
            .map_err(|e| ServiceWorkerError::InvalidConfig(format!("{path}: {e}")))?;
        if !url.as_str().starts_with(self.scope.as_str()) {
            return Err(ServiceWorkerError::InvalidConfig(format!(
                "{path} resolves to {url}, outside scope {}",
                self.scope
            )));
        }
        Ok(url)
    }

    /// Absolute URLs of every manifest entry, in order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.manifest.iter().map(|p| self.resolve(p)).collect()
    }

    /// Check the config before a worker is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(ServiceWorkerError::InvalidConfig(
                "app_name must not be empty".to_string(),
            ));
        }
        if self.version == 0 {
            return Err(ServiceWorkerError::InvalidConfig(
                "version must be at least 1".to_string(),
            ));
        }
        if !self.scope.path().ends_with('/') {
            return Err(ServiceWorkerError::InvalidConfig(format!(
                "scope {} must end with '/'",
                self.scope
            )));
        }
        self.manifest_urls()?;
        self.notification.descriptor(&self.scope)?;
        Ok(())
    }
}
