//! JSON report produced by a smoke run.

use preciosa_net::{Response, ResponseSource};
use preciosa_sw::{CacheStorage, RegistrationSnapshot};
use serde::{Deserialize, Serialize};

/// Outcome of one smoke run.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SmokeReport {
    pub scope: String,
    pub cache_name: String,
    pub strategy: String,
    /// Install error, if registration failed.
    pub install_error: Option<String>,
    /// Install failed and the worker was restored from the cache snapshot.
    pub restored: bool,
    pub registration: Option<RegistrationSummary>,
    pub caches: Vec<CacheSummary>,
    pub requests: Vec<RequestResult>,
}

/// Worker slots after the run.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationSummary {
    pub installing: Option<String>,
    pub waiting: Option<String>,
    pub active: Option<String>,
}

impl From<&RegistrationSnapshot> for RegistrationSummary {
    fn from(snapshot: &RegistrationSnapshot) -> Self {
        let describe = |slot: &Option<preciosa_sw::WorkerSnapshot>| {
            slot.as_ref()
                .map(|w| format!("{} ({}, {:?})", w.id, w.cache_name, w.state))
        };
        Self {
            installing: describe(&snapshot.installing),
            waiting: describe(&snapshot.waiting),
            active: describe(&snapshot.active),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheSummary {
    pub name: String,
    pub entries: Vec<EntrySummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntrySummary {
    pub url: String,
    pub status: u16,
    pub bytes: usize,
}

/// One page request made through the worker.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestResult {
    pub url: String,
    pub navigation: bool,
    pub status: Option<u16>,
    pub source: Option<String>,
    /// Media type of the answer, without parameters.
    pub content_type: Option<String>,
    pub error: Option<String>,
}

impl RequestResult {
    pub fn answered(url: String, navigation: bool, response: &Response) -> Self {
        let source = match response.source {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Synthesized => "synthesized",
        };
        Self {
            url,
            navigation,
            status: Some(response.status.as_u16()),
            source: Some(source.to_string()),
            content_type: response
                .content_type()
                .map(|mime| mime.essence_str().to_string()),
            error: None,
        }
    }

    pub fn failed(url: String, navigation: bool, error: impl ToString) -> Self {
        Self {
            url,
            navigation,
            status: None,
            source: None,
            content_type: None,
            error: Some(error.to_string()),
        }
    }
}

impl SmokeReport {
    /// Record every cache and its entries.
    pub fn record_caches(&mut self, storage: &CacheStorage) {
        self.caches = storage
            .keys()
            .into_iter()
            .filter_map(|name| {
                let cache = storage.get(&name)?;
                let entries = cache
                    .entries()
                    .into_iter()
                    .map(|e| EntrySummary {
                        url: e.url.clone(),
                        status: e.status,
                        bytes: e.body.len(),
                    })
                    .collect();
                Some(CacheSummary { name, entries })
            })
            .collect();
    }

    /// Whether the run should be reported as a failure.
    pub fn failed(&self) -> bool {
        self.install_error.is_some() || self.requests.iter().any(|r| r.error.is_some())
    }
}
