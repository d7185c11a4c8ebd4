//! Fetch strategies.

use std::sync::Arc;

use http::StatusCode;
use preciosa_net::{Request, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::offline;
use crate::worker::OfflineWorker;
use crate::Result;

/// How a worker answers fetch events. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Network, then cache, then a synthesized fallback. Successful network
    /// responses are written to the cache in the background.
    #[default]
    NetworkFirst,
    /// Cache, then network. Nothing is written to the cache.
    CacheFirst,
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::NetworkFirst => write!(f, "network-first"),
            FetchStrategy::CacheFirst => write!(f, "cache-first"),
        }
    }
}

impl std::str::FromStr for FetchStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "network-first" => Ok(Self::NetworkFirst),
            "cache-first" => Ok(Self::CacheFirst),
            other => Err(format!("unknown fetch strategy: {other}")),
        }
    }
}

impl FetchStrategy {
    /// Answer `request` on behalf of `worker`.
    pub async fn respond(self, worker: &OfflineWorker, request: &Request) -> Result<Response> {
        match self {
            FetchStrategy::NetworkFirst => Ok(network_first(worker, request).await),
            FetchStrategy::CacheFirst => cache_first(worker, request).await,
        }
    }
}

async fn network_first(worker: &OfflineWorker, request: &Request) -> Response {
    let host = worker.host();

    match host.fetcher.fetch(request).await {
        Ok(response) => {
            if response.status == StatusCode::OK {
                let caches = Arc::clone(&host.caches);
                let cache_name = worker.cache_name().to_string();
                let request = request.clone();
                let copy = response.clone();
                host.background.spawn("cache-put", async move {
                    let mut storage = caches.write().await;
                    storage.open(&cache_name).put(&request, &copy)
                });
            }
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network failed, trying cache");

            if let Some(cached) = worker.cached(request).await {
                info!(url = %request.url, "Serving from cache");
                return cached;
            }

            if request.is_navigation() {
                info!(url = %request.url, "Serving offline page");
                worker.config().offline_page.response()
            } else {
                debug!(url = %request.url, "Resource unavailable offline");
                offline::service_unavailable()
            }
        }
    }
}

async fn cache_first(worker: &OfflineWorker, request: &Request) -> Result<Response> {
    if let Some(cached) = worker.cached(request).await {
        debug!(url = %request.url, "Cache hit");
        return Ok(cached);
    }

    debug!(url = %request.url, "Cache miss, going to network");
    Ok(worker.host().fetcher.fetch(request).await?)
}
