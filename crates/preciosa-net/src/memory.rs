//! In-memory network for offline simulation.
//!
//! Routes are exact URL matches. Unknown URLs answer 404 like a static file
//! server would; switching the fetcher offline makes every request fail
//! before a response exists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderValue, Method, StatusCode};
use tracing::trace;

use crate::{Fetcher, NetError, Request, Response, ResponseSource, Url};

/// A fetcher backed by a fixed route table.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    log: Mutex<Vec<(Method, Url)>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `url`.
    pub fn route(&self, url: &str, response: Response) {
        self.lock_routes().insert(url.to_string(), response);
    }

    /// Serve a 200 with the given content type and body.
    pub fn serve(&self, url: &str, content_type: &'static str, body: impl Into<Bytes>) {
        let response = Response::new(StatusCode::OK, body)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.route(url, response);
    }

    /// Serve an error status for `url`.
    pub fn fail_with(&self, url: &str, status: StatusCode) {
        self.route(url, Response::new(status, Bytes::new()));
    }

    /// Drop the route for `url`.
    pub fn remove(&self, url: &str) {
        self.lock_routes().remove(url);
    }

    /// Toggle connectivity.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Number of requests attempted, including ones that failed offline.
    pub fn call_count(&self) -> usize {
        self.lock_log().len()
    }

    /// Number of requests attempted for `url`.
    pub fn calls_for(&self, url: &str) -> usize {
        self.lock_log()
            .iter()
            .filter(|(_, u)| u.as_str() == url)
            .count()
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Response>> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Vec<(Method, Url)>> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.lock_log()
            .push((request.method.clone(), request.url.clone()));

        if !self.is_online() {
            trace!(url = %request.url, "Memory network offline");
            return Err(NetError::Unreachable(request.url.to_string()));
        }

        let response = self
            .lock_routes()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND, Bytes::new()));

        Ok(response
            .with_url(request.url.clone())
            .with_source(ResponseSource::Network))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_routes_and_404s() {
        let net = MemoryFetcher::new();
        net.serve("https://example.com/a.js", "text/javascript", "a()");

        let hit = net.fetch(&Request::parse("https://example.com/a.js").unwrap()).await.unwrap();
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(hit.text().unwrap(), "a()");

        let miss = net.fetch(&Request::parse("https://example.com/b.js").unwrap()).await.unwrap();
        assert_eq!(miss.status, StatusCode::NOT_FOUND);
        assert_eq!(net.call_count(), 2);
    }

    #[tokio::test]
    async fn test_offline_fails_and_counts() {
        let net = MemoryFetcher::new();
        net.serve("https://example.com/", "text/html", "<p>home</p>");
        net.set_online(false);

        let result = net.fetch(&Request::parse("https://example.com/").unwrap()).await;
        assert!(matches!(result, Err(NetError::Unreachable(_))));
        assert_eq!(net.calls_for("https://example.com/"), 1);
    }
}
