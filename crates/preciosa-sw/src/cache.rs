//! Cache API: named stores of request → response pairs.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use preciosa_net::{Fetcher, Request, Response, ResponseSource, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{Result, ServiceWorkerError};

/// Request URL as the cache sees it: the fragment never takes part in matching.
fn cache_url(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// Key under which a request is stored.
fn cache_key(method: &Method, url: &Url) -> String {
    format!("{} {}", method, cache_url(url))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ==================== Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response reason phrase.
    pub status_text: String,

    /// Response headers in arrival order. Repeated names keep every value
    /// and values are raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for storage.
    pub fn capture(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.as_bytes().to_vec()))
            .collect();

        Self {
            url: cache_url(&request.url).to_string(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.append(n, v);
                }
                _ => warn!(header = %name, "Dropping unreadable cached header"),
            }
        }

        let mut response = Response::new(status, self.body.clone())
            .with_status_text(self.status_text.clone())
            .with_source(ResponseSource::Cache);
        if let Ok(url) = Url::parse(&self.url) {
            response = response.with_url(url);
        }
        response.headers = headers;
        response
    }
}

// ==================== Cache ====================

/// A cache instance.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<Response> {
        self.entries
            .get(&cache_key(&request.method, &request.url))
            .map(CacheEntry::to_response)
    }

    /// Store a response, replacing any previous one for the same request.
    pub fn put(&mut self, request: &Request, response: &Response) -> Result<()> {
        if request.method != Method::GET {
            return Err(ServiceWorkerError::CacheError(format!(
                "Request method '{}' is unsupported",
                request.method
            )));
        }
        if response.status == StatusCode::PARTIAL_CONTENT {
            return Err(ServiceWorkerError::CacheError(
                "Partial response (status code 206) is unsupported".to_string(),
            ));
        }

        let key = cache_key(&request.method, &request.url);
        self.entries.insert(key, CacheEntry::capture(request, response));
        Ok(())
    }

    /// Delete entry.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries
            .remove(&cache_key(&request.method, &request.url))
            .is_some()
    }

    /// All request URLs, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.values().map(|e| e.url.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// Stored entries, sorted by URL.
    pub fn entries(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Cache storage (caches global).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get an existing cache.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Look a request up in one named cache.
    pub fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
        self.caches.get(name)?.match_request(request)
    }

    /// Write a JSON snapshot of every cache.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)
            .map_err(|e| ServiceWorkerError::CacheError(format!("serialize: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            ServiceWorkerError::CacheError(format!("write {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), caches = self.caches.len(), "Cache storage saved");
        Ok(())
    }

    /// Restore a snapshot written by [`CacheStorage::save_to_file`].
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            ServiceWorkerError::CacheError(format!("read {}: {e}", path.display()))
        })?;
        let storage: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ServiceWorkerError::CacheError(format!("parse: {e}")))?;
        debug!(path = %path.display(), caches = storage.caches.len(), "Cache storage loaded");
        Ok(storage)
    }
}

/// Fetch every URL and store them all in `cache_name`, or store nothing.
///
/// All responses are fetched before the cache is touched; any network failure
/// or non-2xx status aborts the whole operation.
pub async fn add_all(
    storage: &RwLock<CacheStorage>,
    cache_name: &str,
    fetcher: &dyn Fetcher,
    urls: &[Url],
) -> Result<usize> {
    let fetched = try_join_all(urls.iter().map(|url| async move {
        let request = Request::get(url.clone());
        let response = fetcher.fetch(&request).await.map_err(|e| {
            ServiceWorkerError::NetworkError(format!("{url}: {e}"))
        })?;
        if !response.ok() {
            return Err(ServiceWorkerError::NetworkError(format!(
                "{url}: bad status {}",
                response.status
            )));
        }
        Ok((request, response))
    }))
    .await?;

    let mut storage = storage.write().await;
    let cache = storage.open(cache_name);
    for (request, response) in &fetched {
        cache.put(request, response)?;
    }

    info!(cache = cache_name, count = fetched.len(), "Resources cached");
    Ok(fetched.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use preciosa_net::MemoryFetcher;

    fn req(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("preciosa-v1");
        let response = Response::new(StatusCode::OK, "body{}");

        cache.put(&req("https://example.com/style.css"), &response).unwrap();

        let hit = cache.match_request(&req("https://example.com/style.css")).unwrap();
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(hit.source, ResponseSource::Cache);
        assert_eq!(&hit.body[..], b"body{}");
        assert!(cache.match_request(&req("https://example.com/other.css")).is_none());
    }

    #[test]
    fn test_cache_put_overwrites() {
        let mut cache = Cache::new("v1");
        let url = "https://example.com/a.js";
        cache.put(&req(url), &Response::new(StatusCode::OK, "one")).unwrap();
        cache.put(&req(url), &Response::new(StatusCode::OK, "two")).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_request(&req(url)).unwrap().text().unwrap(), "two");
    }

    #[test]
    fn test_cache_rejects_post() {
        let mut cache = Cache::new("v1");
        let post = Request::post(Url::parse("https://example.com/api").unwrap(), "{}".into());
        let result = cache.put(&post, &Response::new(StatusCode::OK, "ok"));
        assert!(matches!(result, Err(ServiceWorkerError::CacheError(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        let url = "https://example.com/style.css";
        cache.put(&req(url), &Response::new(StatusCode::OK, "")).unwrap();
        assert!(cache.delete(&req(url)));
        assert!(cache.match_request(&req(url)).is_none());
    }

    #[test]
    fn test_headers_survive_storage() {
        let mut cache = Cache::new("v1");
        let url = "https://example.com/";
        let response = Response::new(StatusCode::OK, "<p/>").with_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/html"),
        );
        cache.put(&req(url), &response).unwrap();

        let hit = cache.match_request(&req(url)).unwrap();
        assert_eq!(hit.header("content-type"), Some("text/html"));
    }

    #[test]
    fn test_repeated_and_opaque_headers_survive_storage() {
        let mut cache = Cache::new("v1");
        let url = "https://example.com/";
        let mut response = Response::new(StatusCode::OK, "<p/>");
        response.headers.append(
            http::header::LINK,
            HeaderValue::from_static("</a.css>; rel=preload"),
        );
        response.headers.append(
            http::header::LINK,
            HeaderValue::from_static("</b.js>; rel=preload"),
        );
        response.headers.insert(
            http::header::ETAG,
            HeaderValue::from_bytes(b"\"caf\xe9\"").unwrap(),
        );
        cache.put(&req(url), &response).unwrap();

        let hit = cache.match_request(&req(url)).unwrap();
        let links: Vec<&[u8]> = hit
            .headers
            .get_all(http::header::LINK)
            .iter()
            .map(HeaderValue::as_bytes)
            .collect();
        assert_eq!(
            links,
            vec![&b"</a.css>; rel=preload"[..], &b"</b.js>; rel=preload"[..]]
        );
        assert_eq!(
            hit.headers.get(http::header::ETAG).unwrap().as_bytes(),
            b"\"caf\xe9\""
        );
    }

    #[test]
    fn test_fragment_is_ignored_when_matching() {
        let mut cache = Cache::new("v1");
        cache
            .put(&req("https://example.com/index.html"), &Response::new(StatusCode::OK, "home"))
            .unwrap();

        let hit = cache.match_request(&req("https://example.com/index.html#top"));
        assert_eq!(hit.unwrap().text().unwrap(), "home");

        cache
            .put(&req("https://example.com/app.js#v2"), &Response::new(StatusCode::OK, "app"))
            .unwrap();
        assert!(cache.match_request(&req("https://example.com/app.js")).is_some());
        assert!(cache.keys().contains(&"https://example.com/app.js"));
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("v1"));

        storage.open("v1");
        storage.open("v2");
        assert_eq!(storage.keys(), vec!["v1".to_string(), "v2".to_string()]);

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
        assert!(!storage.delete("v1"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");

        let mut storage = CacheStorage::new();
        storage
            .open("preciosa-v2")
            .put(&req("https://example.com/icon.png"), &Response::new(StatusCode::OK, vec![1u8, 2, 3]))
            .unwrap();
        storage.save_to_file(&path).unwrap();

        let restored = CacheStorage::load_from_file(&path).unwrap();
        let hit = restored
            .match_in("preciosa-v2", &req("https://example.com/icon.png"))
            .unwrap();
        assert_eq!(&hit.body[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_add_all_stores_everything() {
        let net = MemoryFetcher::new();
        net.serve("https://example.com/", "text/html", "home");
        net.serve("https://example.com/icon.png", "image/png", vec![0u8; 4]);

        let storage = RwLock::new(CacheStorage::new());
        let urls = vec![
            Url::parse("https://example.com/").unwrap(),
            Url::parse("https://example.com/icon.png").unwrap(),
        ];

        let count = add_all(&storage, "v1", &net, &urls).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(storage.read().await.get("v1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_all_is_all_or_nothing() {
        let net = MemoryFetcher::new();
        net.serve("https://example.com/", "text/html", "home");
        // icon.png is not routed, so it answers 404

        let storage = RwLock::new(CacheStorage::new());
        let urls = vec![
            Url::parse("https://example.com/").unwrap(),
            Url::parse("https://example.com/icon.png").unwrap(),
        ];

        let result = add_all(&storage, "v1", &net, &urls).await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
        assert!(storage.read().await.get("v1").map_or(true, Cache::is_empty));
    }
}
