//! Time-bounded page cache for rendered listing pages.

use std::{
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use lru::LruCache;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Least-recently-used page store; entries also lapse after `ttl`.
#[derive(Clone)]
pub struct PageCache {
    entries: Arc<Mutex<LruCache<String, CachedResponse>>>,
    ttl: Duration,
}

impl PageCache {
    pub fn new(ttl: Duration, max_entries: NonZeroUsize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(max_entries))),
            ttl,
        }
    }

    /// A fresh cached response for `key`; an expired entry is dropped.
    pub async fn get(&self, key: &str) -> Option<Response<Body>> {
        let mut guard = self.entries.lock().await;
        let lookup = guard
            .get(key)
            .map(|entry| (entry.stored_at.elapsed() < self.ttl).then(|| entry.clone()));
        let fresh = match lookup {
            Some(Some(entry)) => Some(entry),
            Some(None) => {
                guard.pop(key);
                gauge!("yatube_page_cache_entries").set(guard.len() as f64);
                None
            }
            None => None,
        };
        drop(guard);

        match fresh {
            Some(entry) => {
                counter!("yatube_page_cache_hit_total").increment(1);
                Some(entry.into_response())
            }
            None => {
                counter!("yatube_page_cache_miss_total").increment(1);
                None
            }
        }
    }

    pub async fn put(&self, key: String, response: CachedResponse) {
        let mut guard = self.entries.lock().await;
        if let Some((evicted, _)) = guard.push(key.clone(), response)
            && evicted != key
        {
            debug!(evicted = %evicted, "page cache evicted least recent entry");
        }
        gauge!("yatube_page_cache_entries").set(guard.len() as f64);
    }

    /// Buffer a response, remember it under `key` and hand back an equivalent response.
    pub async fn store_response(
        &self,
        key: &str,
        response: Response,
    ) -> Result<Response, (Response, CacheStoreError)> {
        let (rebuilt, cached) = buffer_response(response).await?;
        self.put(key.to_string(), cached).await;
        Ok(rebuilt)
    }

    /// Drop every cached page.
    pub async fn clear(&self) {
        let mut guard = self.entries.lock().await;
        let dropped = guard.len();
        guard.clear();
        counter!("yatube_page_cache_clear_total").increment(1);
        gauge!("yatube_page_cache_entries").set(0.0);
        debug!(dropped, "page cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[derive(Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
    stored_at: Instant,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            status,
            headers,
            body,
            stored_at: Instant::now(),
        }
    }

    fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.clear();
        for (name, value) in self.headers {
            headers.append(name, value);
        }

        response
    }
}

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("failed to buffer response body: {0}")]
    Buffer(String),
}

/// Only complete, successful, cookie-free HTML pages are cached.
pub fn should_store_response(response: &Response) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"))
}

pub async fn buffer_response(
    response: Response,
) -> Result<(Response, CachedResponse), (Response, CacheStoreError)> {
    let (parts, body) = response.into_parts();
    match BodyExt::collect(body).await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let cached = CachedResponse::new(parts.status, &parts.headers, bytes.clone());
            let rebuilt = Response::from_parts(parts, Body::from(bytes));
            Ok((rebuilt, cached))
        }
        Err(error) => {
            let rebuilt = Response::from_parts(parts, Body::empty());
            Err((rebuilt, CacheStoreError::Buffer(error.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html(body: &'static str) -> Response {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .body(Body::from(body))
            .expect("response")
    }

    async fn body_of(response: Response) -> Bytes {
        response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes()
    }

    fn cache(ttl: Duration, max_entries: usize) -> PageCache {
        PageCache::new(ttl, NonZeroUsize::new(max_entries).expect("non-zero size"))
    }

    #[tokio::test]
    async fn serves_stored_pages_until_cleared() {
        let cache = cache(Duration::from_secs(20), 8);
        assert!(cache.get("/").await.is_none());

        let rebuilt = cache
            .store_response("/", html("first"))
            .await
            .unwrap_or_else(|_| panic!("store failed"));
        assert_eq!(body_of(rebuilt).await, Bytes::from_static(b"first"));

        let cached = cache.get("/").await.expect("cached page");
        assert_eq!(cached.status(), StatusCode::OK);
        assert_eq!(body_of(cached).await, Bytes::from_static(b"first"));
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.get("/").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = cache(Duration::from_millis(30), 8);
        let _ = cache.store_response("/", html("page")).await;
        assert!(cache.get("/").await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get("/").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn entry_count_is_bounded_by_capacity() {
        let cache = cache(Duration::from_secs(20), 16);
        for n in 0..500 {
            let _ = cache.store_response(&format!("|/?page={n}"), html("page")).await;
        }
        assert_eq!(cache.len().await, 16);
        assert!(cache.get("|/?page=0").await.is_none());
        assert!(cache.get("|/?page=499").await.is_some());
    }

    #[tokio::test]
    async fn recently_read_pages_survive_eviction() {
        let cache = cache(Duration::from_secs(20), 2);
        let _ = cache.store_response("a", html("a")).await;
        let _ = cache.store_response("b", html("b")).await;
        assert!(cache.get("a").await.is_some());

        let _ = cache.store_response("c", html("c")).await;
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
    }

    #[test]
    fn only_plain_html_successes_are_stored() {
        assert!(should_store_response(&html("ok")));

        let mut redirect = html("");
        *redirect.status_mut() = StatusCode::FOUND;
        assert!(!should_store_response(&redirect));

        let mut with_cookie = html("ok");
        with_cookie
            .headers_mut()
            .insert(header::SET_COOKIE, HeaderValue::from_static("a=b"));
        assert!(!should_store_response(&with_cookie));
    }
}
