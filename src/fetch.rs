//! Fetcher (C2): retrieve a URL and hand back status/body/headers/timing
//! without throwing on a non-2xx response — that is returned as data so
//! the executor can classify it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::Method;
use reqwest_middleware::ClientWithMiddleware;

use crate::error::{EngineError, Result};
use crate::store::BoxFuture;

/// Outcome of one fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub elapsed: Duration,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The Fetcher port. A lightweight HTTP implementation is provided here;
/// callers needing JS rendering plug in another implementation behind the
/// same trait — selection is per-board, not hardcoded here.
pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<FetchResult>>;
}

/// Plain HTTP implementation built on the crate's shared retrying client.
pub struct HttpFetcher {
    client: ClientWithMiddleware,
}

impl HttpFetcher {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<FetchResult>> {
        let url = url.to_string();
        let headers = headers.clone();
        Box::pin(async move {
            let mut request = self.client.request(Method::GET, &url).timeout(timeout);
            for (key, value) in &headers {
                request = request.header(key, value);
            }

            let start = Instant::now();
            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    EngineError::transient(format!("timeout fetching {url}"))
                } else {
                    EngineError::Transient(e.to_string())
                }
            })?;
            let elapsed = start.elapsed();

            let status = response.status().as_u16();
            let response_headers = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let body = response
                .bytes()
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?
                .to_vec();

            Ok(FetchResult {
                status,
                body,
                headers: response_headers,
                elapsed,
            })
        })
    }
}

/// Deterministic in-memory implementation for tests: returns a fixed
/// sequence of responses keyed by call order, regardless of URL.
#[cfg(test)]
pub struct StubFetcher {
    responses: std::sync::Mutex<std::collections::VecDeque<FetchResult>>,
}

#[cfg(test)]
impl StubFetcher {
    pub fn new(responses: Vec<FetchResult>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }
}

#[cfg(test)]
impl Fetcher for StubFetcher {
    fn fetch(
        &self,
        _url: &str,
        _headers: &HashMap<String, String>,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<FetchResult>> {
        Box::pin(async move {
            let mut queue = self.responses.lock().unwrap();
            queue
                .pop_front()
                .ok_or_else(|| EngineError::internal("stub fetcher exhausted"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_fetcher_serves_queued_responses_in_order() {
        let fetcher = StubFetcher::new(vec![
            FetchResult {
                status: 200,
                body: b"first".to_vec(),
                headers: HashMap::new(),
                elapsed: Duration::from_millis(1),
            },
            FetchResult {
                status: 404,
                body: b"second".to_vec(),
                headers: HashMap::new(),
                elapsed: Duration::from_millis(1),
            },
        ]);
        let first = fetcher
            .fetch("http://x", &HashMap::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(first.is_success());
        let second = fetcher
            .fetch("http://x", &HashMap::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!second.is_success());
    }
}
