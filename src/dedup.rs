//! Deduper (C4): bounded LRU caches for URL and content-hash membership,
//! backed by [`moka`] the same way the rest of this crate uses it for
//! bounded, TTL'd in-memory state.

use std::time::Duration;

use moka::future::Cache;
use sha2::{Digest, Sha256};

const DEFAULT_URL_CACHE_CAPACITY: u64 = 10_000;
const DEFAULT_CONTENT_CACHE_CAPACITY: u64 = 10_000;
const CONTENT_CACHE_TTL_SECS: u64 = 3_600;

/// Process-local duplicate detector. The caches are an optimization over
/// the store's `(board_id, checksum)` unique index — a cache miss still
/// falls through to `DocumentStore::checksum_exists`.
pub struct Deduper {
    url_seen: Cache<String, ()>,
    content_seen: Cache<String, ()>,
}

impl Deduper {
    pub fn new() -> Self {
        Self {
            url_seen: Cache::builder().max_capacity(DEFAULT_URL_CACHE_CAPACITY).build(),
            content_seen: Cache::builder()
                .max_capacity(DEFAULT_CONTENT_CACHE_CAPACITY)
                .time_to_live(Duration::from_secs(CONTENT_CACHE_TTL_SECS))
                .build(),
        }
    }

    /// True if this exact URL was already marked seen in this process.
    pub async fn seen_url(&self, url: &str) -> bool {
        self.url_seen.get(url).await.is_some()
    }

    pub async fn mark_url_seen(&self, url: &str) {
        self.url_seen.insert(url.to_string(), ()).await;
    }

    /// True if this content checksum was already marked seen in this process.
    pub async fn seen_content(&self, checksum: &str) -> bool {
        self.content_seen.get(checksum).await.is_some()
    }

    pub async fn mark_content_seen(&self, checksum: &str) {
        self.content_seen.insert(checksum.to_string(), ()).await;
    }

    /// Computes the content checksum over `lower(title) | lower(company) |
    /// lower(location) | first-500-chars(description)`, after whitespace
    /// normalization, SHA-256 hex-encoded.
    pub fn content_checksum(title: &str, company: &str, location: &str, description: &str) -> String {
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let description_prefix: String = normalize(description).chars().take(500).collect();
        let tuple = format!(
            "{}|{}|{}|{}",
            normalize(title),
            normalize(company),
            normalize(location),
            description_prefix
        );
        let mut hasher = Sha256::new();
        hasher.update(tuple.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes the URL-hash used by the Deduper's URL-seen cache — a
    /// separate uniqueness axis from the content checksum, since two
    /// postings at different URLs can still be the same content and vice
    /// versa.
    pub fn url_checksum(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.trim().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_across_whitespace_and_case() {
        let a = Deduper::content_checksum("Senior Engineer", "Acme Co", "Remote", "Build things.");
        let b = Deduper::content_checksum(
            "  senior   engineer ",
            "ACME CO",
            "remote",
            "Build   things.",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_changes_with_different_title() {
        let a = Deduper::content_checksum("Senior Engineer", "Acme", "Remote", "desc");
        let b = Deduper::content_checksum("Junior Engineer", "Acme", "Remote", "desc");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn url_seen_round_trip() {
        let deduper = Deduper::new();
        assert!(!deduper.seen_url("http://a.test/job/1").await);
        deduper.mark_url_seen("http://a.test/job/1").await;
        assert!(deduper.seen_url("http://a.test/job/1").await);
    }

    #[tokio::test]
    async fn content_seen_round_trip() {
        let deduper = Deduper::new();
        let checksum = Deduper::content_checksum("T", "C", "L", "D");
        assert!(!deduper.seen_content(&checksum).await);
        deduper.mark_content_seen(&checksum).await;
        assert!(deduper.seen_content(&checksum).await);
    }
}
