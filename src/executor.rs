//! Scrape-Run Executor (C6): one page fetch, extracted into zero or more
//! candidate records, deduped, and persisted as a single unit. Never
//! retries — that is a [`crate::worker`] concern.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::dedup::Deduper;
use crate::error::Result;
use crate::extract::{self, Candidate};
use crate::fetch::Fetcher;
use crate::model::{JobBoard, RawJob, RunType, ScrapeRun};
use crate::ratelimit::{domain_of, RateLimitParams, RateLimiter};
use crate::store::DocumentStore;

pub struct Executor {
    fetcher: Arc<dyn Fetcher>,
    rate_limiter: Arc<RateLimiter>,
    deduper: Arc<Deduper>,
    store: Arc<dyn DocumentStore>,
}

impl Executor {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        rate_limiter: Arc<RateLimiter>,
        deduper: Arc<Deduper>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            fetcher,
            rate_limiter,
            deduper,
            store,
        }
    }

    /// Executes one page fetch for `job_id` against `board`, persisting a
    /// [`ScrapeRun`] regardless of outcome.
    pub async fn execute_page(
        &self,
        job_id: Uuid,
        board: &JobBoard,
        run_type: RunType,
        url: String,
        page_number: u32,
    ) -> Result<ScrapeRun> {
        let started_at = Utc::now();
        let domain = domain_of(&url).unwrap_or_else(|_| url.clone());
        let params = RateLimitParams {
            base_delay: Duration::from_secs_f64(board.rate_limit_delay_s.max(0.0)),
            ..RateLimitParams::default()
        };

        let _permit = self.rate_limiter.acquire(&domain, params).await;
        let timeout = Duration::from_secs(board.request_timeout_s.max(1));
        let fetch_result = self.fetcher.fetch(&url, &board.headers, timeout).await;

        let fetched = match fetch_result {
            Ok(fetched) => fetched,
            Err(err) => {
                let run = ScrapeRun {
                    id: Uuid::new_v4(),
                    job_id,
                    run_type,
                    url,
                    page_number,
                    started_at,
                    completed_at: Some(Utc::now()),
                    duration_ms: Some((Utc::now() - started_at).num_milliseconds().max(0) as u64),
                    http_status_code: None,
                    response_size_bytes: None,
                    items_found: 0,
                    items_processed: 0,
                    items_created: 0,
                    items_updated: 0,
                    items_skipped: 0,
                    error: Some(err.to_string()),
                    raw_html: None,
                };
                return self.store.put_run(run).await;
            }
        };

        self.rate_limiter
            .record_outcome(&domain, params, fetched.status)
            .await;

        if !fetched.is_success() {
            let run = ScrapeRun {
                id: Uuid::new_v4(),
                job_id,
                run_type,
                url,
                page_number,
                started_at,
                completed_at: Some(Utc::now()),
                duration_ms: Some(fetched.elapsed.as_millis() as u64),
                http_status_code: Some(fetched.status),
                response_size_bytes: Some(fetched.body.len() as u64),
                items_found: 0,
                items_processed: 0,
                items_created: 0,
                items_updated: 0,
                items_skipped: 0,
                error: Some(format!("non-2xx response: {}", fetched.status)),
                raw_html: None,
            };
            return self.store.put_run(run).await;
        }

        let body_text = fetched.body_text();
        let candidates: Vec<Candidate> = match run_type {
            RunType::Rss => extract::extract_rss(&body_text),
            RunType::Html => extract::extract_html(&body_text, &board.selectors, &board.base_url),
            RunType::Api => extract::extract_json(&fetched.body),
        };

        let mut raws = Vec::with_capacity(candidates.len());
        let mut accepted = Vec::new();
        let mut skipped = 0u64;

        for candidate in candidates {
            let location = candidate.location.clone().unwrap_or_default();
            let checksum =
                Deduper::content_checksum(&candidate.title, &candidate.company, &location, &candidate.description);
            let url_hash = Deduper::url_checksum(&candidate.url);

            if self.deduper.seen_url(&url_hash).await
                || self.deduper.seen_content(&checksum).await
                || self.store.checksum_exists(board.id, &checksum).await?
            {
                skipped += 1;
                continue;
            }

            let raw = RawJob {
                id: Uuid::new_v4(),
                run_id: Uuid::new_v4(),
                board_id: board.id,
                title: candidate.title,
                company: candidate.company,
                location: candidate.location,
                description: candidate.description,
                url: candidate.url,
                salary_text: candidate.salary_text,
                job_type_text: candidate.job_type_text,
                posted_date_text: candidate.posted_date_text,
                raw_data: candidate.raw_data,
                html_snapshot: None,
                is_processed: false,
                is_duplicate: false,
                checksum,
                url_hash,
                created_at: Utc::now(),
            };
            accepted.push((raw.checksum.clone(), raw.url_hash.clone()));
            raws.push(raw);
        }

        let items_found = raws.len() as u64 + skipped;
        let stored = self.store.bulk_upsert_raw_jobs(raws).await?;
        let items_created = stored.iter().filter(|r| !r.is_duplicate).count() as u64;
        skipped += stored.iter().filter(|r| r.is_duplicate).count() as u64;

        for (checksum, url_hash) in accepted {
            self.deduper.mark_content_seen(&checksum).await;
            self.deduper.mark_url_seen(&url_hash).await;
        }

        let run = ScrapeRun {
            id: Uuid::new_v4(),
            job_id,
            run_type,
            url,
            page_number,
            started_at,
            completed_at: Some(Utc::now()),
            duration_ms: Some(fetched.elapsed.as_millis() as u64),
            http_status_code: Some(fetched.status),
            response_size_bytes: Some(fetched.body.len() as u64),
            items_found,
            items_processed: items_found,
            items_created,
            items_updated: 0,
            items_skipped: skipped,
            error: None,
            raw_html: None,
        };
        self.store.put_run(run).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchResult, StubFetcher};
    use crate::model::BoardType;
    use crate::store::memory::MemoryStore;
    use std::collections::HashMap;

    fn board() -> JobBoard {
        JobBoard {
            id: Uuid::new_v4(),
            name: "Example".to_string(),
            board_type: BoardType::Rss,
            base_url: "http://boards.example.com".to_string(),
            rss_url: None,
            selectors: HashMap::new(),
            headers: HashMap::new(),
            rate_limit_delay_s: 0.0,
            max_pages: 5,
            request_timeout_s: 5,
            retry_attempts: 3,
            quality_threshold: 0.5,
            is_active: true,
            total_scrapes: 0,
            successful_scrapes: 0,
            failed_scrapes: 0,
            last_scraped_at: None,
            success_rate: 0.0,
            average_response_time_ms: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rss_page_is_extracted_and_deduped() {
        let body = r#"<rss><channel>
            <item><title>Engineer</title><description>Build</description><link>http://boards.example.com/1</link></item>
            <item><title>Engineer</title><description>Build</description><link>http://boards.example.com/1</link></item>
        </channel></rss>"#;
        let fetcher = Arc::new(StubFetcher::new(vec![FetchResult {
            status: 200,
            body: body.as_bytes().to_vec(),
            headers: HashMap::new(),
            elapsed: Duration::from_millis(5),
        }]));
        let executor = Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            Arc::new(MemoryStore::new()),
        );
        let run = executor
            .execute_page(Uuid::new_v4(), &board(), RunType::Rss, "http://boards.example.com/feed".to_string(), 1)
            .await
            .unwrap();
        assert_eq!(run.items_created, 1, "exact duplicate within the same page must be skipped");
        assert_eq!(run.items_skipped, 1);
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn non_2xx_response_yields_failed_run_without_error() {
        let fetcher = Arc::new(StubFetcher::new(vec![FetchResult {
            status: 503,
            body: Vec::new(),
            headers: HashMap::new(),
            elapsed: Duration::from_millis(1),
        }]));
        let executor = Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            Arc::new(MemoryStore::new()),
        );
        let run = executor
            .execute_page(Uuid::new_v4(), &board(), RunType::Rss, "http://boards.example.com/feed".to_string(), 1)
            .await
            .unwrap();
        assert_eq!(run.http_status_code, Some(503));
        assert!(run.error.is_some());
        assert_eq!(run.items_found, 0);
    }
}
