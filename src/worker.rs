//! Scrape-Job Worker (C7): drives one claimed job's page-by-page state
//! machine to a terminal status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::executor::Executor;
use crate::model::{BoardType, JobBoard, RunType, ScrapeJob, ScrapeJobStatus, ScrapeRun};
use crate::store::DocumentStore;

pub struct Worker {
    executor: Arc<Executor>,
    store: Arc<dyn DocumentStore>,
}

impl Worker {
    pub fn new(executor: Arc<Executor>, store: Arc<dyn DocumentStore>) -> Self {
        Self { executor, store }
    }

    /// Claims `job_id` under `worker_id` and runs it to a terminal status.
    /// Returns `Ok(())` even when the claim is lost to another worker —
    /// that is an expected race, not an error.
    pub async fn run_job(&self, job_id: Uuid, worker_id: &str) -> Result<()> {
        let Some(mut job) = self.store.claim_job(job_id, worker_id).await? else {
            return Ok(());
        };

        let board = self
            .store
            .get_board(job.board_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("board {} for job {job_id}", job.board_id)))?;

        job.config_snapshot = serde_json::to_value(&board).unwrap_or(serde_json::Value::Null);
        job.started_at = Some(Utc::now());

        let run_type = run_type_for_board(&board);
        if run_type == RunType::Html && !board.selectors.contains_key("listing") {
            return self
                .finish(job, ScrapeJobStatus::Failed, Some("missing `listing` selector for HTML board".into()))
                .await;
        }

        let max_pages = job.max_pages.unwrap_or(board.max_pages).max(1);
        let start_page = job.page_cursor + 1;

        for page in start_page..=max_pages {
            if let Some(reloaded) = self.store.get_job(job.id).await? {
                if matches!(reloaded.status, ScrapeJobStatus::Cancelled | ScrapeJobStatus::Paused) {
                    job.status = reloaded.status;
                    self.store.put_job(job).await?;
                    return Ok(());
                }
            }

            let url = build_page_url(&board, run_type, page);
            let run = self.run_page_with_retries(&mut job, &board, run_type, url, page).await?;

            let Some(run) = run else {
                // retries exhausted or non-retryable failure: already terminal.
                return Ok(());
            };

            job.page_cursor = page;
            job.items_found += run.items_found;
            job.items_created += run.items_created;
            job.items_updated += run.items_updated;
            job.items_skipped += run.items_skipped;

            if run.items_found == 0 {
                job.consecutive_empty_pages += 1;
            } else {
                job.consecutive_empty_pages = 0;
            }

            self.store.put_job(job.clone()).await?;

            if job.consecutive_empty_pages >= 2 {
                break;
            }
        }

        self.finish(job, ScrapeJobStatus::Completed, None).await
    }

    /// Runs one page, retrying on a retryable run failure up to
    /// `board.retry_attempts` times. Returns `Ok(Some(run))` on a run that
    /// succeeded or exhausted retries with a record to show for it, or
    /// `Ok(None)` once the job itself has been transitioned to FAILED.
    async fn run_page_with_retries(
        &self,
        job: &mut ScrapeJob,
        board: &JobBoard,
        run_type: RunType,
        url: String,
        page: u32,
    ) -> Result<Option<ScrapeRun>> {
        let mut attempt = 0;
        loop {
            let run = self
                .executor
                .execute_page(job.id, board, run_type, url.clone(), page)
                .await?;

            if run.error.is_none() {
                return Ok(Some(run));
            }

            if !is_retryable(&run) {
                self.finish_mut(job, ScrapeJobStatus::Failed, run.error.clone()).await?;
                return Ok(None);
            }

            if attempt >= board.retry_attempts {
                self.finish_mut(job, ScrapeJobStatus::Failed, run.error.clone()).await?;
                return Ok(None);
            }

            attempt += 1;
            job.retry_count += 1;
            let backoff = Duration::from_secs_f64(board.rate_limit_delay_s.max(0.1) * 2f64.powi(attempt as i32));
            tokio::time::sleep(backoff).await;
        }
    }

    async fn finish(&self, mut job: ScrapeJob, status: ScrapeJobStatus, error: Option<String>) -> Result<()> {
        self.finish_mut(&mut job, status, error).await
    }

    async fn finish_mut(&self, job: &mut ScrapeJob, status: ScrapeJobStatus, error: Option<String>) -> Result<()> {
        job.status = status;
        job.error_message = error;
        job.completed_at = Some(Utc::now());
        job.duration_s = job
            .started_at
            .map(|start| (Utc::now() - start).num_milliseconds() as f64 / 1000.0);
        self.store.put_job(job.clone()).await?;
        if status.is_terminal() {
            self.update_board_counters(job.board_id, status, job.duration_s.unwrap_or(0.0)).await?;
        }
        Ok(())
    }

    /// Folds one terminal job's outcome into its board's running counters.
    /// Plain read-modify-write, not CAS: concurrent scrapes of the same
    /// board are rare enough that a lost update here is an acceptable
    /// approximation, unlike schedule/job-claim compare-and-set.
    async fn update_board_counters(&self, board_id: Uuid, status: ScrapeJobStatus, duration_s: f64) -> Result<()> {
        let Some(mut board) = self.store.get_board(board_id).await? else {
            return Ok(());
        };

        board.total_scrapes += 1;
        match status {
            ScrapeJobStatus::Completed => board.successful_scrapes += 1,
            ScrapeJobStatus::Failed => board.failed_scrapes += 1,
            _ => {}
        }
        board.success_rate = board.successful_scrapes as f64 / board.total_scrapes as f64;
        board.last_scraped_at = Some(Utc::now());

        let duration_ms = duration_s * 1000.0;
        board.average_response_time_ms = ((board.average_response_time_ms * (board.total_scrapes - 1) as f64)
            + duration_ms)
            / board.total_scrapes as f64;

        self.store.put_board(board).await?;
        Ok(())
    }
}

fn run_type_for_board(board: &JobBoard) -> RunType {
    match board.board_type {
        BoardType::Rss => RunType::Rss,
        BoardType::Html => RunType::Html,
        BoardType::Api => RunType::Api,
        BoardType::Hybrid => {
            if board.rss_url.is_some() {
                RunType::Rss
            } else {
                RunType::Html
            }
        }
    }
}

fn build_page_url(board: &JobBoard, run_type: RunType, page: u32) -> String {
    match run_type {
        RunType::Rss => board.rss_url.clone().unwrap_or_else(|| board.base_url.clone()),
        RunType::Html | RunType::Api => {
            if page <= 1 {
                board.base_url.clone()
            } else {
                let sep = if board.base_url.contains('?') { '&' } else { '?' };
                format!("{}{}page={}", board.base_url, sep, page)
            }
        }
    }
}

fn is_retryable(run: &ScrapeRun) -> bool {
    match run.http_status_code {
        None => true,
        Some(429) => true,
        Some(status) if (500..600).contains(&status) => true,
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::Deduper;
    use crate::fetch::{FetchResult, StubFetcher};
    use crate::ratelimit::RateLimiter;
    use crate::store::memory::MemoryStore;
    use std::collections::HashMap;

    fn board(selectors: HashMap<String, String>) -> JobBoard {
        JobBoard {
            id: Uuid::new_v4(),
            name: "Example".to_string(),
            board_type: BoardType::Html,
            base_url: "http://boards.example.com".to_string(),
            rss_url: None,
            selectors,
            headers: HashMap::new(),
            rate_limit_delay_s: 0.01,
            max_pages: 3,
            request_timeout_s: 5,
            retry_attempts: 1,
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

    fn job(board_id: Uuid) -> ScrapeJob {
        ScrapeJob {
            id: Uuid::new_v4(),
            board_id,
            schedule_id: None,
            mode: crate::model::ScrapeJobMode::Manual,
            status: ScrapeJobStatus::Pending,
            priority: 0,
            max_pages: None,
            page_cursor: 0,
            consecutive_empty_pages: 0,
            started_at: None,
            completed_at: None,
            duration_s: None,
            items_found: 0,
            items_created: 0,
            items_updated: 0,
            items_skipped: 0,
            error_message: None,
            error_details: None,
            retry_count: 0,
            config_snapshot: serde_json::Value::Null,
            worker_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn completes_after_two_consecutive_empty_pages() {
        let store = Arc::new(MemoryStore::new());
        let mut selectors = HashMap::new();
        selectors.insert("listing".to_string(), "div.job".to_string());
        selectors.insert("title".to_string(), "a.t".to_string());
        let board = board(selectors);
        store.put_board(board.clone()).await.unwrap();
        let j = job(board.id);
        store.put_job(j.clone()).await.unwrap();

        let fetcher = Arc::new(StubFetcher::new(vec![
            FetchResult {
                status: 200,
                body: br#"<html><body><div class="job"><a class="t" href="/1">Engineer</a></div></body></html>"#
                    .to_vec(),
                headers: HashMap::new(),
                elapsed: Duration::from_millis(1),
            },
            FetchResult {
                status: 200,
                body: b"<html><body></body></html>".to_vec(),
                headers: HashMap::new(),
                elapsed: Duration::from_millis(1),
            },
            FetchResult {
                status: 200,
                body: b"<html><body></body></html>".to_vec(),
                headers: HashMap::new(),
                elapsed: Duration::from_millis(1),
            },
        ]));
        let executor = Arc::new(Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            store.clone(),
        ));
        let worker = Worker::new(executor, store.clone());
        worker.run_job(j.id, "worker-1").await.unwrap();

        let finished = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(finished.status, ScrapeJobStatus::Completed);
        assert_eq!(finished.items_created, 1);
    }

    #[tokio::test]
    async fn fails_immediately_without_listing_selector() {
        let store = Arc::new(MemoryStore::new());
        let board = board(HashMap::new());
        store.put_board(board.clone()).await.unwrap();
        let j = job(board.id);
        store.put_job(j.clone()).await.unwrap();

        let fetcher = Arc::new(StubFetcher::new(vec![]));
        let executor = Arc::new(Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            store.clone(),
        ));
        let worker = Worker::new(executor, store.clone());
        worker.run_job(j.id, "worker-1").await.unwrap();

        let finished = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(finished.status, ScrapeJobStatus::Failed);
    }

    #[tokio::test]
    async fn completed_job_updates_board_counters() {
        let store = Arc::new(MemoryStore::new());
        let mut selectors = HashMap::new();
        selectors.insert("listing".to_string(), "div.job".to_string());
        let board = board(selectors);
        store.put_board(board.clone()).await.unwrap();
        let j = job(board.id);
        store.put_job(j.clone()).await.unwrap();

        let fetcher = Arc::new(StubFetcher::new(vec![
            FetchResult {
                status: 200,
                body: b"<html><body></body></html>".to_vec(),
                headers: HashMap::new(),
                elapsed: Duration::from_millis(1),
            },
            FetchResult {
                status: 200,
                body: b"<html><body></body></html>".to_vec(),
                headers: HashMap::new(),
                elapsed: Duration::from_millis(1),
            },
        ]));
        let executor = Arc::new(Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            store.clone(),
        ));
        let worker = Worker::new(executor, store.clone());
        worker.run_job(j.id, "worker-1").await.unwrap();

        let updated_board = store.get_board(board.id).await.unwrap().unwrap();
        assert_eq!(updated_board.total_scrapes, 1);
        assert_eq!(updated_board.successful_scrapes, 1);
        assert_eq!(updated_board.success_rate, 1.0);
        assert!(updated_board.last_scraped_at.is_some());
    }

    #[tokio::test]
    async fn resumed_job_continues_from_page_cursor_not_page_one() {
        let store = Arc::new(MemoryStore::new());
        let mut selectors = HashMap::new();
        selectors.insert("listing".to_string(), "div.job".to_string());
        selectors.insert("title".to_string(), "a.t".to_string());
        let board = board(selectors);
        store.put_board(board.clone()).await.unwrap();

        let mut j = job(board.id);
        j.status = ScrapeJobStatus::Pending;
        j.page_cursor = 1;
        j.max_pages = Some(2);
        store.put_job(j.clone()).await.unwrap();

        // Only one response queued: if the worker restarted at page 1 it
        // would exhaust the stub and fail instead of fetching page 2.
        let fetcher = Arc::new(StubFetcher::new(vec![FetchResult {
            status: 200,
            body: b"<html><body></body></html>".to_vec(),
            headers: HashMap::new(),
            elapsed: Duration::from_millis(1),
        }]));
        let executor = Arc::new(Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            store.clone(),
        ));
        let worker = Worker::new(executor, store.clone());
        worker.run_job(j.id, "worker-1").await.unwrap();

        let finished = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(finished.status, ScrapeJobStatus::Completed);
        assert_eq!(finished.page_cursor, 2);
    }

    #[tokio::test]
    async fn losing_the_claim_race_is_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        let board = board(HashMap::new());
        store.put_board(board.clone()).await.unwrap();
        let mut j = job(board.id);
        j.status = ScrapeJobStatus::Running;
        store.put_job(j.clone()).await.unwrap();

        let fetcher = Arc::new(StubFetcher::new(vec![]));
        let executor = Arc::new(Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            store.clone(),
        ));
        let worker = Worker::new(executor, store.clone());
        worker.run_job(j.id, "worker-2").await.unwrap();

        let unchanged = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, ScrapeJobStatus::Running);
    }
}
