//! Worker Pool (C8): fixed-parallelism dispatcher over the PENDING job
//! queue, with backpressure and graceful shutdown.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::model::ScrapeJobStatus;
use crate::store::{DocumentStore, JobFilter};
use crate::worker::Worker;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_concurrent_jobs: usize,
    pub high_water_mark: u64,
    pub low_water_mark: u64,
    pub graceful_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            high_water_mark: 1_000,
            low_water_mark: 800,
            graceful_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Dispatches PENDING jobs onto a fixed set of concurrent worker slots.
/// Holds no job state itself — every decision re-derives from the store,
/// so a restarted pool picks up exactly where the last one left off.
pub struct WorkerPool {
    store: Arc<dyn DocumentStore>,
    worker: Arc<Worker>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    cancellation: CancellationToken,
    backpressured: AtomicBool,
    inflight: Arc<Mutex<HashSet<Uuid>>>,
}

impl WorkerPool {
    pub fn new(store: Arc<dyn DocumentStore>, worker: Arc<Worker>, config: PoolConfig) -> Self {
        Self {
            store,
            worker,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            cancellation: CancellationToken::new(),
            backpressured: AtomicBool::new(false),
            inflight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Shared with the scheduler and the Control API's shutdown handler;
    /// cancelling it stops the dispatch loop and begins graceful shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// True once the pending queue has crossed `high_water_mark`, until it
    /// drains back below `low_water_mark` — hysteresis so the scheduler
    /// doesn't flap between dispatching and withholding on every tick.
    pub fn is_backpressured(&self) -> bool {
        self.backpressured.load(Ordering::Relaxed)
    }

    pub fn active_count(&self) -> u32 {
        (self.config.max_concurrent_jobs - self.semaphore.available_permits()) as u32
    }

    fn update_backpressure(&self, pending_total: u64) {
        if pending_total >= self.config.high_water_mark {
            self.backpressured.store(true, Ordering::Relaxed);
        } else if pending_total <= self.config.low_water_mark {
            self.backpressured.store(false, Ordering::Relaxed);
        }
    }

    /// Runs the dispatch loop until cancelled, then waits up to
    /// `graceful_timeout` for in-flight jobs before abandoning the rest.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            while tasks.try_join_next().is_some() {}

            let (_, pending_total) = self
                .store
                .list_jobs(JobFilter {
                    status: Some(ScrapeJobStatus::Pending),
                    board_id: None,
                    skip: 0,
                    limit: 1,
                })
                .await?;
            self.update_backpressure(pending_total);
            if self.is_backpressured() {
                tracing::warn!(pending_total, "pool backpressured, withholding dispatch");
                continue;
            }

            let available = self.semaphore.available_permits();
            if available == 0 {
                continue;
            }
            let candidates = self.store.list_pending_jobs(available as u64).await?;
            for job in candidates {
                let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                    break;
                };
                let worker = self.worker.clone();
                let job_id = job.id;
                let worker_id = format!("worker-{}", Uuid::new_v4());
                self.inflight.lock().unwrap().insert(job_id);
                let inflight = self.inflight.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    if let Err(err) = worker.run_job(job_id, &worker_id).await {
                        tracing::warn!(%job_id, %err, "job dispatch failed");
                    }
                    inflight.lock().unwrap().remove(&job_id);
                });
            }
        }

        let _ = tokio::time::timeout(self.config.graceful_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        let abandoned: Vec<Uuid> = self.inflight.lock().unwrap().iter().copied().collect();
        for job_id in abandoned {
            if let Some(mut job) = self.store.get_job(job_id).await? {
                if job.status == ScrapeJobStatus::Running {
                    job.status = ScrapeJobStatus::Paused;
                    self.store.put_job(job).await?;
                }
            }
        }
        tasks.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::Deduper;
    use crate::executor::Executor;
    use crate::fetch::StubFetcher;
    use crate::model::{BoardType, JobBoard, ScrapeJob, ScrapeJobMode};
    use crate::ratelimit::RateLimiter;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use std::collections::HashMap;

    fn board() -> JobBoard {
        JobBoard {
            id: Uuid::new_v4(),
            name: "demo".to_string(),
            board_type: BoardType::Rss,
            base_url: "http://example.test".to_string(),
            rss_url: Some("http://example.test/feed".to_string()),
            selectors: HashMap::new(),
            headers: HashMap::new(),
            rate_limit_delay_s: 0.0,
            max_pages: 1,
            request_timeout_s: 5,
            retry_attempts: 0,
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

    fn pending_job(board_id: Uuid, priority: i32) -> ScrapeJob {
        ScrapeJob {
            id: Uuid::new_v4(),
            board_id,
            schedule_id: None,
            mode: ScrapeJobMode::Manual,
            status: ScrapeJobStatus::Pending,
            priority,
            max_pages: Some(1),
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
    async fn dispatch_loop_claims_and_runs_pending_jobs() {
        let store = Arc::new(MemoryStore::new());
        let board = board();
        store.put_board(board.clone()).await.unwrap();
        let job = pending_job(board.id, 0);
        store.put_job(job.clone()).await.unwrap();

        let fetcher = Arc::new(StubFetcher::new(vec![]));
        let executor = Arc::new(Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            store.clone(),
        ));
        let worker = Arc::new(Worker::new(executor, store.clone()));
        let pool = Arc::new(WorkerPool::new(
            store.clone(),
            worker,
            PoolConfig {
                poll_interval: Duration::from_millis(5),
                graceful_timeout: Duration::from_millis(50),
                ..PoolConfig::default()
            },
        ));

        let token = pool.cancellation_token();
        let handle = tokio::spawn(pool.clone().run());
        tokio::time::sleep(Duration::from_millis(40)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_ne!(finished.status, ScrapeJobStatus::Pending);
    }

    #[tokio::test]
    async fn abandoned_running_job_is_paused_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let board = board();
        store.put_board(board.clone()).await.unwrap();
        let mut job = pending_job(board.id, 0);
        job.status = ScrapeJobStatus::Running;
        store.put_job(job.clone()).await.unwrap();

        let fetcher = Arc::new(StubFetcher::new(vec![]));
        let executor = Arc::new(Executor::new(
            fetcher,
            Arc::new(RateLimiter::new(4)),
            Arc::new(Deduper::new()),
            store.clone(),
        ));
        let worker = Arc::new(Worker::new(executor, store.clone()));
        let pool = Arc::new(WorkerPool::new(
            store.clone(),
            worker,
            PoolConfig {
                poll_interval: Duration::from_millis(5),
                graceful_timeout: Duration::from_millis(20),
                ..PoolConfig::default()
            },
        ));
        // Simulates a job still mid-page when the cancellation arrives: no
        // task is actually spawned for it, but it is tracked as in-flight.
        pool.inflight.lock().unwrap().insert(job.id);
        pool.cancellation_token().cancel();
        pool.run().await.unwrap();

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, ScrapeJobStatus::Paused);
    }

    #[test]
    fn backpressure_has_hysteresis_between_marks() {
        let pool = WorkerPool::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Worker::new(
                Arc::new(Executor::new(
                    Arc::new(StubFetcher::new(vec![])),
                    Arc::new(RateLimiter::new(1)),
                    Arc::new(Deduper::new()),
                    Arc::new(MemoryStore::new()),
                )),
                Arc::new(MemoryStore::new()),
            )),
            PoolConfig {
                high_water_mark: 10,
                low_water_mark: 5,
                ..PoolConfig::default()
            },
        );
        pool.update_backpressure(10);
        assert!(pool.is_backpressured());
        pool.update_backpressure(7);
        assert!(pool.is_backpressured(), "must stay backpressured until at or below the low mark");
        pool.update_backpressure(5);
        assert!(!pool.is_backpressured());
    }
}
