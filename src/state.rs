//! Engine State (C10): a heartbeat task that recomputes the singleton
//! [`EngineState`] document and mirrors it into Prometheus-style gauges.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{EngineState, ScrapeJobStatus};
use crate::pool::WorkerPool;
use crate::store::{DocumentStore, JobFilter};

pub struct HeartbeatConfig {
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// EMA smoothing factor applied to the observed completion rate each tick.
const SUCCESS_RATE_ALPHA: f64 = 0.1;

pub struct EngineStateTask {
    store: Arc<dyn DocumentStore>,
    pool: Arc<WorkerPool>,
    config: HeartbeatConfig,
    started_at: chrono::DateTime<Utc>,
    cancellation: CancellationToken,
}

impl EngineStateTask {
    pub fn new(store: Arc<dyn DocumentStore>, pool: Arc<WorkerPool>, config: HeartbeatConfig) -> Self {
        Self {
            store,
            pool,
            config,
            started_at: Utc::now(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub async fn run(&self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
            if let Err(err) = self.tick().await {
                tracing::warn!(%err, "heartbeat tick failed");
            }
        }
    }

    /// One heartbeat: recompute gauges, CAS them into the store. A lost CAS
    /// race (another heartbeat already landed) is not an error — the next
    /// tick supersedes it in `interval` seconds anyway.
    pub async fn tick(&self) -> Result<()> {
        let current = self.store.get_engine_state().await?;
        let now = Utc::now();

        let (_, active_total) = self
            .store
            .list_jobs(JobFilter {
                status: Some(ScrapeJobStatus::Running),
                board_id: None,
                skip: 0,
                limit: 1,
            })
            .await?;
        let (_, queued_total) = self
            .store
            .list_jobs(JobFilter {
                status: Some(ScrapeJobStatus::Pending),
                board_id: None,
                skip: 0,
                limit: 1,
            })
            .await?;
        let (_, total_completed) = self
            .store
            .list_jobs(JobFilter {
                status: Some(ScrapeJobStatus::Completed),
                board_id: None,
                skip: 0,
                limit: 1,
            })
            .await?;
        let (_, total_failed) = self
            .store
            .list_jobs(JobFilter {
                status: Some(ScrapeJobStatus::Failed),
                board_id: None,
                skip: 0,
                limit: 1,
            })
            .await?;
        let total_processed = total_completed + total_failed;

        let instantaneous_rate = if total_processed > 0 {
            total_completed as f64 / total_processed as f64
        } else {
            current.success_rate
        };
        let success_rate = if current.total_jobs_processed == 0 {
            instantaneous_rate
        } else {
            SUCCESS_RATE_ALPHA * instantaneous_rate + (1.0 - SUCCESS_RATE_ALPHA) * current.success_rate
        };

        let consecutive_errors = if total_completed > current.total_jobs_completed {
            0
        } else if total_failed > current.total_jobs_failed {
            current.consecutive_errors + 1
        } else {
            current.consecutive_errors
        };

        let status = EngineState::derive_status(
            active_total as u32,
            queued_total as u32,
            current.maintenance_mode,
            consecutive_errors,
        );
        let health_status = EngineState::derive_health_status(consecutive_errors).to_string();

        metrics::gauge!("autoscraper_active_jobs").set(active_total as f64);
        metrics::gauge!("autoscraper_queued_jobs").set(queued_total as f64);
        metrics::gauge!("autoscraper_success_rate").set(success_rate);
        metrics::gauge!("autoscraper_consecutive_errors").set(consecutive_errors as f64);
        metrics::counter!("autoscraper_jobs_completed_total").absolute(total_completed);
        metrics::counter!("autoscraper_jobs_failed_total").absolute(total_failed);

        let new_state = EngineState {
            status,
            health_status,
            last_heartbeat: now,
            active_jobs_count: active_total as u32,
            queued_jobs_count: queued_total as u32,
            max_concurrent_jobs: current.max_concurrent_jobs,
            maintenance_mode: current.maintenance_mode,
            total_jobs_processed: total_processed,
            total_jobs_completed: total_completed,
            total_jobs_failed: total_failed,
            total_jobs_today: total_processed,
            success_rate,
            // Sampled by the hosting platform's own process metrics; no
            // grounded in-process sampling crate is part of this stack.
            cpu_usage_percent: current.cpu_usage_percent,
            memory_usage_mb: current.memory_usage_mb,
            last_error: current.last_error,
            consecutive_errors,
            uptime_s: (now - self.started_at).num_seconds().max(0) as u64,
            version: current.version,
            host_name: current.host_name,
            process_id: current.process_id,
        };

        match self.store.put_engine_state(current.last_heartbeat, new_state).await {
            Ok(()) => Ok(()),
            Err(err) if err.code() == "conflict" => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn pool_active_count(&self) -> u32 {
        self.pool.active_count()
    }
}
