//! In-memory [`DocumentStore`] implementation. The primary test fixture
//! for every other component; also usable as a real backend for a
//! single-process deployment.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{BoardFilter, BoxFuture, DocumentStore, JobFilter};
use crate::error::{EngineError, Result};
use crate::model::{
    EngineState, EngineStatus, JobBoard, NormalizedJob, RawJob, ScheduleConfig, ScrapeJob,
    ScrapeJobStatus, ScrapeRun,
};

#[derive(Default)]
struct Inner {
    boards: HashMap<Uuid, JobBoard>,
    schedules: HashMap<Uuid, ScheduleConfig>,
    jobs: HashMap<Uuid, ScrapeJob>,
    runs: HashMap<Uuid, ScrapeRun>,
    raw_jobs: HashMap<Uuid, RawJob>,
    normalized_jobs: HashMap<Uuid, NormalizedJob>,
    engine_state: Option<EngineState>,
}

/// A process-local store guarded by a single mutex. Transactions are
/// trivially atomic because every operation holds the lock for its whole
/// duration; there is no interleaving to race against.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn initial_engine_state() -> EngineState {
    EngineState {
        status: EngineStatus::Idle,
        health_status: "healthy".to_string(),
        last_heartbeat: Utc::now(),
        active_jobs_count: 0,
        queued_jobs_count: 0,
        max_concurrent_jobs: 5,
        maintenance_mode: false,
        total_jobs_processed: 0,
        total_jobs_completed: 0,
        total_jobs_failed: 0,
        total_jobs_today: 0,
        success_rate: 0.0,
        cpu_usage_percent: 0.0,
        memory_usage_mb: 0.0,
        last_error: None,
        consecutive_errors: 0,
        uptime_s: 0,
        version: env!("CARGO_PKG_VERSION").to_string(),
        host_name: hostname(),
        process_id: std::process::id(),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl DocumentStore for MemoryStore {
    fn put_board(&self, board: JobBoard) -> BoxFuture<'_, Result<JobBoard>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if let Some(existing) = inner.boards.values().find(|b| b.name == board.name) {
                if existing.id != board.id {
                    return Err(EngineError::conflict(format!(
                        "board name '{}' already exists",
                        board.name
                    )));
                }
            }
            inner.boards.insert(board.id, board.clone());
            Ok(board)
        })
    }

    fn get_board(&self, id: Uuid) -> BoxFuture<'_, Result<Option<JobBoard>>> {
        Box::pin(async move { Ok(self.lock().boards.get(&id).cloned()) })
    }

    fn get_board_by_name(&self, name: &str) -> BoxFuture<'_, Result<Option<JobBoard>>> {
        let name = name.to_string();
        Box::pin(async move { Ok(self.lock().boards.values().find(|b| b.name == name).cloned()) })
    }

    fn list_boards(&self, filter: BoardFilter) -> BoxFuture<'_, Result<(Vec<JobBoard>, u64)>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut items: Vec<JobBoard> = inner
                .boards
                .values()
                .filter(|b| !filter.active_only || b.is_active)
                .cloned()
                .collect();
            items.sort_by_key(|b| b.created_at);
            let total = items.len() as u64;
            let page = items
                .into_iter()
                .skip(filter.skip as usize)
                .take(filter.limit.max(1) as usize)
                .collect();
            Ok((page, total))
        })
    }

    fn deactivate_board(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            match inner.boards.get_mut(&id) {
                Some(b) => {
                    b.is_active = false;
                    b.updated_at = Utc::now();
                    Ok(())
                }
                None => Err(EngineError::not_found(format!("board {id} not found"))),
            }
        })
    }

    fn put_schedule(&self, schedule: ScheduleConfig) -> BoxFuture<'_, Result<ScheduleConfig>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.schedules.insert(schedule.id, schedule.clone());
            Ok(schedule)
        })
    }

    fn get_schedule(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScheduleConfig>>> {
        Box::pin(async move { Ok(self.lock().schedules.get(&id).cloned()) })
    }

    fn list_schedules_for_board(
        &self,
        board_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ScheduleConfig>>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .schedules
                .values()
                .filter(|s| s.board_id == board_id)
                .cloned()
                .collect())
        })
    }

    fn list_due_schedules(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<ScheduleConfig>>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .schedules
                .values()
                .filter(|s| s.is_enabled && s.next_run_at.is_some_and(|t| t <= now))
                .cloned()
                .collect())
        })
    }

    fn delete_schedule(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.lock().schedules.remove(&id);
            Ok(())
        })
    }

    fn dispatch_due_schedule(
        &self,
        schedule_id: Uuid,
        expected_next_run_at: DateTime<Utc>,
        new_next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
        job: ScrapeJob,
    ) -> BoxFuture<'_, Result<ScrapeJob>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let schedule = inner
                .schedules
                .get_mut(&schedule_id)
                .ok_or_else(|| EngineError::not_found(format!("schedule {schedule_id}")))?;
            if schedule.next_run_at != Some(expected_next_run_at) {
                return Err(EngineError::conflict(
                    "schedule already advanced by a concurrent tick",
                ));
            }
            schedule.next_run_at = Some(new_next_run_at);
            schedule.last_run_at = Some(now);
            inner.jobs.insert(job.id, job.clone());
            Ok(job)
        })
    }

    fn put_job(&self, job: ScrapeJob) -> BoxFuture<'_, Result<ScrapeJob>> {
        Box::pin(async move {
            self.lock().jobs.insert(job.id, job.clone());
            Ok(job)
        })
    }

    fn get_job(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScrapeJob>>> {
        Box::pin(async move { Ok(self.lock().jobs.get(&id).cloned()) })
    }

    fn list_jobs(&self, filter: JobFilter) -> BoxFuture<'_, Result<(Vec<ScrapeJob>, u64)>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut items: Vec<ScrapeJob> = inner
                .jobs
                .values()
                .filter(|j| filter.status.is_none_or(|s| j.status == s))
                .filter(|j| filter.board_id.is_none_or(|b| j.board_id == b))
                .cloned()
                .collect();
            items.sort_by_key(|j| j.created_at);
            let total = items.len() as u64;
            let page = items
                .into_iter()
                .skip(filter.skip as usize)
                .take(filter.limit.max(1) as usize)
                .collect();
            Ok((page, total))
        })
    }

    fn list_pending_jobs(&self, limit: u64) -> BoxFuture<'_, Result<Vec<ScrapeJob>>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut items: Vec<ScrapeJob> = inner
                .jobs
                .values()
                .filter(|j| j.status == ScrapeJobStatus::Pending)
                .cloned()
                .collect();
            items.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
            items.truncate(limit as usize);
            Ok(items)
        })
    }

    fn recent_job_statuses(
        &self,
        board_id: Uuid,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScrapeJobStatus>>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut jobs: Vec<&ScrapeJob> = inner
                .jobs
                .values()
                .filter(|j| j.board_id == board_id && j.status.is_terminal())
                .collect();
            jobs.sort_by_key(|j| std::cmp::Reverse(j.created_at));
            Ok(jobs
                .into_iter()
                .take(limit as usize)
                .map(|j| j.status)
                .collect())
        })
    }

    fn claim_job(&self, id: Uuid, worker_id: &str) -> BoxFuture<'_, Result<Option<ScrapeJob>>> {
        let worker_id = worker_id.to_string();
        Box::pin(async move {
            let mut inner = self.lock();
            match inner.jobs.get_mut(&id) {
                Some(job) if job.status == ScrapeJobStatus::Pending => {
                    job.status = ScrapeJobStatus::Running;
                    job.worker_id = Some(worker_id);
                    job.started_at = Some(Utc::now());
                    Ok(Some(job.clone()))
                }
                Some(_) => Ok(None),
                None => Err(EngineError::not_found(format!("job {id}"))),
            }
        })
    }

    fn put_run(&self, run: ScrapeRun) -> BoxFuture<'_, Result<ScrapeRun>> {
        Box::pin(async move {
            self.lock().runs.insert(run.id, run.clone());
            Ok(run)
        })
    }

    fn get_run(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScrapeRun>>> {
        Box::pin(async move { Ok(self.lock().runs.get(&id).cloned()) })
    }

    fn list_runs_for_job(&self, job_id: Uuid) -> BoxFuture<'_, Result<Vec<ScrapeRun>>> {
        Box::pin(async move {
            let mut runs: Vec<ScrapeRun> = self
                .lock()
                .runs
                .values()
                .filter(|r| r.job_id == job_id)
                .cloned()
                .collect();
            runs.sort_by_key(|r| r.page_number);
            Ok(runs)
        })
    }

    fn bulk_upsert_raw_jobs(&self, raws: Vec<RawJob>) -> BoxFuture<'_, Result<Vec<RawJob>>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let mut inserted = Vec::with_capacity(raws.len());
            for raw in raws {
                if !raw.is_duplicate {
                    let dup = inner
                        .raw_jobs
                        .values()
                        .any(|r| r.board_id == raw.board_id && r.checksum == raw.checksum && !r.is_duplicate);
                    if dup {
                        let mut raw = raw;
                        raw.is_duplicate = true;
                        inner.raw_jobs.insert(raw.id, raw.clone());
                        inserted.push(raw);
                        continue;
                    }
                }
                inner.raw_jobs.insert(raw.id, raw.clone());
                inserted.push(raw);
            }
            Ok(inserted)
        })
    }

    fn checksum_exists(&self, board_id: Uuid, checksum: &str) -> BoxFuture<'_, Result<bool>> {
        let checksum = checksum.to_string();
        Box::pin(async move {
            Ok(self
                .lock()
                .raw_jobs
                .values()
                .any(|r| r.board_id == board_id && r.checksum == checksum && !r.is_duplicate))
        })
    }

    fn list_unprocessed_raw_jobs(&self, limit: u64) -> BoxFuture<'_, Result<Vec<RawJob>>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut items: Vec<RawJob> = inner
                .raw_jobs
                .values()
                .filter(|r| !r.is_processed && !r.is_duplicate)
                .cloned()
                .collect();
            items.sort_by_key(|r| r.created_at);
            items.truncate(limit as usize);
            Ok(items)
        })
    }

    fn mark_raw_job_processed(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            match inner.raw_jobs.get_mut(&id) {
                Some(r) => {
                    r.is_processed = true;
                    Ok(())
                }
                None => Err(EngineError::not_found(format!("raw job {id}"))),
            }
        })
    }

    fn put_normalized_job(&self, job: NormalizedJob) -> BoxFuture<'_, Result<NormalizedJob>> {
        Box::pin(async move {
            self.lock().normalized_jobs.insert(job.id, job.clone());
            Ok(job)
        })
    }

    fn list_normalized_jobs(
        &self,
        board_id: Option<Uuid>,
        skip: u64,
        limit: u64,
    ) -> BoxFuture<'_, Result<(Vec<NormalizedJob>, u64)>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut items: Vec<NormalizedJob> = inner
                .normalized_jobs
                .values()
                .filter(|j| board_id.is_none_or(|b| j.board_id == b))
                .cloned()
                .collect();
            items.sort_by_key(|j| std::cmp::Reverse(j.created_at));
            let total = items.len() as u64;
            let page = items
                .into_iter()
                .skip(skip as usize)
                .take(limit.max(1) as usize)
                .collect();
            Ok((page, total))
        })
    }

    fn get_engine_state(&self) -> BoxFuture<'_, Result<EngineState>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.engine_state.is_none() {
                inner.engine_state = Some(initial_engine_state());
            }
            Ok(inner.engine_state.clone().expect("just initialized"))
        })
    }

    fn put_engine_state(
        &self,
        expected_last_heartbeat: DateTime<Utc>,
        state: EngineState,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let current = inner.engine_state.get_or_insert_with(initial_engine_state);
            if current.last_heartbeat != expected_last_heartbeat {
                return Err(EngineError::conflict(
                    "engine state advanced by a concurrent heartbeat",
                ));
            }
            *current = state;
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}
