//! Document Store (C1): the sole persistence seam. Every other component
//! talks to entities only through this trait — no component holds a
//! database connection of its own.
//!
//! The trait is object-safe (`Arc<dyn DocumentStore>` is shared across the
//! scheduler, pool, workers, and the Control API) following the
//! boxed-future pattern the rest of this codebase uses for async trait
//! methods without `async-trait`.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    EngineState, JobBoard, NormalizedJob, RawJob, ScheduleConfig, ScrapeJob, ScrapeJobStatus,
    ScrapeRun,
};

/// Alias matching the boxed-future convention used across this crate's
/// async trait methods.
pub type BoxFuture<'a, T> = futures_util::future::BoxFuture<'a, T>;

/// Filter for listing job boards.
#[derive(Debug, Clone, Default)]
pub struct BoardFilter {
    pub active_only: bool,
    pub skip: u64,
    pub limit: u64,
}

/// Filter for listing scrape jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<ScrapeJobStatus>,
    pub board_id: Option<Uuid>,
    pub skip: u64,
    pub limit: u64,
}

pub trait DocumentStore: Send + Sync {
    // ---- Job boards ----------------------------------------------------
    fn put_board(&self, board: JobBoard) -> BoxFuture<'_, Result<JobBoard>>;
    fn get_board(&self, id: Uuid) -> BoxFuture<'_, Result<Option<JobBoard>>>;
    fn get_board_by_name(&self, name: &str) -> BoxFuture<'_, Result<Option<JobBoard>>>;
    fn list_boards(&self, filter: BoardFilter) -> BoxFuture<'_, Result<(Vec<JobBoard>, u64)>>;
    /// Soft delete: sets `is_active = false`, never removes history.
    fn deactivate_board(&self, id: Uuid) -> BoxFuture<'_, Result<()>>;

    // ---- Schedules -------------------------------------------------------
    fn put_schedule(&self, schedule: ScheduleConfig) -> BoxFuture<'_, Result<ScheduleConfig>>;
    fn get_schedule(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScheduleConfig>>>;
    fn list_schedules_for_board(
        &self,
        board_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ScheduleConfig>>>;
    fn list_due_schedules(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<ScheduleConfig>>>;
    fn delete_schedule(&self, id: Uuid) -> BoxFuture<'_, Result<()>>;

    /// Atomically creates `job` and advances `schedule_id`'s `next_run_at`
    /// / `last_run_at`, compare-and-set against `expected_next_run_at` so
    /// two scheduler ticks racing on the same schedule cannot both fire.
    fn dispatch_due_schedule(
        &self,
        schedule_id: Uuid,
        expected_next_run_at: DateTime<Utc>,
        new_next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
        job: ScrapeJob,
    ) -> BoxFuture<'_, Result<ScrapeJob>>;

    // ---- Scrape jobs -----------------------------------------------------
    fn put_job(&self, job: ScrapeJob) -> BoxFuture<'_, Result<ScrapeJob>>;
    fn get_job(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScrapeJob>>>;
    fn list_jobs(&self, filter: JobFilter) -> BoxFuture<'_, Result<(Vec<ScrapeJob>, u64)>>;
    /// Highest (priority desc, created_at asc) PENDING jobs, for the pool's
    /// dispatch queue.
    fn list_pending_jobs(&self, limit: u64) -> BoxFuture<'_, Result<Vec<ScrapeJob>>>;
    /// Last `limit` jobs for a board, most recent first — used for the
    /// auto-flagging failure-rate check.
    fn recent_job_statuses(
        &self,
        board_id: Uuid,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScrapeJobStatus>>>;
    /// Atomic claim: succeeds only if the job is still PENDING, then writes
    /// RUNNING + `worker_id`. Returns `Ok(None)` if another worker already
    /// claimed it — never an error, since losing a race is expected.
    fn claim_job(&self, id: Uuid, worker_id: &str) -> BoxFuture<'_, Result<Option<ScrapeJob>>>;

    // ---- Scrape runs -----------------------------------------------------
    fn put_run(&self, run: ScrapeRun) -> BoxFuture<'_, Result<ScrapeRun>>;
    fn get_run(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScrapeRun>>>;
    fn list_runs_for_job(&self, job_id: Uuid) -> BoxFuture<'_, Result<Vec<ScrapeRun>>>;

    // ---- Raw jobs ----------------------------------------------------------
    /// Inserts a batch of raws in one transaction, skipping any whose
    /// `(board_id, checksum)` already exists among non-duplicates.
    fn bulk_upsert_raw_jobs(&self, raws: Vec<RawJob>) -> BoxFuture<'_, Result<Vec<RawJob>>>;
    fn checksum_exists(&self, board_id: Uuid, checksum: &str) -> BoxFuture<'_, Result<bool>>;
    fn list_unprocessed_raw_jobs(&self, limit: u64) -> BoxFuture<'_, Result<Vec<RawJob>>>;
    fn mark_raw_job_processed(&self, id: Uuid) -> BoxFuture<'_, Result<()>>;

    // ---- Normalized jobs -------------------------------------------------
    fn put_normalized_job(&self, job: NormalizedJob) -> BoxFuture<'_, Result<NormalizedJob>>;
    fn list_normalized_jobs(
        &self,
        board_id: Option<Uuid>,
        skip: u64,
        limit: u64,
    ) -> BoxFuture<'_, Result<(Vec<NormalizedJob>, u64)>>;

    // ---- Engine state ----------------------------------------------------
    fn get_engine_state(&self) -> BoxFuture<'_, Result<EngineState>>;
    /// Compare-and-set on `last_heartbeat`: succeeds only if the stored
    /// heartbeat is not newer than `expected_last_heartbeat`.
    fn put_engine_state(
        &self,
        expected_last_heartbeat: DateTime<Utc>,
        state: EngineState,
    ) -> BoxFuture<'_, Result<()>>;

    fn health_check(&self) -> BoxFuture<'_, Result<()>>;
}
