//! SQLite-backed [`DocumentStore`]. Grounded on the same WAL-mode,
//! connection-pool, batched-transaction pattern used elsewhere in this
//! crate for on-disk persistence. Structured sub-fields (selectors,
//! config snapshots, skill lists) are stored as JSON columns rather than
//! normalized tables — the document-store abstraction this backs does not
//! require relational joins across those fields.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{BoardFilter, BoxFuture, DocumentStore, JobFilter};
use crate::error::{EngineError, Result};
use crate::model::{
    EngineState, JobBoard, NormalizedJob, RawJob, ScheduleConfig, ScrapeJob, ScrapeJobStatus,
    ScrapeRun,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_boards (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                document TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS schedule_configs (
                id TEXT PRIMARY KEY,
                board_id TEXT NOT NULL,
                is_enabled INTEGER NOT NULL,
                next_run_at TEXT,
                document TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS scrape_jobs (
                id TEXT PRIMARY KEY,
                board_id TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                document TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS scrape_runs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                document TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS raw_jobs (
                id TEXT PRIMARY KEY,
                board_id TEXT NOT NULL,
                checksum TEXT NOT NULL,
                is_duplicate INTEGER NOT NULL,
                is_processed INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                document TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS raw_jobs_board_checksum
                ON raw_jobs(board_id, checksum) WHERE is_duplicate = 0;
            CREATE TABLE IF NOT EXISTS normalized_jobs (
                id TEXT PRIMARY KEY,
                board_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                document TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_heartbeat TEXT NOT NULL,
                document TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

macro_rules! doc_col {
    ($row:expr) => {
        serde_json::from_str(&$row.try_get::<String, _>("document")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))
    };
}

impl DocumentStore for SqliteStore {
    fn put_board(&self, board: JobBoard) -> BoxFuture<'_, Result<JobBoard>> {
        Box::pin(async move {
            let document = serde_json::to_string(&board)?;
            sqlx::query(
                "INSERT INTO job_boards (id, name, document) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, document = excluded.document",
            )
            .bind(board.id.to_string())
            .bind(&board.name)
            .bind(document)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    EngineError::conflict(format!("board name '{}' already exists", board.name))
                }
                other => other.into(),
            })?;
            Ok(board)
        })
    }

    fn get_board(&self, id: Uuid) -> BoxFuture<'_, Result<Option<JobBoard>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT document FROM job_boards WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| doc_col!(r)).transpose().map_err(EngineError::from)
        })
    }

    fn get_board_by_name(&self, name: &str) -> BoxFuture<'_, Result<Option<JobBoard>>> {
        let name = name.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT document FROM job_boards WHERE name = ?1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| doc_col!(r)).transpose().map_err(EngineError::from)
        })
    }

    fn list_boards(&self, filter: BoardFilter) -> BoxFuture<'_, Result<(Vec<JobBoard>, u64)>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT document FROM job_boards")
                .fetch_all(&self.pool)
                .await?;
            let mut items: Vec<JobBoard> = rows
                .into_iter()
                .map(|r| doc_col!(r))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
            items.retain(|b| !filter.active_only || b.is_active);
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
            let board = self
                .get_board(id)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("board {id}")))?;
            let mut board = board;
            board.is_active = false;
            board.updated_at = Utc::now();
            self.put_board(board).await?;
            Ok(())
        })
    }

    fn put_schedule(&self, schedule: ScheduleConfig) -> BoxFuture<'_, Result<ScheduleConfig>> {
        Box::pin(async move {
            let document = serde_json::to_string(&schedule)?;
            sqlx::query(
                "INSERT INTO schedule_configs (id, board_id, is_enabled, next_run_at, document)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    is_enabled = excluded.is_enabled,
                    next_run_at = excluded.next_run_at,
                    document = excluded.document",
            )
            .bind(schedule.id.to_string())
            .bind(schedule.board_id.to_string())
            .bind(schedule.is_enabled)
            .bind(schedule.next_run_at.map(|t| t.to_rfc3339()))
            .bind(document)
            .execute(&self.pool)
            .await?;
            Ok(schedule)
        })
    }

    fn get_schedule(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScheduleConfig>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT document FROM schedule_configs WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| doc_col!(r)).transpose().map_err(EngineError::from)
        })
    }

    fn list_schedules_for_board(
        &self,
        board_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ScheduleConfig>>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT document FROM schedule_configs WHERE board_id = ?1")
                .bind(board_id.to_string())
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter()
                .map(|r| doc_col!(r))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(EngineError::from)
        })
    }

    fn list_due_schedules(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<ScheduleConfig>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT document FROM schedule_configs
                 WHERE is_enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1",
            )
            .bind(now.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|r| doc_col!(r))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(EngineError::from)
        })
    }

    fn delete_schedule(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM schedule_configs WHERE id = ?1")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
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
            let mut tx = self.pool.begin().await?;
            let row = sqlx::query("SELECT document FROM schedule_configs WHERE id = ?1")
                .bind(schedule_id.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("schedule {schedule_id}")))?;
            let mut schedule: ScheduleConfig = doc_col!(row)?;
            if schedule.next_run_at != Some(expected_next_run_at) {
                return Err(EngineError::conflict(
                    "schedule already advanced by a concurrent tick",
                ));
            }
            schedule.next_run_at = Some(new_next_run_at);
            schedule.last_run_at = Some(now);

            sqlx::query(
                "UPDATE schedule_configs SET next_run_at = ?1, document = ?2 WHERE id = ?3",
            )
            .bind(schedule.next_run_at.map(|t| t.to_rfc3339()))
            .bind(serde_json::to_string(&schedule)?)
            .bind(schedule_id.to_string())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO scrape_jobs (id, board_id, status, priority, created_at, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(job.id.to_string())
            .bind(job.board_id.to_string())
            .bind("pending")
            .bind(job.priority)
            .bind(job.created_at.to_rfc3339())
            .bind(serde_json::to_string(&job)?)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(job)
        })
    }

    fn put_job(&self, job: ScrapeJob) -> BoxFuture<'_, Result<ScrapeJob>> {
        Box::pin(async move {
            let status = serde_json::to_value(job.status)?
                .as_str()
                .unwrap_or("pending")
                .to_string();
            sqlx::query(
                "INSERT INTO scrape_jobs (id, board_id, status, priority, created_at, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status, document = excluded.document",
            )
            .bind(job.id.to_string())
            .bind(job.board_id.to_string())
            .bind(status)
            .bind(job.priority)
            .bind(job.created_at.to_rfc3339())
            .bind(serde_json::to_string(&job)?)
            .execute(&self.pool)
            .await?;
            Ok(job)
        })
    }

    fn get_job(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScrapeJob>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT document FROM scrape_jobs WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| doc_col!(r)).transpose().map_err(EngineError::from)
        })
    }

    fn list_jobs(&self, filter: JobFilter) -> BoxFuture<'_, Result<(Vec<ScrapeJob>, u64)>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT document FROM scrape_jobs")
                .fetch_all(&self.pool)
                .await?;
            let mut items: Vec<ScrapeJob> = rows
                .into_iter()
                .map(|r| doc_col!(r))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
            items.retain(|j| filter.status.is_none_or(|s| j.status == s));
            items.retain(|j| filter.board_id.is_none_or(|b| j.board_id == b));
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
            let rows = sqlx::query(
                "SELECT document FROM scrape_jobs WHERE status = 'pending'
                 ORDER BY priority DESC, created_at ASC LIMIT ?1",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|r| doc_col!(r))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(EngineError::from)
        })
    }

    fn recent_job_statuses(
        &self,
        board_id: Uuid,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScrapeJobStatus>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT document FROM scrape_jobs WHERE board_id = ?1
                 AND status IN ('completed', 'failed', 'cancelled')
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .bind(board_id.to_string())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            let jobs: Vec<ScrapeJob> = rows
                .into_iter()
                .map(|r| doc_col!(r))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
            Ok(jobs.into_iter().map(|j| j.status).collect())
        })
    }

    fn claim_job(&self, id: Uuid, worker_id: &str) -> BoxFuture<'_, Result<Option<ScrapeJob>>> {
        let worker_id = worker_id.to_string();
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            let row = sqlx::query("SELECT document FROM scrape_jobs WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("job {id}")))?;
            let mut job: ScrapeJob = doc_col!(row)?;
            if job.status != ScrapeJobStatus::Pending {
                return Ok(None);
            }
            job.status = ScrapeJobStatus::Running;
            job.worker_id = Some(worker_id);
            job.started_at = Some(Utc::now());
            sqlx::query("UPDATE scrape_jobs SET status = 'running', document = ?1 WHERE id = ?2")
                .bind(serde_json::to_string(&job)?)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(Some(job))
        })
    }

    fn put_run(&self, run: ScrapeRun) -> BoxFuture<'_, Result<ScrapeRun>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO scrape_runs (id, job_id, page_number, document) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET document = excluded.document",
            )
            .bind(run.id.to_string())
            .bind(run.job_id.to_string())
            .bind(run.page_number)
            .bind(serde_json::to_string(&run)?)
            .execute(&self.pool)
            .await?;
            Ok(run)
        })
    }

    fn get_run(&self, id: Uuid) -> BoxFuture<'_, Result<Option<ScrapeRun>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT document FROM scrape_runs WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| doc_col!(r)).transpose().map_err(EngineError::from)
        })
    }

    fn list_runs_for_job(&self, job_id: Uuid) -> BoxFuture<'_, Result<Vec<ScrapeRun>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT document FROM scrape_runs WHERE job_id = ?1 ORDER BY page_number ASC",
            )
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|r| doc_col!(r))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(EngineError::from)
        })
    }

    fn bulk_upsert_raw_jobs(&self, raws: Vec<RawJob>) -> BoxFuture<'_, Result<Vec<RawJob>>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            let mut inserted = Vec::with_capacity(raws.len());
            for mut raw in raws {
                if !raw.is_duplicate {
                    let exists: Option<(i64,)> = sqlx::query_as(
                        "SELECT 1 FROM raw_jobs WHERE board_id = ?1 AND checksum = ?2 AND is_duplicate = 0",
                    )
                    .bind(raw.board_id.to_string())
                    .bind(&raw.checksum)
                    .fetch_optional(&mut *tx)
                    .await?;
                    if exists.is_some() {
                        raw.is_duplicate = true;
                    }
                }
                sqlx::query(
                    "INSERT INTO raw_jobs (id, board_id, checksum, is_duplicate, is_processed, created_at, document)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .bind(raw.id.to_string())
                .bind(raw.board_id.to_string())
                .bind(&raw.checksum)
                .bind(raw.is_duplicate)
                .bind(raw.is_processed)
                .bind(raw.created_at.to_rfc3339())
                .bind(serde_json::to_string(&raw)?)
                .execute(&mut *tx)
                .await?;
                inserted.push(raw);
            }
            tx.commit().await?;
            Ok(inserted)
        })
    }

    fn checksum_exists(&self, board_id: Uuid, checksum: &str) -> BoxFuture<'_, Result<bool>> {
        let checksum = checksum.to_string();
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as(
                "SELECT 1 FROM raw_jobs WHERE board_id = ?1 AND checksum = ?2 AND is_duplicate = 0",
            )
            .bind(board_id.to_string())
            .bind(checksum)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.is_some())
        })
    }

    fn list_unprocessed_raw_jobs(&self, limit: u64) -> BoxFuture<'_, Result<Vec<RawJob>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT document FROM raw_jobs WHERE is_processed = 0 AND is_duplicate = 0
                 ORDER BY created_at ASC LIMIT ?1",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|r| doc_col!(r))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(EngineError::from)
        })
    }

    fn mark_raw_job_processed(&self, id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE raw_jobs SET is_processed = 1 WHERE id = ?1")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(EngineError::not_found(format!("raw job {id}")));
            }
            Ok(())
        })
    }

    fn put_normalized_job(&self, job: NormalizedJob) -> BoxFuture<'_, Result<NormalizedJob>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO normalized_jobs (id, board_id, created_at, document)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET document = excluded.document",
            )
            .bind(job.id.to_string())
            .bind(job.board_id.to_string())
            .bind(job.created_at.to_rfc3339())
            .bind(serde_json::to_string(&job)?)
            .execute(&self.pool)
            .await?;
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
            let rows = sqlx::query("SELECT document, board_id FROM normalized_jobs ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
            let mut items = Vec::new();
            for row in rows {
                let bid: String = row.try_get("board_id")?;
                if let Some(filter) = board_id {
                    if bid != filter.to_string() {
                        continue;
                    }
                }
                let job: NormalizedJob = doc_col!(row)?;
                items.push(job);
            }
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
            let row = sqlx::query("SELECT document FROM engine_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
            match row {
                Some(r) => Ok(doc_col!(r)?),
                None => {
                    let state = super::memory::initial_engine_state();
                    sqlx::query(
                        "INSERT INTO engine_state (id, last_heartbeat, document) VALUES (1, ?1, ?2)",
                    )
                    .bind(state.last_heartbeat.to_rfc3339())
                    .bind(serde_json::to_string(&state)?)
                    .execute(&self.pool)
                    .await?;
                    Ok(state)
                }
            }
        })
    }

    fn put_engine_state(
        &self,
        expected_last_heartbeat: DateTime<Utc>,
        state: EngineState,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE engine_state SET last_heartbeat = ?1, document = ?2
                 WHERE id = 1 AND last_heartbeat = ?3",
            )
            .bind(state.last_heartbeat.to_rfc3339())
            .bind(serde_json::to_string(&state)?)
            .bind(expected_last_heartbeat.to_rfc3339())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(EngineError::conflict(
                    "engine state advanced by a concurrent heartbeat",
                ));
            }
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
            Ok(())
        })
    }
}
