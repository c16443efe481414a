//! Scheduler (C9): 1 Hz tick loop that turns due [`ScheduleConfig`]s into
//! PENDING [`ScrapeJob`]s. Missed firings are never replayed — a schedule
//! that was down for an hour fires once on recovery, not once per missed
//! interval, since replay would burst-dispatch stale work.

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{JobBoard, ScheduleConfig, ScrapeJob, ScrapeJobMode, ScrapeJobStatus};
use crate::store::DocumentStore;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Resolves `@hourly`/`@daily`/`@weekly`/`@monthly` aliases to 5-field cron
/// before handing off to the `cron` crate, which otherwise only accepts
/// its native 7-field (with seconds + year) syntax.
fn parse_cron(expr: &str) -> Result<CronSchedule> {
    let normalized = match expr.trim() {
        "@hourly" => "0 0 * * * *".to_string(),
        "@daily" => "0 0 0 * * *".to_string(),
        "@weekly" => "0 0 0 * * SUN".to_string(),
        "@monthly" => "0 0 0 1 * *".to_string(),
        five_field => {
            // the `cron` crate wants a leading seconds field; a spec-style
            // 5-field expression implicitly fires at second 0.
            if five_field.split_whitespace().count() == 5 {
                format!("0 {five_field}")
            } else {
                five_field.to_string()
            }
        }
    };
    CronSchedule::from_str(&normalized)
        .map_err(|e| EngineError::validation(format!("invalid cron expression '{expr}': {e}")))
}

/// Next firing strictly after `after`, evaluated in `schedule`'s IANA zone
/// and returned in UTC. Storage is always UTC; only evaluation is local.
pub fn next_firing_after(cron_expression: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse_cron(cron_expression)?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| EngineError::validation(format!("unknown IANA timezone '{timezone}'")))?;
    let after_local = after.with_timezone(&tz);
    schedule
        .after(&after_local)
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| EngineError::internal("cron schedule produced no future firing"))
}

pub struct Scheduler {
    store: Arc<dyn DocumentStore>,
    tick_interval: Duration,
    cancellation: CancellationToken,
    last_tick_unix: AtomicI64,
}

impl Scheduler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_tick_interval(store, DEFAULT_TICK_INTERVAL)
    }

    pub fn with_tick_interval(store: Arc<dyn DocumentStore>, tick_interval: Duration) -> Self {
        Self {
            store,
            tick_interval,
            cancellation: CancellationToken::new(),
            last_tick_unix: AtomicI64::new(0),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Time of the last completed tick, used by the readiness probe to
    /// detect a hung dispatch loop. Zero (the epoch) before the first tick.
    pub fn last_tick(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_tick_unix.load(Ordering::Relaxed), 0).unwrap_or_else(Utc::now)
    }

    pub async fn run(&self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
            if let Err(err) = self.tick().await {
                tracing::warn!(%err, "scheduler tick failed");
            }
        }
    }

    /// Processes every due schedule once. Exposed separately from `run`
    /// so tests can drive it deterministically without sleeping.
    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let due = self.store.list_due_schedules(now).await?;
        for schedule in due {
            if let Err(err) = self.dispatch_one(&schedule, now).await {
                tracing::warn!(schedule_id = %schedule.id, %err, "failed to dispatch due schedule");
            }
        }
        self.last_tick_unix.store(now.timestamp(), Ordering::Relaxed);
        Ok(())
    }

    async fn dispatch_one(&self, schedule: &ScheduleConfig, now: DateTime<Utc>) -> Result<()> {
        let board = self
            .store
            .get_board(schedule.board_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("board {} for schedule {}", schedule.board_id, schedule.id)))?;

        let recent_statuses = self.store.recent_job_statuses(board.id, 20).await?;
        if JobBoard::is_auto_flagged(&recent_statuses) {
            tracing::warn!(board_id = %board.id, "board auto-flagged on sustained failure, skipping scheduled dispatch");
            return Ok(());
        }

        let expected_next_run_at = schedule
            .next_run_at
            .ok_or_else(|| EngineError::internal("due schedule missing next_run_at"))?;
        let new_next_run_at = next_firing_after(&schedule.cron_expression, &schedule.timezone, expected_next_run_at)?;

        let job = ScrapeJob {
            id: Uuid::new_v4(),
            board_id: schedule.board_id,
            schedule_id: Some(schedule.id),
            mode: ScrapeJobMode::Scheduled,
            status: ScrapeJobStatus::Pending,
            priority: schedule.priority,
            max_pages: Some(board.max_pages),
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
            created_at: now,
        };

        self.store
            .dispatch_due_schedule(schedule.id, expected_next_run_at, new_next_run_at, now, job)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoardType;
    use crate::store::memory::MemoryStore;
    use std::collections::HashMap;

    fn board() -> crate::model::JobBoard {
        crate::model::JobBoard {
            id: Uuid::new_v4(),
            name: "demo".to_string(),
            board_type: BoardType::Rss,
            base_url: "http://example.test".to_string(),
            rss_url: Some("http://example.test/feed".to_string()),
            selectors: HashMap::new(),
            headers: HashMap::new(),
            rate_limit_delay_s: 1.0,
            max_pages: 3,
            request_timeout_s: 30,
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

    #[test]
    fn hourly_alias_resolves() {
        let now = Utc::now();
        let next = next_firing_after("@hourly", "UTC", now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn next_firing_is_strictly_after_input_even_on_exact_match() {
        // every-minute cron evaluated exactly at its own firing instant
        // must still advance, never return the same instant back.
        let now = Utc::now().date_naive().and_hms_opt(12, 0, 0).unwrap().and_utc();
        let next = next_firing_after("* * * * *", "UTC", now).unwrap();
        assert!(next > now);
    }

    #[tokio::test]
    async fn tick_dispatches_due_schedule_and_advances_next_run() {
        let store = Arc::new(MemoryStore::new());
        let board = board();
        store.put_board(board.clone()).await.unwrap();

        let now = Utc::now();
        let schedule = ScheduleConfig {
            id: Uuid::new_v4(),
            board_id: board.id,
            cron_expression: "* * * * *".to_string(),
            timezone: "UTC".to_string(),
            is_enabled: true,
            max_concurrent_jobs_for_this_schedule: 1,
            retry_attempts: 3,
            priority: 5,
            next_run_at: Some(now - chrono::Duration::minutes(1)),
            last_run_at: None,
            search_terms: vec![],
            locations: vec![],
            remote_only: false,
            notify_on_completion: false,
            notify_on_failure: false,
            notification_emails: vec![],
            webhook_url: None,
            created_at: now,
            updated_at: now,
        };
        store.put_schedule(schedule.clone()).await.unwrap();

        let scheduler = Scheduler::new(store.clone());
        scheduler.tick().await.unwrap();

        let (jobs, total) = store
            .list_jobs(crate::store::JobFilter::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(jobs[0].priority, 5);
        assert_eq!(jobs[0].mode, ScrapeJobMode::Scheduled);

        let updated = store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert!(updated.next_run_at.unwrap() > now, "next_run_at must advance past now, not replay the missed firing");
    }

    #[tokio::test]
    async fn auto_flagged_board_is_skipped_without_consuming_the_firing() {
        let store = Arc::new(MemoryStore::new());
        let board = board();
        store.put_board(board.clone()).await.unwrap();

        for _ in 0..12 {
            let mut j = job(board.id);
            j.status = ScrapeJobStatus::Failed;
            store.put_job(j).await.unwrap();
        }

        let now = Utc::now();
        let schedule = ScheduleConfig {
            id: Uuid::new_v4(),
            board_id: board.id,
            cron_expression: "* * * * *".to_string(),
            timezone: "UTC".to_string(),
            is_enabled: true,
            max_concurrent_jobs_for_this_schedule: 1,
            retry_attempts: 3,
            priority: 0,
            next_run_at: Some(now - chrono::Duration::minutes(1)),
            last_run_at: None,
            search_terms: vec![],
            locations: vec![],
            remote_only: false,
            notify_on_completion: false,
            notify_on_failure: false,
            notification_emails: vec![],
            webhook_url: None,
            created_at: now,
            updated_at: now,
        };
        store.put_schedule(schedule.clone()).await.unwrap();

        let scheduler = Scheduler::new(store.clone());
        scheduler.tick().await.unwrap();

        let (_, total) = store.list_jobs(crate::store::JobFilter::default()).await.unwrap();
        assert_eq!(total, 12, "an auto-flagged board must not receive a new scheduled job");

        let unchanged = store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(
            unchanged.next_run_at, schedule.next_run_at,
            "skipping dispatch must leave next_run_at untouched so the schedule is reconsidered next tick"
        );
    }

    fn job(board_id: Uuid) -> ScrapeJob {
        ScrapeJob {
            id: Uuid::new_v4(),
            board_id,
            schedule_id: None,
            mode: ScrapeJobMode::Manual,
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
    async fn does_not_double_dispatch_on_concurrent_ticks() {
        let store = Arc::new(MemoryStore::new());
        let board = board();
        store.put_board(board.clone()).await.unwrap();

        let now = Utc::now();
        let schedule = ScheduleConfig {
            id: Uuid::new_v4(),
            board_id: board.id,
            cron_expression: "* * * * *".to_string(),
            timezone: "UTC".to_string(),
            is_enabled: true,
            max_concurrent_jobs_for_this_schedule: 1,
            retry_attempts: 3,
            priority: 0,
            next_run_at: Some(now - chrono::Duration::minutes(1)),
            last_run_at: None,
            search_terms: vec![],
            locations: vec![],
            remote_only: false,
            notify_on_completion: false,
            notify_on_failure: false,
            notification_emails: vec![],
            webhook_url: None,
            created_at: now,
            updated_at: now,
        };
        store.put_schedule(schedule.clone()).await.unwrap();

        let scheduler = Scheduler::new(store.clone());
        let (a, b) = tokio::join!(scheduler.tick(), scheduler.tick());
        a.unwrap();
        b.unwrap();

        let (_, total) = store
            .list_jobs(crate::store::JobFilter::default())
            .await
            .unwrap();
        assert_eq!(total, 1, "racing ticks on the same schedule must dispatch exactly once");
    }
}
