//! Core data model shared by every component.
//!
//! Entities are unidirectionally linked by id; nothing holds a back-pointer.
//! Relationships are materialized by querying the [`crate::store`], never by
//! following an object reference.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Integration style for a job board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardType {
    Rss,
    Html,
    Api,
    Hybrid,
}

/// A configured source of job listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobBoard {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub board_type: BoardType,
    pub base_url: String,
    pub rss_url: Option<String>,
    /// field -> CSS/XPath selector
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub rate_limit_delay_s: f64,
    pub max_pages: u32,
    pub request_timeout_s: u64,
    pub retry_attempts: u32,
    pub quality_threshold: f64,
    pub is_active: bool,

    // Aggregate counters, maintained by the worker and never by the API.
    pub total_scrapes: u64,
    pub successful_scrapes: u64,
    pub failed_scrapes: u64,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub average_response_time_ms: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobBoard {
    /// True once a board's last 20 jobs have failed more than half the time.
    /// Evaluated by the scheduler against the store; never persisted, to
    /// avoid a second source of truth alongside the counters above.
    pub fn is_auto_flagged(recent_statuses: &[ScrapeJobStatus]) -> bool {
        if recent_statuses.is_empty() {
            return false;
        }
        let sample = &recent_statuses[..recent_statuses.len().min(20)];
        let failed = sample
            .iter()
            .filter(|s| matches!(s, ScrapeJobStatus::Failed))
            .count();
        (failed as f64) / (sample.len() as f64) > 0.5
    }
}

/// Cron-driven firing rule attached to a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub id: Uuid,
    pub board_id: Uuid,
    pub cron_expression: String,
    pub timezone: String,
    pub is_enabled: bool,
    pub max_concurrent_jobs_for_this_schedule: u32,
    pub retry_attempts: u32,
    pub priority: i32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,

    // Search-query parameterization, supplemented from the original model.
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    pub remote_only: bool,

    // Notification sink configuration; delivery itself is an external port.
    pub notify_on_completion: bool,
    pub notify_on_failure: bool,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    pub webhook_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a [`ScrapeJob`] was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeJobMode {
    Manual,
    Scheduled,
    Continuous,
}

/// Lifecycle status of a [`ScrapeJob`]. See [`crate::worker`] for the
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeJobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ScrapeJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScrapeJobStatus::Completed | ScrapeJobStatus::Failed | ScrapeJobStatus::Cancelled
        )
    }
}

/// One execution attempt of a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: Uuid,
    pub board_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub mode: ScrapeJobMode,
    pub status: ScrapeJobStatus,
    pub priority: i32,
    pub max_pages: Option<u32>,
    pub page_cursor: u32,
    pub consecutive_empty_pages: u32,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_s: Option<f64>,

    pub items_found: u64,
    pub items_created: u64,
    pub items_updated: u64,
    pub items_skipped: u64,

    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub retry_count: u32,

    /// Deep copy of the board config at dispatch time, so a later edit to
    /// the board doesn't change the behavior of an in-flight job.
    pub config_snapshot: serde_json::Value,

    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScrapeJob {
    pub fn success_rate(&self) -> f64 {
        if self.items_found == 0 {
            return 0.0;
        }
        self.items_created as f64 / self.items_found as f64
    }
}

/// Extraction strategy for one [`ScrapeRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Rss,
    Html,
    Api,
}

/// One page fetch inside a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub run_type: RunType,
    pub url: String,
    pub page_number: u32,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,

    pub http_status_code: Option<u16>,
    pub response_size_bytes: Option<u64>,

    pub items_found: u64,
    pub items_processed: u64,
    pub items_created: u64,
    pub items_updated: u64,
    pub items_skipped: u64,

    pub error: Option<String>,
    /// Optional HTML capture for debugging a failed extraction.
    pub raw_html: Option<String>,
}

/// An unnormalized extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawJob {
    pub id: Uuid,
    pub run_id: Uuid,
    pub board_id: Uuid,

    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: String,
    pub url: String,
    pub salary_text: Option<String>,
    pub job_type_text: Option<String>,
    pub posted_date_text: Option<String>,

    pub raw_data: serde_json::Value,
    pub html_snapshot: Option<String>,

    pub is_processed: bool,
    pub is_duplicate: bool,
    /// SHA-256 hex digest over the normalized content tuple.
    pub checksum: String,
    /// SHA-256 hex digest of `url`, used by the Deduper's URL-seen cache.
    pub url_hash: String,

    pub created_at: DateTime<Utc>,
}

/// Canonical job type, after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FullTime,
    PartTime,
    Contract,
    Temporary,
    Internship,
}

/// Which backend produced a [`NormalizedJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    RuleBased,
    Ml,
    Hybrid,
}

/// A cleaned record with a 1:1 relation to its [`RawJob`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub id: Uuid,
    pub raw_job_id: Uuid,
    pub board_id: Uuid,

    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: String,
    pub requirements: Option<String>,
    pub benefits: Option<String>,

    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
    pub salary_period: Option<String>,

    pub job_type: Option<JobType>,
    pub experience_level: Option<String>,
    pub remote_allowed: Option<bool>,

    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,

    pub posted_date: Option<DateTime<Utc>>,
    pub skills: Vec<String>,
    pub tags: Vec<String>,

    pub quality_score: f64,
    pub completeness_score: f64,
    pub normalization_confidence: f64,
    pub normalization_method: NormalizationMethod,
    pub is_published: bool,
    pub job_post_id: Option<String>,

    pub duplicate_of: Option<Uuid>,
    pub exported_to_main_db: bool,
    pub exported_at: Option<DateTime<Utc>>,
    pub export_error: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Status of the engine as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Running,
    Paused,
    Error,
    Maintenance,
}

/// A singleton snapshot of engine health, updated via compare-and-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub status: EngineStatus,
    pub health_status: String,
    pub last_heartbeat: DateTime<Utc>,

    pub active_jobs_count: u32,
    pub queued_jobs_count: u32,
    pub max_concurrent_jobs: u32,
    pub maintenance_mode: bool,

    pub total_jobs_processed: u64,
    pub total_jobs_completed: u64,
    pub total_jobs_failed: u64,
    pub total_jobs_today: u64,
    pub success_rate: f64,

    pub cpu_usage_percent: f64,
    pub memory_usage_mb: f64,

    pub last_error: Option<String>,
    pub consecutive_errors: u32,

    pub uptime_s: u64,
    pub version: String,
    pub host_name: String,
    pub process_id: u32,
}

impl EngineState {
    pub fn derive_health_status(consecutive_errors: u32) -> &'static str {
        match consecutive_errors {
            0 => "healthy",
            1..=4 => "degraded",
            _ => "unhealthy",
        }
    }

    pub fn derive_status(
        active_jobs_count: u32,
        queued_jobs_count: u32,
        maintenance_mode: bool,
        consecutive_errors: u32,
    ) -> EngineStatus {
        if maintenance_mode {
            EngineStatus::Paused
        } else if consecutive_errors >= 5 {
            EngineStatus::Error
        } else if active_jobs_count > 0 || queued_jobs_count > 0 {
            EngineStatus::Running
        } else {
            EngineStatus::Idle
        }
    }
}

/// Page of results returned by every list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub skip: u64,
    pub limit: u64,
}
