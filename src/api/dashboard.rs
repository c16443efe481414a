//! `/dashboard` — aggregated counters for the operator landing page.
//! Nothing here is persisted; every field is recomputed from the store on
//! each request.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::model::{ScrapeJob, ScrapeJobStatus};
use crate::store::{BoardFilter, JobFilter};

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub active_boards: u64,
    pub total_boards: u64,
    pub jobs_today: u64,
    pub jobs_completed_today: u64,
    pub jobs_failed_today: u64,
    pub success_rate_today: f64,
    pub active_jobs: u64,
    pub queued_jobs: u64,
    pub recent_failures: Vec<ScrapeJob>,
}

async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardSummary>> {
    let (_, total_boards) = state.store.list_boards(BoardFilter::default()).await?;
    let (_, active_boards) = state
        .store
        .list_boards(BoardFilter { active_only: true, ..Default::default() })
        .await?;

    let (_, active_jobs) = state
        .store
        .list_jobs(JobFilter { status: Some(ScrapeJobStatus::Running), limit: 1, ..Default::default() })
        .await?;
    let (_, queued_jobs) = state
        .store
        .list_jobs(JobFilter { status: Some(ScrapeJobStatus::Pending), limit: 1, ..Default::default() })
        .await?;

    let today_start = Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    let (all_jobs, _) = state
        .store
        .list_jobs(JobFilter { limit: 10_000, ..Default::default() })
        .await?;
    let todays: Vec<&ScrapeJob> = all_jobs.iter().filter(|j| j.created_at >= today_start).collect();

    let jobs_completed_today = todays.iter().filter(|j| j.status == ScrapeJobStatus::Completed).count() as u64;
    let jobs_failed_today = todays.iter().filter(|j| j.status == ScrapeJobStatus::Failed).count() as u64;

    let (found_total, created_total): (u64, u64) =
        todays.iter().fold((0, 0), |(found, created), j| (found + j.items_found, created + j.items_created));
    let success_rate_today = if found_total == 0 { 0.0 } else { created_total as f64 / found_total as f64 };

    let recent_failures = todays
        .iter()
        .filter(|j| j.status == ScrapeJobStatus::Failed)
        .map(|j| (*j).clone())
        .rev()
        .take(10)
        .collect();

    Ok(Json(DashboardSummary {
        active_boards,
        total_boards,
        jobs_today: todays.len() as u64,
        jobs_completed_today,
        jobs_failed_today,
        success_rate_today,
        active_jobs,
        queued_jobs,
        recent_failures,
    }))
}
