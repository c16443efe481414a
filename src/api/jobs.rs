//! `/jobs` — manual start plus the pause/cancel lifecycle controls a
//! running worker cooperatively observes (see [`crate::worker`]).

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{Page, ScrapeJob, ScrapeJobMode, ScrapeJobStatus};
use crate::store::JobFilter;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(start_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/pause", post(pause_job))
        .route("/jobs/{id}/resume", post(resume_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<ScrapeJobStatus>,
    pub board_id: Option<Uuid>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    50
}

async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListJobsQuery>) -> Result<Json<Page<ScrapeJob>>> {
    let (items, total) = state
        .store
        .list_jobs(JobFilter {
            status: query.status,
            board_id: query.board_id,
            skip: query.skip,
            limit: query.limit,
        })
        .await?;
    Ok(Json(Page {
        items,
        total,
        skip: query.skip,
        limit: query.limit,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub board_id: Uuid,
    #[serde(default)]
    pub mode: Option<ScrapeJobMode>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_pages: Option<u32>,
}

async fn start_job(State(state): State<AppState>, Json(request): Json<StartJobRequest>) -> Result<Json<ScrapeJob>> {
    let board = state
        .store
        .get_board(request.board_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("board {}", request.board_id)))?;
    if !board.is_active {
        return Err(EngineError::validation("board is not active"));
    }

    let job = ScrapeJob {
        id: Uuid::new_v4(),
        board_id: request.board_id,
        schedule_id: None,
        mode: request.mode.unwrap_or(ScrapeJobMode::Manual),
        status: ScrapeJobStatus::Pending,
        priority: request.priority.unwrap_or(0),
        max_pages: request.max_pages,
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
    };
    Ok(Json(state.store.put_job(job).await?))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScrapeJob>> {
    state
        .store
        .get_job(id)
        .await?
        .map(Json)
        .ok_or_else(|| EngineError::not_found(format!("job {id}")))
}

/// Requests a cooperative pause. The worker observes this on its next
/// page-boundary check; there is no mid-page preemption.
async fn pause_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScrapeJob>> {
    transition_non_terminal(&state, id, ScrapeJobStatus::Paused).await
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScrapeJob>> {
    transition_non_terminal(&state, id, ScrapeJobStatus::Cancelled).await
}

/// Hands a paused job back to the dispatch queue. The worker that picks it
/// up resumes at `page_cursor + 1`, not page 1 — no re-fetch of already
/// completed pages.
async fn resume_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScrapeJob>> {
    let mut job = state
        .store
        .get_job(id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("job {id}")))?;
    if job.status != ScrapeJobStatus::Paused {
        return Err(EngineError::conflict(format!("job {id} is not paused")));
    }
    job.status = ScrapeJobStatus::Pending;
    job.worker_id = None;
    Ok(Json(state.store.put_job(job).await?))
}

async fn transition_non_terminal(state: &AppState, id: Uuid, status: ScrapeJobStatus) -> Result<Json<ScrapeJob>> {
    let mut job = state
        .store
        .get_job(id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("job {id}")))?;
    if job.status.is_terminal() {
        return Err(EngineError::conflict(format!("job {id} is already in a terminal status")));
    }
    job.status = status;
    if status == ScrapeJobStatus::Cancelled {
        job.completed_at = Some(Utc::now());
    }
    Ok(Json(state.store.put_job(job).await?))
}
