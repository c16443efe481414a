//! `/schedules` — cron firing rules attached to a board.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::ScheduleConfig;
use crate::schedule::next_firing_after;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/{id}", get(get_schedule).patch(update_schedule).delete(delete_schedule))
}

#[derive(Debug, Deserialize)]
pub struct ListSchedulesQuery {
    pub board_id: Uuid,
}

async fn list_schedules(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<ListSchedulesQuery>,
) -> Result<Json<Vec<ScheduleConfig>>> {
    Ok(Json(state.store.list_schedules_for_board(query.board_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub board_id: Uuid,
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default = "default_one")]
    pub max_concurrent_jobs_for_this_schedule: u32,
    #[serde(default = "default_three")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub remote_only: bool,
    #[serde(default)]
    pub notify_on_completion: bool,
    #[serde(default)]
    pub notify_on_failure: bool,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_true() -> bool {
    true
}
fn default_one() -> u32 {
    1
}
fn default_three() -> u32 {
    3
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Json<ScheduleConfig>> {
    state
        .store
        .get_board(request.board_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("board {}", request.board_id)))?;

    let now = Utc::now();
    let next_run_at = next_firing_after(&request.cron_expression, &request.timezone, now)?;

    let schedule = ScheduleConfig {
        id: Uuid::new_v4(),
        board_id: request.board_id,
        cron_expression: request.cron_expression,
        timezone: request.timezone,
        is_enabled: request.is_enabled,
        max_concurrent_jobs_for_this_schedule: request.max_concurrent_jobs_for_this_schedule,
        retry_attempts: request.retry_attempts,
        priority: request.priority,
        next_run_at: Some(next_run_at),
        last_run_at: None,
        search_terms: request.search_terms,
        locations: request.locations,
        remote_only: request.remote_only,
        notify_on_completion: request.notify_on_completion,
        notify_on_failure: request.notify_on_failure,
        notification_emails: request.notification_emails,
        webhook_url: request.webhook_url,
        created_at: now,
        updated_at: now,
    };
    Ok(Json(state.store.put_schedule(schedule).await?))
}

async fn get_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScheduleConfig>> {
    state
        .store
        .get_schedule(id)
        .await?
        .map(Json)
        .ok_or_else(|| EngineError::not_found(format!("schedule {id}")))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateScheduleRequest {
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub is_enabled: Option<bool>,
    pub priority: Option<i32>,
    pub search_terms: Option<Vec<String>>,
    pub locations: Option<Vec<String>>,
    pub remote_only: Option<bool>,
    pub notify_on_completion: Option<bool>,
    pub notify_on_failure: Option<bool>,
    pub notification_emails: Option<Vec<String>>,
    pub webhook_url: Option<String>,
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateScheduleRequest>,
) -> Result<Json<ScheduleConfig>> {
    let mut schedule = state
        .store
        .get_schedule(id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("schedule {id}")))?;

    let cron_changed = patch.cron_expression.is_some() || patch.timezone.is_some();
    if let Some(cron_expression) = patch.cron_expression {
        schedule.cron_expression = cron_expression;
    }
    if let Some(timezone) = patch.timezone {
        schedule.timezone = timezone;
    }
    if cron_changed {
        schedule.next_run_at = Some(next_firing_after(&schedule.cron_expression, &schedule.timezone, Utc::now())?);
    }
    if let Some(v) = patch.is_enabled {
        schedule.is_enabled = v;
    }
    if let Some(v) = patch.priority {
        schedule.priority = v;
    }
    if let Some(v) = patch.search_terms {
        schedule.search_terms = v;
    }
    if let Some(v) = patch.locations {
        schedule.locations = v;
    }
    if let Some(v) = patch.remote_only {
        schedule.remote_only = v;
    }
    if let Some(v) = patch.notify_on_completion {
        schedule.notify_on_completion = v;
    }
    if let Some(v) = patch.notify_on_failure {
        schedule.notify_on_failure = v;
    }
    if let Some(v) = patch.notification_emails {
        schedule.notification_emails = v;
    }
    if let Some(v) = patch.webhook_url {
        schedule.webhook_url = Some(v);
    }
    schedule.updated_at = Utc::now();

    Ok(Json(state.store.put_schedule(schedule).await?))
}

async fn delete_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>> {
    state.store.delete_schedule(id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
