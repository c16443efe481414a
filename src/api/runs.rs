//! `/runs` — read-only view over individual page fetch attempts.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::ScrapeRun;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub job_id: Uuid,
}

async fn list_runs(State(state): State<AppState>, Query(query): Query<ListRunsQuery>) -> Result<Json<Vec<ScrapeRun>>> {
    Ok(Json(state.store.list_runs_for_job(query.job_id).await?))
}

async fn get_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScrapeRun>> {
    state
        .store
        .get_run(id)
        .await?
        .map(Json)
        .ok_or_else(|| EngineError::not_found(format!("run {id}")))
}
