//! `/job-boards` — registry CRUD, soft delete only.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{BoardType, JobBoard, Page};
use crate::store::BoardFilter;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/job-boards", get(list_boards).post(create_board))
        .route(
            "/job-boards/{id}",
            get(get_board).patch(update_board).delete(delete_board),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListBoardsQuery {
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub active_only: bool,
}

fn default_limit() -> u64 {
    50
}

async fn list_boards(
    State(state): State<AppState>,
    Query(query): Query<ListBoardsQuery>,
) -> Result<Json<Page<JobBoard>>> {
    let (items, total) = state
        .store
        .list_boards(BoardFilter {
            active_only: query.active_only,
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
pub struct CreateBoardRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub board_type: BoardType,
    pub base_url: String,
    #[serde(default)]
    pub rss_url: Option<String>,
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_s: f64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_s: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
}

fn default_rate_limit_delay() -> f64 {
    1.0
}
fn default_max_pages() -> u32 {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_quality_threshold() -> f64 {
    0.5
}

async fn create_board(
    State(state): State<AppState>,
    Json(request): Json<CreateBoardRequest>,
) -> Result<Json<JobBoard>> {
    if url::Url::parse(&request.base_url).is_err() {
        return Err(EngineError::validation(format!("invalid base_url '{}'", request.base_url)));
    }
    let now = Utc::now();
    let board = JobBoard {
        id: Uuid::new_v4(),
        name: request.name,
        board_type: request.board_type,
        base_url: request.base_url,
        rss_url: request.rss_url,
        selectors: request.selectors,
        headers: request.headers,
        rate_limit_delay_s: request.rate_limit_delay_s,
        max_pages: request.max_pages,
        request_timeout_s: request.request_timeout_s,
        retry_attempts: request.retry_attempts,
        quality_threshold: request.quality_threshold,
        is_active: true,
        total_scrapes: 0,
        successful_scrapes: 0,
        failed_scrapes: 0,
        last_scraped_at: None,
        success_rate: 0.0,
        average_response_time_ms: 0.0,
        created_at: now,
        updated_at: now,
    };
    Ok(Json(state.store.put_board(board).await?))
}

async fn get_board(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<JobBoard>> {
    state
        .store
        .get_board(id)
        .await?
        .map(Json)
        .ok_or_else(|| EngineError::not_found(format!("board {id}")))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBoardRequest {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub rss_url: Option<String>,
    pub selectors: Option<HashMap<String, String>>,
    pub headers: Option<HashMap<String, String>>,
    pub rate_limit_delay_s: Option<f64>,
    pub max_pages: Option<u32>,
    pub request_timeout_s: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub quality_threshold: Option<f64>,
    pub is_active: Option<bool>,
}

async fn update_board(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateBoardRequest>,
) -> Result<Json<JobBoard>> {
    let mut board = state
        .store
        .get_board(id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("board {id}")))?;

    if let Some(name) = patch.name {
        board.name = name;
    }
    if let Some(base_url) = patch.base_url {
        url::Url::parse(&base_url).map_err(|e| EngineError::validation(e.to_string()))?;
        board.base_url = base_url;
    }
    if let Some(rss_url) = patch.rss_url {
        board.rss_url = Some(rss_url);
    }
    if let Some(selectors) = patch.selectors {
        board.selectors = selectors;
    }
    if let Some(headers) = patch.headers {
        board.headers = headers;
    }
    if let Some(v) = patch.rate_limit_delay_s {
        board.rate_limit_delay_s = v;
    }
    if let Some(v) = patch.max_pages {
        board.max_pages = v;
    }
    if let Some(v) = patch.request_timeout_s {
        board.request_timeout_s = v;
    }
    if let Some(v) = patch.retry_attempts {
        board.retry_attempts = v;
    }
    if let Some(v) = patch.quality_threshold {
        board.quality_threshold = v;
    }
    if let Some(v) = patch.is_active {
        board.is_active = v;
    }
    board.updated_at = Utc::now();

    Ok(Json(state.store.put_board(board).await?))
}

async fn delete_board(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>> {
    state.store.deactivate_board(id).await?;
    Ok(Json(serde_json::json!({ "deactivated": true })))
}
