//! `/logs` — tail of the in-memory structured log ring buffer.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::logbuf::LogEntry;
use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/logs", get(tail_logs))
}

#[derive(Debug, Deserialize)]
pub struct TailLogsQuery {
    pub level: Option<String>,
    pub job_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    200
}

async fn tail_logs(State(state): State<AppState>, Query(query): Query<TailLogsQuery>) -> Json<Vec<LogEntry>> {
    Json(state.logs.tail(query.level.as_deref(), query.job_id.as_deref(), query.limit))
}
