//! `/health` — liveness and readiness probes.
//!
//! Liveness never depends on downstream state: it answers "is the process
//! still here", not "is it useful". Readiness additionally requires the
//! store to answer and the scheduler to have ticked recently, so a load
//! balancer can pull a wedged instance out of rotation.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use super::AppState;

const READY_TICK_STALENESS_S: i64 = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
}

async fn health(state: State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    ready(state).await
}

async fn live() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "live" })))
}

#[derive(Debug, Serialize)]
struct ReadyBody {
    status: &'static str,
    store_reachable: bool,
    scheduler_tick_age_s: i64,
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let store_reachable = state.store.health_check().await.is_ok();
    let tick_age_s = (Utc::now() - state.scheduler.last_tick()).num_seconds();
    let scheduler_fresh = tick_age_s <= READY_TICK_STALENESS_S;

    let body = ReadyBody {
        status: if store_reachable && scheduler_fresh { "ready" } else { "not_ready" },
        store_reachable,
        scheduler_tick_age_s: tick_age_s,
    };
    let code = if store_reachable && scheduler_fresh { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(serde_json::to_value(body).unwrap_or(json!({}))))
}
