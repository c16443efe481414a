//! `/engine` — the singleton heartbeat document and an on-demand refresh.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::Result;
use crate::model::EngineState;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/engine/state", get(get_state))
        .route("/engine/heartbeat", axum::routing::post(force_heartbeat))
}

async fn get_state(State(state): State<AppState>) -> Result<Json<EngineState>> {
    Ok(Json(state.store.get_engine_state().await?))
}

/// Forces an immediate heartbeat tick instead of waiting for the next
/// scheduled one, then returns the resulting snapshot.
async fn force_heartbeat(State(state): State<AppState>) -> Result<Json<EngineState>> {
    state.engine_state_task.tick().await?;
    Ok(Json(state.store.get_engine_state().await?))
}
