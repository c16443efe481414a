//! Control API (C11): the HTTP surface over every other component. Shape
//! follows the same `AppState` + `Router<AppState>`-per-resource pattern
//! this codebase already used for its original web surface — one module
//! per resource, merged into a single router, with cross-cutting concerns
//! (correlation id, auth) applied as middleware layers rather than inlined
//! into every handler.

mod boards;
mod dashboard;
mod engine;
mod health;
mod jobs;
pub mod logbuf;
pub mod middleware;
pub mod rate_limit;
mod runs;
mod schedules;
mod settings;
mod logs;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::schedule::Scheduler;
use crate::state::EngineStateTask;
use crate::store::DocumentStore;
use crate::pool::WorkerPool;

pub use logbuf::LogRingBuffer;
pub use rate_limit::ApiRateLimiter;
pub use settings::RuntimeSettings;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub pool: Arc<WorkerPool>,
    pub scheduler: Arc<Scheduler>,
    pub engine_state_task: Arc<EngineStateTask>,
    pub settings: Arc<RwLock<RuntimeSettings>>,
    pub base_settings: Arc<Settings>,
    pub logs: Arc<LogRingBuffer>,
    pub metrics_handle: PrometheusHandle,
    pub auth_secret: Arc<String>,
    pub api_rate_limiter: Arc<ApiRateLimiter>,
    pub started_at: DateTime<Utc>,
}

/// Assembles the full Control API router. Health endpoints are mounted
/// outside the bearer-auth layer (liveness must answer even when the
/// shared secret is misconfigured) and outside the per-client rate limit;
/// every other route requires both.
pub fn router(state: AppState) -> Router {
    let public = health::router().route("/system/metrics", axum::routing::get(system_metrics));

    let protected = boards::router()
        .merge(schedules::router())
        .merge(jobs::router())
        .merge(runs::router())
        .merge(dashboard::router())
        .merge(engine::router())
        .merge(settings::router())
        .merge(logs::router())
        .layer(from_fn_with_state(state.clone(), middleware::require_bearer_token))
        .layer(from_fn_with_state(state.clone(), rate_limit::enforce));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(from_fn(middleware::correlation_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn system_metrics(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics_handle.render())
}
