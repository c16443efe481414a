//! `/settings` — system-wide limits the operator can retune without a
//! redeploy: concurrency ceiling, default rate limit, default retry policy.
//! Seeded from [`crate::config::Settings`] at startup and held in an
//! `RwLock` thereafter; changes apply to the next dispatch cycle, not to
//! jobs already running.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::Settings;
use crate::error::{EngineError, Result};

use super::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub max_concurrent_jobs: u32,
    pub default_rate_limit_delay_s: f64,
    pub default_request_timeout_s: u64,
    pub default_retry_attempts: u32,
}

impl RuntimeSettings {
    pub fn from_env_settings(settings: &Settings) -> Self {
        Self {
            max_concurrent_jobs: settings.max_concurrent_jobs,
            default_rate_limit_delay_s: settings.default_rate_limit_delay_s,
            default_request_timeout_s: settings.default_request_timeout_s,
            default_retry_attempts: 3,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(EngineError::validation("max_concurrent_jobs must be at least 1"));
        }
        if self.default_rate_limit_delay_s < 0.0 {
            return Err(EngineError::validation("default_rate_limit_delay_s cannot be negative"));
        }
        if self.default_request_timeout_s == 0 {
            return Err(EngineError::validation("default_request_timeout_s must be at least 1"));
        }
        Ok(())
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings).patch(update_settings))
        .route("/settings/reset", post(reset_settings))
        .route("/settings/test", post(test_settings))
}

async fn get_settings(State(state): State<AppState>) -> Json<RuntimeSettings> {
    Json(state.settings.read().await.clone())
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSettingsRequest {
    pub max_concurrent_jobs: Option<u32>,
    pub default_rate_limit_delay_s: Option<f64>,
    pub default_request_timeout_s: Option<u64>,
    pub default_retry_attempts: Option<u32>,
}

async fn update_settings(
    State(state): State<AppState>,
    Json(patch): Json<UpdateSettingsRequest>,
) -> Result<Json<RuntimeSettings>> {
    apply_patch(&state.settings, patch).await
}

async fn apply_patch(
    settings: &Arc<RwLock<RuntimeSettings>>,
    patch: UpdateSettingsRequest,
) -> Result<Json<RuntimeSettings>> {
    let mut candidate = settings.read().await.clone();
    if let Some(v) = patch.max_concurrent_jobs {
        candidate.max_concurrent_jobs = v;
    }
    if let Some(v) = patch.default_rate_limit_delay_s {
        candidate.default_rate_limit_delay_s = v;
    }
    if let Some(v) = patch.default_request_timeout_s {
        candidate.default_request_timeout_s = v;
    }
    if let Some(v) = patch.default_retry_attempts {
        candidate.default_retry_attempts = v;
    }
    candidate.validate()?;
    *settings.write().await = candidate.clone();
    Ok(Json(candidate))
}

async fn reset_settings(State(state): State<AppState>) -> Json<RuntimeSettings> {
    let fresh = RuntimeSettings::from_env_settings(&state.base_settings);
    *state.settings.write().await = fresh.clone();
    Json(fresh)
}

/// Validates a candidate settings payload without applying it.
async fn test_settings(Json(candidate): Json<RuntimeSettings>) -> Result<Json<serde_json::Value>> {
    candidate.validate()?;
    Ok(Json(serde_json::json!({ "valid": true })))
}
