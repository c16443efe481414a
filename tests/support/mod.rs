//! Shared harness for Control API integration tests: an in-memory store,
//! a worker pool that never actually dispatches (no pending jobs fed to
//! it by these tests), and a router wired exactly like [`autoscraper_engine::serve`].

use std::sync::Arc;

use autoscraper_engine::api::{self, ApiRateLimiter, AppState, LogRingBuffer, RuntimeSettings};
use autoscraper_engine::config::Settings;
use autoscraper_engine::dedup::Deduper;
use autoscraper_engine::executor::Executor;
use autoscraper_engine::fetch::HttpFetcher;
use autoscraper_engine::httpclient::build_default_client;
use autoscraper_engine::pool::{PoolConfig, WorkerPool};
use autoscraper_engine::ratelimit::RateLimiter;
use autoscraper_engine::schedule::Scheduler;
use autoscraper_engine::state::{EngineStateTask, HeartbeatConfig};
use autoscraper_engine::store::memory::MemoryStore;
use autoscraper_engine::store::DocumentStore;
use autoscraper_engine::worker::Worker;
use axum::Router;

pub const TEST_AUTH_SECRET: &str = "test-secret";

/// Builds a router backed by a fresh [`MemoryStore`]. None of these tests
/// drive the scheduler/pool/normalizer loops — they exercise the HTTP
/// surface directly against the store.
pub fn test_router() -> Router {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

    let http_client = build_default_client().expect("default client config is always valid");
    let fetcher = Arc::new(HttpFetcher::new(http_client));
    let rate_limiter = Arc::new(RateLimiter::new(1));
    let deduper = Arc::new(Deduper::new());
    let executor = Arc::new(Executor::new(fetcher, rate_limiter, deduper, store.clone()));
    let worker = Arc::new(Worker::new(executor, store.clone()));
    let pool = Arc::new(WorkerPool::new(store.clone(), worker, PoolConfig::default()));

    let scheduler = Arc::new(Scheduler::new(store.clone()));
    let engine_state_task = Arc::new(EngineStateTask::new(store.clone(), pool.clone(), HeartbeatConfig::default()));

    let settings = Arc::new(Settings {
        max_concurrent_jobs: 5,
        default_rate_limit_delay_s: 1.0,
        default_request_timeout_s: 30,
        scheduler_tick: std::time::Duration::from_secs(1),
        heartbeat_interval: std::time::Duration::from_secs(10),
        graceful_shutdown_timeout: std::time::Duration::from_secs(30),
        auth_secret: TEST_AUTH_SECRET.to_string(),
        store_connection_string: "sqlite://:memory:".to_string(),
        log_level: "info".to_string(),
        rate_limit_requests_per_window: 1_000,
        rate_limit_window: std::time::Duration::from_secs(60),
    });
    let runtime_settings = Arc::new(tokio::sync::RwLock::new(RuntimeSettings::from_env_settings(&settings)));

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();

    let state = AppState {
        store,
        pool,
        scheduler,
        engine_state_task,
        settings: runtime_settings,
        base_settings: settings.clone(),
        logs: Arc::new(LogRingBuffer::new()),
        metrics_handle,
        auth_secret: Arc::new(settings.auth_secret.clone()),
        api_rate_limiter: Arc::new(ApiRateLimiter::new(
            settings.rate_limit_requests_per_window,
            settings.rate_limit_window,
        )),
        started_at: chrono::Utc::now(),
    };

    api::router(state)
}
