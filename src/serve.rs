//! Process entrypoint: loads configuration, wires every component, and
//! races the scheduler, worker pool, normalizer, heartbeat, and HTTP
//! server under one graceful-shutdown `tokio::select!`.

use std::path::PathBuf;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::RwLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::api::{self, ApiRateLimiter, AppState, LogRingBuffer, RuntimeSettings};
use crate::config::{AppConfig, Settings};
use crate::dedup::Deduper;
use crate::executor::Executor;
use crate::fetch::HttpFetcher;
use crate::httpclient::HttpClientConfig;
use crate::normalize::{NormalizerTask, RuleBasedBackend};
use crate::pool::{PoolConfig, WorkerPool};
use crate::ratelimit::RateLimiter;
use crate::schedule::Scheduler;
use crate::state::{EngineStateTask, HeartbeatConfig};
use crate::store::sqlite::SqliteStore;
use crate::store::DocumentStore;
use crate::worker::Worker;

/// Runs the engine until the process receives a shutdown signal.
pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app_config = match &config_path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    let settings = Arc::new(Settings::from_env()?);

    let log_buffer = Arc::new(LogRingBuffer::new());
    init_tracing(&settings.log_level, log_buffer.clone());

    tracing::info!(
        host = %app_config.server.host,
        port = app_config.server.port,
        store = %settings.store_connection_string,
        "starting autoscraper engine"
    );

    let store: Arc<dyn DocumentStore> = Arc::new(open_store(&settings.store_connection_string).await?);

    let http_client = HttpClientConfig::default()
        .with_timeout(std::time::Duration::from_secs(settings.default_request_timeout_s))
        .build()?;
    let fetcher = Arc::new(HttpFetcher::new(http_client));
    let rate_limiter = Arc::new(RateLimiter::new(settings.max_concurrent_jobs as usize));
    let deduper = Arc::new(Deduper::new());

    let executor = Arc::new(Executor::new(fetcher, rate_limiter, deduper, store.clone()));
    let worker = Arc::new(Worker::new(executor, store.clone()));
    let pool = Arc::new(WorkerPool::new(
        store.clone(),
        worker,
        PoolConfig {
            max_concurrent_jobs: settings.max_concurrent_jobs as usize,
            graceful_timeout: settings.graceful_shutdown_timeout,
            ..PoolConfig::default()
        },
    ));

    let scheduler = Arc::new(Scheduler::with_tick_interval(store.clone(), settings.scheduler_tick));
    let engine_state_task = Arc::new(EngineStateTask::new(store.clone(), pool.clone(), HeartbeatConfig {
        interval: settings.heartbeat_interval,
    }));
    let normalizer = Arc::new(NormalizerTask::new(
        store.clone(),
        Arc::new(RuleBasedBackend),
        std::time::Duration::from_secs(2),
    ));

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder installs exactly once per process");

    let runtime_settings = Arc::new(RwLock::new(RuntimeSettings::from_env_settings(&settings)));

    let state = AppState {
        store: store.clone(),
        pool: pool.clone(),
        scheduler: scheduler.clone(),
        engine_state_task: engine_state_task.clone(),
        settings: runtime_settings,
        base_settings: settings.clone(),
        logs: log_buffer,
        metrics_handle,
        auth_secret: Arc::new(settings.auth_secret.clone()),
        api_rate_limiter: Arc::new(ApiRateLimiter::new(
            settings.rate_limit_requests_per_window,
            settings.rate_limit_window,
        )),
        started_at: chrono::Utc::now(),
    };

    let router = api::router(state);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "control API listening");

    let shutdown = shutdown_signal();
    let make_service = router.into_make_service_with_connect_info::<std::net::SocketAddr>();

    tokio::select! {
        result = axum::serve(listener, make_service) => {
            if let Err(err) = result {
                tracing::error!(%err, "control API server error");
            }
        }
        result = scheduler.run() => {
            if let Err(err) = result {
                tracing::error!(%err, "scheduler loop error");
            }
        }
        result = pool.clone().run() => {
            if let Err(err) = result {
                tracing::error!(%err, "worker pool loop error");
            }
        }
        result = normalizer.run() => {
            if let Err(err) = result {
                tracing::error!(%err, "normalizer loop error");
            }
        }
        result = engine_state_task.run() => {
            if let Err(err) = result {
                tracing::error!(%err, "heartbeat loop error");
            }
        }
        _ = shutdown => {
            tracing::info!("shutdown signal received");
            scheduler.cancellation_token().cancel();
            pool.cancellation_token().cancel();
            normalizer.cancellation_token().cancel();
            engine_state_task.cancellation_token().cancel();
        }
    }

    tracing::info!("engine stopped");
    Ok(())
}

async fn open_store(connection_string: &str) -> anyhow::Result<SqliteStore> {
    match connection_string.strip_prefix("sqlite://") {
        Some(":memory:") => SqliteStore::open_in_memory().await,
        Some(path) => SqliteStore::open(path).await,
        None => anyhow::bail!("unsupported store connection string '{connection_string}' (expected sqlite://...)"),
    }
}

fn init_tracing(log_level: &str, log_buffer: Arc<LogRingBuffer>) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let buffer_layer = api::logbuf::LogBufferLayer::new(log_buffer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(buffer_layer)
        .try_init()
        .ok();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
