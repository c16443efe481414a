//! End-to-end tests against the Control API router, store included.
//! Each test stands up a fresh in-memory-backed router; no test depends
//! on ordering or shared state from another.

mod support;

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use support::{test_router, TEST_AUTH_SECRET};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// `oneshot` bypasses `into_make_service_with_connect_info`, so the peer
// address the rate limiter's `ConnectInfo` extractor expects is stamped
// onto every request here instead.
fn test_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 1234))
}

fn authed(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(test_peer()))
        .header(header::AUTHORIZATION, format!("Bearer {TEST_AUTH_SECRET}"))
}

fn json_body(value: Value) -> Body {
    Body::from(value.to_string())
}

#[tokio::test]
async fn protected_route_without_token_is_rejected() {
    let router = test_router();
    let response = router
        .oneshot(
            Request::builder()
                .uri("/job-boards")
                .extension(ConnectInfo(test_peer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_endpoints_are_unauthenticated() {
    let router = test_router();
    let live = router
        .clone()
        .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let metrics = router
        .oneshot(Request::builder().uri("/system/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}

#[tokio::test]
async fn ready_reports_unready_before_the_scheduler_has_ever_ticked() {
    let router = test_router();
    let response = router
        .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["status"], "not_ready");
}

#[tokio::test]
async fn board_crud_round_trips_through_the_api() {
    let router = test_router();

    let create = router
        .clone()
        .oneshot(
            authed("POST", "/job-boards")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({
                    "name": "Acme Careers",
                    "type": "html",
                    "base_url": "https://acme.example.com/jobs",
                    "selectors": {"listing": "div.job", "title": "a.title"},
                })))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::OK);
    let created = body_json(create).await;
    let board_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["is_active"], true);
    assert_eq!(created["success_rate"], 0.0);

    let get = router
        .clone()
        .oneshot(authed("GET", &format!("/job-boards/{board_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);

    let patch = router
        .clone()
        .oneshot(
            authed("PATCH", &format!("/job-boards/{board_id}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"quality_threshold": 0.8})))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(patch.status(), StatusCode::OK);
    let patched = body_json(patch).await;
    assert_eq!(patched["quality_threshold"], 0.8);

    let delete = router
        .clone()
        .oneshot(authed("DELETE", &format!("/job-boards/{board_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::OK);

    let list = router
        .oneshot(authed("GET", "/job-boards?active_only=true").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let page = body_json(list).await;
    assert_eq!(page["total"], 0, "deactivated board must drop out of the active_only listing");
}

#[tokio::test]
async fn create_board_rejects_an_invalid_base_url() {
    let router = test_router();
    let response = router
        .oneshot(
            authed("POST", "/job-boards")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({
                    "name": "Broken",
                    "type": "rss",
                    "base_url": "not-a-url",
                })))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

async fn create_board(router: &axum::Router) -> String {
    let response = router
        .clone()
        .oneshot(
            authed("POST", "/job-boards")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({
                    "name": "Acme Careers",
                    "type": "rss",
                    "base_url": "https://acme.example.com/jobs",
                    "rss_url": "https://acme.example.com/jobs/feed",
                })))
                .unwrap(),
        )
        .await
        .unwrap();
    body_json(response).await["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn starting_a_job_against_an_inactive_board_is_a_conflict() {
    let router = test_router();
    let board_id = create_board(&router).await;

    router
        .clone()
        .oneshot(authed("DELETE", &format!("/job-boards/{board_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let response = router
        .oneshot(
            authed("POST", "/jobs")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"board_id": board_id})))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn job_lifecycle_pause_then_cancel() {
    let router = test_router();
    let board_id = create_board(&router).await;

    let start = router
        .clone()
        .oneshot(
            authed("POST", "/jobs")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"board_id": board_id})))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(start.status(), StatusCode::OK);
    let job = body_json(start).await;
    let job_id = job["id"].as_str().unwrap().to_string();
    assert_eq!(job["status"], "pending");

    let pause = router
        .clone()
        .oneshot(authed("POST", &format!("/jobs/{job_id}/pause")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(pause).await["status"], "paused");

    let cancel = router
        .clone()
        .oneshot(authed("POST", &format!("/jobs/{job_id}/cancel")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(cancel).await["status"], "cancelled");

    let second_cancel = router
        .oneshot(authed("POST", &format!("/jobs/{job_id}/cancel")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(second_cancel.status(), StatusCode::CONFLICT, "a terminal job cannot be cancelled twice");
}

#[tokio::test]
async fn paused_job_resumes_to_pending() {
    let router = test_router();
    let board_id = create_board(&router).await;

    let start = router
        .clone()
        .oneshot(
            authed("POST", "/jobs")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"board_id": board_id})))
                .unwrap(),
        )
        .await
        .unwrap();
    let job_id = body_json(start).await["id"].as_str().unwrap().to_string();

    router
        .clone()
        .oneshot(authed("POST", &format!("/jobs/{job_id}/pause")).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let resume = router
        .clone()
        .oneshot(authed("POST", &format!("/jobs/{job_id}/resume")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(resume).await["status"], "pending");

    let second_resume = router
        .oneshot(authed("POST", &format!("/jobs/{job_id}/resume")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(second_resume.status(), StatusCode::CONFLICT, "only a paused job can be resumed");
}

#[tokio::test]
async fn schedule_create_resolves_next_run_at_and_rejects_bad_cron() {
    let router = test_router();
    let board_id = create_board(&router).await;

    let bad = router
        .clone()
        .oneshot(
            authed("POST", "/schedules")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"board_id": board_id, "cron_expression": "not a cron"})))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let good = router
        .clone()
        .oneshot(
            authed("POST", "/schedules")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"board_id": board_id, "cron_expression": "@hourly"})))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(good.status(), StatusCode::OK);
    let schedule = body_json(good).await;
    assert!(schedule["next_run_at"].is_string());

    let list = router
        .oneshot(authed("GET", &format!("/schedules?board_id={board_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let schedules = body_json(list).await;
    assert_eq!(schedules.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn dashboard_reflects_board_and_job_counts() {
    let router = test_router();
    let board_id = create_board(&router).await;
    router
        .clone()
        .oneshot(
            authed("POST", "/jobs")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"board_id": board_id})))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = router
        .oneshot(authed("GET", "/dashboard").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let dashboard = body_json(response).await;
    assert_eq!(dashboard["total_boards"], 1);
    assert_eq!(dashboard["active_boards"], 1);
    assert_eq!(dashboard["jobs_today"], 1);
    assert_eq!(dashboard["queued_jobs"], 1);
}

#[tokio::test]
async fn engine_heartbeat_forces_a_recompute() {
    let router = test_router();
    let response = router
        .oneshot(authed("POST", "/engine/heartbeat").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let state = body_json(response).await;
    assert!(state["last_heartbeat"].is_string());
}

#[tokio::test]
async fn settings_patch_validates_and_reset_restores_env_defaults() {
    let router = test_router();

    let patch = router
        .clone()
        .oneshot(
            authed("PATCH", "/settings")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"max_concurrent_jobs": 0})))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(patch.status(), StatusCode::BAD_REQUEST, "zero concurrency is never valid");

    let good_patch = router
        .clone()
        .oneshot(
            authed("PATCH", "/settings")
                .header(header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({"max_concurrent_jobs": 20})))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(good_patch).await["max_concurrent_jobs"], 20);

    let reset = router
        .oneshot(authed("POST", "/settings/reset").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(reset).await["max_concurrent_jobs"], 5);
}

#[tokio::test]
async fn logs_endpoint_returns_an_array() {
    let router = test_router();
    let response = router
        .oneshot(authed("GET", "/logs?limit=10").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await.is_array());
}
