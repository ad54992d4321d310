mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cnet_auth::TestAuthenticator;
use serde_json::json;
use uuid::Uuid;

use common::{test_app, test_app_with};

#[tokio::test]
async fn trigger_queues_a_job_for_the_caller() {
    let app = test_app().await;

    let (status, body) = app
        .send_json(
            "POST",
            "/api/jobs/trigger",
            json!({"queue": "metrics", "jobName": "collect-metrics", "data": {}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["queue"], "metrics");
    assert_eq!(body["jobName"], "collect-metrics");
    assert_eq!(body["message"], "Job queued successfully");
    let job_id = body["jobId"].as_str().unwrap().to_owned();

    let (status, job) = app
        .get(&format!("/api/jobs/status?queue=metrics&jobId={job_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["jobId"], job_id.as_str());
    assert_eq!(job["state"], "waiting");
    assert_eq!(job["progress"], 0);
    assert_eq!(job["data"]["userId"], app.user.to_string());
}

#[tokio::test]
async fn trigger_keeps_an_explicit_user_id() {
    let app = test_app().await;
    let other = Uuid::new_v4();

    let (status, body) = app
        .send_json(
            "POST",
            "/api/jobs/trigger",
            json!({"queue": "metrics", "jobName": "collect-metrics", "data": {"userId": other}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let job_id = body["jobId"].as_str().unwrap();
    let (_, job) = app
        .get(&format!("/api/jobs/status?queue=metrics&jobId={job_id}"))
        .await;
    assert_eq!(job["data"]["userId"], other.to_string());
}

#[tokio::test]
async fn trigger_rejects_unknown_queues_and_bad_payloads() {
    let app = test_app().await;

    let (status, _) = app
        .send_json(
            "POST",
            "/api/jobs/trigger",
            json!({"queue": "emails", "jobName": "x", "data": {}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send_json(
            "POST",
            "/api/jobs/trigger",
            json!({"queue": "backups", "jobName": "backup", "data": {"type": "vm"}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send_json("POST", "/api/jobs/trigger", json!({"data": {}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.to_string().contains("jobName"));

    let (_, stats) = app.get("/api/jobs/status?queue=backups").await;
    assert_eq!(stats["stats"]["total"], 0);
}

#[tokio::test]
async fn anonymous_callers_are_refused() {
    let app = test_app_with(Arc::new(TestAuthenticator::anonymous()), Uuid::nil()).await;

    let (status, _) = app
        .send_json(
            "POST",
            "/api/jobs/trigger",
            json!({"queue": "metrics", "jobName": "collect-metrics"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/jobs/metrics").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_reports_counts_and_missing_jobs() {
    let app = test_app().await;
    for _ in 0..2 {
        app.send_json(
            "POST",
            "/api/jobs/trigger",
            json!({"queue": "notifications", "jobName": "custom",
                   "data": {"type": "custom", "message": "hi"}}),
        )
        .await;
    }

    let (status, body) = app.get("/api/jobs/status?queue=notifications").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"], "notifications");
    assert_eq!(body["stats"]["waiting"], 2);
    assert_eq!(body["stats"]["active"], 0);
    assert_eq!(body["stats"]["total"], 2);

    let (status, _) = app
        .get("/api/jobs/status?queue=notifications&jobId=does-not-exist")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get("/api/jobs/status").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/jobs/status?queue=emails").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_cover_every_queue() {
    let app = test_app().await;

    let (status, body) = app.get("/api/jobs/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let queues = body["queues"].as_object().unwrap();
    for name in [
        "metrics",
        "health-checks",
        "backups",
        "cleanup",
        "notifications",
        "service-integrations",
    ] {
        assert!(queues.contains_key(name), "missing {name}");
    }
    assert_eq!(queues.len(), 6);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn health_and_readiness_answer() {
    let app = test_app().await;

    let (status, body) = app
        .send(Request::get("/api/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app
        .send(Request::get("/api/ready").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn maintenance_mode_only_answers_liveness() {
    use tower::ServiceExt;

    let router = cnet_backend::maintenance_router("no JWT configuration found".into());

    let response = router
        .clone()
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(Request::get("/api/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = router
        .oneshot(Request::get("/api/jobs/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("no JWT configuration found"));
}
