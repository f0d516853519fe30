mod common;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{test_spec, FakeCheckStore};
use kuberhealthy_core::crd::HealthCheckStatus;
use kuberhealthy_core::leader::LeaderState;
use kuberhealthy_core::retry::RetryPolicy;
use kuberhealthy_core::server::{build_router, AppState};
use tokio::sync::Mutex;
use tower::ServiceExt;

fn test_state(store: Arc<FakeCheckStore>, client: kube::Client) -> AppState {
    AppState {
        store,
        client,
        leader: LeaderState::new(),
        namespace: "ns1".to_string(),
        retry_policy: RetryPolicy::immediate(3),
        ready: Arc::new(Mutex::new(true)),
        runners: Arc::new(Mutex::new(HashMap::new())),
        run_now_senders: Arc::new(Mutex::new(HashMap::new())),
    }
}

fn fake_client() -> kube::Client {
    // Never dialed in these tests: /healthz is the only handler that uses
    // it, and none of these scenarios touch that route.
    kube::Client::try_from(kube::Config::new("https://127.0.0.1:1".parse().unwrap())).unwrap()
}

#[tokio::test]
async fn check_report_missing_header_is_rejected() {
    let store = Arc::new(FakeCheckStore::new());
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/check")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"OK": true, "Errors": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn check_report_wrong_content_type_is_rejected() {
    let store = Arc::new(FakeCheckStore::new());
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/check")
                .header("kh-run-uuid", "run-1")
                .header("content-type", "text/plain")
                .body(Body::from(r#"{"OK": true, "Errors": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn check_report_missing_content_type_is_rejected() {
    let store = Arc::new(FakeCheckStore::new());
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/check")
                .header("kh-run-uuid", "run-1")
                .body(Body::from(r#"{"OK": true, "Errors": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn check_report_malformed_schema_is_rejected() {
    let store = Arc::new(FakeCheckStore::new());
    store.insert_check(
        "ns1",
        "c1",
        test_spec("example/checker:latest"),
        HealthCheckStatus {
            current_uuid: "run-1".to_string(),
            ..Default::default()
        },
    );
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/check")
                .header("kh-run-uuid", "run-1")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"OK": false, "Errors": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn check_report_unknown_uuid_is_rejected() {
    let store = Arc::new(FakeCheckStore::new());
    store.insert_check("ns1", "c1", test_spec("example/checker:latest"), HealthCheckStatus::default());
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/check")
                .header("kh-run-uuid", "nonexistent")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"OK": true, "Errors": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn check_report_past_timeout_is_gated_out() {
    let store = Arc::new(FakeCheckStore::new());
    store.insert_check(
        "ns1",
        "c1",
        test_spec("example/checker:latest"),
        HealthCheckStatus {
            current_uuid: "run-1".to_string(),
            last_run_unix: 1, // far enough in the past to be past any timeout
            ..Default::default()
        },
    );
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/check")
                .header("kh-run-uuid", "run-1")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"OK": true, "Errors": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn check_report_valid_report_is_accepted_and_persisted() {
    let store = Arc::new(FakeCheckStore::new());
    store.insert_check(
        "ns1",
        "c1",
        test_spec("example/checker:latest"),
        HealthCheckStatus {
            current_uuid: "run-1".to_string(),
            last_run_unix: chrono::Utc::now().timestamp(),
            ..Default::default()
        },
    );
    let store_for_assert = store.clone();
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/check")
                .header("kh-run-uuid", "run-1")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"OK": true, "Errors": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let status = kuberhealthy_core::store::CheckStore::get_check(store_for_assert.as_ref(), "ns1", "c1")
        .await
        .unwrap()
        .status
        .unwrap();
    assert!(status.current_uuid.is_empty());
    assert!(status.ok);
}

#[tokio::test]
async fn run_endpoint_rejects_when_not_leader() {
    let store = Arc::new(FakeCheckStore::new());
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(Request::builder().method("POST").uri("/run?healthcheck=missing").body(Body::empty()).unwrap())
        .await
        .unwrap();

    // Not leader in this AppState, so 503 precedes the 404 the missing runner would otherwise get.
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn json_endpoint_reports_cluster_state() {
    let store = Arc::new(FakeCheckStore::new());
    store.insert_check(
        "ns1",
        "c1",
        test_spec("example/checker:latest"),
        HealthCheckStatus { ok: true, last_run_unix: 1000, ..Default::default() },
    );
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(Request::builder().method("GET").uri("/json").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = http_body_util::BodyExt::collect(response.into_body()).await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("\"ok\":true"));
    assert!(text.contains("\"lastRunUnix\":1000"));
    assert!(text.contains("\"nextRunUnix\""));
    assert!(text.contains("\"runIntervalSeconds\""));
    assert!(text.contains("\"timeoutSeconds\""));
    assert!(!text.contains("last_run_unix"));
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let store = Arc::new(FakeCheckStore::new());
    let app = build_router(test_state(store, fake_client()));

    let response = app
        .oneshot(Request::builder().method("GET").uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
