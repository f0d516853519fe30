//! HTTP surface: `/check`, `/json`, `/metrics`, `/healthz`, `/readyz`,
//! `/run`. Router construction follows the teacher's
//! `commands/reconcile.rs`/`commands/webhook.rs` style —
//! `Router::new().route(...).with_state(...)`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use kube::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::aggregate::{self, ClusterState};
use crate::ingest::{self, ReportBody, ReportOutcome};
use crate::leader::LeaderState;
use crate::merge::{self, Report};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::runner::RunnerState;
use crate::store::CheckStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CheckStore>,
    pub client: Client,
    pub leader: LeaderState,
    pub namespace: String,
    pub retry_policy: RetryPolicy,
    pub ready: Arc<Mutex<bool>>,
    pub runners: Arc<Mutex<HashMap<String, Arc<Mutex<RunnerState>>>>>,
    pub run_now_senders: Arc<Mutex<HashMap<String, tokio::sync::watch::Sender<u64>>>>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/check", post(handle_check))
        .route("/json", get(handle_json))
        .route("/metrics", get(handle_metrics))
        .route("/healthz", get(handle_healthz))
        .route("/readyz", get(handle_readyz))
        .route("/run", post(handle_run))
        .with_state(state)
}

async fn handle_check(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> impl IntoResponse {
    let content_type_ok = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !content_type_ok {
        metrics::REPORT_OUTCOMES.with_label_values(&["reject_content_type"]).inc();
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "content-type must be application/json").into_response();
    }

    let Some(uuid) = headers.get("kh-run-uuid").and_then(|v| v.to_str().ok()) else {
        metrics::REPORT_OUTCOMES.with_label_values(&["reject_missing_header"]).inc();
        return (StatusCode::BAD_REQUEST, "missing kh-run-uuid header").into_response();
    };
    let uuid = uuid.to_string();

    let report_body: ReportBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            metrics::REPORT_OUTCOMES.with_label_values(&["reject_schema"]).inc();
            return (StatusCode::BAD_REQUEST, format!("malformed body: {err}")).into_response();
        }
    };
    if let Err(err) = ingest::validate_body_schema(&report_body) {
        metrics::REPORT_OUTCOMES.with_label_values(&["reject_schema"]).inc();
        return (StatusCode::BAD_REQUEST, err).into_response();
    }

    let checks = match state.store.list_checks(&state.namespace).await {
        Ok(checks) => checks,
        Err(err) => {
            metrics::REPORT_OUTCOMES.with_label_values(&["reject_store"]).inc();
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let statuses: Vec<(String, String, crate::crd::HealthCheckStatus)> = checks
        .iter()
        .map(|c| {
            (
                c.metadata.namespace.clone().unwrap_or_default(),
                c.metadata.name.clone().unwrap_or_default(),
                c.status.clone().unwrap_or_default(),
            )
        })
        .collect();

    let found = ingest::find_check_by_uuid(
        statuses.iter().map(|(ns, name, status)| (ns.as_str(), name.as_str(), status)),
        &uuid,
    );

    let Some((namespace, check_name)) = found else {
        metrics::REPORT_OUTCOMES.with_label_values(&["reject_unknown_uuid"]).inc();
        return (StatusCode::BAD_REQUEST, "unknown run uuid").into_response();
    };

    let matched_status = statuses
        .iter()
        .find(|(ns, name, _)| ns == namespace && name == check_name)
        .map(|(_, _, status)| status)
        .expect("find_check_by_uuid only returns keys present in statuses");
    let matched_check = checks
        .iter()
        .find(|c| c.metadata.namespace.as_deref() == Some(namespace) && c.metadata.name.as_deref() == Some(check_name))
        .expect("checks and statuses are built from the same list");

    let now_unix = chrono::Utc::now().timestamp();
    if !ingest::passes_gate(matched_status, &uuid, matched_check.spec.timeout_seconds, now_unix) {
        metrics::REPORT_OUTCOMES.with_label_values(&["reject_gate"]).inc();
        return (StatusCode::GONE, "report gate rejected").into_response();
    }

    let report = Report {
        ok: report_body.ok,
        errors: report_body.errors,
    };
    match merge::store_report(state.store.as_ref(), &state.retry_policy, namespace, check_name, &report).await {
        Ok(()) => {
            metrics::REPORT_OUTCOMES.with_label_values(&["accept"]).inc();
            let outcome = ReportOutcome::Accept {
                namespace: namespace.to_string(),
                check_name: check_name.to_string(),
            };
            StatusCode::from_u16(outcome.status_code()).unwrap().into_response()
        }
        Err(err) => {
            metrics::REPORT_OUTCOMES.with_label_values(&["reject_store"]).inc();
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonQuery {
    namespace: Option<String>,
}

async fn handle_json(State(state): State<AppState>, Query(query): Query<JsonQuery>) -> impl IntoResponse {
    let checks = match state.store.list_checks(&state.namespace).await {
        Ok(checks) => checks,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let filtered: Vec<_> = match &query.namespace {
        Some(namespaces) => {
            let wanted: Vec<&str> = namespaces.split(',').collect();
            checks
                .into_iter()
                .filter(|c| c.metadata.namespace.as_deref().is_some_and(|ns| wanted.contains(&ns)))
                .collect()
        }
        None => checks,
    };

    let state: ClusterState = aggregate::build_cluster_state(&filtered);
    Json(state).into_response()
}

async fn handle_metrics() -> impl IntoResponse {
    (StatusCode::OK, metrics::encode())
}

async fn handle_healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.client.apiserver_version().await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "unreachable"),
    }
}

async fn handle_readyz(State(state): State<AppState>) -> impl IntoResponse {
    if *state.ready.lock().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    healthcheck: String,
    namespace: Option<String>,
}

async fn handle_run(State(state): State<AppState>, Query(query): Query<RunQuery>) -> impl IntoResponse {
    if !state.leader.is_leader() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    let namespace = query.namespace.unwrap_or_else(|| state.namespace.clone());

    let runners = state.runners.lock().await;
    let key = format!("{namespace}/{}", query.healthcheck);
    let Some(runner_state) = runners.get(&key) else {
        return StatusCode::NOT_FOUND;
    };
    if !matches!(&*runner_state.lock().await, RunnerState::Idle) {
        return StatusCode::CONFLICT;
    }
    drop(runners);

    let senders = state.run_now_senders.lock().await;
    match senders.get(&key) {
        Some(sender) => {
            let _ = sender.send(sender.borrow().wrapping_add(1));
            StatusCode::ACCEPTED
        }
        None => StatusCode::NOT_FOUND,
    }
}
