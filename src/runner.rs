//! C3: one task per `HealthCheck`, driving the Idle→Starting→Running→
//! {Reported,TimedOut,Cancelled}→Idle state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::crd::HealthCheckStatus;
use crate::launcher;
use crate::leader::LeaderState;
use crate::metrics;
use crate::store::CheckStore;

#[derive(Debug, Clone, PartialEq)]
pub enum RunnerState {
    Idle,
    Starting,
    Running { uuid: String, started_unix: i64 },
    Reported,
    TimedOut,
    Cancelled,
}

/// Signal sent by the "run now" endpoint to force an off-cycle tick.
/// Rejected (by the caller checking `RunnerState::Idle` first) if a run is
/// already outstanding, matching the conflict behavior in §4.3.
pub type RunNowSender = watch::Sender<u64>;

pub struct RunnerHandle {
    pub state: Arc<tokio::sync::Mutex<RunnerState>>,
    pub run_now: RunNowSender,
}

/// Drive one check's runner loop until shutdown fires or leadership is
/// lost. `reporting_url` is the base URL checker pods POST their report to.
pub async fn run_checker_loop(
    store: Arc<dyn CheckStore>,
    leader: LeaderState,
    namespace: String,
    check_name: String,
    reporting_url: String,
    state_handle: Arc<tokio::sync::Mutex<RunnerState>>,
    mut run_now: watch::Receiver<u64>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let initial_interval = match store.get_check(&namespace, &check_name).await {
        Ok(check) => check.spec.run_interval_seconds,
        Err(_) => 600,
    };
    let mut ticker = tokio::time::interval(Duration::from_secs(initial_interval));
    ticker.tick().await; // interval fires immediately; first "tick" is a no-op

    loop {
        let timeout_sleep = match timeout_deadline(&state_handle).await {
            Some(duration) => tokio::time::sleep(duration),
            None => tokio::time::sleep(Duration::from_secs(3600)),
        };

        tokio::select! {
            _ = shutdown.recv() => {
                *state_handle.lock().await = RunnerState::Cancelled;
                info!(check = %check_name, "runner_cancelled_shutdown");
                return;
            }
            _ = ticker.tick() => {
                metrics::SCHEDULER_TICKS.inc();
                if leader.is_leader() {
                    maybe_start_run(&store, &namespace, &check_name, &reporting_url, &state_handle).await;
                }
            }
            Ok(_) = run_now.changed() => {
                if leader.is_leader() {
                    maybe_start_run(&store, &namespace, &check_name, &reporting_url, &state_handle).await;
                }
            }
            _ = timeout_sleep => {
                if leader.is_leader() {
                    enforce_timeout(&store, &namespace, &check_name, &state_handle).await;
                }
            }
        }

        if !leader.is_leader() && !matches!(*state_handle.lock().await, RunnerState::Idle) {
            *state_handle.lock().await = RunnerState::Cancelled;
            info!(check = %check_name, "runner_cancelled_leadership_lost");
            return;
        }
    }
}

/// Poll cadence while a run is outstanding; the authoritative timeout check
/// happens in `enforce_timeout` against the check's actual `timeoutSeconds`,
/// this just bounds how long a timeout can go unnoticed.
const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// `Some(poll interval)` while a run is outstanding, `None` when idle (so
/// the select arm effectively disables itself).
async fn timeout_deadline(state_handle: &Arc<tokio::sync::Mutex<RunnerState>>) -> Option<Duration> {
    match &*state_handle.lock().await {
        RunnerState::Running { .. } => Some(TIMEOUT_POLL_INTERVAL),
        _ => None,
    }
}

/// Running→TimedOut→Idle when `now - lastRunUnix >= timeout` and no report
/// has arrived (S3).
async fn enforce_timeout(
    store: &Arc<dyn CheckStore>,
    namespace: &str,
    check_name: &str,
    state_handle: &Arc<tokio::sync::Mutex<RunnerState>>,
) {
    let mut state = state_handle.lock().await;
    let (uuid, started_unix) = match &*state {
        RunnerState::Running { uuid, started_unix } => (uuid.clone(), *started_unix),
        _ => return,
    };

    let check = match store.get_check(namespace, check_name).await {
        Ok(check) => check,
        Err(_) => return,
    };
    let status = check.status.clone().unwrap_or_default();
    if status.current_uuid != uuid {
        // A report already cleared this run; nothing to time out.
        *state = RunnerState::Idle;
        return;
    }
    let now = chrono::Utc::now().timestamp();
    if now - started_unix < check.spec.timeout_seconds as i64 {
        return;
    }

    *state = RunnerState::TimedOut;
    let timed_out_status = HealthCheckStatus {
        ok: false,
        errors: vec!["check timed out".to_string()],
        current_uuid: String::new(),
        ..status
    };
    if let Err(err) = store.patch_status(namespace, check_name, &timed_out_status).await {
        warn!(check = %check_name, error = %err, "runner_timeout_write_failed");
    }
    info!(check = %check_name, "runner_timed_out");
    *state = RunnerState::Idle;
}

/// Idle→Starting→Running transition: mint a UUID, write status, launch the
/// pod. On pod-create failure, record `ok=false` and fall back to Idle.
async fn maybe_start_run(
    store: &Arc<dyn CheckStore>,
    namespace: &str,
    check_name: &str,
    reporting_url: &str,
    state_handle: &Arc<tokio::sync::Mutex<RunnerState>>,
) {
    let mut state = state_handle.lock().await;
    if !matches!(*state, RunnerState::Idle) {
        return;
    }

    let check = match store.get_check(namespace, check_name).await {
        Ok(check) => check,
        Err(err) => {
            warn!(check = %check_name, error = %err, "runner_start_get_check_failed");
            return;
        }
    };
    let current_status = check.status.clone().unwrap_or_default();
    if !current_status.is_idle() {
        // A prior run is still outstanding per the resource itself.
        return;
    }

    *state = RunnerState::Starting;
    let run_uuid = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let starting_status = HealthCheckStatus {
        current_uuid: run_uuid.clone(),
        last_run_unix: now,
        namespace: namespace.to_string(),
        ..current_status.clone()
    };
    if let Err(err) = store.patch_status(namespace, check_name, &starting_status).await {
        warn!(check = %check_name, error = %err, "runner_status_write_failed");
        *state = RunnerState::Idle;
        return;
    }

    let pod = launcher::build_checker_pod(check_name, namespace, &check.spec, &run_uuid, reporting_url);
    match store.create_checker_pod(namespace, pod).await {
        Ok(created) => {
            let pod_name = created.metadata.name.unwrap_or_default();
            info!(check = %check_name, uuid = %run_uuid, pod = %pod_name, "checker_pod_launched");
            *state = RunnerState::Running {
                uuid: run_uuid,
                started_unix: now,
            };
        }
        Err(err) => {
            warn!(check = %check_name, error = %err, "checker_pod_launch_failed");
            let failed_status = HealthCheckStatus {
                ok: false,
                errors: vec![format!("execution error: {err}")],
                current_uuid: String::new(),
                ..current_status
            };
            let _ = store.patch_status(namespace, check_name, &failed_status).await;
            *state = RunnerState::Idle;
        }
    }
}

/// Check the timeout arm: `now - lastRunUnix >= timeout` while outstanding.
/// Called from the periodic sweep that drives TimedOut transitions
/// independently of the ticker (so a run started between ticks still times
/// out promptly).
pub fn is_timed_out(status: &HealthCheckStatus, spec_timeout_seconds: u64, now_unix: i64) -> bool {
    !status.is_idle() && status.is_overdue(now_unix, spec_timeout_seconds)
}
