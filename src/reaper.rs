//! C7: reaps terminated checker pods and orphaned status records. Runs only
//! while leader, on a fixed interval (§4.7).
//!
//! Per the Open Question decision recorded in DESIGN.md: the absolute-age
//! sweep runs first, then the per-check-name cap sweep, within one cycle.

use std::collections::HashMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

use crate::crd::HealthCheckStatus;
use crate::launcher::{LABEL_CHECK_NAME, LABEL_RUN_UUID};
use crate::leader::LeaderState;
use crate::metrics;
use crate::store::CheckStore;

pub const REAP_INTERVAL: Duration = Duration::from_secs(3 * 60);
const SUCCEEDED_MAX_AGE: Duration = Duration::from_secs(5 * 3600);
const FAILED_MAX_AGE: Duration = Duration::from_secs(120 * 3600);

fn pod_phase(pod: &Pod) -> &str {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("")
}

fn pod_age(pod: &Pod, now_unix: i64) -> Option<i64> {
    pod.status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .map(|t| now_unix - t.0.timestamp())
}

fn pod_check_name(pod: &Pod) -> Option<&str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_CHECK_NAME))
        .map(String::as_str)
}

/// Pods whose phase/age unconditionally exceed their threshold, regardless
/// of `maxCheckPods`.
fn pods_past_absolute_age(pods: &[Pod], now_unix: i64) -> Vec<String> {
    pods.iter()
        .filter_map(|pod| {
            let name = pod.metadata.name.clone()?;
            let age = pod_age(pod, now_unix)?;
            let threshold = match pod_phase(pod) {
                "Succeeded" => SUCCEEDED_MAX_AGE,
                "Failed" => FAILED_MAX_AGE,
                _ => return None,
            };
            (age as u64 > threshold.as_secs()).then_some(name)
        })
        .collect()
}

/// Among the pods that survive the absolute-age sweep, delete the oldest
/// terminal pods per check name until at most `max_per_check` remain (P7).
fn pods_over_cap(pods: &[Pod], max_per_check: usize) -> Vec<String> {
    let mut by_check: HashMap<String, Vec<&Pod>> = HashMap::new();
    for pod in pods {
        if !matches!(pod_phase(pod), "Succeeded" | "Failed") {
            continue;
        }
        if let Some(check_name) = pod_check_name(pod) {
            by_check.entry(check_name.to_string()).or_default().push(pod);
        }
    }

    let mut to_delete = Vec::new();
    for pods in by_check.values_mut() {
        pods.sort_by_key(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.start_time.as_ref())
                .map(|t| t.0.timestamp())
                .unwrap_or(0)
        });
        if pods.len() > max_per_check {
            for pod in &pods[..pods.len() - max_per_check] {
                if let Some(name) = &pod.metadata.name {
                    to_delete.push(name.clone());
                }
            }
        }
    }
    to_delete
}

/// One reaper cycle: pod sweep (absolute age, then per-check cap) followed
/// by the orphan-status sweep.
pub async fn run_cycle(
    store: &dyn CheckStore,
    namespace: &str,
    max_check_pods: usize,
    now_unix: i64,
) {
    let pods = match store.list_pods_by_label(namespace, LABEL_CHECK_NAME).await {
        Ok(pods) => pods,
        Err(err) => {
            warn!(error = %err, "reaper_list_pods_failed");
            return;
        }
    };

    let mut remaining = pods;
    for name in pods_past_absolute_age(&remaining, now_unix) {
        delete_pod(store, namespace, &name).await;
        remaining.retain(|p| p.metadata.name.as_deref() != Some(name.as_str()));
    }

    for name in pods_over_cap(&remaining, max_check_pods) {
        delete_pod(store, namespace, &name).await;
    }

    sweep_orphan_statuses(store, namespace).await;
}

async fn delete_pod(store: &dyn CheckStore, namespace: &str, name: &str) {
    match store.delete_pod(namespace, name).await {
        Ok(()) => {
            metrics::REAPER_DELETIONS.inc();
            info!(pod = %name, "reaper_pod_deleted");
        }
        Err(err) => warn!(pod = %name, error = %err, "reaper_pod_delete_failed"),
    }
}

/// A check's status can claim an in-flight run (non-idle `current_uuid`)
/// whose checker pod was deleted out-of-band (e.g. by the pod sweep above
/// racing a slow report, or manual intervention). Clear those back to a
/// failed/idle state so the runner loop can start a fresh run instead of
/// waiting out a report that will never arrive.
async fn sweep_orphan_statuses(store: &dyn CheckStore, namespace: &str) {
    let checks = match store.list_checks(namespace).await {
        Ok(checks) => checks,
        Err(err) => {
            warn!(error = %err, "reaper_orphan_sweep_list_checks_failed");
            return;
        }
    };

    for check in checks {
        let Some(name) = check.metadata.name.clone() else { continue };
        let status = check.status.clone().unwrap_or_default();
        if status.is_idle() {
            continue;
        }

        let selector = format!("{LABEL_RUN_UUID}={}", status.current_uuid);
        let has_backing_pod = match store.list_pods_by_label(namespace, &selector).await {
            Ok(pods) => !pods.is_empty(),
            Err(err) => {
                warn!(check = %name, error = %err, "reaper_orphan_sweep_list_pods_failed");
                continue;
            }
        };
        if has_backing_pod {
            continue;
        }

        let cleared = HealthCheckStatus {
            ok: false,
            errors: vec!["checker pod missing for in-flight run".to_string()],
            current_uuid: String::new(),
            ..status
        };
        match store.patch_status(namespace, &name, &cleared).await {
            Ok(()) => info!(check = %name, "reaper_orphan_status_cleared"),
            Err(err) => warn!(check = %name, error = %err, "reaper_orphan_status_clear_failed"),
        }
    }
}

/// Drive `run_cycle` on `REAP_INTERVAL` while leader, until shutdown.
pub async fn run_loop(
    store: std::sync::Arc<dyn CheckStore>,
    leader: LeaderState,
    namespace: String,
    max_check_pods: usize,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("reaper_stopped");
                return;
            }
            _ = ticker.tick() => {
                if !leader.is_leader() {
                    continue;
                }
                let now_unix = chrono::Utc::now().timestamp();
                run_cycle(store.as_ref(), &namespace, max_check_pods, now_unix).await;
            }
        }
    }
}
