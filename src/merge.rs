//! C6: status merger. `store_report` is the one place that turns a
//! checker's report into a persisted `HealthCheckStatus`, preserving the
//! timing fields (P3) and resolving write conflicts under [`RetryPolicy`]
//! (P6).

use tracing::{info, warn};

use crate::crd::HealthCheckStatus;
use crate::error::CoreError;
use crate::retry::RetryPolicy;
use crate::store::CheckStore;

#[derive(Debug, Clone)]
pub struct Report {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// `ok ← report.ok`, `errors ← report.errors`, `currentUUID ← ""`,
/// `consecutiveFailures` reset to 0 on success or incremented on failure;
/// `lastRunUnix`, `lastRunDuration`, `authoritativePod` carried through
/// unchanged (P3).
fn merged_status(current: &HealthCheckStatus, namespace: &str, report: &Report) -> HealthCheckStatus {
    HealthCheckStatus {
        ok: report.ok,
        errors: report.errors.clone(),
        namespace: if current.namespace.is_empty() {
            namespace.to_string()
        } else {
            current.namespace.clone()
        },
        current_uuid: String::new(),
        last_run_unix: current.last_run_unix,
        last_run_duration_seconds: current.last_run_duration_seconds,
        consecutive_failures: if report.ok { 0 } else { current.consecutive_failures + 1 },
        authoritative_pod: current.authoritative_pod.clone(),
    }
}

/// Fetch, merge, and write a report, retrying on `Conflict` per `policy`.
pub async fn store_report(
    store: &dyn CheckStore,
    policy: &RetryPolicy,
    namespace: &str,
    name: &str,
    report: &Report,
) -> Result<(), CoreError> {
    store.ensure_check_exists(namespace, name).await?;

    policy
        .retry_on_conflict(|| async {
            let check = store.get_check(namespace, name).await?;
            let new_status = merged_status(&check.status.clone().unwrap_or_default(), namespace, report);
            store.patch_status(namespace, name, &new_status).await
        })
        .await?;

    if report.ok {
        info!(check = %name, namespace = %namespace, "check_reported_ok");
    } else {
        warn!(check = %name, namespace = %namespace, errors = ?report.errors, "check_reported_failure");
    }
    Ok(())
}
