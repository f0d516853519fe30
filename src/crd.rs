//! The `HealthCheck` custom resource: spec, status, and the data model
//! invariants from §3 encoded as constructors rather than left to callers.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Opaque single-container launch spec merged onto a generated pod template.
/// Kept intentionally minimal: the core only needs a container image, the
/// rest of the pod template is passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

fn default_run_interval_secs() -> u64 {
    600
}

fn default_timeout_secs() -> u64 {
    300
}

/// `HealthCheckSpec` — user-authored; see §3.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "comcast.github.io",
    version = "v1",
    kind = "HealthCheck",
    plural = "khchecks",
    status = "HealthCheckStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    /// Seconds between runs. Defaults to 600 (10 minutes).
    #[serde(default = "default_run_interval_secs")]
    pub run_interval_seconds: u64,
    /// Seconds a run may remain outstanding before it is timed out. Must be
    /// `<= run_interval_seconds`; enforced by `HealthCheckSpec::validate`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,
    pub pod_template: PodTemplate,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub extra_labels: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub extra_annotations: std::collections::BTreeMap<String, String>,
}

impl HealthCheckSpec {
    /// `timeout <= runInterval`, the one cross-field invariant §3 names.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_seconds == 0 {
            return Err("timeoutSeconds must be positive".to_string());
        }
        if self.timeout_seconds > self.run_interval_seconds {
            return Err(format!(
                "timeoutSeconds ({}) must be <= runIntervalSeconds ({})",
                self.timeout_seconds, self.run_interval_seconds
            ));
        }
        Ok(())
    }
}

/// `HealthCheckStatus` — controller-managed; see §3. All fields are written
/// exclusively through [`crate::merge::store_report`] or the scheduler
/// (§4.3), never constructed ad hoc elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckStatus {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Empty means idle; non-empty means a run is outstanding.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_uuid: String,
    #[serde(default)]
    pub last_run_unix: i64,
    #[serde(default)]
    pub last_run_duration_seconds: f64,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authoritative_pod: Option<String>,
}

impl HealthCheckStatus {
    pub fn is_idle(&self) -> bool {
        self.current_uuid.is_empty()
    }

    /// `now - lastRunUnix >= timeout`, the timeout side of the report gate
    /// and of the runner's own timeout arm (§4.3, §4.5).
    pub fn is_overdue(&self, now_unix: i64, timeout_seconds: u64) -> bool {
        if self.last_run_unix == 0 {
            return false;
        }
        now_unix - self.last_run_unix >= timeout_seconds as i64
    }
}
