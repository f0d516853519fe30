//! C8: read-only cluster status view consumed by `GET /json` and the
//! metrics endpoint.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::crd::HealthCheck;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckDetail {
    pub ok: bool,
    pub errors: Vec<String>,
    pub last_run_unix: i64,
    pub next_run_unix: i64,
    pub pod_name: Option<String>,
    pub namespace: String,
    pub run_interval_seconds: u64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    pub ok: bool,
    pub errors: Vec<String>,
    pub checks: BTreeMap<String, CheckDetail>,
}

fn qualified_name(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Build a [`ClusterState`] snapshot from the supplied checks (already
/// filtered to the requested namespace subset, if any, by the caller).
pub fn build_cluster_state(checks: &[HealthCheck]) -> ClusterState {
    let mut all_ok = true;
    let mut errors = Vec::new();
    let mut details = BTreeMap::new();

    for check in checks {
        let name = check.metadata.name.clone().unwrap_or_default();
        let namespace = check.metadata.namespace.clone().unwrap_or_default();
        let status = check.status.clone().unwrap_or_default();

        if !status.ok {
            all_ok = false;
            for err in &status.errors {
                errors.push(format!("{}/{}: {}", namespace, name, err));
            }
        }

        let (next_run_unix, pod_name) = if status.is_idle() {
            (status.last_run_unix + check.spec.run_interval_seconds as i64, None)
        } else {
            (0, status.authoritative_pod.clone())
        };

        details.insert(
            qualified_name(&namespace, &name),
            CheckDetail {
                ok: status.ok,
                errors: status.errors.clone(),
                last_run_unix: status.last_run_unix,
                next_run_unix,
                pod_name,
                namespace,
                run_interval_seconds: check.spec.run_interval_seconds,
                timeout_seconds: check.spec.timeout_seconds,
            },
        );
    }

    ClusterState {
        ok: all_ok,
        errors,
        checks: details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HealthCheckSpec, HealthCheckStatus, PodTemplate};
    use kube::api::ObjectMeta;

    fn make_check(name: &str, namespace: &str, status: HealthCheckStatus) -> HealthCheck {
        HealthCheck {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: HealthCheckSpec {
                run_interval_seconds: 600,
                timeout_seconds: 300,
                pod_template: PodTemplate::default(),
                extra_labels: Default::default(),
                extra_annotations: Default::default(),
            },
            status: Some(status),
        }
    }

    #[test]
    fn aggregate_ok_is_conjunction_of_all_checks() {
        let checks = vec![
            make_check("a", "ns1", HealthCheckStatus { ok: true, ..Default::default() }),
            make_check("b", "ns1", HealthCheckStatus { ok: false, ..Default::default() }),
        ];
        let state = build_cluster_state(&checks);
        assert!(!state.ok);
    }

    #[test]
    fn aggregate_ok_true_when_all_checks_ok() {
        let checks = vec![
            make_check("a", "ns1", HealthCheckStatus { ok: true, ..Default::default() }),
            make_check("b", "ns1", HealthCheckStatus { ok: true, ..Default::default() }),
        ];
        let state = build_cluster_state(&checks);
        assert!(state.ok);
    }

    #[test]
    fn idle_check_derives_next_run_unix() {
        let checks = vec![make_check(
            "a",
            "ns1",
            HealthCheckStatus {
                ok: true,
                last_run_unix: 1000,
                ..Default::default()
            },
        )];
        let state = build_cluster_state(&checks);
        let detail = &state.checks["ns1/a"];
        assert_eq!(detail.next_run_unix, 1600);
        assert!(detail.pod_name.is_none());
    }

    #[test]
    fn running_check_reports_pod_name_instead_of_next_run() {
        let checks = vec![make_check(
            "a",
            "ns1",
            HealthCheckStatus {
                current_uuid: "u1".to_string(),
                authoritative_pod: Some("kh-check-abc".to_string()),
                ..Default::default()
            },
        )];
        let state = build_cluster_state(&checks);
        let detail = &state.checks["ns1/a"];
        assert_eq!(detail.pod_name.as_deref(), Some("kh-check-abc"));
        assert_eq!(detail.next_run_unix, 0);
    }

    #[test]
    fn errors_are_qualified_by_namespace_and_name() {
        let checks = vec![make_check(
            "a",
            "ns1",
            HealthCheckStatus {
                ok: false,
                errors: vec!["boom".to_string()],
                ..Default::default()
            },
        )];
        let state = build_cluster_state(&checks);
        assert_eq!(state.errors, vec!["ns1/a: boom".to_string()]);
    }

    #[test]
    fn check_detail_serializes_with_camel_case_keys() {
        let checks = vec![make_check(
            "a",
            "ns1",
            HealthCheckStatus {
                ok: true,
                last_run_unix: 1000,
                ..Default::default()
            },
        )];
        let state = build_cluster_state(&checks);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"lastRunUnix\""));
        assert!(json.contains("\"nextRunUnix\""));
        assert!(json.contains("\"podName\""));
        assert!(json.contains("\"runIntervalSeconds\""));
        assert!(json.contains("\"timeoutSeconds\""));
        assert!(!json.contains("last_run_unix"));
    }
}
