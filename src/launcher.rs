//! C4: turns a `HealthCheck`'s pod template into a concrete `Pod` carrying
//! the reserved labels, annotations, and environment the checker contract
//! requires.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{HealthCheckSpec, PodTemplate};

pub const LABEL_CHECK_NAME: &str = "healthcheck";
pub const LABEL_RUN_UUID: &str = "kh-run-uuid";
pub const ANNOTATION_CHECK_NAME: &str = "kh-check-name";

/// DNS-1123 sanitize: lower-case, spaces to dashes, drop everything else
/// that isn't alphanumeric or a dash.
fn sanitize_name_prefix(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

/// Build the checker pod for one run. Does not submit it; callers pass the
/// result to [`crate::store::CheckStore::create_checker_pod`].
pub fn build_checker_pod(
    check_name: &str,
    namespace: &str,
    spec: &HealthCheckSpec,
    run_uuid: &str,
    reporting_url: &str,
) -> Pod {
    let mut labels: BTreeMap<String, String> = spec.extra_labels.clone();
    labels.insert(LABEL_CHECK_NAME.to_string(), check_name.to_string());
    labels.insert(LABEL_RUN_UUID.to_string(), run_uuid.to_string());

    let mut annotations: BTreeMap<String, String> = spec.extra_annotations.clone();
    annotations.insert(ANNOTATION_CHECK_NAME.to_string(), check_name.to_string());

    let container = build_container(&spec.pod_template, check_name, run_uuid, reporting_url);

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", sanitize_name_prefix(check_name))),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.into_iter().collect()),
            annotations: Some(annotations.into_iter().collect()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            service_account_name: spec.pod_template.service_account_name.clone(),
            ..Default::default()
        }),
        status: None,
    }
}

fn build_container(template: &PodTemplate, check_name: &str, run_uuid: &str, reporting_url: &str) -> Container {
    let env = vec![
        EnvVar {
            name: "KH_CHECK_NAME".to_string(),
            value: Some(check_name.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "KH_RUN_UUID".to_string(),
            value: Some(run_uuid.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "KH_REPORTING_URL".to_string(),
            value: Some(reporting_url.to_string()),
            ..Default::default()
        },
    ];

    Container {
        name: "checker".to_string(),
        image: Some(template.image.clone()),
        command: template.command.clone(),
        args: template.args.clone(),
        env: Some(env),
        ..Default::default()
    }
}
