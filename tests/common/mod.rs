use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;

use kuberhealthy_core::crd::{HealthCheck, HealthCheckSpec, HealthCheckStatus, PodTemplate};
use kuberhealthy_core::error::CoreError;
use kuberhealthy_core::store::CheckStore;

/// In-memory [`CheckStore`] so the scheduler, ingestor, merger and reaper
/// can be driven without a real API server. Keys are `"namespace/name"`.
pub struct FakeCheckStore {
    checks: Mutex<HashMap<String, HealthCheck>>,
    pods: Mutex<HashMap<String, Pod>>,
    next_pod_id: Mutex<u64>,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl FakeCheckStore {
    pub fn new() -> Self {
        FakeCheckStore {
            checks: Mutex::new(HashMap::new()),
            pods: Mutex::new(HashMap::new()),
            next_pod_id: Mutex::new(0),
        }
    }

    /// Seed a check directly, bypassing `ensure_check_exists`.
    pub fn insert_check(&self, namespace: &str, name: &str, spec: HealthCheckSpec, status: HealthCheckStatus) {
        let mut check = HealthCheck::new(name, spec);
        check.meta_mut().namespace = Some(namespace.to_string());
        check.status = Some(status);
        self.checks.lock().unwrap().insert(key(namespace, name), check);
    }

    pub fn pod_count(&self) -> usize {
        self.pods.lock().unwrap().len()
    }
}

impl Default for FakeCheckStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_spec(image: &str) -> HealthCheckSpec {
    HealthCheckSpec {
        run_interval_seconds: 600,
        timeout_seconds: 300,
        pod_template: PodTemplate {
            image: image.to_string(),
            command: None,
            args: None,
            service_account_name: None,
        },
        extra_labels: Default::default(),
        extra_annotations: Default::default(),
    }
}

#[async_trait]
impl CheckStore for FakeCheckStore {
    async fn get_check(&self, namespace: &str, name: &str) -> Result<HealthCheck, CoreError> {
        self.checks
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                kind: "HealthCheck",
                name: name.to_string(),
            })
    }

    async fn list_checks(&self, namespace: &str) -> Result<Vec<HealthCheck>, CoreError> {
        Ok(self
            .checks
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.meta().namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn patch_status(&self, namespace: &str, name: &str, status: &HealthCheckStatus) -> Result<(), CoreError> {
        let mut checks = self.checks.lock().unwrap();
        let check = checks.get_mut(&key(namespace, name)).ok_or_else(|| CoreError::NotFound {
            kind: "HealthCheck",
            name: name.to_string(),
        })?;
        check.status = Some(status.clone());
        Ok(())
    }

    async fn create_checker_pod(&self, namespace: &str, mut pod: Pod) -> Result<Pod, CoreError> {
        let mut next_id = self.next_pod_id.lock().unwrap();
        let name = format!("{}-{}", pod.metadata.generate_name.clone().unwrap_or_default(), *next_id);
        *next_id += 1;
        pod.metadata.name = Some(name.clone());
        pod.metadata.namespace = Some(namespace.to_string());
        self.pods.lock().unwrap().insert(key(namespace, &name), pod.clone());
        Ok(pod)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, CoreError> {
        Ok(self.pods.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn list_pods_by_label(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, CoreError> {
        let (label, value) = label_selector
            .split_once('=')
            .map(|(l, v)| (l.to_string(), Some(v.to_string())))
            .unwrap_or((label_selector.to_string(), None));
        Ok(self
            .pods
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| {
                let labels = p.metadata.labels.as_ref();
                match &value {
                    Some(v) => labels.and_then(|l| l.get(&label)).map(|x| x == v).unwrap_or(false),
                    None => labels.map(|l| l.contains_key(&label)).unwrap_or(false),
                }
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), CoreError> {
        self.pods.lock().unwrap().remove(&key(namespace, name));
        Ok(())
    }

    async fn ensure_check_exists(&self, namespace: &str, name: &str) -> Result<(), CoreError> {
        let mut checks = self.checks.lock().unwrap();
        let k = key(namespace, name);
        if !checks.contains_key(&k) {
            let mut check = HealthCheck::new(name, test_spec("example/checker:latest"));
            check.meta_mut().namespace = Some(namespace.to_string());
            checks.insert(k, check);
        }
        Ok(())
    }
}
