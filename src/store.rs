//! C1: the watch-cached store every other component reads and writes
//! through. A production implementation talks to the API server via
//! `kube::Api`; [`FakeCheckStore`] in `tests/common` gives the rest of the
//! crate something deterministic to run against.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::crd::{HealthCheck, HealthCheckStatus};
use crate::error::CoreError;

const FIELD_MANAGER: &str = "kuberhealthy";

/// Everything the scheduler (C3), the ingestor (C5), the merger (C6) and the
/// reaper (C7) need from the cluster, behind one seam so tests can swap in
/// an in-memory fake instead of a real API server.
#[async_trait]
pub trait CheckStore: Send + Sync {
    async fn get_check(&self, namespace: &str, name: &str) -> Result<HealthCheck, CoreError>;
    async fn list_checks(&self, namespace: &str) -> Result<Vec<HealthCheck>, CoreError>;
    /// Merge-patch the status subresource. Callers are expected to loop this
    /// through [`crate::retry::RetryPolicy`] on `Conflict`.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HealthCheckStatus,
    ) -> Result<(), CoreError>;
    async fn create_checker_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, CoreError>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, CoreError>;
    async fn list_pods_by_label(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, CoreError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), CoreError>;
    /// Idempotent on an already-present check: create an empty placeholder
    /// only when `get_check` reports `NotFound` (P5).
    async fn ensure_check_exists(&self, namespace: &str, name: &str) -> Result<(), CoreError>;
}

/// `kube::Api`-backed implementation. Checks are read from a watcher
/// reflector cache so the scheduler and reaper never hammer the API server
/// on every tick (§4.1); pods and status writes go straight through since
/// those are inherently mutating or per-request.
pub struct KubeCheckStore {
    client: Client,
    namespace: String,
    checks: Store<HealthCheck>,
}

impl KubeCheckStore {
    /// Start the watcher for `namespace` and return once the reflector has
    /// its store handle wired up. The watch stream itself keeps running in
    /// the background task returned alongside the store.
    pub fn spawn(
        client: Client,
        namespace: String,
        mut shutdown: broadcast::Receiver<()>,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let api: Api<HealthCheck> = Api::namespaced(client.clone(), &namespace);
        let (reader, writer) = reflector::store();
        let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()));

        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream.applied_objects());
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("check_watch_stopped");
                        return;
                    }
                    event = futures::StreamExt::next(&mut stream) => {
                        match event {
                            Some(Ok(check)) => {
                                let name = check.metadata.name.clone().unwrap_or_default();
                                tracing::debug!(check = %name, "check_watch_event");
                            }
                            Some(Err(err)) => warn!(error = %err, "check_watch_error"),
                            None => return,
                        }
                    }
                }
            }
        });

        let store = Arc::new(KubeCheckStore {
            client,
            namespace,
            checks: reader,
        });
        (store, handle)
    }

    fn checks_api(&self) -> Api<HealthCheck> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn watcher<K>(api: Api<K>, config: watcher::Config) -> impl futures::Stream<Item = Result<Event<K>, watcher::Error>>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + 'static,
    K::DynamicType: Default,
{
    kube::runtime::watcher(api, config)
}

#[async_trait]
impl CheckStore for KubeCheckStore {
    async fn get_check(&self, namespace: &str, name: &str) -> Result<HealthCheck, CoreError> {
        let key = ObjectRef::new(name).within(namespace);
        if let Some(check) = self.checks.get(&key) {
            return Ok((*check).clone());
        }
        self.checks_api().get(name).await.map_err(CoreError::from)
    }

    async fn list_checks(&self, _namespace: &str) -> Result<Vec<HealthCheck>, CoreError> {
        Ok(self.checks.state().iter().map(|c| (**c).clone()).collect())
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        name: &str,
        status: &HealthCheckStatus,
    ) -> Result<(), CoreError> {
        let patch = serde_json::json!({ "status": status });
        let params = PatchParams::apply(FIELD_MANAGER);
        self.checks_api()
            .patch_status(name, &params, &Patch::Merge(&patch))
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    async fn create_checker_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, CoreError> {
        self.pods_api(namespace)
            .create(&PostParams::default(), &pod)
            .await
            .map_err(CoreError::from)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, CoreError> {
        match self.pods_api(namespace).get(name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods_by_label(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, CoreError> {
        let params = ListParams::default().labels(label_selector);
        let list = self.pods_api(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), CoreError> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };
        match self.pods_api(namespace).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_check_exists(&self, _namespace: &str, name: &str) -> Result<(), CoreError> {
        match self.checks_api().get(name).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                let placeholder = HealthCheck::new(name, crate::crd::HealthCheckSpec {
                    run_interval_seconds: 600,
                    timeout_seconds: 300,
                    pod_template: crate::crd::PodTemplate::default(),
                    extra_labels: Default::default(),
                    extra_annotations: Default::default(),
                });
                match self.checks_api().create(&PostParams::default(), &placeholder).await {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(err)) if err.code == 409 => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

