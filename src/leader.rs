//! C2: leader election over a `coordination.k8s.io/v1` `Lease`.
//!
//! Generalizes the acquire/renew pattern shared by the operator's watch
//! controller and the wider `kube`-ecosystem leases pattern: a single
//! [`Lease`] object is the lock, `holderIdentity` plus `renewTime` decide who
//! owns it, and the loop just keeps re-attempting acquisition on an interval.
//! Unlike that pattern, `renewDeadline` and `retryPeriod` are distinct knobs
//! here, and callers get explicit onAcquired/onLost hooks instead of having
//! to poll [`LeaderState`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::metrics;

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub identity: String,
    pub lease_name: String,
    pub lease_namespace: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

/// Synchronously-readable leadership flag, shared between the elector task
/// and every component that needs to know "am I leader right now" (C3, C7).
#[derive(Clone, Default)]
pub struct LeaderState {
    is_leader: Arc<AtomicBool>,
}

impl LeaderState {
    pub fn new() -> Self {
        LeaderState {
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    fn set(&self, value: bool) {
        self.is_leader.store(value, Ordering::SeqCst);
    }
}

/// Callbacks fired on leadership transitions, mirroring `client-go`'s
/// leaderelection `Callbacks` struct.
pub struct LeaderCallbacks {
    pub on_acquired: Box<dyn Fn() + Send + Sync>,
    pub on_lost: Box<dyn Fn() + Send + Sync>,
    /// Fired whenever a different holder identity is observed on the lease,
    /// including this replica's own acquisitions.
    pub on_new_leader: Box<dyn Fn(String) + Send + Sync>,
}

impl Default for LeaderCallbacks {
    fn default() -> Self {
        LeaderCallbacks {
            on_acquired: Box::new(|| {}),
            on_lost: Box::new(|| {}),
            on_new_leader: Box::new(|_identity| {}),
        }
    }
}

/// Attempt to acquire or renew the lease. Returns `(true, holder)` if this
/// identity holds it after the call; `(false, holder)` otherwise, where
/// `holder` is the best known current holder identity (empty if a
/// concurrent acquisition raced us and we don't know who won).
async fn try_acquire_or_renew(
    api: &Api<Lease>,
    config: &LeaderElectionConfig,
) -> Result<(bool, String), CoreError> {
    let now = MicroTime(chrono::Utc::now());

    match api.get(&config.lease_name).await {
        Ok(existing) => {
            let spec = existing.spec.as_ref();
            let holder = spec.and_then(|s| s.holder_identity.as_deref());
            let renew_time = spec.and_then(|s| s.renew_time.as_ref());
            let duration_secs = spec.and_then(|s| s.lease_duration_seconds);

            if holder == Some(config.identity.as_str()) {
                let patch = serde_json::json!({
                    "spec": {
                        "renewTime": now,
                        "leaseDurationSeconds": config.lease_duration.as_secs() as i32,
                    }
                });
                api.patch(&config.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                return Ok((true, config.identity.clone()));
            }

            let is_expired = match (renew_time, duration_secs) {
                (Some(MicroTime(renew)), Some(secs)) => {
                    let expiry = *renew + chrono::Duration::seconds(secs as i64);
                    now.0 > expiry
                }
                _ => true,
            };

            if !is_expired {
                return Ok((false, holder.unwrap_or_default().to_string()));
            }

            let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
            let patch = serde_json::json!({
                "spec": {
                    "holderIdentity": config.identity,
                    "acquireTime": now,
                    "renewTime": now,
                    "leaseDurationSeconds": config.lease_duration.as_secs() as i32,
                    "leaseTransitions": transitions + 1,
                }
            });
            api.patch(&config.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            Ok((true, config.identity.clone()))
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(config.lease_name.clone()),
                    namespace: Some(config.lease_namespace.clone()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(config.identity.clone()),
                    acquire_time: Some(now.clone()),
                    renew_time: Some(now),
                    lease_duration_seconds: Some(config.lease_duration.as_secs() as i32),
                    lease_transitions: Some(0),
                    ..Default::default()
                }),
            };
            match api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok((true, config.identity.clone())),
                Err(kube::Error::Api(err)) if err.code == 409 => Ok((false, String::new())),
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Best-effort: clear `holderIdentity` on voluntary shutdown so a waiting
/// replica doesn't have to wait out the full lease duration.
async fn release_lease(api: &Api<Lease>, config: &LeaderElectionConfig) -> Result<(), CoreError> {
    let patch = serde_json::json!({
        "spec": {
            "holderIdentity": null,
            "renewTime": null,
        }
    });
    api.patch(&config.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Drive the election loop until `shutdown` fires. `renewDeadline` bounds how
/// long a renewal attempt may take before it counts as a loss; `retryPeriod`
/// paces the acquisition attempts.
pub async fn run(
    client: Client,
    config: LeaderElectionConfig,
    state: LeaderState,
    callbacks: LeaderCallbacks,
    mut shutdown: broadcast::Receiver<()>,
) {
    let api: Api<Lease> = Api::namespaced(client, &config.lease_namespace);
    let mut ticker = tokio::time::interval(config.retry_period);
    let mut last_known_holder = String::new();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                if state.is_leader() {
                    if let Err(err) = release_lease(&api, &config).await {
                        warn!(identity = %config.identity, error = %err, "leader_release_failed");
                    }
                    state.set(false);
                    metrics::LEADERSHIP_TRANSITIONS.inc();
                    warn!(identity = %config.identity, "leadership_released_on_shutdown");
                    (callbacks.on_lost)();
                }
                info!(identity = %config.identity, "leader_election_stopped");
                return;
            }
            _ = ticker.tick() => {
                let outcome = tokio::time::timeout(config.renew_deadline, try_acquire_or_renew(&api, &config)).await;
                let (is_leader, holder) = match outcome {
                    Ok(Ok(value)) => value,
                    Ok(Err(err)) => {
                        warn!(identity = %config.identity, error = %err, "leader_election_error");
                        (false, last_known_holder.clone())
                    }
                    Err(_) => {
                        warn!(identity = %config.identity, "leader_election_renew_deadline_exceeded");
                        (false, last_known_holder.clone())
                    }
                };

                if !holder.is_empty() && holder != last_known_holder {
                    info!(identity = %config.identity, holder = %holder, "leader_observed");
                    last_known_holder = holder.clone();
                    (callbacks.on_new_leader)(holder);
                }

                let was_leader = state.is_leader();
                state.set(is_leader);
                if is_leader && !was_leader {
                    info!(identity = %config.identity, "leadership_acquired");
                    metrics::LEADERSHIP_TRANSITIONS.inc();
                    (callbacks.on_acquired)();
                } else if !is_leader && was_leader {
                    warn!(identity = %config.identity, "leadership_lost");
                    metrics::LEADERSHIP_TRANSITIONS.inc();
                    (callbacks.on_lost)();
                }
            }
        }
    }
}
