use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use kube::Client;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::info;

use kuberhealthy_core::config::Config;
use kuberhealthy_core::leader::{self, LeaderCallbacks, LeaderElectionConfig, LeaderState};
use kuberhealthy_core::reaper;
use kuberhealthy_core::retry::RetryPolicy;
use kuberhealthy_core::runner::{self, RunnerState};
use kuberhealthy_core::server::{self, AppState};
use kuberhealthy_core::store::KubeCheckStore;

/// Boot the full controller: watch-backed store, leader elector, one
/// scheduler task per check, reaper, and the HTTP surface, torn down on
/// `Ctrl+C` with the configured grace period (§5).
pub async fn run(config: Config) -> anyhow::Result<()> {
    let client = Client::try_default().await.context("failed to build Kubernetes client")?;
    let namespace = config
        .target_namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let identity = std::env::var("POD_NAME").unwrap_or_else(|_| format!("kuberhealthy-{}", uuid::Uuid::new_v4()));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (store, watch_handle) = KubeCheckStore::spawn(client.clone(), namespace.clone(), shutdown_tx.subscribe());
    let store: Arc<dyn kuberhealthy_core::store::CheckStore> = store;

    let leader_state = LeaderState::new();
    let leader_config = LeaderElectionConfig {
        identity: identity.clone(),
        lease_name: config.leader_election_name.clone(),
        lease_namespace: config.leader_election_namespace.clone(),
        lease_duration: config.lease_duration(),
        renew_deadline: config.renew_deadline(),
        retry_period: config.retry_period(),
    };
    let leader_handle = tokio::spawn(leader::run(
        client.clone(),
        leader_config,
        leader_state.clone(),
        LeaderCallbacks::default(),
        shutdown_tx.subscribe(),
    ));

    let reporting_url = config
        .external_reporting_url
        .clone()
        .unwrap_or_else(|| format!("http://kuberhealthy.{namespace}.svc:8080/check"));

    let runners: Arc<Mutex<HashMap<String, Arc<Mutex<RunnerState>>>>> = Arc::new(Mutex::new(HashMap::new()));
    let run_now_senders: Arc<Mutex<HashMap<String, watch::Sender<u64>>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut runner_handles = Vec::new();

    let checks = store.list_checks(&namespace).await.unwrap_or_default();
    for check in checks {
        let name = check.metadata.name.clone().unwrap_or_default();
        let key = format!("{namespace}/{name}");
        let state_handle = Arc::new(Mutex::new(RunnerState::Idle));
        let (run_now_tx, run_now_rx) = watch::channel(0u64);
        runners.lock().await.insert(key.clone(), state_handle.clone());
        run_now_senders.lock().await.insert(key, run_now_tx);

        let handle = tokio::spawn(runner::run_checker_loop(
            store.clone(),
            leader_state.clone(),
            namespace.clone(),
            name,
            reporting_url.clone(),
            state_handle,
            run_now_rx,
            shutdown_tx.subscribe(),
        ));
        runner_handles.push(handle);
    }

    let reaper_handle = tokio::spawn(reaper::run_loop(
        store.clone(),
        leader_state.clone(),
        namespace.clone(),
        config.max_check_pods as usize,
        shutdown_tx.subscribe(),
    ));

    let app_state = AppState {
        store: store.clone(),
        client: client.clone(),
        leader: leader_state.clone(),
        namespace: namespace.clone(),
        retry_policy: RetryPolicy::default(),
        ready: Arc::new(Mutex::new(true)),
        runners,
        run_now_senders,
    };
    let router = server::build_router(app_state);

    let addr: SocketAddr = config
        .listen_address
        .parse()
        .context("invalid listenAddress")?;
    info!(%addr, "http_server_starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.recv().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(());

    let grace = config.termination_grace_period();
    let shutdown_result = tokio::time::timeout(grace, async {
        let _ = leader_handle.await;
        let _ = watch_handle.await;
        let _ = reaper_handle.await;
        for handle in runner_handles {
            let _ = handle.await;
        }
        let _ = http_handle.await;
    })
    .await;

    match shutdown_result {
        Ok(()) => {
            info!("controller_stopped");
            Ok(())
        }
        Err(_) => {
            tracing::error!("shutdown_grace_period_exceeded");
            std::process::exit(1);
        }
    }
}
