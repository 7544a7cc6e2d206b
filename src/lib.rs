// Copyright 2025 Kubeward Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::admission::state::AppState;
use crate::cache::{CacheSyncer, ResourceQuotaCache, SYNC_INTERVAL};
use crate::client::ResourceQuotaLister;
use crate::context::Context;
use crate::lease::LeaderElector;
use crate::quota::controller::UsageController;
use crate::reconcile::{error_policy, reconcile_cluster_resource_quota};
use crate::types::v1::cluster_resource_quota::ClusterResourceQuota;
use crate::types::v1::resource_quota::ResourceQuota;
use futures::StreamExt;
use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResourceExt;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use kube::{Api, Client};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub mod admission;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod lease;
pub mod quota;
pub mod reconcile;
pub mod resources;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod tests;
pub mod types;
pub mod utils;

pub async fn run(options: config::Options) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let client = Client::try_default().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    if options.leader_election.enabled {
        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        let identity = std::env::var("HOSTNAME").unwrap_or_else(|_| "clusterquota-op".to_string());
        let elector = LeaderElector::new(
            client.clone(),
            &options.leader_election.id,
            &namespace,
            &identity,
        );
        elector.acquire().await?;
        tokio::spawn(elector.run(shutdown_rx.clone()));
    }

    let mut servers: JoinSet<Result<(), Box<dyn std::error::Error + Send + Sync>>> = JoinSet::new();

    if options.metrics.enabled {
        let handle = telemetry::install_recorder()?;
        let addr = options.metrics.addr.clone();
        let shutdown = shutdown_rx.clone();
        servers.spawn(async move {
            telemetry::serve_metrics(handle, addr, shutdown)
                .await
                .map_err(Into::into)
        });
    }
    if options.probe.enabled {
        let addr = options.probe.addr.clone();
        let shutdown = shutdown_rx.clone();
        servers
            .spawn(async move { telemetry::serve_probes(addr, shutdown).await.map_err(Into::into) });
    }

    // reflectors backing the lister façade and the usage recalculation
    let rq_store = spawn_reflector(Api::<ResourceQuota>::all(client.clone()));
    let pod_store = spawn_reflector(Api::<corev1::Pod>::all(client.clone()));
    let service_store = spawn_reflector(Api::<corev1::Service>::all(client.clone()));
    let pvc_store = spawn_reflector(Api::<corev1::PersistentVolumeClaim>::all(client.clone()));
    let crq_store = spawn_reflector(Api::<ClusterResourceQuota>::all(client.clone()));

    let lister = ResourceQuotaLister::new(rq_store);
    let cache = Arc::new(ResourceQuotaCache::new());

    let syncer = CacheSyncer {
        cache: cache.clone(),
        client: client.clone(),
        interval: SYNC_INTERVAL,
    };
    tokio::spawn(syncer.run(shutdown_rx.clone()));

    let usage_controller = UsageController {
        quotas: client::QuotaClient::new(client.clone()),
        lister: lister.clone(),
        pods: pod_store,
        services: service_store,
        pvcs: pvc_store,
        resync: options.jittered_resync_period(),
    };
    tokio::spawn(usage_controller.run(shutdown_rx.clone()));

    if options.webhook.enabled {
        let state = AppState::new(client.clone(), cache.clone(), lister.clone());
        let webhook_options = options.webhook.clone();
        let shutdown = shutdown_rx.clone();
        servers.spawn(async move {
            admission::server::run(state, &webhook_options, shutdown)
                .await
                .map_err(Into::into)
        });
    }

    // Child quotas are not watched: the status hook keeps aggregate usage
    // current and owner references cascade deletion. Reconciles fire on
    // quota events (spec changes checked against observedGeneration) and
    // namespace changes mapped back to the matching quotas.
    let context = Arc::new(Context::new(client.clone()));
    let crq_api = Api::<ClusterResourceQuota>::all(client.clone());
    let controller = Controller::new(crq_api, watcher::Config::default())
        .watches(
            Api::<corev1::Namespace>::all(client.clone()),
            watcher::Config::default(),
            move |ns| {
                let labels = ns.metadata.labels.clone().unwrap_or_default();
                crq_store
                    .state()
                    .into_iter()
                    .filter(|crq| crq.matches_namespace(&labels))
                    .map(|crq| ObjectRef::from_obj(crq.as_ref()))
                    .collect::<Vec<_>>()
            },
        )
        .graceful_shutdown_on({
            let mut shutdown = shutdown_rx.clone();
            async move {
                let _ = shutdown.changed().await;
            }
        })
        .run(
            reconcile_cluster_resource_quota,
            error_policy,
            context.clone(),
        )
        .for_each(|res| async move {
            match res {
                Ok((crq, _)) => {
                    metrics::counter!("reconcile_total", "outcome" => "ok").increment(1);
                    info!("reconciled successful, object{:?}", crq.name);
                }
                Err(e) => {
                    metrics::counter!("reconcile_total", "outcome" => "error").increment(1);
                    warn!("reconcile failed: {}", e);
                }
            }
        });
    tokio::pin!(controller);

    loop {
        let has_servers = !servers.is_empty();
        tokio::select! {
            _ = &mut controller => break,
            joined = servers.join_next(), if has_servers => {
                match joined {
                    Some(Ok(Ok(()))) | None => {}
                    Some(Ok(Err(e))) => {
                        error!("server failed: {}", e);
                        let _ = shutdown_tx.send(true);
                        return Err(e.to_string().into());
                    }
                    Some(Err(e)) => {
                        error!("server task panicked: {}", e);
                        let _ = shutdown_tx.send(true);
                        return Err(e.to_string().into());
                    }
                }
            }
        }
    }

    info!("controller stopped, exiting");
    Ok(())
}

/// Starts a reflector for the given API and returns its read handle. The
/// driver task runs until process exit; watch errors are logged and the
/// watcher resumes by itself.
fn spawn_reflector<K>(api: Api<K>) -> Store<K>
where
    K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Clone + Eq + Hash + Send + Sync + 'static,
{
    let (store, writer) = reflector::store();
    tokio::spawn(async move {
        let stream = watcher(api, watcher::Config::default())
            .reflect(writer)
            .applied_objects();
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            if let Err(error) = item {
                warn!(%error, "watch stream error");
            }
        }
    });
    store
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    writer
        .write_all(serde_yaml_ng::to_string(&ClusterResourceQuota::crd())?.as_bytes())
        .await?;
    writer.write_all(b"---\n").await?;
    writer
        .write_all(serde_yaml_ng::to_string(&ResourceQuota::crd())?.as_bytes())
        .await?;

    Ok(())
}
