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

//! Periodic recalculation of managed ResourceQuota status from observed
//! workloads. The counterpart of the admission-time increments: admission
//! keeps usage current, this loop heals drift (deleted pods, missed
//! events) from the informer stores.

use crate::client::{QuotaClient, ResourceQuotaLister};
use crate::quota::{Error, evaluator};
use crate::resources;
use crate::types::v1::ResourceList;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use kube::runtime::reflector::Store;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

pub struct UsageController {
    pub quotas: QuotaClient,
    pub lister: ResourceQuotaLister,
    pub pods: Store<corev1::Pod>,
    pub services: Store<corev1::Service>,
    pub pvcs: Store<corev1::PersistentVolumeClaim>,
    pub resync: Duration,
}

impl UsageController {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.resync);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sync_once().await,
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Recomputes every managed quota's usage, writing status only when it
    /// changed. Per-quota errors are logged; the loop keeps going.
    pub async fn sync_once(&self) {
        for rq in self.lister.list_all() {
            let Some(namespace) = rq.namespace() else {
                continue;
            };
            match self.recalculate(&rq, &namespace) {
                Ok(Some(status)) => {
                    let mut updated = rq.clone();
                    updated.status = Some(status);
                    if let Err(error) = self
                        .quotas
                        .resource_quotas(&namespace)
                        .update_status(&updated)
                        .await
                    {
                        warn!(%error, %namespace, quota = %rq.name_any(), "update quota status");
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(%error, %namespace, quota = %rq.name_any(), "recalculate quota usage");
                }
            }
        }
    }

    fn recalculate(
        &self,
        rq: &corev1::ResourceQuota,
        namespace: &str,
    ) -> Result<Option<corev1::ResourceQuotaStatus>, Error> {
        let keys = evaluator::hard_keys(rq);
        let pod_keys = evaluator::pod_matching_resources(&keys);
        let service_keys = evaluator::service_matching_resources(&keys);
        let pvc_keys = evaluator::pvc_matching_resources(&keys);

        let mut used = ResourceList::new();

        if !pod_keys.is_empty() {
            for pod in self.pods.state() {
                let pod = pod.as_ref();
                if pod.namespace().as_deref() != Some(namespace)
                    || evaluator::pod_is_terminal(pod)
                    || !evaluator::rq_matches_pod(rq, pod)?
                {
                    continue;
                }
                let usage = resources::mask(&evaluator::pod_usage(pod)?, &pod_keys);
                used = resources::add(&used, &usage)?;
            }
        }

        if !service_keys.is_empty() && evaluator::rq_matches_service(rq) {
            for service in self.services.state() {
                let service = service.as_ref();
                if service.namespace().as_deref() != Some(namespace) {
                    continue;
                }
                let usage = resources::mask(&evaluator::service_usage(service), &service_keys);
                used = resources::add(&used, &usage)?;
            }
        }

        if !pvc_keys.is_empty() && evaluator::rq_matches_pvc(rq) {
            for pvc in self.pvcs.state() {
                let pvc = pvc.as_ref();
                if pvc.namespace().as_deref() != Some(namespace) {
                    continue;
                }
                let usage = resources::mask(&evaluator::pvc_usage(pvc), &pvc_keys);
                used = resources::add(&used, &usage)?;
            }
        }

        // every tracked dimension reports, even when nothing uses it
        for key in pod_keys.iter().chain(&service_keys).chain(&pvc_keys) {
            used.entry(key.clone()).or_insert_with(|| Quantity("0".to_string()));
        }

        let current = rq
            .status
            .as_ref()
            .and_then(|s| s.used.clone())
            .unwrap_or_default();
        if resources::equals(&current, &used) {
            return Ok(None);
        }

        debug!(quota = %rq.name_any(), %namespace, "usage drifted, updating status");
        Ok(Some(corev1::ResourceQuotaStatus {
            hard: rq.spec.as_ref().and_then(|s| s.hard.clone()),
            used: Some(used),
        }))
    }
}
