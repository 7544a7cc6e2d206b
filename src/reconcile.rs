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

//! ClusterResourceQuota reconciler: fans the spec out as child
//! ResourceQuotas into every selected namespace and publishes the
//! aggregated usage into the quota's status.

use crate::context::Context;
use crate::resources;
use crate::types::v1::ResourceList;
use crate::types::v1::cluster_resource_quota::{
    ClusterResourceQuota, ClusterResourceQuotaStatus, NamespaceResourceQuota,
};
use crate::types::v1::resource_quota::ResourceQuota;
use crate::{context, types};
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use snafu::Snafu;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(display("fan-out failed in {} of {} namespace(s): {}", failed, total, reasons))]
    FanOut {
        failed: usize,
        total: usize,
        reasons: String,
    },
}

pub async fn reconcile_cluster_resource_quota(
    crq: Arc<ClusterResourceQuota>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    // deletion cascades to the children via their owner references
    if crq.is_deleting() {
        return Ok(Action::await_change());
    }

    let namespaces = selected_namespaces(&crq, &ctx).await?;

    // Spec changes bump the generation; the reconciler's own status writes
    // do not. When the generation is already observed and the selection is
    // unchanged, the event carries nothing to fan out.
    if up_to_date(&crq, &namespaces) {
        return Ok(Action::await_change());
    }

    let mut total = ResourceList::new();
    let mut entries = Vec::with_capacity(namespaces.len());
    let mut failures = Vec::new();

    for namespace in &namespaces {
        let child = crq.child_resource_quota(namespace);
        match ctx.apply::<ResourceQuota>(&child, namespace).await {
            Ok(applied) => {
                let used = applied.used();
                total = resources::add(&total, &used)?;
                entries.push(NamespaceResourceQuota {
                    name: namespace.clone(),
                    used: Some(used),
                });
            }
            Err(e) => {
                warn!(error = %e, %namespace, quota = %crq.name(), "create or update child resource quota");
                failures.push((namespace.clone(), e));
            }
        }
    }

    let status = ClusterResourceQuotaStatus {
        observed_generation: crq.metadata.generation,
        hard: crq.spec.hard.clone(),
        used: Some(total),
        namespaces: entries,
    };
    ctx.update_crq_status(&crq, status).await?;

    if !failures.is_empty() {
        let reasons = failures
            .iter()
            .map(|(ns, e)| format!("{ns}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        let _ = ctx
            .record(
                &crq,
                EventType::Warning,
                "FanOutFailed",
                &format!("failed to materialize child quotas: {reasons}"),
            )
            .await;
        return FanOutSnafu {
            failed: failures.len(),
            total: namespaces.len(),
            reasons,
        }
        .fail();
    }

    Ok(Action::await_change())
}

/// Whether the published status already reflects this spec generation and
/// namespace selection. Mirrors an equality-by-value spec-change trigger:
/// events that change neither skip the fan-out entirely.
pub(crate) fn up_to_date(crq: &ClusterResourceQuota, selected: &[String]) -> bool {
    let Some(status) = crq.status.as_ref() else {
        return false;
    };
    status.observed_generation.is_some()
        && status.observed_generation == crq.metadata.generation
        && status
            .namespaces
            .iter()
            .map(|n| n.name.as_str())
            .eq(selected.iter().map(String::as_str))
}

/// Namespaces selected by the quota, sorted for deterministic status
/// output. A nil selector selects nothing.
async fn selected_namespaces(
    crq: &ClusterResourceQuota,
    ctx: &Context,
) -> Result<Vec<String>, Error> {
    let namespaces = ctx.list_cluster::<corev1::Namespace>().await?;
    let mut matched: Vec<String> = namespaces
        .items
        .iter()
        .filter(|ns| crq.matches_namespace(&ns.metadata.labels.clone().unwrap_or_default()))
        .filter_map(|ns| ns.metadata.name.clone())
        .collect();
    matched.sort();
    Ok(matched)
}

pub fn error_policy(
    _object: Arc<ClusterResourceQuota>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!("{:?}", error);
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{create_test_crq, create_test_rq};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    #[test]
    fn status_only_events_skip_the_fan_out() {
        let mut crq = create_test_crq("c1", &[("env", "prod")], &[("cpu", "1")]);
        crq.metadata.generation = Some(2);
        let selected = vec!["ns1".to_string()];

        // never reconciled
        assert!(!up_to_date(&crq, &selected));

        // stale generation: the spec changed since the last fan-out
        crq.status = Some(ClusterResourceQuotaStatus {
            observed_generation: Some(1),
            namespaces: vec![NamespaceResourceQuota {
                name: "ns1".to_string(),
                used: None,
            }],
            ..Default::default()
        });
        assert!(!up_to_date(&crq, &selected));

        // current generation, same selection: the reconciler's own status
        // write must not re-trigger work
        crq.status.as_mut().unwrap().observed_generation = Some(2);
        assert!(up_to_date(&crq, &selected));

        // a namespace joined the selection
        assert!(!up_to_date(
            &crq,
            &["ns1".to_string(), "ns2".to_string()]
        ));

        // a namespace left the selection
        assert!(!up_to_date(&crq, &[]));
    }

    #[test]
    fn aggregation_is_deterministic_and_element_wise() {
        let children = [
            create_test_rq("ns2", "c1", &[("cpu", "500m")]),
            create_test_rq("ns1", "c1", &[("cpu", "1")]),
        ];

        let mut total = ResourceList::new();
        let mut entries = Vec::new();
        let mut sorted: Vec<_> = children.iter().collect();
        sorted.sort_by_key(|rq| rq.metadata.namespace.clone());
        for child in sorted {
            let used = child.used();
            total = resources::add(&total, &used).unwrap();
            entries.push(NamespaceResourceQuota {
                name: child.metadata.namespace.clone().unwrap(),
                used: Some(used),
            });
        }

        assert_eq!(entries[0].name, "ns1");
        assert_eq!(entries[1].name, "ns2");
        assert!(resources::equals(
            &total,
            &[("cpu".to_string(), Quantity("1500m".to_string()))]
                .into_iter()
                .collect()
        ));
    }
}
