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

//! Status admission for child ResourceQuotas.
//!
//! Every status update carrying the managing label is validated against
//! the owning ClusterResourceQuota's hard limit under the per-quota shard
//! lock, making the read-validate-commit sequence atomic per quota.
//! Provenance of the caller is left to API-server RBAC on the status
//! subresource.

use crate::admission::error::{ConflictExhaustedSnafu, Error, QuotaExceededSnafu, TransientSnafu};
use crate::admission::state::AppState;
use crate::admission::{REQUEST_TIMEOUT, deny};
use crate::cache::ResourceUsageInfo;
use crate::resources;
use crate::types::v1::ResourceList;
use crate::types::v1::cluster_resource_quota::{
    ClusterResourceQuota, ClusterResourceQuotaStatus, NamespaceResourceQuota,
};
use crate::types::v1::resource_quota::ResourceQuota;
use axum::Json;
use axum::extract::State;
use kube::Api;
use kube::api::PostParams;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use rand::Rng;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(100);

pub async fn validate_status(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview<ResourceQuota>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<ResourceQuota> = match review.try_into() {
        Ok(req) => req,
        Err(error) => {
            warn!(%error, "invalid admission review");
            return Json(AdmissionResponse::invalid(error).into_review());
        }
    };
    let resp = AdmissionResponse::from(&req);

    let Some(rq) = req.object.clone() else {
        return Json(deny(resp, 400, "admission request has no object").into_review());
    };
    let Some(crq_name) = rq.managing_label().map(str::to_string) else {
        debug!("not managed by a ClusterResourceQuota; allowed");
        metrics::counter!("admission_requests_total", "hook" => "status", "verdict" => "allowed")
            .increment(1);
        return Json(resp.into_review());
    };

    match tokio::time::timeout(REQUEST_TIMEOUT, validate(&state, &crq_name, &rq)).await {
        Ok(Ok(())) => {
            metrics::counter!("admission_requests_total", "hook" => "status", "verdict" => "allowed")
                .increment(1);
            Json(resp.into_review())
        }
        Ok(Err(error)) => {
            info!(%error, quota = %crq_name, "resource quota status denied");
            metrics::counter!("admission_requests_total", "hook" => "status", "verdict" => "denied")
                .increment(1);
            Json(deny(resp, error.code(), &error.to_string()).into_review())
        }
        Err(_) => Json(deny(resp, 500, "request deadline exceeded").into_review()),
    }
}

/// Validates and commits the status update: computes the cluster-wide
/// delta under the shard lock, rejects if the new total breaches the
/// hard limit, otherwise persists the ClusterResourceQuota status (with
/// bounded conflict retries) and records the new usage in the cache.
async fn validate(state: &AppState, crq_name: &str, rq: &ResourceQuota) -> Result<(), Error> {
    let api: Api<ClusterResourceQuota> = Api::all(state.client.clone());

    let mut crq = match api.get(crq_name).await {
        Ok(crq) => crq,
        // racing a quota deletion leaves nothing to enforce
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e).context(TransientSnafu),
    };
    if crq.is_deleting() {
        return Ok(());
    }

    let namespace = rq
        .metadata
        .namespace
        .clone()
        .ok_or(crate::types::error::Error::NoNamespace)?;
    let new_used = rq.used();

    let shard = state.cache.get_or_create(crq_name);
    let mut usage = shard.usage.lock().await;

    let mut attempt = 0;
    loop {
        let new_total = evaluate(&crq, &namespace, &new_used, &usage)?;

        let mut status = crq.status.clone().unwrap_or_default();
        apply_status_used(&mut status, &namespace, &new_used, new_total);
        let mut updated = crq.clone();
        updated.status = Some(status);

        let body = serde_json::to_vec(&updated).map_err(crate::types::error::Error::from)?;
        match api
            .replace_status(crq_name, &PostParams::default(), body)
            .await
        {
            Ok(_) => break,
            Err(kube::Error::Api(e)) if e.code == 409 => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(kube::Error::Api(e)).context(ConflictExhaustedSnafu {
                        attempts: MAX_ATTEMPTS,
                    });
                }
                tokio::time::sleep(backoff(attempt)).await;
                crq = match api.get(crq_name).await {
                    Ok(crq) => crq,
                    Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
                    Err(e) => return Err(e).context(TransientSnafu),
                };
                if crq.is_deleting() {
                    return Ok(());
                }
            }
            Err(e) => return Err(e).context(TransientSnafu),
        }
    }

    usage.insert(
        namespace,
        ResourceUsageInfo {
            hard: rq
                .status
                .as_ref()
                .and_then(|s| s.hard.clone())
                .unwrap_or_default(),
            used: new_used,
            last_update: Some(Instant::now()),
        },
    );
    Ok(())
}

/// Pure admission decision: the prospective cluster-wide total, or the
/// quota-exceeded rejection naming only the offending dimensions.
pub(crate) fn evaluate(
    crq: &ClusterResourceQuota,
    namespace: &str,
    new_used: &ResourceList,
    usage: &BTreeMap<String, ResourceUsageInfo>,
) -> Result<ResourceList, Error> {
    let mut old_total = ResourceList::new();
    for info in usage.values() {
        old_total = resources::add(&old_total, &info.used)?;
    }
    let old_usage = usage
        .get(namespace)
        .map(|info| info.used.clone())
        .unwrap_or_default();

    let delta = resources::subtract(new_used, &old_usage)?;
    let new_total = resources::add(&old_total, &delta)?;

    let hard = crq
        .status
        .as_ref()
        .and_then(|s| s.hard.clone())
        .unwrap_or_default();
    let (ok, exceeded) = resources::less_than_or_equal(&new_total, &hard)?;
    if !ok {
        return QuotaExceededSnafu {
            message: format!(
                "exceeded cluster quota: {}, requested: {}, used: {}, limited: {}",
                crq.name(),
                resources::format(&resources::mask(&delta, &exceeded)),
                resources::format(&resources::mask(&old_total, &exceeded)),
                resources::format(&resources::mask(&hard, &exceeded)),
            ),
        }
        .fail();
    }
    Ok(new_total)
}

/// Upserts the namespace entry and the new total into the quota status.
pub(crate) fn apply_status_used(
    status: &mut ClusterResourceQuotaStatus,
    namespace: &str,
    rq_used: &ResourceList,
    new_total: ResourceList,
) {
    status.used = Some(new_total);
    match status.namespaces.iter_mut().find(|n| n.name == namespace) {
        Some(entry) => entry.used = Some(rq_used.clone()),
        None => status.namespaces.push(NamespaceResourceQuota {
            name: namespace.to_string(),
            used: Some(rq_used.clone()),
        }),
    }
}

fn backoff(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
    let jitter = rand::rng().random_range(0.9..=1.1);
    Duration::from_millis((base * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{create_test_crq, quantity_list};

    fn usage_of(entries: &[(&str, &[(&str, &str)])]) -> BTreeMap<String, ResourceUsageInfo> {
        entries
            .iter()
            .map(|(ns, used)| {
                (
                    ns.to_string(),
                    ResourceUsageInfo {
                        hard: ResourceList::new(),
                        used: quantity_list(used),
                        last_update: Some(Instant::now()),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn over_budget_update_is_rejected_with_the_offending_dimensions() {
        let mut crq = create_test_crq("c2", &[("env", "prod")], &[("cpu", "2")]);
        crq.status = Some(ClusterResourceQuotaStatus {
            hard: Some(quantity_list(&[("cpu", "2")])),
            used: Some(quantity_list(&[("cpu", "2")])),
            namespaces: Vec::new(),
            observed_generation: None,
        });
        let usage = usage_of(&[("ns1", &[("cpu", "1")]), ("ns2", &[("cpu", "1")])]);

        let err = evaluate(&crq, "ns1", &quantity_list(&[("cpu", "2")]), &usage).unwrap_err();
        assert_eq!(err.code(), 403);
        assert_eq!(
            err.to_string(),
            "exceeded cluster quota: c2, requested: cpu=1, used: cpu=2, limited: cpu=2"
        );
    }

    #[test]
    fn under_budget_update_is_admitted_with_the_new_total() {
        let mut crq = create_test_crq("c2", &[("env", "prod")], &[("cpu", "2")]);
        crq.status = Some(ClusterResourceQuotaStatus {
            hard: Some(quantity_list(&[("cpu", "3")])),
            used: Some(quantity_list(&[("cpu", "2")])),
            namespaces: Vec::new(),
            observed_generation: None,
        });
        let usage = usage_of(&[("ns1", &[("cpu", "1")]), ("ns2", &[("cpu", "1")])]);

        let total = evaluate(&crq, "ns1", &quantity_list(&[("cpu", "1.5")]), &usage).unwrap();
        assert!(resources::equals(&total, &quantity_list(&[("cpu", "2500m")])));
    }

    #[test]
    fn readmitting_the_same_status_is_a_no_op() {
        let mut crq = create_test_crq("c1", &[("env", "prod")], &[("cpu", "2")]);
        crq.status = Some(ClusterResourceQuotaStatus {
            hard: Some(quantity_list(&[("cpu", "2")])),
            used: Some(quantity_list(&[("cpu", "2")])),
            namespaces: Vec::new(),
            observed_generation: None,
        });
        let usage = usage_of(&[("ns1", &[("cpu", "1")]), ("ns2", &[("cpu", "1")])]);

        // the aggregate already sits at the limit; a zero delta must pass
        let total = evaluate(&crq, "ns1", &quantity_list(&[("cpu", "1")]), &usage).unwrap();
        assert!(resources::equals(&total, &quantity_list(&[("cpu", "2")])));
    }

    #[test]
    fn namespaces_unseen_by_the_cache_count_from_zero() {
        let mut crq = create_test_crq("c1", &[("env", "prod")], &[("cpu", "2")]);
        crq.status = Some(ClusterResourceQuotaStatus {
            hard: Some(quantity_list(&[("cpu", "2")])),
            used: None,
            namespaces: Vec::new(),
            observed_generation: None,
        });

        let total =
            evaluate(&crq, "ns-new", &quantity_list(&[("cpu", "1")]), &BTreeMap::new()).unwrap();
        assert!(resources::equals(&total, &quantity_list(&[("cpu", "1")])));
    }

    #[test]
    fn dimensions_absent_from_the_limit_are_unconstrained() {
        let mut crq = create_test_crq("c1", &[("env", "prod")], &[("cpu", "2")]);
        crq.status = Some(ClusterResourceQuotaStatus {
            hard: Some(quantity_list(&[("cpu", "2")])),
            used: None,
            namespaces: Vec::new(),
            observed_generation: None,
        });

        let total = evaluate(
            &crq,
            "ns1",
            &quantity_list(&[("cpu", "1"), ("memory", "100Gi")]),
            &BTreeMap::new(),
        )
        .unwrap();
        assert!(total.contains_key("memory"), "unconstrained keys still aggregate");
    }

    #[test]
    fn status_upsert_replaces_or_appends_the_namespace_entry() {
        let mut status = ClusterResourceQuotaStatus::default();
        apply_status_used(
            &mut status,
            "ns1",
            &quantity_list(&[("cpu", "1")]),
            quantity_list(&[("cpu", "1")]),
        );
        apply_status_used(
            &mut status,
            "ns2",
            &quantity_list(&[("cpu", "2")]),
            quantity_list(&[("cpu", "3")]),
        );
        apply_status_used(
            &mut status,
            "ns1",
            &quantity_list(&[("cpu", "1500m")]),
            quantity_list(&[("cpu", "3500m")]),
        );

        assert_eq!(status.namespaces.len(), 2);
        assert_eq!(
            status.namespaces[0].used,
            Some(quantity_list(&[("cpu", "1500m")]))
        );
        assert_eq!(status.used, Some(quantity_list(&[("cpu", "3500m")])));
    }

    #[test]
    fn backoff_is_capped_and_jittered() {
        for attempt in 1..MAX_ATTEMPTS {
            let delay = backoff(attempt);
            let nominal = 100.0 * 2f64.powi(attempt as i32 - 1);
            assert!(delay.as_millis() as f64 >= nominal * 0.9 - 1.0);
            assert!(delay.as_millis() as f64 <= nominal * 1.1 + 1.0);
        }
    }
}
