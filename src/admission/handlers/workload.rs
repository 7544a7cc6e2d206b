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

//! Workload quota gate: the namespaced quota admission exposed as a
//! webhook. Dispatches on `{kind, operation}`, charges the object's usage
//! against every matching managed quota in the namespace, and writes the
//! incremented status through the restricted client, which re-enters the
//! status admission hook for the cluster-wide check.

use crate::admission::error::{BadRequestSnafu, Error, QuotaExceededSnafu};
use crate::admission::state::AppState;
use crate::admission::{REQUEST_TIMEOUT, deny};
use crate::quota::evaluator;
use crate::resources;
use crate::types::v1::ResourceList;
use axum::Json;
use axum::extract::State;
use k8s_openapi::api::core::v1 as corev1;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::{DynamicObject, GroupVersionKind};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

/// The workload kinds the namespaced quota machinery evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkloadKind {
    Pod,
    Service,
    PersistentVolumeClaim,
}

impl WorkloadKind {
    pub(crate) fn parse(gvk: &GroupVersionKind) -> Option<Self> {
        if !gvk.group.is_empty() {
            return None;
        }
        match gvk.kind.as_str() {
            "Pod" => Some(WorkloadKind::Pod),
            "Service" => Some(WorkloadKind::Service),
            "PersistentVolumeClaim" => Some(WorkloadKind::PersistentVolumeClaim),
            _ => None,
        }
    }
}

pub async fn validate_workload(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(error) => {
            warn!(%error, "invalid admission review");
            return Json(AdmissionResponse::invalid(error).into_review());
        }
    };
    let resp = AdmissionResponse::from(&req);

    let Some(kind) = WorkloadKind::parse(&req.kind) else {
        return Json(resp.into_review());
    };
    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return Json(resp.into_review());
    }

    match tokio::time::timeout(REQUEST_TIMEOUT, check(&state, kind, &req)).await {
        Ok(Ok(())) => {
            metrics::counter!("admission_requests_total", "hook" => "workload", "verdict" => "allowed")
                .increment(1);
            Json(resp.into_review())
        }
        Ok(Err(error)) => {
            info!(%error, kind = ?kind, "workload denied");
            metrics::counter!("admission_requests_total", "hook" => "workload", "verdict" => "denied")
                .increment(1);
            Json(deny(resp, error.code(), &error.to_string()).into_review())
        }
        Err(_) => Json(deny(resp, 500, "request deadline exceeded").into_review()),
    }
}

/// The decoded workload with its usage delta, computed once per request.
enum Decoded {
    Pod { pod: corev1::Pod, delta: ResourceList },
    Service { delta: ResourceList },
    PersistentVolumeClaim { delta: ResourceList },
}

fn decode<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T, Error> {
    let value = serde_json::to_value(obj).map_err(|e| {
        BadRequestSnafu {
            message: e.to_string(),
        }
        .build()
    })?;
    serde_json::from_value(value).map_err(|e| {
        BadRequestSnafu {
            message: e.to_string(),
        }
        .build()
    })
}

async fn check(
    state: &AppState,
    kind: WorkloadKind,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<(), Error> {
    let Some(object) = req.object.as_ref() else {
        return BadRequestSnafu {
            message: "admission request has no object".to_string(),
        }
        .fail();
    };
    let namespace = match req.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => ns.to_string(),
        _ => return Ok(()),
    };

    // decode once, charge each matching quota, then persist the increments
    let decoded = match kind {
        WorkloadKind::Pod => {
            let pod: corev1::Pod = decode(object)?;
            if evaluator::pod_is_terminal(&pod) {
                return Ok(());
            }
            let mut delta = evaluator::pod_usage(&pod)?;
            if let Some(old) = req.old_object.as_ref() {
                let old_pod: corev1::Pod = decode(old)?;
                delta = resources::subtract(&delta, &evaluator::pod_usage(&old_pod)?)?;
            }
            Decoded::Pod { pod, delta }
        }
        WorkloadKind::Service => {
            let service: corev1::Service = decode(object)?;
            let mut delta = evaluator::service_usage(&service);
            if let Some(old) = req.old_object.as_ref() {
                let old_service: corev1::Service = decode(old)?;
                delta = resources::subtract(&delta, &evaluator::service_usage(&old_service))?;
            }
            Decoded::Service { delta }
        }
        WorkloadKind::PersistentVolumeClaim => {
            let pvc: corev1::PersistentVolumeClaim = decode(object)?;
            let mut delta = evaluator::pvc_usage(&pvc);
            if let Some(old) = req.old_object.as_ref() {
                let old_pvc: corev1::PersistentVolumeClaim = decode(old)?;
                delta = resources::subtract(&delta, &evaluator::pvc_usage(&old_pvc))?;
            }
            Decoded::PersistentVolumeClaim { delta }
        }
    };

    let mut updates = Vec::new();
    for rq in state.lister.list(&namespace) {
        let keys = evaluator::hard_keys(&rq);
        let planned = match &decoded {
            Decoded::Pod { pod, delta } => evaluator::rq_matches_pod(&rq, pod)?
                .then(|| (delta, evaluator::pod_matching_resources(&keys))),
            Decoded::Service { delta } => evaluator::rq_matches_service(&rq)
                .then(|| (delta, evaluator::service_matching_resources(&keys))),
            Decoded::PersistentVolumeClaim { delta } => evaluator::rq_matches_pvc(&rq)
                .then(|| (delta, evaluator::pvc_matching_resources(&keys))),
        };

        let Some((delta, tracked)) = planned else {
            continue;
        };
        if let Some(updated) = charge(&rq, delta, &tracked)? {
            updates.push(updated);
        }
    }

    for updated in updates {
        if let Err(error) = state
            .quotas
            .resource_quotas(&namespace)
            .update_status(&updated)
            .await
        {
            // 403 here is the cluster-wide gate rejecting the increment
            if error.api_code() == Some(403) {
                return QuotaExceededSnafu {
                    message: error
                        .api_message()
                        .unwrap_or("exceeded cluster quota")
                        .to_string(),
                }
                .fail();
            }
            return Err(error.into());
        }
    }
    Ok(())
}

/// Charges the masked delta against one quota: either the updated quota
/// carrying the incremented usage, or the namespace-level rejection.
pub(crate) fn charge(
    rq: &corev1::ResourceQuota,
    delta: &ResourceList,
    tracked: &[String],
) -> Result<Option<corev1::ResourceQuota>, Error> {
    let masked = resources::mask(delta, tracked);
    if masked.is_empty() {
        return Ok(None);
    }

    let hard = rq
        .spec
        .as_ref()
        .and_then(|s| s.hard.clone())
        .unwrap_or_default();
    let used = rq
        .status
        .as_ref()
        .and_then(|s| s.used.clone())
        .unwrap_or_default();
    let new_used = resources::add(&used, &masked)?;

    let (ok, exceeded) = resources::less_than_or_equal(&new_used, &hard)?;
    if !ok {
        let name = rq.metadata.name.clone().unwrap_or_default();
        return QuotaExceededSnafu {
            message: format!(
                "exceeded quota: {}, requested: {}, used: {}, limited: {}",
                name,
                resources::format(&resources::mask(&masked, &exceeded)),
                resources::format(&resources::mask(&used, &exceeded)),
                resources::format(&resources::mask(&hard, &exceeded)),
            ),
        }
        .fail();
    }

    let mut updated = rq.clone();
    updated.status = Some(corev1::ResourceQuotaStatus {
        hard: Some(hard),
        used: Some(new_used),
    });
    Ok(Some(updated))
}
