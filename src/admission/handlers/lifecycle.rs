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

//! Lifecycle protection for child ResourceQuotas: the managing label is
//! immutable once set, and a managed quota cannot be deleted while its
//! owning ClusterResourceQuota is alive.

use crate::admission::deny;
use crate::admission::error::{
    Error, ImmutableLabelSnafu, ProtectedDeletionSnafu, TransientSnafu,
};
use crate::admission::state::AppState;
use crate::types::v1::cluster_resource_quota::ClusterResourceQuota;
use crate::types::v1::resource_quota::ResourceQuota;
use axum::Json;
use axum::extract::State;
use kube::Api;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use snafu::ResultExt;
use tracing::{info, warn};

pub async fn validate_remove(
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

    let verdict = match req.operation {
        Operation::Update => handle_update(&req),
        Operation::Delete => handle_delete(&state, &req).await,
        _ => Ok(()),
    };

    match verdict {
        Ok(()) => {
            metrics::counter!("admission_requests_total", "hook" => "remove", "verdict" => "allowed")
                .increment(1);
            Json(resp.into_review())
        }
        Err(error) => {
            info!(%error, "resource quota lifecycle change denied");
            metrics::counter!("admission_requests_total", "hook" => "remove", "verdict" => "denied")
                .increment(1);
            Json(deny(resp, error.code(), &error.to_string()).into_review())
        }
    }
}

fn handle_update(req: &AdmissionRequest<ResourceQuota>) -> Result<(), Error> {
    let old_label = req.old_object.as_ref().and_then(|rq| rq.managing_label());
    let new_label = req.object.as_ref().and_then(|rq| rq.managing_label());
    check_label_change(old_label, new_label)
}

/// Once the managing label holds a non-empty value it may neither change
/// nor be cleared.
pub(crate) fn check_label_change(old: Option<&str>, new: Option<&str>) -> Result<(), Error> {
    match old {
        Some(old) if new != Some(old) => ImmutableLabelSnafu {
            old: old.to_string(),
            new: new.unwrap_or_default().to_string(),
        }
        .fail(),
        _ => Ok(()),
    }
}

async fn handle_delete(state: &AppState, req: &AdmissionRequest<ResourceQuota>) -> Result<(), Error> {
    // deletes carry the object being removed in oldObject
    let Some(target) = req.old_object.as_ref() else {
        return Ok(());
    };
    let Some(crq_name) = target.managing_label() else {
        return Ok(());
    };

    let api: Api<ClusterResourceQuota> = Api::all(state.client.clone());
    let crq = match api.get(crq_name).await {
        Ok(crq) => crq,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e).context(TransientSnafu),
    };
    if crq.is_deleting() {
        return Ok(());
    }

    ProtectedDeletionSnafu {
        name: crq_name.to_string(),
    }
    .fail()
}
