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

use crate::types::v1::{LABEL_CLUSTER_RESOURCE_QUOTA, ResourceList};
use k8s_openapi::api::core::v1 as corev1;
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};

/// Namespaced quota materialized by the ClusterResourceQuota reconciler.
///
/// Wire-compatible with the built-in `core/v1` ResourceQuota but registered
/// under this operator's group so its admission hooks fire only for managed
/// quotas, never for user-authored ones.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "quota.kubeward.dev",
    version = "v1",
    kind = "ResourceQuota",
    namespaced,
    status = "crate::types::v1::resource_quota::ResourceQuotaStatus",
    plural = "resourcequotas",
    singular = "resourcequota",
    printcolumn = r#"{"name":"Request", "type":"string", "jsonPath":".status.used"}"#,
    printcolumn = r#"{"name":"Limit", "type":"string", "jsonPath":".status.hard"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard: Option<ResourceList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_selector: Option<corev1::ScopeSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotaStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard: Option<ResourceList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<ResourceList>,
}

impl ResourceQuota {
    /// Value of the managing label, if present and non-empty.
    pub fn managing_label(&self) -> Option<&str> {
        self.labels()
            .get(LABEL_CLUSTER_RESOURCE_QUOTA)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn used(&self) -> ResourceList {
        self.status
            .as_ref()
            .and_then(|s| s.used.clone())
            .unwrap_or_default()
    }

    /// The `core/v1` view of this quota, as surfaced to the namespaced
    /// usage machinery.
    pub fn to_core(&self) -> corev1::ResourceQuota {
        corev1::ResourceQuota {
            metadata: self.metadata.clone(),
            spec: Some(corev1::ResourceQuotaSpec {
                hard: self.spec.hard.clone(),
                scopes: self.spec.scopes.clone(),
                scope_selector: self.spec.scope_selector.clone(),
            }),
            status: self.status.as_ref().map(|s| corev1::ResourceQuotaStatus {
                hard: s.hard.clone(),
                used: s.used.clone(),
            }),
        }
    }

    /// Rebuilds the custom kind from a `core/v1` view.
    pub fn from_core(rq: &corev1::ResourceQuota) -> Self {
        let spec = rq.spec.clone().unwrap_or_default();
        let mut out = ResourceQuota::new(
            &rq.name_any(),
            ResourceQuotaSpec {
                hard: spec.hard,
                scopes: spec.scopes,
                scope_selector: spec.scope_selector,
            },
        );
        out.metadata = rq.metadata.clone();
        out.status = rq.status.as_ref().map(|s| ResourceQuotaStatus {
            hard: s.hard.clone(),
            used: s.used.clone(),
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::create_test_rq;

    #[test]
    fn managing_label_requires_non_empty_value() {
        let mut rq = create_test_rq("ns1", "crq", &[("cpu", "1")]);
        assert_eq!(rq.managing_label(), Some("crq"));

        rq.metadata.labels = Some(
            [(LABEL_CLUSTER_RESOURCE_QUOTA.to_string(), String::new())]
                .into_iter()
                .collect(),
        );
        assert_eq!(rq.managing_label(), None);

        rq.metadata.labels = None;
        assert_eq!(rq.managing_label(), None);
    }

    #[test]
    fn core_view_round_trips_metadata_spec_and_status() {
        let rq = create_test_rq("ns1", "crq", &[("cpu", "1")]);
        let core = rq.to_core();
        assert_eq!(core.metadata.namespace.as_deref(), Some("ns1"));
        assert_eq!(
            core.status.as_ref().and_then(|s| s.used.clone()),
            rq.status.as_ref().and_then(|s| s.used.clone())
        );

        let back = ResourceQuota::from_core(&core);
        assert_eq!(back.metadata.name, rq.metadata.name);
        assert_eq!(back.managing_label(), Some("crq"));
        assert_eq!(back.used(), rq.used());
    }
}
