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

use crate::types::selector;
use crate::types::v1::resource_quota::{ResourceQuota, ResourceQuotaSpec};
use crate::types::v1::{LABEL_CLUSTER_RESOURCE_QUOTA, ResourceList, child_resource_quota_name};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, KubeSchema, Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cluster-scoped budget applied across every namespace matched by the
/// namespace selector. The quota fields share the wire shape of a
/// `core/v1` ResourceQuota spec so existing tooling can read them.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "quota.kubeward.dev",
    version = "v1",
    kind = "ClusterResourceQuota",
    status = "crate::types::v1::cluster_resource_quota::ClusterResourceQuotaStatus",
    shortname = "crq",
    plural = "clusterresourcequotas",
    singular = "clusterresourcequota",
    printcolumn = r#"{"name":"Request", "type":"string", "jsonPath":".status.used"}"#,
    printcolumn = r#"{"name":"Limit", "type":"string", "jsonPath":".status.hard"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceQuotaSpec {
    /// Hard limit enforced on the summed usage of all selected namespaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard: Option<ResourceList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_selector: Option<corev1::ScopeSelector>,

    /// Selects the namespaces the quota applies to. A nil selector selects
    /// no namespaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<metav1::LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceQuotaStatus {
    /// Spec generation the reconciler last fanned out. Status writes do
    /// not bump the generation, so this distinguishes spec changes from
    /// the reconciler's own updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard: Option<ResourceList>,

    /// Element-wise sum of usage across all selected namespaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<ResourceList>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<NamespaceResourceQuota>,
}

/// Per-namespace usage entry mirrored into the ClusterResourceQuota status.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceResourceQuota {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<ResourceList>,
}

impl ClusterResourceQuota {
    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the namespace labels satisfy this quota's namespace selector.
    pub fn matches_namespace(&self, labels: &BTreeMap<String, String>) -> bool {
        selector::namespace_matches(self.spec.namespace_selector.as_ref(), labels)
    }

    /// a new owner reference pointing back at this quota
    pub fn new_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// The child ResourceQuota materialized in `namespace`: named after the
    /// quota, labeled with the managing label, owned so that deleting the
    /// quota cascades, and carrying a copy of the quota spec.
    pub fn child_resource_quota(&self, namespace: &str) -> ResourceQuota {
        let mut child = ResourceQuota::new(
            &child_resource_quota_name(&self.name()),
            ResourceQuotaSpec {
                hard: self.spec.hard.clone(),
                scopes: self.spec.scopes.clone(),
                scope_selector: self.spec.scope_selector.clone(),
            },
        );
        child.metadata.namespace = Some(namespace.to_string());
        child.metadata.labels = Some(
            [(LABEL_CLUSTER_RESOURCE_QUOTA.to_string(), self.name())]
                .into_iter()
                .collect(),
        );
        child.metadata.owner_references = Some(vec![self.new_owner_ref()]);
        child
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::create_test_crq;
    use crate::types::v1::LABEL_CLUSTER_RESOURCE_QUOTA;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    #[test]
    fn child_resource_quota_carries_label_owner_and_spec() {
        let crq = create_test_crq("c1", &[("env", "prod")], &[("cpu", "1")]);
        let child = crq.child_resource_quota("n1");

        assert_eq!(
            child.metadata.name.as_deref(),
            Some("clusterresourcequota.c1")
        );
        assert_eq!(child.metadata.namespace.as_deref(), Some("n1"));
        assert_eq!(
            child
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(LABEL_CLUSTER_RESOURCE_QUOTA))
                .map(String::as_str),
            Some("c1")
        );

        let owners = child.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].name, "c1");
        assert_eq!(owners[0].kind, "ClusterResourceQuota");
        assert_eq!(owners[0].controller, Some(true));

        assert_eq!(
            child.spec.hard.as_ref().and_then(|h| h.get("cpu")),
            Some(&Quantity("1".to_string()))
        );
    }

    #[test]
    fn namespace_matching_honors_selector() {
        let crq = create_test_crq("c1", &[("env", "prod")], &[("cpu", "1")]);
        let prod = [("env".to_string(), "prod".to_string())].into_iter().collect();
        let other = [("env".to_string(), "other".to_string())].into_iter().collect();
        assert!(crq.matches_namespace(&prod));
        assert!(!crq.matches_namespace(&other));

        let mut unselective = crq.clone();
        unselective.spec.namespace_selector = None;
        assert!(!unselective.matches_namespace(&prod));
    }
}
