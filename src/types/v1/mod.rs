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

pub mod cluster_resource_quota;
pub mod resource_quota;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// API group served by the operator.
pub const GROUP: &str = "quota.kubeward.dev";

/// Group prefix used for operator-owned labels.
pub const GROUP_PREFIX: &str = "kubeward.dev";

/// Label on a child ResourceQuota naming the ClusterResourceQuota that
/// manages it. Immutable once set to a non-empty value.
pub const LABEL_CLUSTER_RESOURCE_QUOTA: &str = "clusterresourcequota.kubeward.dev";

/// Per-resource quantities keyed by resource name, e.g. `cpu` or
/// `requests.nvidia.com/gpu`.
pub type ResourceList = std::collections::BTreeMap<String, Quantity>;

/// Name of the child ResourceQuota materialized in every selected namespace.
pub fn child_resource_quota_name(crq_name: &str) -> String {
    format!("clusterresourcequota.{crq_name}")
}
