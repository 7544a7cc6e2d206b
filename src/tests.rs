//  Copyright 2025 Kubeward Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http:www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use crate::types::v1::cluster_resource_quota::{ClusterResourceQuota, ClusterResourceQuotaSpec};
use crate::types::v1::resource_quota::{ResourceQuota, ResourceQuotaSpec, ResourceQuotaStatus};
use crate::types::v1::{LABEL_CLUSTER_RESOURCE_QUOTA, ResourceList, child_resource_quota_name};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

// Helper fixtures shared by the submodule tests

pub fn quantity_list(pairs: &[(&str, &str)]) -> ResourceList {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

pub fn create_test_crq(
    name: &str,
    selector: &[(&str, &str)],
    hard: &[(&str, &str)],
) -> ClusterResourceQuota {
    ClusterResourceQuota {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            uid: Some("test-uid-123".to_string()),
            ..Default::default()
        },
        spec: ClusterResourceQuotaSpec {
            hard: Some(quantity_list(hard)),
            namespace_selector: Some(metav1::LabelSelector {
                match_labels: Some(
                    selector
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                match_expressions: None,
            }),
            ..Default::default()
        },
        status: None,
    }
}

pub fn create_test_rq(namespace: &str, crq_name: &str, used: &[(&str, &str)]) -> ResourceQuota {
    let mut rq = ResourceQuota::new(
        &child_resource_quota_name(crq_name),
        ResourceQuotaSpec::default(),
    );
    rq.metadata.namespace = Some(namespace.to_string());
    rq.metadata.labels = Some(
        [(LABEL_CLUSTER_RESOURCE_QUOTA.to_string(), crq_name.to_string())]
            .into_iter()
            .collect(),
    );
    rq.status = Some(ResourceQuotaStatus {
        hard: None,
        used: Some(quantity_list(used)),
    });
    rq
}

pub fn create_test_pod(name: &str, namespace: &str, requests: &[(&str, &str)]) -> corev1::Pod {
    corev1::Pod {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "main".to_string(),
                resources: Some(corev1::ResourceRequirements {
                    requests: Some(quantity_list(requests)),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}
