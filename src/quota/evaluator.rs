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

//! Usage evaluators for the workload kinds a namespaced quota tracks.
//!
//! Each evaluator is a plain function: it reports the resource usage a
//! single object contributes and which quota keys it can satisfy. A quota
//! matches an object when it constrains at least one of those keys and,
//! for pods, when every scope matches.

use crate::quota::{Error, scope};
use crate::resources;
use crate::types::v1::ResourceList;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub const RESOURCE_PODS: &str = "pods";
pub const RESOURCE_SERVICES: &str = "services";
pub const RESOURCE_SERVICES_NODEPORTS: &str = "services.nodeports";
pub const RESOURCE_SERVICES_LOADBALANCERS: &str = "services.loadbalancers";
pub const RESOURCE_PVCS: &str = "persistentvolumeclaims";
pub const RESOURCE_REQUESTS_STORAGE: &str = "requests.storage";

fn one() -> Quantity {
    Quantity("1".to_string())
}

/// Pods in a terminal phase no longer hold resources.
pub fn pod_is_terminal(pod: &corev1::Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Resource usage contributed by one pod: the pod count, effective
/// requests (sum of containers, element-wise max against each init
/// container) and limits. Request keys are also exposed under their bare
/// names for `cpu` and `memory`, matching the built-in quota keys.
pub fn pod_usage(pod: &corev1::Pod) -> Result<ResourceList, Error> {
    let mut requests = ResourceList::new();
    let mut limits = ResourceList::new();

    if let Some(spec) = pod.spec.as_ref() {
        for container in &spec.containers {
            if let Some(res) = container.resources.as_ref() {
                if let Some(r) = res.requests.as_ref() {
                    requests = resources::add(&requests, r)?;
                }
                if let Some(l) = res.limits.as_ref() {
                    limits = resources::add(&limits, l)?;
                }
            }
        }
        for container in spec.init_containers.iter().flatten() {
            if let Some(res) = container.resources.as_ref() {
                if let Some(r) = res.requests.as_ref() {
                    requests = resources::element_wise_max(&requests, r)?;
                }
                if let Some(l) = res.limits.as_ref() {
                    limits = resources::element_wise_max(&limits, l)?;
                }
            }
        }
    }

    let mut usage = ResourceList::new();
    usage.insert(RESOURCE_PODS.to_string(), one());
    usage.insert("count/pods".to_string(), one());
    for (name, quantity) in &requests {
        usage.insert(format!("requests.{name}"), quantity.clone());
        if name == "cpu" || name == "memory" {
            usage.insert(name.clone(), quantity.clone());
        }
    }
    for (name, quantity) in &limits {
        usage.insert(format!("limits.{name}"), quantity.clone());
    }
    Ok(usage)
}

pub fn service_usage(service: &corev1::Service) -> ResourceList {
    let mut usage = ResourceList::new();
    usage.insert(RESOURCE_SERVICES.to_string(), one());
    usage.insert("count/services".to_string(), one());

    let spec = service.spec.as_ref();
    let ports = spec.and_then(|s| s.ports.as_ref()).map_or(0, Vec::len);
    match spec.and_then(|s| s.type_.as_deref()) {
        Some("NodePort") => {
            usage.insert(RESOURCE_SERVICES_NODEPORTS.to_string(), Quantity(ports.to_string()));
        }
        Some("LoadBalancer") => {
            usage.insert(RESOURCE_SERVICES_LOADBALANCERS.to_string(), one());
            usage.insert(RESOURCE_SERVICES_NODEPORTS.to_string(), Quantity(ports.to_string()));
        }
        _ => {}
    }
    usage
}

pub fn pvc_usage(pvc: &corev1::PersistentVolumeClaim) -> ResourceList {
    let mut usage = ResourceList::new();
    usage.insert(RESOURCE_PVCS.to_string(), one());
    usage.insert("count/persistentvolumeclaims".to_string(), one());
    if let Some(storage) = pvc
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
    {
        usage.insert(RESOURCE_REQUESTS_STORAGE.to_string(), storage.clone());
    }
    usage
}

/// The subset of `keys` the pod evaluator can satisfy.
pub fn pod_matching_resources(keys: &[String]) -> Vec<String> {
    keys.iter()
        .filter(|key| {
            key.as_str() == RESOURCE_PODS
                || key.as_str() == "count/pods"
                || key.as_str() == "cpu"
                || key.as_str() == "memory"
                || key.starts_with("requests.")
                || key.starts_with("limits.")
        })
        .filter(|key| key.as_str() != RESOURCE_REQUESTS_STORAGE)
        .cloned()
        .collect()
}

pub fn service_matching_resources(keys: &[String]) -> Vec<String> {
    keys.iter()
        .filter(|key| {
            matches!(
                key.as_str(),
                RESOURCE_SERVICES
                    | "count/services"
                    | RESOURCE_SERVICES_NODEPORTS
                    | RESOURCE_SERVICES_LOADBALANCERS
            )
        })
        .cloned()
        .collect()
}

pub fn pvc_matching_resources(keys: &[String]) -> Vec<String> {
    keys.iter()
        .filter(|key| {
            matches!(
                key.as_str(),
                RESOURCE_PVCS | "count/persistentvolumeclaims" | RESOURCE_REQUESTS_STORAGE
            )
        })
        .cloned()
        .collect()
}

pub fn hard_keys(rq: &corev1::ResourceQuota) -> Vec<String> {
    rq.spec
        .as_ref()
        .and_then(|s| s.hard.as_ref())
        .map(|h| h.keys().cloned().collect())
        .unwrap_or_default()
}

fn has_scopes(rq: &corev1::ResourceQuota) -> bool {
    rq.spec.as_ref().is_some_and(|s| {
        s.scopes.as_ref().is_some_and(|sc| !sc.is_empty())
            || s.scope_selector
                .as_ref()
                .is_some_and(|ss| ss.match_expressions.as_ref().is_some_and(|e| !e.is_empty()))
    })
}

/// Whether the quota constrains this pod: it tracks at least one pod
/// resource and every scope matches.
pub fn rq_matches_pod(rq: &corev1::ResourceQuota, pod: &corev1::Pod) -> Result<bool, Error> {
    if pod_matching_resources(&hard_keys(rq)).is_empty() {
        return Ok(false);
    }
    let spec = rq.spec.as_ref();
    scope::pod_matches_scopes(
        pod,
        spec.and_then(|s| s.scopes.as_ref()),
        spec.and_then(|s| s.scope_selector.as_ref()),
    )
}

/// Scoped quotas only ever track pods.
pub fn rq_matches_service(rq: &corev1::ResourceQuota) -> bool {
    !has_scopes(rq) && !service_matching_resources(&hard_keys(rq)).is_empty()
}

pub fn rq_matches_pvc(rq: &corev1::ResourceQuota) -> bool {
    !has_scopes(rq) && !pvc_matching_resources(&hard_keys(rq)).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{create_test_pod, quantity_list};

    #[test]
    fn pod_usage_counts_requests_limits_and_the_pod_itself() {
        let mut pod = create_test_pod("p", "ns1", &[("cpu", "500m"), ("nvidia.com/gpu", "2")]);
        pod.spec
            .as_mut()
            .unwrap()
            .containers
            .get_mut(0)
            .unwrap()
            .resources
            .as_mut()
            .unwrap()
            .limits = Some(quantity_list(&[("cpu", "1")]));

        let usage = pod_usage(&pod).unwrap();
        assert_eq!(usage.get("pods"), Some(&Quantity("1".to_string())));
        assert_eq!(usage.get("cpu"), Some(&Quantity("500m".to_string())));
        assert_eq!(usage.get("requests.cpu"), Some(&Quantity("500m".to_string())));
        assert_eq!(
            usage.get("requests.nvidia.com/gpu"),
            Some(&Quantity("2".to_string()))
        );
        assert_eq!(usage.get("limits.cpu"), Some(&Quantity("1".to_string())));
    }

    #[test]
    fn init_containers_raise_effective_requests_to_their_max() {
        let mut pod = create_test_pod("p", "ns1", &[("cpu", "500m")]);
        pod.spec.as_mut().unwrap().init_containers = Some(vec![corev1::Container {
            name: "init".to_string(),
            resources: Some(corev1::ResourceRequirements {
                requests: Some(quantity_list(&[("cpu", "2")])),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let usage = pod_usage(&pod).unwrap();
        assert_eq!(usage.get("requests.cpu"), Some(&Quantity("2".to_string())));
    }

    #[test]
    fn terminal_pods_are_recognized() {
        let mut pod = create_test_pod("p", "ns1", &[("cpu", "1")]);
        assert!(!pod_is_terminal(&pod));
        pod.status = Some(corev1::PodStatus {
            phase: Some("Succeeded".to_string()),
            ..Default::default()
        });
        assert!(pod_is_terminal(&pod));
    }

    #[test]
    fn service_usage_depends_on_type() {
        let mut service = corev1::Service::default();
        assert_eq!(
            service_usage(&service).get("services"),
            Some(&Quantity("1".to_string()))
        );

        service.spec = Some(corev1::ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(vec![corev1::ServicePort::default(), corev1::ServicePort::default()]),
            ..Default::default()
        });
        let usage = service_usage(&service);
        assert_eq!(
            usage.get("services.loadbalancers"),
            Some(&Quantity("1".to_string()))
        );
        assert_eq!(
            usage.get("services.nodeports"),
            Some(&Quantity("2".to_string()))
        );
    }

    #[test]
    fn matching_requires_a_tracked_key() {
        let pod = create_test_pod("p", "ns1", &[("cpu", "1")]);

        let mut rq = corev1::ResourceQuota::default();
        rq.spec = Some(corev1::ResourceQuotaSpec {
            hard: Some(quantity_list(&[("services", "5")])),
            ..Default::default()
        });
        assert!(!rq_matches_pod(&rq, &pod).unwrap());
        assert!(rq_matches_service(&rq));

        rq.spec.as_mut().unwrap().hard = Some(quantity_list(&[("requests.cpu", "4")]));
        assert!(rq_matches_pod(&rq, &pod).unwrap());
        assert!(!rq_matches_service(&rq));
    }

    #[test]
    fn scoped_quotas_track_only_matching_pods() {
        let pod = create_test_pod("p", "ns1", &[("cpu", "1")]);
        let mut rq = corev1::ResourceQuota::default();
        rq.spec = Some(corev1::ResourceQuotaSpec {
            hard: Some(quantity_list(&[("requests.cpu", "4")])),
            scopes: Some(vec!["NodeSelector".to_string()]),
            ..Default::default()
        });

        // no node selector on the pod
        assert!(!rq_matches_pod(&rq, &pod).unwrap());
        assert!(!rq_matches_service(&rq), "scoped quotas never track services");

        let mut scheduled = pod.clone();
        scheduled.spec.as_mut().unwrap().node_selector = Some(
            [("pool".to_string(), "gpu-a100".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(rq_matches_pod(&rq, &scheduled).unwrap());
    }
}
