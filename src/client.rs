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

//! Restricted client and lister façade over the managed ResourceQuota kind.
//!
//! The namespaced usage machinery sees plain `core/v1` ResourceQuota views
//! and can only observe and update status. Object lifecycle belongs to the
//! reconciler; every other verb answers "method not supported".

use crate::types::error::{Error as TypesError, MethodNotSupportedSnafu};
use crate::types::v1::resource_quota::ResourceQuota;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1 as corev1;
use kube::api::{ListParams, PostParams, WatchEvent, WatchParams};
use kube::runtime::reflector::Store;
use kube::{Api, ResourceExt};
use snafu::Snafu;
use snafu::futures::TryFutureExt;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(transparent)]
    Types { source: TypesError },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    /// Message of the API status error, if this wraps one. Admission
    /// rejections from the status hook surface here.
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Error::Kube {
                source: kube::Error::Api(e),
            } => Some(e.message.as_str()),
            _ => None,
        }
    }

    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(e),
            } => Some(e.code),
            _ => None,
        }
    }
}

/// Entry point handed to the usage machinery in place of a full client.
#[derive(Clone)]
pub struct QuotaClient {
    client: kube::Client,
}

impl QuotaClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    pub fn resource_quotas(&self, namespace: &str) -> NamespacedResourceQuotas {
        NamespacedResourceQuotas {
            api: Api::namespaced(self.client.clone(), namespace),
        }
    }
}

/// Namespaced handle exposing only list, watch and status update,
/// translated to the managed kind and back.
pub struct NamespacedResourceQuotas {
    api: Api<ResourceQuota>,
}

impl NamespacedResourceQuotas {
    pub async fn list(&self) -> Result<Vec<corev1::ResourceQuota>, Error> {
        let quotas = self
            .api
            .list(&ListParams::default())
            .context(KubeSnafu)
            .await?;
        Ok(quotas.items.iter().map(ResourceQuota::to_core).collect())
    }

    pub async fn watch(
        &self,
        resource_version: &str,
    ) -> Result<impl Stream<Item = Result<WatchEvent<corev1::ResourceQuota>, kube::Error>>, Error>
    {
        let events = self
            .api
            .watch(&WatchParams::default(), resource_version)
            .context(KubeSnafu)
            .await?;
        Ok(events.map(|event| {
            event.map(|event| match event {
                WatchEvent::Added(rq) => WatchEvent::Added(rq.to_core()),
                WatchEvent::Modified(rq) => WatchEvent::Modified(rq.to_core()),
                WatchEvent::Deleted(rq) => WatchEvent::Deleted(rq.to_core()),
                WatchEvent::Bookmark(b) => WatchEvent::Bookmark(b),
                WatchEvent::Error(e) => WatchEvent::Error(e),
            })
        }))
    }

    pub async fn update_status(
        &self,
        rq: &corev1::ResourceQuota,
    ) -> Result<corev1::ResourceQuota, Error> {
        let translated = ResourceQuota::from_core(rq);
        let body = serde_json::to_vec(&translated)?;
        let updated = self
            .api
            .replace_status(&rq.name_any(), &PostParams::default(), body)
            .context(KubeSnafu)
            .await?;
        Ok(updated.to_core())
    }

    pub async fn create(&self, _rq: &corev1::ResourceQuota) -> Result<corev1::ResourceQuota, Error> {
        Err(MethodNotSupportedSnafu { verb: "create" }.build().into())
    }

    pub async fn update(&self, _rq: &corev1::ResourceQuota) -> Result<corev1::ResourceQuota, Error> {
        Err(MethodNotSupportedSnafu { verb: "update" }.build().into())
    }

    pub async fn delete(&self, _name: &str) -> Result<(), Error> {
        Err(MethodNotSupportedSnafu { verb: "delete" }.build().into())
    }

    pub async fn patch(&self, _name: &str) -> Result<corev1::ResourceQuota, Error> {
        Err(MethodNotSupportedSnafu { verb: "patch" }.build().into())
    }

    pub async fn apply(&self, _rq: &corev1::ResourceQuota) -> Result<corev1::ResourceQuota, Error> {
        Err(MethodNotSupportedSnafu { verb: "apply" }.build().into())
    }
}

/// Lister backed by the managed-kind reflector store, yielding `core/v1`
/// views. This is the informer half of the façade: downstream consumers
/// never see the custom kind.
#[derive(Clone)]
pub struct ResourceQuotaLister {
    store: Store<ResourceQuota>,
}

impl ResourceQuotaLister {
    pub fn new(store: Store<ResourceQuota>) -> Self {
        Self { store }
    }

    pub fn list(&self, namespace: &str) -> Vec<corev1::ResourceQuota> {
        self.store
            .state()
            .into_iter()
            .filter(|rq| rq.namespace().as_deref() == Some(namespace))
            .map(|rq| rq.to_core())
            .collect()
    }

    pub fn list_all(&self) -> Vec<corev1::ResourceQuota> {
        self.store.state().into_iter().map(|rq| rq.to_core()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_verbs_are_rejected() {
        let err: Error = MethodNotSupportedSnafu { verb: "create" }.build().into();
        assert_eq!(
            err.to_string(),
            "method 'create' is not supported on managed resource quotas"
        );
    }
}
