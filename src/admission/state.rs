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

use crate::cache::ResourceQuotaCache;
use crate::client::{QuotaClient, ResourceQuotaLister};
use std::sync::Arc;

/// Shared state for the webhook handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: kube::Client,
    pub cache: Arc<ResourceQuotaCache>,
    pub quotas: QuotaClient,
    pub lister: ResourceQuotaLister,
}

impl AppState {
    pub fn new(
        client: kube::Client,
        cache: Arc<ResourceQuotaCache>,
        lister: ResourceQuotaLister,
    ) -> Self {
        let quotas = QuotaClient::new(client.clone());
        Self {
            client,
            cache,
            quotas,
            lister,
        }
    }
}
