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

//! Process-local cache of per-namespace quota usage, one shard per
//! ClusterResourceQuota.
//!
//! Admission serializes on the shard lock and writes the authoritative
//! usage; the periodic sync only overwrites entries older than the
//! staleness window so it cannot revert a just-committed admission write.

use crate::types::v1::ResourceList;
use crate::types::v1::resource_quota::ResourceQuota;
use kube::ResourceExt;
use kube::api::ListParams;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

/// Minimum age before a periodic sync may overwrite a cache entry.
pub const STALENESS_WINDOW: Duration = Duration::from_secs(10);

/// Interval between authoritative re-reads of the child quota list.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Usage snapshot for one (ClusterResourceQuota, namespace) pair. `hard`
/// is diagnostic only; decisions read the ClusterResourceQuota status.
#[derive(Clone, Debug, Default)]
pub struct ResourceUsageInfo {
    pub hard: ResourceList,
    pub used: ResourceList,
    pub last_update: Option<Instant>,
}

impl ResourceUsageInfo {
    fn fresh(&self, now: Instant) -> bool {
        match self.last_update {
            Some(at) => now.saturating_duration_since(at) < STALENESS_WINDOW,
            None => false,
        }
    }
}

/// Per-ClusterResourceQuota shard: namespace → usage, serialized by an
/// exclusive lock that is held across the status write in admission.
#[derive(Default)]
pub struct QuotaShard {
    pub usage: Mutex<BTreeMap<String, ResourceUsageInfo>>,
}

/// Top-level map of ClusterResourceQuota name → shard. The outer lock only
/// guards shard creation and removal, never usage data.
#[derive(Default)]
pub struct ResourceQuotaCache {
    shards: RwLock<HashMap<String, Arc<QuotaShard>>>,
}

impl ResourceQuotaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shard for the named quota, creating it lazily.
    pub fn get_or_create(&self, name: &str) -> Arc<QuotaShard> {
        if let Some(shard) = self.shards.read().expect("cache lock poisoned").get(name) {
            return shard.clone();
        }
        let mut shards = self.shards.write().expect("cache lock poisoned");
        shards.entry(name.to_string()).or_default().clone()
    }

    /// Bulk-reconciles the cache from the authoritative child quota list.
    ///
    /// Shards whose quota vanished from the list are dropped, as are
    /// namespaces no longer present under a shard. Entries written within
    /// the staleness window are left untouched: they were just committed
    /// by admission and are more current than anything a list can return.
    pub async fn sync(&self, quotas: &[ResourceQuota]) {
        let now = Instant::now();

        let mut grouped: HashMap<String, BTreeMap<String, ResourceUsageInfo>> = HashMap::new();
        for rq in quotas {
            let Some(crq_name) = rq.managing_label() else {
                continue;
            };
            let Some(namespace) = rq.namespace() else {
                continue;
            };
            let status = rq.status.clone().unwrap_or_default();
            grouped.entry(crq_name.to_string()).or_default().insert(
                namespace,
                ResourceUsageInfo {
                    hard: status.hard.unwrap_or_default(),
                    used: status.used.unwrap_or_default(),
                    last_update: Some(now),
                },
            );
        }

        let existing: Vec<(String, Arc<QuotaShard>)> = {
            let shards = self.shards.read().expect("cache lock poisoned");
            shards.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (name, shard) in existing {
            let Some(updated) = grouped.remove(&name) else {
                // quota no longer exists
                self.shards
                    .write()
                    .expect("cache lock poisoned")
                    .remove(&name);
                debug!(quota = %name, "dropped cache shard");
                continue;
            };

            let mut usage = shard.usage.lock().await;
            usage.retain(|namespace, _| updated.contains_key(namespace));
            for (namespace, info) in updated {
                match usage.get(&namespace) {
                    Some(current) if current.fresh(now) => {
                        // recently written by admission, keep it
                    }
                    _ => {
                        usage.insert(namespace, info);
                    }
                }
            }
        }

        if !grouped.is_empty() {
            let mut new_shards = Vec::with_capacity(grouped.len());
            for (name, entries) in grouped {
                let shard = Arc::new(QuotaShard::default());
                *shard.usage.lock().await = entries;
                new_shards.push((name, shard));
            }
            let mut shards = self.shards.write().expect("cache lock poisoned");
            for (name, shard) in new_shards {
                shards.entry(name).or_insert(shard);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn shard_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .shards
            .read()
            .expect("cache lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Periodic task reconciling the cache from a cluster-wide child quota
/// list. Errors are logged and retried on the next tick.
pub struct CacheSyncer {
    pub cache: Arc<ResourceQuotaCache>,
    pub client: kube::Client,
    pub interval: Duration,
}

impl CacheSyncer {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sync_once().await {
                        warn!(%error, "sync resource quota cache");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    pub async fn sync_once(&self) -> Result<(), kube::Error> {
        let api = kube::Api::<ResourceQuota>::all(self.client.clone());
        let quotas = api.list(&ListParams::default()).await?;
        self.cache.sync(&quotas.items).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::create_test_rq;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn used(cpu: &str) -> ResourceList {
        [("cpu".to_string(), Quantity(cpu.to_string()))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn sync_populates_and_drops_shards() {
        let cache = ResourceQuotaCache::new();
        let quotas = vec![
            create_test_rq("ns1", "crq-a", &[("cpu", "1")]),
            create_test_rq("ns2", "crq-a", &[("cpu", "1")]),
            create_test_rq("ns1", "crq-b", &[("cpu", "2")]),
        ];
        cache.sync(&quotas).await;
        assert_eq!(cache.shard_names(), vec!["crq-a", "crq-b"]);

        let shard = cache.get_or_create("crq-a");
        assert_eq!(shard.usage.lock().await.len(), 2);

        // crq-b disappears, and crq-a loses ns2
        cache
            .sync(&[create_test_rq("ns1", "crq-a", &[("cpu", "1")])])
            .await;
        assert_eq!(cache.shard_names(), vec!["crq-a"]);
        let shard = cache.get_or_create("crq-a");
        let usage = shard.usage.lock().await;
        assert!(usage.contains_key("ns1"));
        assert!(!usage.contains_key("ns2"));
    }

    #[tokio::test]
    async fn sync_ignores_quotas_without_managing_label() {
        let cache = ResourceQuotaCache::new();
        let mut unmanaged = create_test_rq("ns1", "crq-a", &[("cpu", "1")]);
        unmanaged.metadata.labels = None;
        cache.sync(&[unmanaged]).await;
        assert!(cache.shard_names().is_empty());
    }

    #[tokio::test]
    async fn sync_does_not_overwrite_fresh_admission_writes() {
        let cache = ResourceQuotaCache::new();
        let shard = cache.get_or_create("crq-a");
        shard.usage.lock().await.insert(
            "ns1".to_string(),
            ResourceUsageInfo {
                hard: ResourceList::new(),
                used: used("5"),
                last_update: Some(Instant::now()),
            },
        );

        cache
            .sync(&[create_test_rq("ns1", "crq-a", &[("cpu", "1")])])
            .await;

        let usage = shard.usage.lock().await;
        assert_eq!(usage["ns1"].used, used("5"), "fresh entry must survive sync");
    }

    #[tokio::test]
    async fn sync_overwrites_entries_older_than_the_window() {
        let cache = ResourceQuotaCache::new();
        let shard = cache.get_or_create("crq-a");
        let stale = Instant::now()
            .checked_sub(STALENESS_WINDOW + Duration::from_secs(1))
            .expect("instant arithmetic");
        shard.usage.lock().await.insert(
            "ns1".to_string(),
            ResourceUsageInfo {
                hard: ResourceList::new(),
                used: used("5"),
                last_update: Some(stale),
            },
        );

        cache
            .sync(&[create_test_rq("ns1", "crq-a", &[("cpu", "1")])])
            .await;

        let usage = shard.usage.lock().await;
        assert_eq!(usage["ns1"].used, used("1"), "stale entry must be refreshed");
    }
}
