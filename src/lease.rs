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

//! Lease-based leader gate. One replica holds the Lease and runs; the
//! others block in `acquire` until the holder stops renewing.

use chrono::Utc;
use k8s_openapi::api::coordination::v1 as coordv1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::api::{Api, PostParams};
use snafu::{ResultExt, Snafu};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },
}

pub struct LeaderElector {
    api: Api<coordv1::Lease>,
    name: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: kube::Client, name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Blocks until this replica holds the lease.
    pub async fn acquire(&self) -> Result<(), Error> {
        loop {
            match self.api.get_opt(&self.name).await.context(KubeSnafu)? {
                None => {
                    let lease = self.desired_lease(None);
                    match self.api.create(&PostParams::default(), &lease).await {
                        Ok(_) => {
                            info!(lease = %self.name, "acquired leadership");
                            return Ok(());
                        }
                        // another replica beat us to it
                        Err(kube::Error::Api(e)) if e.code == 409 => {}
                        Err(e) => return Err(e).context(KubeSnafu),
                    }
                }
                Some(current) if self.held_by_us(&current) => {
                    info!(lease = %self.name, "already holding leadership");
                    return Ok(());
                }
                Some(current) if lease_expired(&current) => {
                    let lease = self.desired_lease(current.metadata.resource_version.clone());
                    match self
                        .api
                        .replace(&self.name, &PostParams::default(), &lease)
                        .await
                    {
                        Ok(_) => {
                            info!(lease = %self.name, "took over expired leadership");
                            return Ok(());
                        }
                        Err(kube::Error::Api(e)) if e.code == 409 => {}
                        Err(e) => return Err(e).context(KubeSnafu),
                    }
                }
                Some(_) => {
                    debug!(lease = %self.name, "lease held elsewhere, waiting");
                }
            }
            tokio::time::sleep(RENEW_INTERVAL).await;
        }
    }

    /// Renews the held lease until shutdown. Renewal failures are logged;
    /// a replica that cannot renew loses the lease by expiry.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(RENEW_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.renew().await {
                        warn!(%error, lease = %self.name, "renew leadership lease");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn renew(&self) -> Result<(), Error> {
        let Some(current) = self.api.get_opt(&self.name).await.context(KubeSnafu)? else {
            let lease = self.desired_lease(None);
            self.api
                .create(&PostParams::default(), &lease)
                .await
                .context(KubeSnafu)?;
            return Ok(());
        };
        if !self.held_by_us(&current) {
            warn!(lease = %self.name, "leadership lost");
            return Ok(());
        }
        let mut renewed = current.clone();
        if let Some(spec) = renewed.spec.as_mut() {
            spec.renew_time = Some(metav1::MicroTime(Utc::now()));
        }
        self.api
            .replace(&self.name, &PostParams::default(), &renewed)
            .await
            .context(KubeSnafu)?;
        Ok(())
    }

    fn held_by_us(&self, lease: &coordv1::Lease) -> bool {
        lease
            .spec
            .as_ref()
            .and_then(|s| s.holder_identity.as_deref())
            == Some(self.identity.as_str())
    }

    fn desired_lease(&self, resource_version: Option<String>) -> coordv1::Lease {
        let now = metav1::MicroTime(Utc::now());
        coordv1::Lease {
            metadata: metav1::ObjectMeta {
                name: Some(self.name.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(coordv1::LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                ..Default::default()
            }),
        }
    }
}

fn lease_expired(lease: &coordv1::Lease) -> bool {
    let Some(spec) = lease.spec.as_ref() else {
        return true;
    };
    let duration = spec
        .lease_duration_seconds
        .map(|s| chrono::Duration::seconds(s.into()))
        .unwrap_or_else(|| chrono::Duration::seconds(LEASE_DURATION.as_secs() as i64));
    match spec.renew_time.as_ref().or(spec.acquire_time.as_ref()) {
        Some(last) => last.0 + duration < Utc::now(),
        None => true,
    }
}
