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

use clap::Args;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct Options {
    #[command(flatten)]
    pub webhook: WebhookOptions,

    #[command(flatten)]
    pub metrics: MetricsOptions,

    #[command(flatten)]
    pub probe: ProbeOptions,

    #[command(flatten)]
    pub leader_election: LeaderElectionOptions,

    /// Base resync period of the usage recalculation in seconds
    #[arg(long = "resync-period-seconds", default_value_t = 3600)]
    pub resync_period_seconds: u64,
}

#[derive(Args, Debug, Clone)]
pub struct WebhookOptions {
    /// Enable webhook
    #[arg(id = "webhook_enabled", long = "webhook-enabled", default_value_t = true, action = clap::ArgAction::Set)]
    pub enabled: bool,

    /// The address the webhook server binds to
    #[arg(id = "webhook_addr", long = "webhook-addr", default_value = ":8443")]
    pub addr: String,

    /// The directory that contains the server key and certificate
    #[arg(long = "webhook-cert-dir", default_value = "certs")]
    pub cert_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct MetricsOptions {
    /// Enable metrics endpoint
    #[arg(id = "metrics_enabled", long = "metrics-enabled", default_value_t = true, action = clap::ArgAction::Set)]
    pub enabled: bool,

    /// The address the metric endpoint binds to
    #[arg(id = "metrics_addr", long = "metrics-addr", default_value = ":9090")]
    pub addr: String,
}

#[derive(Args, Debug, Clone)]
pub struct ProbeOptions {
    /// Enable health probe endpoint
    #[arg(id = "probe_enabled", long = "probe-enabled", default_value_t = true, action = clap::ArgAction::Set)]
    pub enabled: bool,

    /// The address the health probe endpoint binds to
    #[arg(id = "probe_addr", long = "probe-addr", default_value = ":8080")]
    pub addr: String,
}

#[derive(Args, Debug, Clone)]
pub struct LeaderElectionOptions {
    /// Enable leader election
    #[arg(id = "leader_election_enabled", long = "leader-election-enabled", default_value_t = false, action = clap::ArgAction::Set)]
    pub enabled: bool,

    /// Leader election ID
    #[arg(
        long = "leader-election-id",
        default_value = "clusterresourcequota.kubeward.dev"
    )]
    pub id: String,
}

impl Options {
    /// The resync period jittered by a factor in `[1, 2)` so replicas do
    /// not relist in lockstep.
    pub fn jittered_resync_period(&self) -> Duration {
        let base = Duration::from_secs(self.resync_period_seconds);
        jittered(base)
    }
}

pub fn jittered(period: Duration) -> Duration {
    let factor = rand::rng().random_range(1.0..2.0);
    period.mul_f64(factor)
}

/// Parses listen addresses of the `:8443` / `0.0.0.0:8443` shapes.
pub fn listen_addr(addr: &str) -> Result<SocketAddr, String> {
    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port.parse().map_err(|_| format!("invalid port '{port}'"))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    addr.parse().map_err(|e| format!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        options: Options,
    }

    #[test]
    fn defaults_match_the_documented_configuration() {
        let cli = Cli::try_parse_from(["test"]).unwrap();
        let options = cli.options;
        assert!(options.webhook.enabled);
        assert_eq!(options.webhook.addr, ":8443");
        assert_eq!(options.webhook.cert_dir, PathBuf::from("certs"));
        assert!(options.metrics.enabled);
        assert_eq!(options.metrics.addr, ":9090");
        assert!(options.probe.enabled);
        assert_eq!(options.probe.addr, ":8080");
        assert!(!options.leader_election.enabled);
        assert_eq!(options.leader_election.id, "clusterresourcequota.kubeward.dev");
        assert_eq!(options.resync_period_seconds, 3600);
    }

    #[test]
    fn boolean_flags_accept_explicit_values() {
        let cli = Cli::try_parse_from(["test", "--webhook-enabled", "false"]).unwrap();
        assert!(!cli.options.webhook.enabled);
    }

    #[test]
    fn listen_addr_accepts_bare_ports() {
        assert_eq!(
            listen_addr(":8443").unwrap(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8443)
        );
        assert_eq!(
            listen_addr("127.0.0.1:9090").unwrap(),
            "127.0.0.1:9090".parse::<SocketAddr>().unwrap()
        );
        assert!(listen_addr(":not-a-port").is_err());
    }

    #[test]
    fn resync_jitter_stays_in_the_half_open_interval() {
        let base = Duration::from_secs(100);
        for _ in 0..32 {
            let jittered = jittered(base);
            assert!(jittered >= base);
            assert!(jittered < base * 2);
        }
    }
}
