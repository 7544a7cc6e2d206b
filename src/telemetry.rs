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

//! Prometheus metrics endpoint and health probes.

use crate::config::listen_addr;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::{ResultExt, Snafu};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("install prometheus recorder: {}", source))]
    Recorder {
        source: metrics_exporter_prometheus::BuildError,
    },

    #[snafu(display("invalid listen address '{}': {}", addr, reason))]
    Addr { addr: String, reason: String },

    #[snafu(display("bind {}: {}", addr, source))]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[snafu(display("serve: {}", source))]
    Serve { source: std::io::Error },
}

pub fn install_recorder() -> Result<PrometheusHandle, Error> {
    PrometheusBuilder::new()
        .install_recorder()
        .context(RecorderSnafu)
}

pub async fn serve_metrics(
    handle: PrometheusHandle,
    addr: String,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );
    serve(app, &addr, shutdown).await
}

pub async fn serve_probes(addr: String, shutdown: watch::Receiver<bool>) -> Result<(), Error> {
    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(ready_check));
    serve(app, &addr, shutdown).await
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ready_check() -> impl IntoResponse {
    (StatusCode::OK, "Ready")
}

async fn serve(app: Router, addr: &str, mut shutdown: watch::Receiver<bool>) -> Result<(), Error> {
    let addr = listen_addr(addr).map_err(|reason| {
        AddrSnafu {
            addr: addr.to_string(),
            reason,
        }
        .build()
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.context(BindSnafu {
        addr: addr.to_string(),
    })?;
    info!("listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context(ServeSnafu)
}
