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

use crate::admission::handlers;
use crate::admission::state::AppState;
use crate::config::{WebhookOptions, listen_addr};
use crate::utils::tls;
use axum::{Router, routing::post};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid webhook address '{}': {}", addr, reason))]
    Addr { addr: String, reason: String },

    #[snafu(display("bind {}: {}", addr, source))]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[snafu(transparent)]
    Tls { source: tls::Error },
}

/// Serves the validating webhooks over TLS until shutdown is signalled.
pub async fn run(
    state: AppState,
    options: &WebhookOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let app = Router::new()
        .route(
            "/validate-resourcequota-status",
            post(handlers::status::validate_status),
        )
        .route(
            "/validate-resourcequota-remove",
            post(handlers::lifecycle::validate_remove),
        )
        .route("/validate", post(handlers::workload::validate_workload))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = listen_addr(&options.addr).map_err(|reason| {
        AddrSnafu {
            addr: options.addr.clone(),
            reason,
        }
        .build()
    })?;
    let tls_config = tls::server_config(&options.cert_dir)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let listener = TcpListener::bind(addr).await.context(BindSnafu {
        addr: addr.to_string(),
    })?;

    info!("webhook server listening on https://{}", addr);
    info!("  - POST /validate-resourcequota-status");
    info!("  - POST /validate-resourcequota-remove");
    info!("  - POST /validate");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(%error, "accept webhook connection");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let service = TowerToHyperService::new(app.clone());
                tokio::spawn(async move {
                    let stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(error) => {
                            debug!(%error, %peer, "tls handshake failed");
                            return;
                        }
                    };
                    if let Err(error) = Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(%error, %peer, "serve webhook connection");
                    }
                });
            }
        }
    }

    info!("webhook server stopped");
    Ok(())
}
