// Copyright 2025 Kubeward Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loads the webhook serving certificate from the cert directory
//! (`tls.crt` / `tls.key`, the shape cert-manager serving certificates
//! use).

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::io::Cursor;
use std::path::Path;
use tokio_rustls::rustls::ServerConfig;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("read '{}': {}", path, source))]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("invalid PEM in '{}': {}", path, source))]
    Pem {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("no certificates found in '{}'", path))]
    NoCertificates { path: String },

    #[snafu(display("no private key found in '{}'", path))]
    NoPrivateKey { path: String },

    #[snafu(display("build tls config: {}", source))]
    Tls {
        source: tokio_rustls::rustls::Error,
    },
}

pub fn server_config(cert_dir: &Path) -> Result<ServerConfig, Error> {
    let cert_path = cert_dir.join("tls.crt");
    let key_path = cert_dir.join("tls.key");

    let cert_pem = std::fs::read(&cert_path).context(ReadSnafu {
        path: cert_path.display().to_string(),
    })?;
    let key_pem = std::fs::read(&key_path).context(ReadSnafu {
        path: key_path.display().to_string(),
    })?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut Cursor::new(&cert_pem))
        .collect::<Result<_, _>>()
        .context(PemSnafu {
            path: cert_path.display().to_string(),
        })?;
    ensure!(
        !certs.is_empty(),
        NoCertificatesSnafu {
            path: cert_path.display().to_string(),
        }
    );

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut Cursor::new(&key_pem))
        .context(PemSnafu {
            path: key_path.display().to_string(),
        })?
        .context(NoPrivateKeySnafu {
            path: key_path.display().to_string(),
        })?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context(TlsSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_certificates_surface_as_read_errors() {
        let err = server_config(Path::new("/nonexistent-cert-dir")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }), "{err}");
    }
}
