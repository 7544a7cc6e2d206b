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

use crate::types::v1::LABEL_CLUSTER_RESOURCE_QUOTA;
use crate::{client, quota, types};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The message is machine-parseable:
    /// `exceeded cluster quota: <crq>, requested: k=v,..., used: k=v,..., limited: k=v,...`
    #[snafu(display("{}", message))]
    QuotaExceeded { message: String },

    #[snafu(display(
        "cannot change label \"{}\" of managed ResourceQuota from \"{}\" to \"{}\"",
        LABEL_CLUSTER_RESOURCE_QUOTA,
        old,
        new
    ))]
    ImmutableLabel { old: String, new: String },

    #[snafu(display(
        "resourcequota managed by ClusterResourceQuota \"{}\" cannot be deleted",
        name
    ))]
    ProtectedDeletion { name: String },

    #[snafu(display("status update conflicted after {} attempts: {}", attempts, source))]
    ConflictExhausted { attempts: u32, source: kube::Error },

    #[snafu(display("Kubernetes API error: {}", source))]
    Transient { source: kube::Error },

    #[snafu(display("bad admission request: {}", message))]
    BadRequest { message: String },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Quota { source: quota::Error },

    #[snafu(transparent)]
    Client { source: client::Error },
}

impl Error {
    /// HTTP status code carried in the admission response.
    pub fn code(&self) -> u16 {
        match self {
            Error::QuotaExceeded { .. }
            | Error::ImmutableLabel { .. }
            | Error::ProtectedDeletion { .. } => 403,
            Error::BadRequest { .. } => 400,
            _ => 500,
        }
    }
}
