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

//! Validating webhooks: child-quota status admission, child-quota
//! lifecycle protection, and the workload quota gate.

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

use kube::core::Status;
use kube::core::admission::AdmissionResponse;
use std::time::Duration;

/// Budget for one admission request; the API server gives up before this.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

fn reason(code: u16) -> &'static str {
    match code {
        400 => "BadRequest",
        403 => "Forbidden",
        _ => "InternalError",
    }
}

/// Marks the response as denied with the given HTTP status code.
pub(crate) fn deny(mut resp: AdmissionResponse, code: u16, message: &str) -> AdmissionResponse {
    resp.allowed = false;
    resp.result = Status::failure(message, reason(code)).with_code(code);
    resp
}
