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

//! Per-namespace usage machinery for the managed ResourceQuota kind:
//! per-kind usage evaluators, scope matching, and the periodic
//! recalculation controller. Everything here reaches the API server only
//! through the restricted [`crate::client`] façade.

pub mod controller;
pub mod evaluator;
pub mod scope;

use crate::{client, types};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("unsupported operator '{}' for scope {}", operator, scope))]
    UnsupportedScopeOperator { scope: String, operator: String },

    #[snafu(display("cannot parse label selector '{}': {}", selector, reason))]
    SelectorParse { selector: String, reason: String },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Client { source: client::Error },
}
