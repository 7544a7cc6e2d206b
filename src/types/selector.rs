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

//! Label-selector evaluation for namespace selection.
//!
//! A nil selector selects nothing; an empty selector selects everything.
//! `match_labels` and `match_expressions` are ANDed.

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;
use tracing::warn;

pub type Labels = BTreeMap<String, String>;

/// Whether the namespace labels satisfy the (optional) selector.
pub fn namespace_matches(selector: Option<&metav1::LabelSelector>, labels: &Labels) -> bool {
    match selector {
        None => false,
        Some(selector) => matches(selector, labels),
    }
}

/// Whether the labels satisfy the selector.
pub fn matches(selector: &metav1::LabelSelector, labels: &Labels) -> bool {
    for expr in selector.match_expressions.iter().flatten() {
        if !expression_matches(expr, labels) {
            return false;
        }
    }

    if let Some(match_labels) = selector.match_labels.as_ref() {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }

    true
}

fn expression_matches(expr: &metav1::LabelSelectorRequirement, labels: &Labels) -> bool {
    match (expr.operator.as_str(), expr.values.as_ref()) {
        ("In", Some(values)) => match labels.get(&expr.key) {
            Some(v) => values.contains(v),
            None => false,
        },
        ("NotIn", Some(values)) => match labels.get(&expr.key) {
            Some(v) => !values.contains(v),
            None => true,
        },
        ("Exists", _) => labels.contains_key(&expr.key),
        ("DoesNotExist", _) => !labels.contains_key(&expr.key),
        (operator, values) => {
            warn!(operator, key = %expr.key, ?values, "illegal match expression");
            false
        }
    }
}
