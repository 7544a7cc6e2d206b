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

//! Scope predicates restricting which pods count toward a quota entry.
//!
//! Alongside the standard scopes this adds `NodeSelector`, which matches a
//! pod by its node selector and enables per-node-pool budgets (for example
//! binding a GPU quota to pods targeting one GPU-model pool). Scopes are
//! ANDed: every scope and every scope-selector requirement must match.

use crate::quota::{Error, SelectorParseSnafu, UnsupportedScopeOperatorSnafu};
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::{Display, EnumString};

/// Scope matching pods by their node selector.
pub const SCOPE_NODE_SELECTOR: &str = "NodeSelector";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ScopeOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Whether the pod satisfies every scope attached to the quota spec.
pub fn pod_matches_scopes(
    pod: &corev1::Pod,
    scopes: Option<&Vec<String>>,
    scope_selector: Option<&corev1::ScopeSelector>,
) -> Result<bool, Error> {
    for scope in scopes.into_iter().flatten() {
        if !pod_matches_scope_name(pod, scope) {
            return Ok(false);
        }
    }
    for requirement in scope_selector
        .into_iter()
        .flat_map(|s| s.match_expressions.iter().flatten())
    {
        if !pod_matches_scope_requirement(pod, requirement)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Plain scope list entries carry no operator; they are membership tests.
fn pod_matches_scope_name(pod: &corev1::Pod, scope: &str) -> bool {
    match scope {
        "Terminating" => active_deadline(pod).is_some(),
        "NotTerminating" => active_deadline(pod).is_none(),
        "BestEffort" => is_best_effort(pod),
        "NotBestEffort" => !is_best_effort(pod),
        SCOPE_NODE_SELECTOR => !node_selector(pod).is_empty(),
        // scopes this evaluator does not understand never match
        _ => false,
    }
}

fn pod_matches_scope_requirement(
    pod: &corev1::Pod,
    requirement: &corev1::ScopedResourceSelectorRequirement,
) -> Result<bool, Error> {
    match requirement.scope_name.as_str() {
        SCOPE_NODE_SELECTOR => pod_node_selector_match(pod, requirement),
        "PriorityClass" => {
            let priority_class = pod
                .spec
                .as_ref()
                .and_then(|s| s.priority_class_name.as_deref());
            let operator = parse_operator(requirement)?;
            let empty = Vec::new();
            let values = requirement.values.as_ref().unwrap_or(&empty);
            Ok(match operator {
                ScopeOperator::In => {
                    priority_class.is_some_and(|pc| values.iter().any(|v| v == pc))
                }
                ScopeOperator::NotIn => {
                    !priority_class.is_some_and(|pc| values.iter().any(|v| v == pc))
                }
                ScopeOperator::Exists => priority_class.is_some(),
                ScopeOperator::DoesNotExist => priority_class.is_none(),
            })
        }
        _ => Ok(pod_matches_scope_name(pod, &requirement.scope_name)),
    }
}

/// Node-selector scope semantics. `In`/`NotIn` values are label-selector
/// strings evaluated against the pod's node selector; `Exists` and
/// `DoesNotExist` test for a non-empty node selector.
pub fn pod_node_selector_match(
    pod: &corev1::Pod,
    requirement: &corev1::ScopedResourceSelectorRequirement,
) -> Result<bool, Error> {
    let node_selector = node_selector(pod);
    let empty = Vec::new();
    let values = requirement.values.as_ref().unwrap_or(&empty);
    match parse_operator(requirement)? {
        ScopeOperator::In => {
            for value in values {
                if parse_label_selector(value)?.matches(&node_selector) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ScopeOperator::NotIn => {
            for value in values {
                if parse_label_selector(value)?.matches(&node_selector) {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        ScopeOperator::Exists => Ok(!node_selector.is_empty()),
        ScopeOperator::DoesNotExist => Ok(node_selector.is_empty()),
    }
}

fn parse_operator(
    requirement: &corev1::ScopedResourceSelectorRequirement,
) -> Result<ScopeOperator, Error> {
    ScopeOperator::from_str(&requirement.operator).map_err(|_| {
        UnsupportedScopeOperatorSnafu {
            scope: requirement.scope_name.clone(),
            operator: requirement.operator.clone(),
        }
        .build()
    })
}

fn node_selector(pod: &corev1::Pod) -> BTreeMap<String, String> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_selector.clone())
        .unwrap_or_default()
}

fn active_deadline(pod: &corev1::Pod) -> Option<i64> {
    pod.spec.as_ref().and_then(|s| s.active_deadline_seconds)
}

/// BestEffort: no container declares requests or limits.
fn is_best_effort(pod: &corev1::Pod) -> bool {
    pod.spec.as_ref().is_none_or(|spec| {
        spec.containers.iter().all(|c| {
            c.resources.as_ref().is_none_or(|r| {
                r.requests.as_ref().is_none_or(BTreeMap::is_empty)
                    && r.limits.as_ref().is_none_or(BTreeMap::is_empty)
            })
        })
    })
}

/// Parsed label selector supporting the Kubernetes grammar: equality
/// terms (`k=v`, `k==v`, `k!=v`, bare key, `!key`) and set-based terms
/// (`k in (v1,v2)`, `k notin (v1,v2)`), comma-joined.
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, vs) => labels.get(k).is_some_and(|v| vs.contains(v)),
            // an absent key satisfies notin
            Requirement::NotIn(k, vs) => labels.get(k).is_none_or(|v| !vs.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        })
    }
}

pub fn parse_label_selector(input: &str) -> Result<LabelSelector, Error> {
    let mut requirements = Vec::new();
    for term in split_terms(input) {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let requirement = if term.contains('(') || term.contains(')') {
            parse_set_term(input, term)?
        } else if let Some((key, value)) = term.split_once("!=") {
            Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
        } else if let Some((key, value)) = term.split_once("==") {
            Requirement::Equals(key.trim().to_string(), value.trim().to_string())
        } else if let Some((key, value)) = term.split_once('=') {
            Requirement::Equals(key.trim().to_string(), value.trim().to_string())
        } else if let Some(key) = term.strip_prefix('!') {
            Requirement::DoesNotExist(key.trim().to_string())
        } else if term.chars().all(|c| c.is_alphanumeric() || "-_./".contains(c)) {
            Requirement::Exists(term.to_string())
        } else {
            return SelectorParseSnafu {
                selector: input.to_string(),
                reason: format!("unsupported term '{term}'"),
            }
            .fail();
        };
        match &requirement {
            Requirement::Equals(k, _)
            | Requirement::NotEquals(k, _)
            | Requirement::Exists(k)
            | Requirement::DoesNotExist(k)
                if k.is_empty() =>
            {
                return SelectorParseSnafu {
                    selector: input.to_string(),
                    reason: "empty key".to_string(),
                }
                .fail();
            }
            _ => {}
        }
        requirements.push(requirement);
    }
    Ok(LabelSelector { requirements })
}

/// Splits on commas outside parentheses, so set values stay intact.
fn split_terms(input: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in input.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => terms.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    terms.push(current);
    terms
}

/// Parses a `<key> in (v1,v2)` / `<key> notin (v1,v2)` term.
fn parse_set_term(input: &str, term: &str) -> Result<Requirement, Error> {
    let malformed = |reason: String| {
        SelectorParseSnafu {
            selector: input.to_string(),
            reason,
        }
        .build()
    };

    let open = term
        .find('(')
        .ok_or_else(|| malformed(format!("missing '(' in term '{term}'")))?;
    if !term.ends_with(')') {
        return Err(malformed(format!("missing closing ')' in term '{term}'")));
    }

    let values: Vec<String> = term[open + 1..term.len() - 1]
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(malformed(format!("empty value set in term '{term}'")));
    }

    let head = term[..open].trim_end();
    let (key, requirement) = match head.rsplit_once(char::is_whitespace) {
        Some((key, "in")) => (key.trim(), Requirement::In(key.trim().to_string(), values)),
        Some((key, "notin")) => (key.trim(), Requirement::NotIn(key.trim().to_string(), values)),
        _ => {
            return Err(malformed(format!(
                "expected 'in' or 'notin' in term '{term}'"
            )));
        }
    };
    if key.is_empty() {
        return Err(malformed(format!("empty key in term '{term}'")));
    }
    Ok(requirement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::create_test_pod;

    fn requirement(
        operator: &str,
        values: Option<&[&str]>,
    ) -> corev1::ScopedResourceSelectorRequirement {
        corev1::ScopedResourceSelectorRequirement {
            scope_name: SCOPE_NODE_SELECTOR.to_string(),
            operator: operator.to_string(),
            values: values.map(|vs| vs.iter().map(|v| v.to_string()).collect()),
        }
    }

    fn pod_on(selector: &[(&str, &str)]) -> corev1::Pod {
        let mut pod = create_test_pod("p", "ns1", &[("cpu", "1")]);
        if !selector.is_empty() {
            pod.spec.as_mut().unwrap().node_selector = Some(
                selector
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
        pod
    }

    #[test]
    fn in_matches_when_any_value_selects_the_node_selector() {
        let pod = pod_on(&[("pool", "gpu-a100")]);
        let req = requirement("In", Some(&["pool=gpu-a100"]));
        assert!(pod_node_selector_match(&pod, &req).unwrap());

        let req = requirement("In", Some(&["pool=gpu-h100", "pool=gpu-a100"]));
        assert!(pod_node_selector_match(&pod, &req).unwrap());

        let req = requirement("In", Some(&["pool in (gpu-a100, gpu-h100)"]));
        assert!(pod_node_selector_match(&pod, &req).unwrap());

        let req = requirement("In", Some(&["pool=gpu-h100"]));
        assert!(!pod_node_selector_match(&pod, &req).unwrap());
    }

    #[test]
    fn not_in_requires_no_value_to_match() {
        let pod = pod_on(&[("pool", "gpu-a100")]);
        let req = requirement("NotIn", Some(&["pool=gpu-h100"]));
        assert!(pod_node_selector_match(&pod, &req).unwrap());

        let req = requirement("NotIn", Some(&["pool=gpu-a100"]));
        assert!(!pod_node_selector_match(&pod, &req).unwrap());
    }

    #[test]
    fn exists_and_does_not_exist_test_emptiness() {
        let scheduled = pod_on(&[("pool", "gpu-a100")]);
        let unscheduled = pod_on(&[]);

        assert!(pod_node_selector_match(&scheduled, &requirement("Exists", None)).unwrap());
        assert!(!pod_node_selector_match(&unscheduled, &requirement("Exists", None)).unwrap());
        assert!(
            pod_node_selector_match(&unscheduled, &requirement("DoesNotExist", None)).unwrap()
        );
        assert!(
            !pod_node_selector_match(&scheduled, &requirement("DoesNotExist", None)).unwrap()
        );
    }

    #[test]
    fn unknown_operator_is_an_error() {
        let pod = pod_on(&[]);
        let err = pod_node_selector_match(&pod, &requirement("Near", None)).unwrap_err();
        assert!(err.to_string().contains("unsupported operator"), "{err}");
    }

    #[test]
    fn selector_strings_support_equality_terms() {
        let labels: BTreeMap<String, String> =
            [("pool".to_string(), "gpu-a100".to_string()), ("zone".to_string(), "us-1".to_string())]
                .into_iter()
                .collect();

        assert!(parse_label_selector("pool=gpu-a100,zone!=edge").unwrap().matches(&labels));
        assert!(parse_label_selector("pool").unwrap().matches(&labels));
        assert!(!parse_label_selector("!pool").unwrap().matches(&labels));
        assert!(parse_label_selector("pool==gpu-a100").unwrap().matches(&labels));
    }

    #[test]
    fn selector_strings_support_set_based_terms() {
        let labels: BTreeMap<String, String> =
            [("pool".to_string(), "gpu-a100".to_string()), ("zone".to_string(), "us-1".to_string())]
                .into_iter()
                .collect();

        assert!(
            parse_label_selector("pool in (gpu-a100, gpu-h100)")
                .unwrap()
                .matches(&labels)
        );
        assert!(!parse_label_selector("pool in (gpu-h100)").unwrap().matches(&labels));
        assert!(parse_label_selector("pool notin (edge)").unwrap().matches(&labels));
        assert!(
            !parse_label_selector("pool notin (gpu-a100)")
                .unwrap()
                .matches(&labels)
        );
        // an absent key satisfies notin
        assert!(parse_label_selector("model notin (a100)").unwrap().matches(&labels));
        // commas inside the value set do not split terms
        assert!(
            parse_label_selector("pool in (gpu-a100, gpu-h100), zone in (us-1)")
                .unwrap()
                .matches(&labels)
        );

        assert!(parse_label_selector("pool in gpu-a100").is_err());
        assert!(parse_label_selector("pool in ()").is_err());
        assert!(parse_label_selector("in (a)").is_err());
        assert!(parse_label_selector("pool (a)").is_err());
    }

    #[test]
    fn scopes_compose_with_and_semantics() {
        let pod = pod_on(&[("pool", "gpu-a100")]);
        let scopes = vec!["NotTerminating".to_string(), SCOPE_NODE_SELECTOR.to_string()];
        let selector = corev1::ScopeSelector {
            match_expressions: Some(vec![requirement("In", Some(&["pool=gpu-a100"]))]),
        };
        assert!(pod_matches_scopes(&pod, Some(&scopes), Some(&selector)).unwrap());

        let selector = corev1::ScopeSelector {
            match_expressions: Some(vec![requirement("In", Some(&["pool=gpu-h100"]))]),
        };
        assert!(!pod_matches_scopes(&pod, Some(&scopes), Some(&selector)).unwrap());
    }
}
