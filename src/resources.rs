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

//! Element-wise arithmetic over [`ResourceList`]s.
//!
//! Keys absent from a limit are unconstrained. All operations parse the
//! canonical quantity strings, so `1` and `1000m` compare equal.

use crate::types::error::{Error, QuantityParseSnafu};
use crate::types::v1::ResourceList;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube_quantity::ParsedQuantity;

fn parsed(resource: &str, quantity: &Quantity) -> Result<ParsedQuantity, Error> {
    ParsedQuantity::try_from(quantity).map_err(|e| {
        QuantityParseSnafu {
            resource: resource.to_string(),
            value: quantity.0.clone(),
            reason: e.to_string(),
        }
        .build()
    })
}

fn zero() -> ParsedQuantity {
    ParsedQuantity::try_from("0").expect("zero quantity parses")
}

/// Element-wise sum of `a` and `b` over the union of their keys.
pub fn add(a: &ResourceList, b: &ResourceList) -> Result<ResourceList, Error> {
    let mut out = ResourceList::new();
    for key in a.keys().chain(b.keys()) {
        if out.contains_key(key) {
            continue;
        }
        let left = a.get(key).map(|q| parsed(key, q)).transpose()?;
        let right = b.get(key).map(|q| parsed(key, q)).transpose()?;
        let sum = left.unwrap_or_else(zero) + right.unwrap_or_else(zero);
        out.insert(key.clone(), sum.into());
    }
    Ok(out)
}

/// Element-wise difference `a - b` over the union of their keys. Entries
/// may go negative; callers treat the result as a delta.
pub fn subtract(a: &ResourceList, b: &ResourceList) -> Result<ResourceList, Error> {
    let mut out = ResourceList::new();
    for key in a.keys().chain(b.keys()) {
        if out.contains_key(key) {
            continue;
        }
        let left = a.get(key).map(|q| parsed(key, q)).transpose()?;
        let right = b.get(key).map(|q| parsed(key, q)).transpose()?;
        let diff = left.unwrap_or_else(zero) - right.unwrap_or_else(zero);
        out.insert(key.clone(), diff.into());
    }
    Ok(out)
}

/// Whether `a <= limit` on every key the limit constrains. Returns the
/// sorted list of exceeded keys alongside the verdict.
pub fn less_than_or_equal(
    a: &ResourceList,
    limit: &ResourceList,
) -> Result<(bool, Vec<String>), Error> {
    let mut exceeded = Vec::new();
    for (key, bound) in limit {
        if let Some(value) = a.get(key)
            && parsed(key, value)? > parsed(key, bound)?
        {
            exceeded.push(key.clone());
        }
    }
    Ok((exceeded.is_empty(), exceeded))
}

/// Semantic equality: the same keys with quantities that compare equal.
pub fn equals(a: &ResourceList, b: &ResourceList) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(key, value)| match b.get(key) {
        Some(other) => match (parsed(key, value), parsed(key, other)) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        None => false,
    })
}

/// Element-wise maximum over the union of keys. Used for effective pod
/// requests, where init containers run before the main set.
pub fn element_wise_max(a: &ResourceList, b: &ResourceList) -> Result<ResourceList, Error> {
    let mut out = ResourceList::new();
    for key in a.keys().chain(b.keys()) {
        if out.contains_key(key) {
            continue;
        }
        let value = match (a.get(key), b.get(key)) {
            (Some(x), Some(y)) => {
                if parsed(key, x)? >= parsed(key, y)? {
                    x.clone()
                } else {
                    y.clone()
                }
            }
            (Some(x), None) => x.clone(),
            (None, Some(y)) => y.clone(),
            (None, None) => unreachable!("key comes from one of the maps"),
        };
        out.insert(key.clone(), value);
    }
    Ok(out)
}

/// The subset of `list` restricted to `keys`.
pub fn mask(list: &ResourceList, keys: &[String]) -> ResourceList {
    keys.iter()
        .filter_map(|key| list.get(key).map(|q| (key.clone(), q.clone())))
        .collect()
}

/// Deterministic `key=value` rendering, keys sorted, comma-joined. Used in
/// admission error messages, so the format is load-bearing.
pub fn format(list: &ResourceList) -> String {
    list.iter()
        .map(|(key, value)| format!("{}={}", key, value.0))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(pairs: &[(&str, &str)]) -> ResourceList {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    #[test]
    fn add_is_element_wise_over_the_union() {
        let sum = add(&list(&[("cpu", "1"), ("memory", "1Gi")]), &list(&[("cpu", "500m"), ("pods", "3")]))
            .unwrap();
        assert!(equals(
            &sum,
            &list(&[("cpu", "1500m"), ("memory", "1Gi"), ("pods", "3")])
        ));
    }

    #[test]
    fn subtract_yields_deltas_and_may_go_negative() {
        let delta = subtract(&list(&[("cpu", "1")]), &list(&[("cpu", "1500m")])).unwrap();
        let (ok, _) = less_than_or_equal(&delta, &list(&[("cpu", "0")])).unwrap();
        assert!(ok, "negative delta is below zero: {delta:?}");
    }

    #[test]
    fn limit_only_constrains_its_own_keys() {
        let usage = list(&[("cpu", "3"), ("memory", "10Gi")]);
        let (ok, exceeded) = less_than_or_equal(&usage, &list(&[("cpu", "2")])).unwrap();
        assert!(!ok);
        assert_eq!(exceeded, vec!["cpu".to_string()]);

        let (ok, exceeded) = less_than_or_equal(&usage, &list(&[("pods", "1")])).unwrap();
        assert!(ok, "keys absent from the limit are unconstrained");
        assert!(exceeded.is_empty());
    }

    #[test]
    fn unit_suffixes_compare_semantically() {
        let (ok, _) = less_than_or_equal(&list(&[("cpu", "1000m")]), &list(&[("cpu", "1")])).unwrap();
        assert!(ok);
        assert!(equals(&list(&[("cpu", "1000m")]), &list(&[("cpu", "1")])));
        assert!(!equals(&list(&[("cpu", "1001m")]), &list(&[("cpu", "1")])));
    }

    #[test]
    fn mask_and_format_are_deterministic() {
        let usage = list(&[("memory", "1Gi"), ("cpu", "2"), ("pods", "5")]);
        let masked = mask(&usage, &["cpu".to_string(), "memory".to_string()]);
        assert_eq!(format(&masked), "cpu=2,memory=1Gi");
    }

    #[test]
    fn malformed_quantity_is_an_error() {
        assert!(add(&list(&[("cpu", "not-a-number")]), &list(&[])).is_err());
    }
}
