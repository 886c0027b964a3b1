//! Resource requirement merging for `set resources`-style mutations.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kroll_core::{ContainerPattern, Result, RolloutError};
use once_cell::sync::Lazy;
use regex::Regex;

pub type ResourceList = BTreeMap<String, Quantity>;

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+|[numkMGTPE]|[KMGTPE]i)?$")
        .expect("quantity regex")
});

/// Validate a quantity string (`200m`, `512Mi`, `1.5`, `1e3`).
pub fn parse_quantity(resource: &str, value: &str) -> Result<Quantity> {
    let v = value.trim();
    if QUANTITY.is_match(v) {
        Ok(Quantity(v.to_string()))
    } else {
        Err(RolloutError::InvalidQuantity { resource: resource.to_string(), value: value.to_string() })
    }
}

/// Parse `cpu=200m,memory=512Mi`. An empty string is an empty list.
pub fn parse_resource_list(spec: &str) -> Result<ResourceList> {
    let mut out = ResourceList::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| RolloutError::InvalidQuantity { resource: entry.to_string(), value: String::new() })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RolloutError::InvalidQuantity { resource: String::new(), value: value.to_string() });
        }
        out.insert(name.to_string(), parse_quantity(name, value)?);
    }
    Ok(out)
}

/// Names of the containers that match any of `patterns`, in container order.
pub fn select_containers(containers: &[Container], patterns: &[ContainerPattern]) -> Vec<String> {
    containers
        .iter()
        .filter(|c| patterns.iter().any(|p| p.matches(&c.name)))
        .map(|c| c.name.clone())
        .collect()
}

/// Merge `limits` and `requests` into every matching container.
///
/// Only the named dimensions are overwritten; everything else on the container is kept.
/// Containers that do not match are returned unchanged and the order is preserved.
pub fn merge_resources(
    containers: &[Container],
    patterns: &[ContainerPattern],
    limits: &ResourceList,
    requests: &ResourceList,
) -> Vec<Container> {
    containers
        .iter()
        .map(|c| {
            let mut c = c.clone();
            if patterns.iter().any(|p| p.matches(&c.name)) {
                let res = c.resources.get_or_insert_with(ResourceRequirements::default);
                merge_into(&mut res.limits, limits);
                merge_into(&mut res.requests, requests);
            }
            c
        })
        .collect()
}

fn merge_into(target: &mut Option<ResourceList>, values: &ResourceList) {
    if values.is_empty() {
        return;
    }
    let target = target.get_or_insert_with(ResourceList::new);
    for (k, v) in values {
        target.insert(k.clone(), v.clone());
    }
}
