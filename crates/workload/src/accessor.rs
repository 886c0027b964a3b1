//! Container and selector accessors across every registered schema variant.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kroll_core::kinds::{container_accessor_for, selector_accessor_for};
use kroll_core::{Result, RolloutError, Selector, SelectorSource, WorkloadIdentity};
use serde_json::{Map, Value as Json};

pub fn name_of(raw: &Json) -> String {
    raw.pointer("/metadata/name").and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

pub fn namespace_of(raw: &Json) -> Option<String> {
    raw.pointer("/metadata/namespace").and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Containers of the pod spec for `id`. A missing template yields an empty list.
pub fn containers_of(id: &WorkloadIdentity, raw: &Json) -> Result<Vec<Container>> {
    let path = container_accessor_for(id)?;
    match raw.pointer(&path.pointer()) {
        None | Some(Json::Null) => Ok(Vec::new()),
        Some(v) => serde::Deserialize::deserialize(v).map_err(|e| RolloutError::conversion("[]Container", e)),
    }
}

fn containers_value(containers: &[Container]) -> Result<Json> {
    serde_json::to_value(containers).map_err(|e| RolloutError::conversion("[]Container", e))
}

/// Write `containers` back into `raw`, creating intermediate objects as needed.
pub fn set_containers(id: &WorkloadIdentity, raw: &mut Json, containers: &[Container]) -> Result<()> {
    let path = container_accessor_for(id)?.containers();
    let value = containers_value(containers)?;
    let (last, parents) = path.split_last().ok_or_else(|| RolloutError::conversion("pod spec", "empty path"))?;
    let mut cur = raw;
    for seg in parents {
        if cur.is_null() {
            *cur = Json::Object(Map::new());
        }
        let obj = cur.as_object_mut().ok_or_else(|| RolloutError::conversion("pod spec", format!("{seg} is not an object")))?;
        cur = obj.entry(seg.to_string()).or_insert_with(|| Json::Object(Map::new()));
    }
    let obj = cur.as_object_mut().ok_or_else(|| RolloutError::conversion("pod spec", format!("parent of {last} is not an object")))?;
    obj.insert(last.to_string(), value);
    Ok(())
}

/// Merge patch carrying only the container list at the kind's pod spec path.
pub fn containers_patch(id: &WorkloadIdentity, containers: &[Container]) -> Result<Json> {
    let path = container_accessor_for(id)?.containers();
    let mut patch = containers_value(containers)?;
    for seg in path.iter().rev() {
        let mut m = Map::new();
        m.insert(seg.to_string(), patch);
        patch = Json::Object(m);
    }
    Ok(patch)
}

/// Namespace and pod selector of a workload or Service.
pub fn selector_for(id: &WorkloadIdentity, raw: &Json) -> Result<(Option<String>, Selector)> {
    let source = selector_accessor_for(id)?;
    let namespace = namespace_of(raw);
    let field = raw.pointer("/spec/selector").filter(|v| !v.is_null());
    let selector = match source {
        SelectorSource::LabelSelector => {
            let field = field.ok_or_else(|| RolloutError::InvalidSelector(format!("{} {:?} has no selector", id.kind, name_of(raw))))?;
            let ls: LabelSelector = serde::Deserialize::deserialize(field).map_err(|e| RolloutError::InvalidSelector(e.to_string()))?;
            from_label_selector(&ls)?
        }
        SelectorSource::LabelMap | SelectorSource::NonEmptyLabelMap => {
            let map: BTreeMap<String, String> = match field {
                Some(v) => serde::Deserialize::deserialize(v).map_err(|e| RolloutError::InvalidSelector(e.to_string()))?,
                None => BTreeMap::new(),
            };
            if map.is_empty() && source == SelectorSource::NonEmptyLabelMap {
                return Err(RolloutError::EmptyServiceSelector { name: name_of(raw) });
            }
            Selector::from_labels(&map)?
        }
    };
    Ok((namespace, selector))
}

pub fn from_label_selector(ls: &LabelSelector) -> Result<Selector> {
    let labels = ls.match_labels.clone().unwrap_or_default();
    let exprs = ls
        .match_expressions
        .iter()
        .flatten()
        .map(|e| (e.key.clone(), e.operator.clone(), e.values.clone().unwrap_or_default()));
    Selector::from_parts(&labels, exprs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(key: &str) -> WorkloadIdentity {
        WorkloadIdentity::parse(key).expect("valid key")
    }

    fn container(name: &str) -> Container {
        Container { name: name.to_string(), image: Some("nginx".into()), ..Default::default() }
    }

    #[test]
    fn reads_containers_for_each_layout() {
        let rc = json!({ "spec": { "template": { "spec": { "containers": [ { "name": "nginx", "image": "nginx" } ] } } } });
        let got = containers_of(&id("v1/ReplicationController"), &rc).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "nginx");

        let cj = json!({ "spec": { "jobTemplate": { "spec": { "template": { "spec": { "containers": [ { "name": "a" }, { "name": "b" } ] } } } } } });
        let got = containers_of(&id("batch/v1/CronJob"), &cj).unwrap();
        assert_eq!(got.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let pod = json!({ "spec": { "containers": [ { "name": "main" } ] } });
        assert_eq!(containers_of(&id("v1/Pod"), &pod).unwrap()[0].name, "main");
    }

    #[test]
    fn missing_template_is_empty_and_bad_shape_errors() {
        let rc = json!({ "spec": {} });
        assert!(containers_of(&id("v1/ReplicationController"), &rc).unwrap().is_empty());

        let bad = json!({ "spec": { "template": { "spec": { "containers": { "name": "x" } } } } });
        let err = containers_of(&id("apps/v1/Deployment"), &bad).unwrap_err();
        assert!(matches!(err, RolloutError::TypeConversion { .. }));

        let err = containers_of(&id("v1/Service"), &rc).unwrap_err();
        assert!(matches!(err, RolloutError::NotImplemented { .. }));
    }

    #[test]
    fn set_containers_creates_path() {
        let mut raw = json!({ "metadata": { "name": "x" } });
        set_containers(&id("apps.kruise.io/v1alpha1/CloneSet"), &mut raw, &[container("nginx")]).unwrap();
        assert_eq!(raw.pointer("/spec/template/spec/containers/0/name").and_then(|v| v.as_str()), Some("nginx"));

        let mut bad = json!({ "spec": "oops" });
        assert!(set_containers(&id("apps/v1/Deployment"), &mut bad, &[]).is_err());
    }

    #[test]
    fn patch_nests_containers() {
        let patch = containers_patch(&id("v1/Pod"), &[container("main")]).unwrap();
        assert_eq!(patch, json!({ "spec": { "containers": [ { "name": "main", "image": "nginx" } ] } }));
    }

    #[test]
    fn selector_from_label_selector() {
        let dep = json!({
            "metadata": { "name": "web", "namespace": "shop" },
            "spec": { "selector": {
                "matchLabels": { "app": "web" },
                "matchExpressions": [ { "key": "track", "operator": "NotIn", "values": ["canary"] } ]
            } }
        });
        let (ns, sel) = selector_for(&id("apps/v1/Deployment"), &dep).unwrap();
        assert_eq!(ns.as_deref(), Some("shop"));
        assert_eq!(sel.to_string(), "app=web,track notin (canary)");
    }

    #[test]
    fn selector_from_label_map() {
        let rc = json!({ "metadata": { "name": "rc" }, "spec": { "selector": { "app": "cassandra" } } });
        let (ns, sel) = selector_for(&id("v1/ReplicationController"), &rc).unwrap();
        assert!(ns.is_none());
        assert_eq!(sel.to_string(), "app=cassandra");
    }

    #[test]
    fn service_without_selector_is_an_error() {
        let svc = json!({ "metadata": { "name": "frontend" }, "spec": { "selector": {} } });
        let err = selector_for(&id("v1/Service"), &svc).unwrap_err();
        assert!(matches!(err, RolloutError::EmptyServiceSelector { ref name } if name == "frontend"), "{err}");

        let svc = json!({ "metadata": { "name": "frontend" }, "spec": {} });
        assert!(selector_for(&id("v1/Service"), &svc).is_err());
    }

    #[test]
    fn invalid_operator_is_rejected() {
        let job = json!({ "metadata": { "name": "j" }, "spec": { "selector": {
            "matchExpressions": [ { "key": "a", "operator": "Near" } ]
        } } });
        let err = selector_for(&id("batch/v1/Job"), &job).unwrap_err();
        assert!(matches!(err, RolloutError::InvalidSelector(_)));
    }
}
