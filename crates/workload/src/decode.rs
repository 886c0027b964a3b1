//! Object decoder: untyped objects into typed structs and [`StatusSnapshot`]s.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kroll_core::{Result, RolloutError, RolloutStrategy, StatusPolicy, StatusSnapshot, WorkloadIdentity};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;

pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";
const PROGRESSING: &str = "Progressing";
const PROGRESS_DEADLINE_EXCEEDED: &str = "ProgressDeadlineExceeded";

/// Identity of a raw object from its type meta.
pub fn identity_of(raw: &Json) -> Result<WorkloadIdentity> {
    let api_version = raw.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| RolloutError::conversion("object", "missing apiVersion"))?;
    let kind = raw.get("kind").and_then(|v| v.as_str()).ok_or_else(|| RolloutError::conversion("object", "missing kind"))?;
    Ok(WorkloadIdentity::from_type_meta(api_version, kind))
}

/// Decode any schema variant of a built-in kind into the `apps/v1` struct.
///
/// Older variants (`extensions/v1beta1`, `apps/v1beta1`, `apps/v1beta2`) share the fields
/// we read, so type meta is rewritten before deserializing.
pub(crate) fn decode_as<K>(raw: &Json) -> Result<K>
where
    K: k8s_openapi::Resource + DeserializeOwned,
{
    let mut v = raw.clone();
    let obj = v.as_object_mut().ok_or_else(|| RolloutError::conversion(K::KIND, "expected a JSON object"))?;
    obj.insert("apiVersion".into(), Json::String(K::API_VERSION.to_string()));
    obj.insert("kind".into(), Json::String(K::KIND.to_string()));
    serde_json::from_value(v).map_err(|e| RolloutError::conversion(K::KIND, e))
}

fn decode_crd<T: DeserializeOwned>(raw: &Json, target: &'static str) -> Result<T> {
    if !raw.is_object() {
        return Err(RolloutError::conversion(target, "expected a JSON object"));
    }
    T::deserialize(raw).map_err(|e| RolloutError::conversion(target, e))
}

// ---- OpenKruise shapes (only the fields the evaluator reads) ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KruiseStatus {
    #[serde(default)]
    observed_generation: i64,
    #[serde(default)]
    replicas: i32,
    #[serde(default)]
    ready_replicas: i32,
    #[serde(default)]
    available_replicas: i32,
    #[serde(default)]
    updated_replicas: i32,
    #[serde(default)]
    current_replicas: i32,
    current_revision: Option<String>,
    update_revision: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloneSetUpdateStrategy {
    #[serde(rename = "type")]
    type_: Option<String>,
    partition: Option<IntOrString>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloneSetSpec {
    replicas: Option<i32>,
    #[serde(default)]
    update_strategy: CloneSetUpdateStrategy,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CloneSet {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: CloneSetSpec,
    #[serde(default)]
    status: KruiseStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AdvancedRollingUpdate {
    partition: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvancedUpdateStrategy {
    #[serde(rename = "type")]
    type_: Option<String>,
    rolling_update: Option<AdvancedRollingUpdate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvancedStatefulSetSpec {
    replicas: Option<i32>,
    #[serde(default)]
    update_strategy: AdvancedUpdateStrategy,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AdvancedStatefulSet {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: AdvancedStatefulSetSpec,
    #[serde(default)]
    status: KruiseStatus,
}

/// Build the status snapshot the given policy evaluates.
pub fn snapshot_for(policy: StatusPolicy, raw: &Json) -> Result<StatusSnapshot> {
    match policy {
        StatusPolicy::Deployment => deployment_snapshot(&decode_as::<Deployment>(raw)?),
        StatusPolicy::DaemonSet => Ok(daemon_set_snapshot(&decode_as::<DaemonSet>(raw)?)),
        StatusPolicy::StatefulSet => Ok(stateful_set_snapshot(&decode_as::<StatefulSet>(raw)?)),
        StatusPolicy::CloneSet => clone_set_snapshot(&decode_crd::<CloneSet>(raw, "CloneSet")?),
        StatusPolicy::AdvancedStatefulSet => {
            Ok(advanced_stateful_set_snapshot(&decode_crd::<AdvancedStatefulSet>(raw, "Advanced StatefulSet")?))
        }
    }
}

fn meta_basics(meta: &ObjectMeta) -> (String, i64) {
    (meta.name.clone().unwrap_or_default(), meta.generation.unwrap_or(0))
}

fn deployment_snapshot(d: &Deployment) -> Result<StatusSnapshot> {
    let (name, generation) = meta_basics(&d.metadata);
    let spec = d.spec.as_ref();
    let status = d.status.clone().unwrap_or_default();
    let strategy = match spec.and_then(|s| s.strategy.as_ref()).and_then(|s| s.type_.as_deref()) {
        Some("Recreate") => RolloutStrategy::Recreate,
        _ => RolloutStrategy::RollingUpdate { partition: None },
    };
    Ok(StatusSnapshot {
        name,
        generation,
        observed_generation: status.observed_generation.unwrap_or(0),
        desired_replicas: spec.and_then(|s| s.replicas),
        replicas: status.replicas.unwrap_or(0),
        updated_replicas: status.updated_replicas.unwrap_or(0),
        available_replicas: status.available_replicas.unwrap_or(0),
        ready_replicas: status.ready_replicas.unwrap_or(0),
        current_replicas: status.replicas.unwrap_or(0),
        strategy,
        current_revision: None,
        update_revision: None,
        revision: d.metadata.annotations.as_ref().and_then(|a| a.get(REVISION_ANNOTATION)).cloned(),
    })
}

fn daemon_set_snapshot(ds: &DaemonSet) -> StatusSnapshot {
    let (name, generation) = meta_basics(&ds.metadata);
    let status = ds.status.clone().unwrap_or_default();
    // apps/v1 defaults a missing strategy type to RollingUpdate
    let strategy = match ds.spec.as_ref().and_then(|s| s.update_strategy.as_ref()).and_then(|u| u.type_.as_deref()) {
        None | Some("RollingUpdate") => RolloutStrategy::RollingUpdate { partition: None },
        Some("OnDelete") => RolloutStrategy::OnDelete,
        Some(other) => RolloutStrategy::Unknown(other.to_string()),
    };
    StatusSnapshot {
        name,
        generation,
        observed_generation: status.observed_generation.unwrap_or(0),
        desired_replicas: Some(status.desired_number_scheduled),
        replicas: status.current_number_scheduled,
        updated_replicas: status.updated_number_scheduled.unwrap_or(0),
        available_replicas: status.number_available.unwrap_or(0),
        ready_replicas: status.number_ready,
        current_replicas: status.current_number_scheduled,
        strategy,
        current_revision: None,
        update_revision: None,
        revision: None,
    }
}

fn stateful_set_snapshot(sts: &StatefulSet) -> StatusSnapshot {
    let (name, generation) = meta_basics(&sts.metadata);
    let spec = sts.spec.as_ref();
    let status = sts.status.clone().unwrap_or_default();
    let update_strategy = spec.and_then(|s| s.update_strategy.as_ref());
    let strategy = match update_strategy.and_then(|u| u.type_.as_deref()) {
        None | Some("RollingUpdate") => RolloutStrategy::RollingUpdate {
            partition: update_strategy.and_then(|u| u.rolling_update.as_ref()).and_then(|r| r.partition),
        },
        Some("OnDelete") => RolloutStrategy::OnDelete,
        Some(other) => RolloutStrategy::Unknown(other.to_string()),
    };
    StatusSnapshot {
        name,
        generation,
        observed_generation: status.observed_generation.unwrap_or(0),
        desired_replicas: spec.and_then(|s| s.replicas),
        replicas: status.replicas,
        updated_replicas: status.updated_replicas.unwrap_or(0),
        available_replicas: status.available_replicas.unwrap_or(0),
        ready_replicas: status.ready_replicas.unwrap_or(0),
        current_replicas: status.current_replicas.unwrap_or(0),
        strategy,
        current_revision: status.current_revision.clone(),
        update_revision: status.update_revision.clone(),
        revision: None,
    }
}

/// Resolve an int-or-percent partition against the desired replicas, rounding up.
fn scaled_partition(partition: &IntOrString, replicas: i32) -> Result<i32> {
    match partition {
        IntOrString::Int(i) => Ok(*i),
        IntOrString::String(s) => {
            let bad = || RolloutError::conversion("CloneSet", format!("invalid partition {s:?}"));
            match s.strip_suffix('%') {
                Some(pct) => {
                    let pct: i64 = pct.trim().parse().map_err(|_| bad())?;
                    let scaled = pct
                        .checked_mul(i64::from(replicas))
                        .and_then(|v| v.checked_add(99))
                        .ok_or_else(bad)?
                        .div_euclid(100);
                    i32::try_from(scaled).map_err(|_| bad())
                }
                None => s.trim().parse::<i32>().map_err(|_| bad()),
            }
        }
    }
}

fn clone_set_snapshot(cs: &CloneSet) -> Result<StatusSnapshot> {
    let (name, generation) = meta_basics(&cs.metadata);
    let replicas = cs.spec.replicas.unwrap_or(1);
    let partition = cs.spec.update_strategy.partition.as_ref().map(|p| scaled_partition(p, replicas)).transpose()?;
    let strategy = match cs.spec.update_strategy.type_.as_deref() {
        None | Some("ReCreate") => RolloutStrategy::Recreate,
        Some("InPlaceIfPossible") => RolloutStrategy::InPlaceIfPossible { partition },
        Some("InPlaceOnly") => RolloutStrategy::InPlaceOnly { partition },
        Some(other) => RolloutStrategy::Unknown(other.to_string()),
    };
    Ok(kruise_snapshot(name, generation, cs.spec.replicas, strategy, &cs.status))
}

fn advanced_stateful_set_snapshot(asts: &AdvancedStatefulSet) -> StatusSnapshot {
    let (name, generation) = meta_basics(&asts.metadata);
    let us = &asts.spec.update_strategy;
    let strategy = match us.type_.as_deref() {
        None | Some("RollingUpdate") => {
            RolloutStrategy::RollingUpdate { partition: us.rolling_update.as_ref().and_then(|r| r.partition) }
        }
        Some("OnDelete") => RolloutStrategy::OnDelete,
        Some(other) => RolloutStrategy::Unknown(other.to_string()),
    };
    kruise_snapshot(name, generation, asts.spec.replicas, strategy, &asts.status)
}

fn kruise_snapshot(name: String, generation: i64, desired: Option<i32>, strategy: RolloutStrategy, s: &KruiseStatus) -> StatusSnapshot {
    StatusSnapshot {
        name,
        generation,
        observed_generation: s.observed_generation,
        desired_replicas: desired,
        replicas: s.replicas,
        updated_replicas: s.updated_replicas,
        available_replicas: s.available_replicas,
        ready_replicas: s.ready_replicas,
        current_replicas: s.current_replicas,
        strategy,
        current_revision: s.current_revision.clone(),
        update_revision: s.update_revision.clone(),
        revision: None,
    }
}

/// Parse a revision annotation. A missing annotation is revision 0.
pub fn parse_revision(annotation: Option<&str>) -> Result<i64> {
    match annotation {
        None => Ok(0),
        Some(v) => v.trim().parse::<i64>().map_err(|e| RolloutError::conversion("revision", format!("{v:?}: {e}"))),
    }
}

/// Revision recorded against a Deployment object.
pub fn revision_of(raw: &Json) -> Result<i64> {
    parse_revision(raw.pointer("/metadata/annotations").and_then(|a| a.get(REVISION_ANNOTATION)).and_then(|v| v.as_str()))
}

/// Whether a Deployment reports `Progressing` with reason `ProgressDeadlineExceeded`.
pub fn progress_deadline_exceeded(raw: &Json) -> Result<bool> {
    let d = decode_as::<Deployment>(raw)?;
    let conds = d.status.and_then(|s| s.conditions).unwrap_or_default();
    Ok(conds.iter().any(|c| c.type_ == PROGRESSING && c.reason.as_deref() == Some(PROGRESS_DEADLINE_EXCEEDED)))
}
