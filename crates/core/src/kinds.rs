//! Registry of the workload kinds Kroll understands.
//!
//! This module provides:
//! - A closed set of workload kinds resolved from `(group, kind)`, ignoring version
//! - The status policy each kind is evaluated with, if any
//! - Where each kind keeps its pod spec and its pod selector

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{RolloutError, WorkloadIdentity};

pub const GROUP_CORE: &str = "";
pub const GROUP_APPS: &str = "apps";
pub const GROUP_EXTENSIONS: &str = "extensions";
pub const GROUP_BATCH: &str = "batch";
pub const GROUP_KRUISE: &str = "apps.kruise.io";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
    ReplicaSet,
    ReplicationController,
    Job,
    CronJob,
    Pod,
    Service,
    CloneSet,
    AdvancedStatefulSet,
}

/// Rollout status decision procedure, one per kind family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StatusPolicy {
    Deployment,
    DaemonSet,
    StatefulSet,
    CloneSet,
    AdvancedStatefulSet,
}

/// Location of the container list inside a raw object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PodSpecPath {
    /// `spec.containers`
    Pod,
    /// `spec.template.spec.containers`
    Template,
    /// `spec.jobTemplate.spec.template.spec.containers`
    JobTemplate,
}

impl PodSpecPath {
    pub fn containers(self) -> &'static [&'static str] {
        match self {
            PodSpecPath::Pod => &["spec", "containers"],
            PodSpecPath::Template => &["spec", "template", "spec", "containers"],
            PodSpecPath::JobTemplate => &["spec", "jobTemplate", "spec", "template", "spec", "containers"],
        }
    }

    /// JSON pointer form of [`PodSpecPath::containers`].
    pub fn pointer(self) -> String {
        let mut out = String::new();
        for seg in self.containers() {
            out.push('/');
            out.push_str(seg);
        }
        out
    }
}

/// Shape of `spec.selector` for a kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SelectorSource {
    /// `metav1.LabelSelector` with `matchLabels`/`matchExpressions`
    LabelSelector,
    /// Plain `map[string]string`
    LabelMap,
    /// Plain map which must not be empty (Services)
    NonEmptyLabelMap,
}

const ALL: &[(&str, &str, WorkloadKind)] = &[
    (GROUP_APPS, "Deployment", WorkloadKind::Deployment),
    (GROUP_EXTENSIONS, "Deployment", WorkloadKind::Deployment),
    (GROUP_APPS, "DaemonSet", WorkloadKind::DaemonSet),
    (GROUP_EXTENSIONS, "DaemonSet", WorkloadKind::DaemonSet),
    (GROUP_APPS, "StatefulSet", WorkloadKind::StatefulSet),
    (GROUP_APPS, "ReplicaSet", WorkloadKind::ReplicaSet),
    (GROUP_EXTENSIONS, "ReplicaSet", WorkloadKind::ReplicaSet),
    (GROUP_CORE, "ReplicationController", WorkloadKind::ReplicationController),
    (GROUP_BATCH, "Job", WorkloadKind::Job),
    (GROUP_BATCH, "CronJob", WorkloadKind::CronJob),
    (GROUP_CORE, "Pod", WorkloadKind::Pod),
    (GROUP_CORE, "Service", WorkloadKind::Service),
    (GROUP_KRUISE, "CloneSet", WorkloadKind::CloneSet),
    (GROUP_KRUISE, "StatefulSet", WorkloadKind::AdvancedStatefulSet),
];

impl WorkloadKind {
    /// Resolve an identity to a known kind. Version is ignored.
    pub fn resolve(id: &WorkloadIdentity) -> Option<Self> {
        ALL.iter().find(|(g, k, _)| *g == id.group && *k == id.kind).map(|(_, _, wk)| *wk)
    }

    /// Every registered `(group, kind)` pair in registry order.
    pub fn registered() -> impl Iterator<Item = (&'static str, &'static str, WorkloadKind)> {
        ALL.iter().copied()
    }

    pub fn status_policy(self) -> Option<StatusPolicy> {
        match self {
            WorkloadKind::Deployment => Some(StatusPolicy::Deployment),
            WorkloadKind::DaemonSet => Some(StatusPolicy::DaemonSet),
            WorkloadKind::StatefulSet => Some(StatusPolicy::StatefulSet),
            WorkloadKind::CloneSet => Some(StatusPolicy::CloneSet),
            WorkloadKind::AdvancedStatefulSet => Some(StatusPolicy::AdvancedStatefulSet),
            _ => None,
        }
    }

    pub fn pod_spec_path(self) -> Option<PodSpecPath> {
        match self {
            WorkloadKind::Pod => Some(PodSpecPath::Pod),
            WorkloadKind::CronJob => Some(PodSpecPath::JobTemplate),
            WorkloadKind::Service => None,
            _ => Some(PodSpecPath::Template),
        }
    }

    pub fn selector_source(self) -> Option<SelectorSource> {
        match self {
            WorkloadKind::ReplicationController => Some(SelectorSource::LabelMap),
            WorkloadKind::Service => Some(SelectorSource::NonEmptyLabelMap),
            WorkloadKind::CronJob | WorkloadKind::Pod => None,
            _ => Some(SelectorSource::LabelSelector),
        }
    }

    /// Kruise kinds that support in-place restarts through a container env marker.
    pub fn restarts_in_place(self) -> bool {
        matches!(self, WorkloadKind::CloneSet | WorkloadKind::AdvancedStatefulSet)
    }
}

impl StatusPolicy {
    /// Only Deployments record a numeric revision usable as a rollout target.
    pub fn tracks_revision(self) -> bool {
        matches!(self, StatusPolicy::Deployment)
    }

    /// Human label used in progress messages.
    pub fn label(self) -> &'static str {
        match self {
            StatusPolicy::Deployment => "deployment",
            StatusPolicy::DaemonSet => "daemon set",
            StatusPolicy::StatefulSet => "statefulset",
            StatusPolicy::CloneSet => "CloneSet",
            StatusPolicy::AdvancedStatefulSet => "Advanced StatefulSet",
        }
    }
}

fn not_implemented(id: &WorkloadIdentity, capability: &'static str) -> RolloutError {
    RolloutError::NotImplemented { capability, group_kind: id.group_kind() }
}

/// Status policy for an identity, or `NotImplemented` for kinds outside the allow-list.
pub fn policy_for(id: &WorkloadIdentity) -> Result<StatusPolicy, RolloutError> {
    WorkloadKind::resolve(id).and_then(WorkloadKind::status_policy).ok_or_else(|| not_implemented(id, "status viewer"))
}

pub fn container_accessor_for(id: &WorkloadIdentity) -> Result<PodSpecPath, RolloutError> {
    WorkloadKind::resolve(id).and_then(WorkloadKind::pod_spec_path).ok_or_else(|| not_implemented(id, "container accessor"))
}

pub fn selector_accessor_for(id: &WorkloadIdentity) -> Result<SelectorSource, RolloutError> {
    WorkloadKind::resolve(id).and_then(WorkloadKind::selector_source).ok_or_else(|| not_implemented(id, "selector"))
}
