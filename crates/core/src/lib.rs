//! Kroll core types: workload identities, status snapshots and progress results.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod kinds;
pub mod selector;

pub use error::{Result, RolloutError};
pub use kinds::{PodSpecPath, SelectorSource, StatusPolicy, WorkloadKind};
pub use selector::{Operator, Requirement, Selector};

/// Group/version/kind of a workload. Dispatch only looks at group and kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkloadIdentity {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl WorkloadIdentity {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Parse a `v1/Kind` or `group/v1/Kind` key.
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Some(Self::new("", *version, *kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Some(Self::new(*group, *version, *kind)),
            _ => None,
        }
    }

    /// Identity of a raw object from its `apiVersion` and `kind` fields.
    pub fn from_type_meta(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// Version-agnostic `Kind.group` form used in diagnostics.
    pub fn group_kind(&self) -> String {
        if self.group.is_empty() {
            self.kind.clone()
        } else {
            format!("{}.{}", self.kind, self.group)
        }
    }

    pub fn same_group_kind(&self, other: &WorkloadIdentity) -> bool {
        self.group == other.group && self.kind == other.kind
    }
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gvk_key())
    }
}

/// Update strategy of a workload, with partitions resolved to absolute pod counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RolloutStrategy {
    RollingUpdate { partition: Option<i32> },
    OnDelete,
    Recreate,
    InPlaceOnly { partition: Option<i32> },
    InPlaceIfPossible { partition: Option<i32> },
    Unknown(String),
}

impl RolloutStrategy {
    pub fn is_rolling_update(&self) -> bool {
        matches!(self, RolloutStrategy::RollingUpdate { .. })
    }

    pub fn is_in_place(&self) -> bool {
        matches!(self, RolloutStrategy::InPlaceOnly { .. } | RolloutStrategy::InPlaceIfPossible { .. })
    }

    pub fn partition(&self) -> Option<i32> {
        match self {
            RolloutStrategy::RollingUpdate { partition }
            | RolloutStrategy::InPlaceOnly { partition }
            | RolloutStrategy::InPlaceIfPossible { partition } => *partition,
            _ => None,
        }
    }

    /// The strategy type as it is spelled in the object spec.
    pub fn type_name(&self) -> &str {
        match self {
            RolloutStrategy::RollingUpdate { .. } => "RollingUpdate",
            RolloutStrategy::OnDelete => "OnDelete",
            RolloutStrategy::Recreate => "Recreate",
            RolloutStrategy::InPlaceOnly { .. } => "InPlaceOnly",
            RolloutStrategy::InPlaceIfPossible { .. } => "InPlaceIfPossible",
            RolloutStrategy::Unknown(t) => t.as_str(),
        }
    }
}

impl Default for RolloutStrategy {
    fn default() -> Self {
        RolloutStrategy::RollingUpdate { partition: None }
    }
}

/// Read-only view of a workload's spec/status pair used by the rollout evaluator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub name: String,
    pub generation: i64,
    pub observed_generation: i64,
    /// `spec.replicas` (or `desiredNumberScheduled` for daemon sets)
    pub desired_replicas: Option<i32>,
    /// `status.replicas`: every pod the controller currently owns
    pub replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    pub ready_replicas: i32,
    pub current_replicas: i32,
    pub strategy: RolloutStrategy,
    pub current_revision: Option<String>,
    pub update_revision: Option<String>,
    /// Raw `deployment.kubernetes.io/revision` annotation, if any.
    pub revision: Option<String>,
}

impl StatusSnapshot {
    /// True when the controller has not yet reconciled the latest spec.
    pub fn is_stale(&self) -> bool {
        self.observed_generation < self.generation
    }
}

/// Outcome of one rollout status evaluation. Failures travel as [`RolloutError`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub message: String,
    pub done: bool,
}

impl Progress {
    pub fn pending(message: impl Into<String>) -> Self {
        Self { message: message.into(), done: false }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self { message: message.into(), done: true }
    }
}

/// Container name pattern: an exact name or `*` for every container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContainerPattern {
    Any,
    Exact(String),
}

impl ContainerPattern {
    pub const WILDCARD: &'static str = "*";

    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s == Self::WILDCARD { ContainerPattern::Any } else { ContainerPattern::Exact(s.to_string()) }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            ContainerPattern::Any => true,
            ContainerPattern::Exact(n) => n == name,
        }
    }
}

impl fmt::Display for ContainerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerPattern::Any => f.write_str(Self::WILDCARD),
            ContainerPattern::Exact(n) => f.write_str(n),
        }
    }
}

pub mod prelude {
    pub use super::{
        ContainerPattern, Progress, RolloutError, RolloutStrategy, Selector, StatusPolicy, StatusSnapshot,
        WorkloadIdentity, WorkloadKind,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_identity_core_and_group() {
        let core = WorkloadIdentity::parse("v1/ReplicationController").expect("ok");
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
        assert_eq!(core.kind, "ReplicationController");
        assert_eq!(core.gvk_key(), "v1/ReplicationController");

        let apps = WorkloadIdentity::parse("apps.kruise.io/v1beta1/StatefulSet").expect("ok");
        assert_eq!(apps.group, "apps.kruise.io");
        assert_eq!(apps.group_kind(), "StatefulSet.apps.kruise.io");
    }

    #[test]
    fn parse_identity_invalid() {
        assert!(WorkloadIdentity::parse("invalid").is_none());
        assert!(WorkloadIdentity::parse("").is_none());
        assert!(WorkloadIdentity::parse("a/b/c/d").is_none());
        assert!(WorkloadIdentity::parse("apps//Deployment").is_none());
    }

    #[test]
    fn type_meta_splits_api_version() {
        let id = WorkloadIdentity::from_type_meta("extensions/v1beta1", "Deployment");
        assert_eq!(id, WorkloadIdentity::new("extensions", "v1beta1", "Deployment"));
        let id = WorkloadIdentity::from_type_meta("v1", "Pod");
        assert_eq!(id, WorkloadIdentity::new("", "v1", "Pod"));
    }

    #[test]
    fn container_pattern_wildcard() {
        assert_eq!(ContainerPattern::parse("*"), ContainerPattern::Any);
        assert!(ContainerPattern::Any.matches("anything"));
        let p = ContainerPattern::parse(" nginx ");
        assert!(p.matches("nginx"));
        assert!(!p.matches("sidecar"));
        assert_eq!(p.to_string(), "nginx");
    }

    #[test]
    fn strategy_partition_accessors() {
        let s = RolloutStrategy::InPlaceIfPossible { partition: Some(1) };
        assert!(s.is_in_place());
        assert_eq!(s.partition(), Some(1));
        assert_eq!(RolloutStrategy::OnDelete.partition(), None);
        assert_eq!(RolloutStrategy::Unknown("Foo".into()).type_name(), "Foo");
    }
}
