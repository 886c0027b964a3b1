//! Kroll rollout status evaluator.
//!
//! One pure policy per kind family. Each policy consumes a [`StatusSnapshot`] and an
//! optional target revision and returns a [`Progress`] or a terminal [`RolloutError`].
//! An in-progress rollout is never an error.

#![forbid(unsafe_code)]

use kroll_core::kinds::policy_for;
use kroll_core::{Progress, Result, RolloutError, RolloutStrategy, StatusPolicy, StatusSnapshot, WorkloadIdentity};
use kroll_workload::{parse_revision, snapshot_for};
use serde_json::Value as Json;

/// Evaluate rollout progress of a raw object of kind `id`.
///
/// `revision` pins the expected Deployment revision; kinds without revision history
/// ignore it.
pub fn status(id: &WorkloadIdentity, raw: &Json, revision: Option<i64>) -> Result<Progress> {
    let policy = policy_for(id)?;
    let snap = snapshot_for(policy, raw)?;
    evaluate(policy, &snap, revision)
}

pub fn evaluate(policy: StatusPolicy, snap: &StatusSnapshot, revision: Option<i64>) -> Result<Progress> {
    if let Some(desired) = revision.filter(|r| *r > 0 && policy.tracks_revision()) {
        let running = parse_revision(snap.revision.as_deref())?;
        if desired != running {
            return Err(RolloutError::RevisionMismatch { kind: policy.label(), name: snap.name.clone(), desired, running });
        }
    }
    match policy {
        StatusPolicy::Deployment => deployment(snap),
        StatusPolicy::DaemonSet => daemon_set(snap),
        StatusPolicy::StatefulSet => stateful_set(snap),
        StatusPolicy::CloneSet => clone_set(snap),
        StatusPolicy::AdvancedStatefulSet => advanced_stateful_set(snap),
    }
}

fn deployment(s: &StatusSnapshot) -> Result<Progress> {
    if s.is_stale() {
        return Ok(Progress::pending("Waiting for deployment spec update to be observed..."));
    }
    let name = &s.name;
    if let Some(desired) = s.desired_replicas.filter(|d| s.updated_replicas < *d) {
        return Ok(Progress::pending(format!(
            "Waiting for deployment {name:?} rollout to finish: {} out of {desired} new replicas have been updated...",
            s.updated_replicas
        )));
    }
    if s.replicas > s.updated_replicas {
        return Ok(Progress::pending(format!(
            "Waiting for deployment {name:?} rollout to finish: {} old replicas are pending termination...",
            s.replicas - s.updated_replicas
        )));
    }
    if s.available_replicas < s.updated_replicas {
        return Ok(Progress::pending(format!(
            "Waiting for deployment {name:?} rollout to finish: {} of {} updated replicas are available...",
            s.available_replicas, s.updated_replicas
        )));
    }
    Ok(Progress::complete(format!("deployment {name:?} successfully rolled out")))
}

fn require_rolling_update(policy: StatusPolicy, s: &StatusSnapshot) -> Result<()> {
    if s.strategy.is_rolling_update() {
        return Ok(());
    }
    Err(RolloutError::UnsupportedStrategy {
        kind: policy.label(),
        name: s.name.clone(),
        expected: "RollingUpdate",
        actual: s.strategy.type_name().to_string(),
    })
}

fn daemon_set(s: &StatusSnapshot) -> Result<Progress> {
    if s.is_stale() {
        return Ok(Progress::pending("Waiting for daemon set spec update to be observed..."));
    }
    require_rolling_update(StatusPolicy::DaemonSet, s)?;
    let name = &s.name;
    let desired = s.desired_replicas.unwrap_or(0);
    if s.updated_replicas < desired {
        return Ok(Progress::pending(format!(
            "Waiting for daemon set {name:?} rollout to finish: {} out of {desired} new pods have been updated...",
            s.updated_replicas
        )));
    }
    if s.available_replicas < desired {
        return Ok(Progress::pending(format!(
            "Waiting for daemon set {name:?} rollout to finish: {} of {desired} updated pods are available...",
            s.available_replicas
        )));
    }
    Ok(Progress::complete(format!("daemon set {name:?} successfully rolled out")))
}

/// Controllers that never observed any generation have not started reconciling.
fn unobserved(s: &StatusSnapshot) -> bool {
    s.observed_generation == 0 || s.is_stale()
}

fn ready_shortfall(s: &StatusSnapshot) -> Option<Progress> {
    let desired = s.desired_replicas?;
    (s.ready_replicas < desired).then(|| Progress::pending(format!("Waiting for {} pods to be ready...", desired.saturating_sub(s.ready_replicas))))
}

/// Pending progress while fewer than `desired - partition` pods run the new revision.
fn partition_shortfall(s: &StatusSnapshot, partition: i32) -> Option<Progress> {
    let target = s.desired_replicas?.saturating_sub(partition);
    (s.updated_replicas < target).then(|| {
        Progress::pending(format!(
            "Waiting for partitioned roll out to finish: {} out of {target} new pods have been updated...",
            s.updated_replicas
        ))
    })
}

fn stateful_set(s: &StatusSnapshot) -> Result<Progress> {
    if unobserved(s) {
        return Ok(Progress::pending("Waiting for statefulset spec update to be observed..."));
    }
    require_rolling_update(StatusPolicy::StatefulSet, s)?;
    if let Some(p) = ready_shortfall(s) {
        return Ok(p);
    }
    if let Some(partition) = s.strategy.partition().filter(|p| *p > 0) {
        if let Some(p) = partition_shortfall(s, partition) {
            return Ok(p);
        }
        return Ok(Progress::complete(format!(
            "partitioned roll out complete: {} new pods have been updated...",
            s.updated_replicas
        )));
    }
    let update = s.update_revision.as_deref().unwrap_or_default();
    if s.update_revision != s.current_revision {
        return Ok(Progress::pending(format!(
            "waiting for statefulset rolling update to complete {} pods at revision {update}...",
            s.updated_replicas
        )));
    }
    Ok(Progress::complete(format!(
        "statefulset rolling update complete {} pods at revision {}...",
        s.current_replicas,
        s.current_revision.as_deref().unwrap_or_default()
    )))
}

fn clone_set(s: &StatusSnapshot) -> Result<Progress> {
    if let RolloutStrategy::InPlaceOnly { partition: Some(partition) } | RolloutStrategy::InPlaceIfPossible { partition: Some(partition) } =
        s.strategy
    {
        if let Some(p) = partition_shortfall(s, partition) {
            return Ok(p);
        }
    }
    kruise_tail(StatusPolicy::CloneSet, s)
}

fn advanced_stateful_set(s: &StatusSnapshot) -> Result<Progress> {
    if let RolloutStrategy::RollingUpdate { partition: Some(partition) } = s.strategy {
        if let Some(p) = partition_shortfall(s, partition) {
            return Ok(p);
        }
    }
    kruise_tail(StatusPolicy::AdvancedStatefulSet, s)
}

fn kruise_tail(policy: StatusPolicy, s: &StatusSnapshot) -> Result<Progress> {
    let label = policy.label();
    if unobserved(s) {
        return Ok(Progress::pending(format!("Waiting for {label} spec update to be observed...")));
    }
    if let Some(p) = ready_shortfall(s) {
        return Ok(p);
    }
    Ok(Progress::complete(format!(
        "{label} rolling update complete {} pods at revision {}...",
        s.available_replicas,
        s.update_revision.as_deref().unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converged(strategy: RolloutStrategy) -> StatusSnapshot {
        StatusSnapshot {
            name: "web".into(),
            generation: 2,
            observed_generation: 2,
            desired_replicas: Some(3),
            replicas: 3,
            updated_replicas: 3,
            available_replicas: 3,
            ready_replicas: 3,
            current_replicas: 3,
            strategy,
            current_revision: Some("web-7d9".into()),
            update_revision: Some("web-7d9".into()),
            revision: Some("4".into()),
        }
    }

    #[test]
    fn deployment_checks_run_in_order() {
        let mut s = converged(RolloutStrategy::default());
        s.replicas = 4;
        s.available_replicas = 2;
        let p = evaluate(StatusPolicy::Deployment, &s, None).unwrap();
        assert_eq!(p.message, "Waiting for deployment \"web\" rollout to finish: 1 old replicas are pending termination...");

        s.replicas = 3;
        let p = evaluate(StatusPolicy::Deployment, &s, None).unwrap();
        assert_eq!(p.message, "Waiting for deployment \"web\" rollout to finish: 2 of 3 updated replicas are available...");
        assert!(!p.done);
    }

    #[test]
    fn revision_zero_or_absent_is_not_checked() {
        let mut s = converged(RolloutStrategy::default());
        s.revision = Some("not-a-number".into());
        assert!(evaluate(StatusPolicy::Deployment, &s, None).unwrap().done);
        assert!(evaluate(StatusPolicy::Deployment, &s, Some(0)).unwrap().done);
        let err = evaluate(StatusPolicy::Deployment, &s, Some(4)).unwrap_err();
        assert!(matches!(err, RolloutError::TypeConversion { .. }));
    }

    #[test]
    fn missing_revision_annotation_reads_as_zero() {
        let mut s = converged(RolloutStrategy::default());
        s.revision = None;
        let err = evaluate(StatusPolicy::Deployment, &s, Some(1)).unwrap_err();
        assert!(matches!(err, RolloutError::RevisionMismatch { desired: 1, running: 0, .. }), "{err}");
    }

    #[test]
    fn stateful_set_waits_for_revision_convergence() {
        let mut s = converged(RolloutStrategy::default());
        s.update_revision = Some("web-8aa".into());
        s.updated_replicas = 1;
        let p = evaluate(StatusPolicy::StatefulSet, &s, None).unwrap();
        assert_eq!(p.message, "waiting for statefulset rolling update to complete 1 pods at revision web-8aa...");

        let p = evaluate(StatusPolicy::StatefulSet, &converged(RolloutStrategy::default()), None).unwrap();
        assert_eq!(p.message, "statefulset rolling update complete 3 pods at revision web-7d9...");
        assert!(p.done);
    }

    #[test]
    fn stateful_set_never_observed_is_pending() {
        let mut s = converged(RolloutStrategy::default());
        s.generation = 0;
        s.observed_generation = 0;
        let p = evaluate(StatusPolicy::StatefulSet, &s, None).unwrap();
        assert!(!p.done);
        assert_eq!(p.message, "Waiting for statefulset spec update to be observed...");
    }

    #[test]
    fn stateful_set_ready_shortfall() {
        let mut s = converged(RolloutStrategy::default());
        s.ready_replicas = 1;
        let p = evaluate(StatusPolicy::StatefulSet, &s, None).unwrap();
        assert_eq!(p.message, "Waiting for 2 pods to be ready...");
    }

    #[test]
    fn kruise_messages() {
        let p = evaluate(StatusPolicy::CloneSet, &converged(RolloutStrategy::Recreate), None).unwrap();
        assert_eq!(p.message, "CloneSet rolling update complete 3 pods at revision web-7d9...");
        assert!(p.done);

        let mut s = converged(RolloutStrategy::RollingUpdate { partition: Some(1) });
        s.updated_replicas = 1;
        let p = evaluate(StatusPolicy::AdvancedStatefulSet, &s, None).unwrap();
        assert_eq!(p.message, "Waiting for partitioned roll out to finish: 1 out of 2 new pods have been updated...");

        s.updated_replicas = 2;
        let p = evaluate(StatusPolicy::AdvancedStatefulSet, &s, None).unwrap();
        assert_eq!(p.message, "Advanced StatefulSet rolling update complete 3 pods at revision web-7d9...");
    }

    #[test]
    fn clone_set_partition_precedes_generation() {
        let mut s = converged(RolloutStrategy::InPlaceOnly { partition: Some(0) });
        s.generation = 5;
        s.updated_replicas = 0;
        let p = evaluate(StatusPolicy::CloneSet, &s, None).unwrap();
        assert_eq!(p.message, "Waiting for partitioned roll out to finish: 0 out of 3 new pods have been updated...");
    }

    #[test]
    fn extreme_counts_do_not_overflow() {
        let mut s = converged(RolloutStrategy::RollingUpdate { partition: Some(i32::MIN) });
        s.updated_replicas = 0;
        let p = evaluate(StatusPolicy::AdvancedStatefulSet, &s, None).unwrap();
        assert!(!p.done);
        assert!(p.message.contains(&i32::MAX.to_string()), "{}", p.message);

        let mut s = converged(RolloutStrategy::Recreate);
        s.ready_replicas = i32::MIN;
        let p = evaluate(StatusPolicy::CloneSet, &s, None).unwrap();
        assert_eq!(p.message, format!("Waiting for {} pods to be ready...", i32::MAX));
    }
}
