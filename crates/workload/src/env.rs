//! Environment variable updates on container lists.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{Container, EnvVar};

/// Env var whose value changes on every in-place restart request.
pub const RESTARTED_AT: &str = "RESTARTED_AT";

/// Apply `remove` then `upserts` to `existing`.
///
/// Removed names are dropped first. Upserts then replace a surviving variable in place or
/// are appended in `upserts` order, so a name both removed and upserted ends up last.
pub fn update_env(existing: &[EnvVar], upserts: &[EnvVar], remove: &[String]) -> Vec<EnvVar> {
    let mut out = Vec::with_capacity(existing.len() + upserts.len());
    let mut covered: HashSet<&str> = HashSet::new();
    for e in existing.iter().filter(|e| !remove.iter().any(|r| r == &e.name)) {
        match upserts.iter().find(|u| u.name == e.name) {
            Some(u) => {
                if covered.insert(u.name.as_str()) {
                    out.push(u.clone());
                }
            }
            None => out.push(e.clone()),
        }
    }
    for u in upserts {
        if covered.insert(u.name.as_str()) {
            out.push(u.clone());
        }
    }
    out
}

pub fn restart_marker(now: DateTime<Utc>) -> EnvVar {
    EnvVar {
        name: RESTARTED_AT.to_string(),
        value: Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        value_from: None,
    }
}

/// Set the restart marker on every container; pods are restarted in place by the controller.
pub fn inject_restart_marker(containers: &[Container], now: DateTime<Utc>) -> Vec<Container> {
    let marker = [restart_marker(now)];
    containers
        .iter()
        .map(|c| {
            let mut c = c.clone();
            let env = update_env(c.env.as_deref().unwrap_or_default(), &marker, &[]);
            c.env = Some(env);
            c
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn var(name: &str, value: &str) -> EnvVar {
        EnvVar { name: name.into(), value: Some(value.into()), value_from: None }
    }

    #[test]
    fn replaces_in_place_and_appends_new() {
        let existing = vec![var("A", "1"), var("B", "2"), var("C", "3")];
        let out = update_env(&existing, &[var("B", "20"), var("D", "4")], &["C".to_string()]);
        let got: Vec<(&str, &str)> = out.iter().map(|e| (e.name.as_str(), e.value.as_deref().unwrap())).collect();
        assert_eq!(got, vec![("A", "1"), ("B", "20"), ("D", "4")]);
    }

    #[test]
    fn duplicate_existing_names_collapse() {
        let existing = vec![var("A", "1"), var("A", "2")];
        let out = update_env(&existing, &[var("A", "9")], &[]);
        assert_eq!(out, vec![var("A", "9")]);
    }

    #[test]
    fn removed_then_upserted_moves_to_the_end() {
        let out = update_env(&[var("A", "1"), var("B", "1")], &[var("A", "2")], &["A".to_string()]);
        assert_eq!(out, vec![var("B", "1"), var("A", "2")]);
    }

    #[test]
    fn repeated_update_is_stable() {
        let existing = vec![var("A", "1"), var("B", "2"), var("C", "3"), var("D", "4")];
        let upserts = vec![var("B", "20"), var("C", "30"), var("E", "5")];
        let remove = vec!["C".to_string(), "D".to_string(), "X".to_string()];
        let once = update_env(&existing, &upserts, &remove);
        assert_eq!(once, vec![var("A", "1"), var("B", "20"), var("C", "30"), var("E", "5")]);
        assert_eq!(update_env(&once, &upserts, &remove), once);
    }

    #[test]
    fn restart_marker_is_idempotent_for_same_instant() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let cs = vec![Container { name: "app".into(), env: Some(vec![var("LOG", "debug")]), ..Default::default() }];
        let once = inject_restart_marker(&cs, now);
        let twice = inject_restart_marker(&once, now);
        assert_eq!(once, twice);
        let env = once[0].env.as_ref().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env[1], var("RESTARTED_AT", "2024-05-01T12:00:00Z"));
    }
}
