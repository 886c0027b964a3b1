//! First-matching-pod lookup: list, then a bounded and cancellable watch.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kroll_core::{RolloutError, Selector};
use kroll_kubehub::{PodEvent, PodSource};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Return the best pod matching `selector` and how many pods matched.
///
/// When pods already exist they are ranked with `order` and no watch is opened. Otherwise
/// the first pod added or modified after the list is returned with a count of 1. The watch
/// stream is dropped on every return path.
pub async fn first_pod<S, F>(
    source: &S,
    namespace: &str,
    selector: &Selector,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    order: F,
) -> Result<(Pod, usize), RolloutError>
where
    S: PodSource + ?Sized,
    F: Fn(&Pod, &Pod) -> Ordering,
{
    let list = source.list(namespace, selector).await?;
    let total = list.items.len();
    let mut pods = list.items;
    pods.sort_by(&order);
    if let Some(top) = pods.into_iter().next() {
        return Ok((top, total));
    }

    let sel = selector.to_string();
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut watch = source.watch(namespace, selector, &list.resource_version).await?;
    debug!(ns = %namespace, selector = %sel, rv = %list.resource_version, "no pods yet; watching");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RolloutError::Cancelled { namespace: namespace.to_string(), selector: sel });
            }
            _ = expired(deadline) => {
                return Err(RolloutError::Timeout {
                    namespace: namespace.to_string(),
                    selector: sel,
                    timeout: timeout.unwrap_or_default(),
                });
            }
            ev = watch.next() => match ev {
                Some(Ok(PodEvent::Added(pod) | PodEvent::Modified(pod))) => return Ok((pod, 1)),
                Some(Ok(PodEvent::Deleted(_) | PodEvent::Bookmark)) => continue,
                Some(Ok(PodEvent::Error(reason))) => return Err(RolloutError::Watch { selector: sel, reason }),
                Some(Err(e)) => return Err(e),
                None => return Err(RolloutError::Watch { selector: sel, reason: "watch closed".into() }),
            },
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

fn node_assigned(p: &Pod) -> bool {
    p.spec.as_ref().and_then(|s| s.node_name.as_deref()).map_or(false, |n| !n.is_empty())
}

fn phase_rank(p: &Pod) -> u8 {
    match p.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Running") => 0,
        Some("Unknown") => 1,
        _ => 2,
    }
}

/// `Some(since)` when the pod's Ready condition is True.
fn ready_since(p: &Pod) -> Option<Option<DateTime<Utc>>> {
    let cond = p.status.as_ref()?.conditions.as_ref()?.iter().find(|c| c.type_ == "Ready")?;
    (cond.status == "True").then(|| cond.last_transition_time.as_ref().map(|t| t.0))
}

fn max_restarts(p: &Pod) -> i32 {
    p.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|cs| cs.iter().map(|c| c.restart_count).max())
        .unwrap_or(0)
}

fn created(p: &Pod) -> Option<DateTime<Utc>> {
    p.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

/// Earlier timestamps first; missing timestamps last.
fn earliest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ranking for picking a pod to read logs from: scheduled, Running before Unknown before
/// Pending, ready, ready for longest, most restarts, oldest.
pub fn by_logging(a: &Pod, b: &Pod) -> Ordering {
    node_assigned(b)
        .cmp(&node_assigned(a))
        .then_with(|| phase_rank(a).cmp(&phase_rank(b)))
        .then_with(|| {
            let (ra, rb) = (ready_since(a), ready_since(b));
            rb.is_some().cmp(&ra.is_some()).then_with(|| earliest_first(ra.flatten(), rb.flatten()))
        })
        .then_with(|| max_restarts(b).cmp(&max_restarts(a)))
        .then_with(|| earliest_first(created(a), created(b)))
}

/// Newest pods first; pods without a creation timestamp last.
pub fn newest_first(a: &Pod, b: &Pod) -> Ordering {
    match (created(a), created(b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::{Arc, Mutex};

    use k8s_openapi::api::core::v1::{ContainerStatus, PodCondition, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use kroll_kubehub::{PodList, PodStream};

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, AtomicOrdering::SeqCst);
        }
    }

    /// In-memory pod source: a fixed list and a scripted watch that stays open afterwards.
    #[derive(Default)]
    struct FakePods {
        listed: Vec<Pod>,
        events: Mutex<Vec<Result<PodEvent, RolloutError>>>,
        end_after_events: bool,
        watches: AtomicUsize,
        closed: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl PodSource for FakePods {
        async fn list(&self, _namespace: &str, _selector: &Selector) -> Result<PodList, RolloutError> {
            Ok(PodList { items: self.listed.clone(), resource_version: "41".into() })
        }

        async fn watch(&self, _namespace: &str, _selector: &Selector, rv: &str) -> Result<PodStream, RolloutError> {
            assert_eq!(rv, "41");
            self.watches.fetch_add(1, AtomicOrdering::SeqCst);
            let events = std::mem::take(&mut *self.events.lock().unwrap());
            let guard = DropFlag(self.closed.clone());
            let end = self.end_after_events;
            Ok(async_stream::stream! {
                let _guard = guard;
                for ev in events {
                    yield ev;
                }
                if !end {
                    std::future::pending::<()>().await;
                }
            }
            .boxed())
        }
    }

    fn pod(name: &str) -> Pod {
        Pod { metadata: ObjectMeta { name: Some(name.into()), ..Default::default() }, ..Default::default() }
    }

    fn at(secs: i64) -> Time {
        Time(DateTime::<Utc>::from_timestamp(secs, 0).unwrap())
    }

    fn running(name: &str, node: &str, ready_at: Option<i64>, restarts: i32, created_at: i64) -> Pod {
        let mut p = pod(name);
        p.metadata.creation_timestamp = Some(at(created_at));
        p.spec = Some(PodSpec { node_name: Some(node.into()), ..Default::default() });
        p.status = Some(PodStatus {
            phase: Some("Running".into()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".into(),
                status: if ready_at.is_some() { "True" } else { "False" }.into(),
                last_transition_time: ready_at.map(at),
                ..Default::default()
            }]),
            container_statuses: Some(vec![ContainerStatus { name: "app".into(), restart_count: restarts, ..Default::default() }]),
            ..Default::default()
        });
        p
    }

    fn name(p: &Pod) -> &str {
        p.metadata.name.as_deref().unwrap_or_default()
    }

    fn sel() -> Selector {
        Selector::from_labels(&[("app".to_string(), "web".to_string())].into()).unwrap()
    }

    #[tokio::test]
    async fn existing_pods_return_without_watching() {
        let src = FakePods { listed: vec![pod("b"), pod("a")], ..Default::default() };
        let cancel = CancellationToken::new();
        let (p, n) = first_pod(&src, "shop", &sel(), Some(Duration::from_millis(10)), &cancel, |a, b| {
            a.metadata.name.cmp(&b.metadata.name)
        })
        .await
        .unwrap();
        assert_eq!(name(&p), "a");
        assert_eq!(n, 2);
        assert_eq!(src.watches.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_added_pod_wins_and_watch_is_closed() {
        let src = FakePods {
            events: Mutex::new(vec![Ok(PodEvent::Bookmark), Ok(PodEvent::Deleted(pod("old"))), Ok(PodEvent::Added(pod("new")))]),
            ..Default::default()
        };
        let (p, n) = first_pod(&src, "shop", &sel(), None, &CancellationToken::new(), by_logging).await.unwrap();
        assert_eq!((name(&p), n), ("new", 1));
        assert!(src.closed.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn times_out_when_nothing_appears() {
        let src = FakePods::default();
        let started = std::time::Instant::now();
        let err = first_pod(&src, "shop", &sel(), Some(Duration::from_millis(50)), &CancellationToken::new(), by_logging)
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Timeout { .. }), "{err}");
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(src.closed.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let src = FakePods::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = first_pod(&src, "shop", &sel(), None, &cancel, newest_first).await.unwrap_err();
        assert!(matches!(err, RolloutError::Cancelled { ref selector, .. } if selector == "app=web"), "{err}");
        assert!(src.closed.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn closed_or_failed_watch_is_an_error() {
        let src = FakePods { end_after_events: true, ..Default::default() };
        let err = first_pod(&src, "shop", &sel(), None, &CancellationToken::new(), by_logging).await.unwrap_err();
        assert!(matches!(err, RolloutError::Watch { .. }), "{err}");

        let src = FakePods { events: Mutex::new(vec![Ok(PodEvent::Error("Expired (410): gone".into()))]), ..Default::default() };
        let err = first_pod(&src, "shop", &sel(), None, &CancellationToken::new(), by_logging).await.unwrap_err();
        assert!(err.to_string().contains("Expired (410)"), "{err}");
    }

    #[test]
    fn logging_order_prefers_ready_long_lived_pods() {
        let mut pending = pod("pending");
        pending.status = Some(PodStatus { phase: Some("Pending".into()), ..Default::default() });
        let mut pods = vec![
            pending,
            running("not-ready", "n1", None, 9, 10),
            running("ready-late", "n1", Some(500), 0, 10),
            running("ready-early", "n2", Some(100), 0, 20),
            running("ready-early-restarts", "n2", Some(100), 3, 30),
        ];
        pods.sort_by(by_logging);
        let names: Vec<&str> = pods.iter().map(name).collect();
        assert_eq!(names, vec!["ready-early-restarts", "ready-early", "ready-late", "not-ready", "pending"]);
    }

    #[test]
    fn newest_first_puts_untimestamped_last() {
        let mut pods = vec![pod("none"), running("old", "n", None, 0, 1), running("new", "n", None, 0, 9)];
        pods.sort_by(newest_first);
        assert_eq!(pods.iter().map(name).collect::<Vec<_>>(), vec!["new", "old", "none"]);
    }
}
