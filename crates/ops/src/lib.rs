//! Kroll ops: imperative rollout operations against a live cluster.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, Patch, PatchParams},
    core::DynamicObject,
    runtime::{watcher, WatchStreamExt},
    Client,
};
use kroll_core::kinds::policy_for;
use kroll_core::{ContainerPattern, Progress, RolloutError, StatusPolicy, WorkloadIdentity, WorkloadKind};
use kroll_kubehub::{dynamic_api, fetch_object, get_kube_client, KubePods};
use kroll_workload::{
    containers_of, containers_patch, inject_restart_marker, merge_resources, progress_deadline_exceeded,
    select_containers, selector_for, snapshot_for, ResourceList,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod locate;

pub use locate::{by_logging, first_pod, newest_first};

const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Cancellation handle for an in-flight operation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Result of starting a streaming operation.
pub struct StreamHandle<T> {
    pub rx: mpsc::Receiver<T>,
    pub cancel: CancelHandle,
}

/// One step of a rollout status stream. The stream ends after a done progress or a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Progress(Progress),
    Failed { message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusOptions {
    /// Expected Deployment revision; `None` or 0 skips the check.
    pub revision: Option<i64>,
    /// Keep watching until done instead of reporting once.
    pub watch: bool,
    /// Overall bound for the watch.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub containers: Vec<ContainerPattern>,
    pub limits: ResourceList,
    pub requests: ResourceList,
}

/// Imperative rollout operations.
#[async_trait::async_trait]
pub trait RolloutOps: Send + Sync {
    /// Stream rollout progress for one workload.
    async fn rollout_status(&self, gvk_key: &str, namespace: Option<&str>, name: &str, opts: StatusOptions) -> Result<StreamHandle<StatusEvent>>;
    /// Merge limits/requests into matching containers; returns the names updated.
    async fn set_resources(&self, gvk_key: &str, namespace: Option<&str>, name: &str, update: &ResourceUpdate) -> Result<Vec<String>>;
    async fn restart(&self, gvk_key: &str, namespace: Option<&str>, name: &str) -> Result<()>;
    /// Best pod selected by a workload or Service, waiting up to `timeout` when none exists yet.
    async fn first_pod(&self, gvk_key: &str, namespace: Option<&str>, name: &str, timeout: Option<Duration>, cancel: &CancellationToken) -> Result<(Pod, usize)>;
}

/// Default implementation using kube-rs client APIs.
pub struct KubeOps {
    field_manager: String,
}

impl Default for KubeOps {
    fn default() -> Self {
        Self::new()
    }
}

impl KubeOps {
    pub fn new() -> Self {
        let field_manager = std::env::var("KROLL_FIELD_MANAGER").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| "kroll".to_string());
        Self { field_manager }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams { field_manager: Some(self.field_manager.clone()), ..Default::default() }
    }

    async fn target(&self, gvk_key: &str, namespace: Option<&str>) -> Result<(Client, Api<DynamicObject>, WorkloadIdentity)> {
        let id = WorkloadIdentity::parse(gvk_key).ok_or_else(|| anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", gvk_key))?;
        let client = get_kube_client().await?;
        let api = dynamic_api(&client, gvk_key, namespace).await?;
        Ok((client, api, id))
    }
}

fn queue_cap() -> usize {
    std::env::var("KROLL_OPS_QUEUE_CAP").ok().and_then(|s| s.parse().ok()).filter(|n| *n > 0).unwrap_or(64)
}

/// Evaluate one observation of the object. Terminal failures come back as their message.
///
/// The progress deadline only counts once the controller has observed the current spec.
fn observe(policy: StatusPolicy, id: &WorkloadIdentity, raw: &serde_json::Value, revision: Option<i64>) -> Result<Progress, String> {
    metrics::counter!("rollout_status_evaluations", 1u64, "policy" => policy.label());
    let progress = kroll_rollout::status(id, raw, revision).map_err(|e| e.to_string())?;
    if policy == StatusPolicy::Deployment && deadline_exceeded(policy, raw).map_err(|e| e.to_string())? {
        let name = kroll_workload::name_of(raw);
        return Err(format!("deployment {name:?} exceeded its progress deadline"));
    }
    Ok(progress)
}

fn deadline_exceeded(policy: StatusPolicy, raw: &serde_json::Value) -> Result<bool, RolloutError> {
    Ok(!snapshot_for(policy, raw)?.is_stale() && progress_deadline_exceeded(raw)?)
}

#[async_trait::async_trait]
impl RolloutOps for KubeOps {
    async fn rollout_status(&self, gvk_key: &str, namespace: Option<&str>, name: &str, opts: StatusOptions) -> Result<StreamHandle<StatusEvent>> {
        let (_client, api, id) = self.target(gvk_key, namespace).await?;
        let policy = policy_for(&id)?;

        let (tx, rx) = mpsc::channel::<StatusEvent>(queue_cap());
        let token = CancellationToken::new();
        let cancel = CancelHandle { token: token.clone() };
        let name = name.to_string();
        let gvk = gvk_key.to_string();

        tokio::spawn(async move {
            let run = async {
                if !opts.watch {
                    let ev = match fetch_object(&api, &name).await {
                        Ok(raw) => match observe(policy, &id, &raw, opts.revision) {
                            Ok(p) => StatusEvent::Progress(p),
                            Err(message) => StatusEvent::Failed { message },
                        },
                        Err(e) => StatusEvent::Failed { message: format!("{e:#}") },
                    };
                    let _ = tx.send(ev).await;
                    return;
                }
                let cfg = watcher::Config::default().fields(&format!("metadata.name={name}"));
                let stream = watcher::watcher(api, cfg).applied_objects();
                futures::pin_mut!(stream);
                info!(gvk = %gvk, name = %name, "rollout status watch started");
                loop {
                    tokio::select! {
                        _ = token.cancelled() => { debug!(name = %name, "rollout status cancelled"); return; }
                        next = stream.next() => {
                            let ev = match next {
                                Some(Ok(obj)) => match serde_json::to_value(&obj) {
                                    Ok(raw) => match observe(policy, &id, &raw, opts.revision) {
                                        Ok(p) => StatusEvent::Progress(p),
                                        Err(message) => StatusEvent::Failed { message },
                                    },
                                    Err(e) => StatusEvent::Failed { message: e.to_string() },
                                },
                                Some(Err(e)) => { warn!(error = %e, "rollout status watch error"); continue; }
                                None => StatusEvent::Failed { message: "watch ended before the rollout finished".into() },
                            };
                            let terminal = !matches!(ev, StatusEvent::Progress(Progress { done: false, .. }));
                            if tx.send(ev).await.is_err() || terminal {
                                return;
                            }
                        }
                    }
                }
            };
            let finished = match opts.timeout {
                Some(t) => tokio::time::timeout(t, run).await.is_ok(),
                None => {
                    run.await;
                    true
                }
            };
            if !finished {
                metrics::counter!("rollout_status_err", 1u64, "reason" => "timeout");
                let _ = tx.send(StatusEvent::Failed { message: format!("timed out waiting for the rollout of {name:?} to finish") }).await;
            }
        });

        Ok(StreamHandle { rx, cancel })
    }

    async fn set_resources(&self, gvk_key: &str, namespace: Option<&str>, name: &str, update: &ResourceUpdate) -> Result<Vec<String>> {
        let (_client, api, id) = self.target(gvk_key, namespace).await?;
        let raw = fetch_object(&api, name).await?;
        let containers = containers_of(&id, &raw)?;
        let patterns = if update.containers.is_empty() { vec![ContainerPattern::Any] } else { update.containers.clone() };
        let selected = select_containers(&containers, &patterns);
        if selected.is_empty() {
            let wanted: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
            return Err(anyhow!("unable to find container named {}", wanted.join(",")));
        }
        let merged = merge_resources(&containers, &patterns, &update.limits, &update.requests);
        if merged == containers {
            info!(gvk = %gvk_key, name = %name, "resources unchanged");
            return Ok(selected);
        }
        let patch = containers_patch(&id, &merged)?;
        api.patch(name, &self.patch_params(), &Patch::Merge(&patch)).await.with_context(|| format!("patching {gvk_key} {name}"))?;
        metrics::counter!("set_resources_ok", 1u64);
        info!(gvk = %gvk_key, name = %name, containers = ?selected, "resources updated");
        Ok(selected)
    }

    async fn restart(&self, gvk_key: &str, namespace: Option<&str>, name: &str) -> Result<()> {
        let (_client, api, id) = self.target(gvk_key, namespace).await?;
        let kind = WorkloadKind::resolve(&id)
            .filter(|k| k.status_policy().is_some())
            .ok_or_else(|| RolloutError::NotImplemented { capability: "restarter", group_kind: id.group_kind() })?;
        let now = chrono::Utc::now();
        let patch = if kind.restarts_in_place() {
            let raw = fetch_object(&api, name).await?;
            let containers = inject_restart_marker(&containers_of(&id, &raw)?, now);
            containers_patch(&id, &containers)?
        } else {
            serde_json::json!({
                "spec": {"template": {"metadata": {"annotations": {RESTARTED_AT_ANNOTATION: now.to_rfc3339()}}}}
            })
        };
        api.patch(name, &self.patch_params(), &Patch::Merge(&patch)).await.with_context(|| format!("restarting {gvk_key} {name}"))?;
        metrics::counter!("restart_ok", 1u64, "kind" => id.kind.clone());
        info!(gvk = %gvk_key, name = %name, in_place = kind.restarts_in_place(), "restart requested");
        Ok(())
    }

    async fn first_pod(&self, gvk_key: &str, namespace: Option<&str>, name: &str, timeout: Option<Duration>, cancel: &CancellationToken) -> Result<(Pod, usize)> {
        let (client, api, id) = self.target(gvk_key, namespace).await?;
        let raw = fetch_object(&api, name).await?;
        let (obj_ns, selector) = selector_for(&id, &raw)?;
        let ns = obj_ns.or_else(|| namespace.map(str::to_string)).unwrap_or_else(|| client.default_namespace().to_string());
        let started = Instant::now();
        let found = locate::first_pod(&KubePods::new(client), &ns, &selector, timeout, cancel, by_logging).await;
        metrics::histogram!("first_pod_wait_ms", started.elapsed().as_secs_f64() * 1000.0);
        let (pod, count) = found?;
        debug!(ns = %ns, selector = %selector, pod = ?pod.metadata.name, count, "first pod located");
        Ok((pod, count))
    }
}
