//! Kroll kubehub: shared client, discovery and the kube-backed pod source.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams, WatchEvent, WatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{self, Scope},
    Client,
};
use kroll_core::{RolloutError, Selector, WorkloadIdentity};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Client built from the default kubeconfig / in-cluster config, created once per process.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async { Client::try_default().await.context("building kube client") })
        .await?;
    Ok(client.clone())
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let id = WorkloadIdentity::parse(key).ok_or_else(|| anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key))?;
    Ok(GroupVersionKind { group: id.group, version: id.version, kind: id.kind })
}

/// Resolve a GVK to its served resource and whether it is namespaced.
pub async fn find_api_resource(client: &Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let (ar, caps) = discovery::pinned_kind(client, gvk)
        .await
        .with_context(|| format!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))?;
    Ok((ar, matches!(caps.scope, Scope::Namespaced)))
}

/// Dynamic API handle for a `group/version/Kind` key.
pub async fn dynamic_api(client: &Client, gvk_key: &str, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
    let gvk = parse_gvk_key(gvk_key)?;
    let (ar, namespaced) = find_api_resource(client, &gvk).await?;
    let api = if namespaced {
        match namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
            None => Api::default_namespaced_with(client.clone(), &ar),
        }
    } else {
        Api::all_with(client.clone(), &ar)
    };
    debug!(gvk = %gvk_key, ns = ?namespace, namespaced, "dynamic api ready");
    Ok(api)
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

/// Fetch one object as untyped JSON with type meta filled in.
pub async fn fetch_object(api: &Api<DynamicObject>, name: &str) -> Result<serde_json::Value> {
    let obj = api.get(name).await.with_context(|| format!("getting {name}"))?;
    let mut raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

/// One page of pods plus the resource version to watch from.
#[derive(Debug, Clone, Default)]
pub struct PodList {
    pub items: Vec<Pod>,
    pub resource_version: String,
}

/// Pod change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PodEvent {
    Added(Pod),
    Modified(Pod),
    Deleted(Pod),
    Bookmark,
    Error(String),
}

pub type PodStream = BoxStream<'static, Result<PodEvent, RolloutError>>;

/// Source of pods for one namespace and selector. Implemented over the API server by
/// [`KubePods`] and by in-memory fakes in tests.
#[async_trait::async_trait]
pub trait PodSource: Send + Sync {
    async fn list(&self, namespace: &str, selector: &Selector) -> Result<PodList, RolloutError>;

    /// Change feed starting after `resource_version`. Dropping the stream closes the watch.
    async fn watch(&self, namespace: &str, selector: &Selector, resource_version: &str) -> Result<PodStream, RolloutError>;
}

pub struct KubePods {
    client: Client,
}

impl KubePods {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn pod_event(ev: WatchEvent<Pod>) -> PodEvent {
    match ev {
        WatchEvent::Added(p) => PodEvent::Added(p),
        WatchEvent::Modified(p) => PodEvent::Modified(p),
        WatchEvent::Deleted(p) => PodEvent::Deleted(p),
        WatchEvent::Bookmark(_) => PodEvent::Bookmark,
        WatchEvent::Error(e) => PodEvent::Error(format!("{} ({}): {}", e.reason, e.code, e.message)),
    }
}

#[async_trait::async_trait]
impl PodSource for KubePods {
    async fn list(&self, namespace: &str, selector: &Selector) -> Result<PodList, RolloutError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let sel = selector.to_string();
        let list = api.list(&ListParams::default().labels(&sel)).await.map_err(RolloutError::query)?;
        debug!(ns = %namespace, selector = %sel, count = list.items.len(), "pods listed");
        Ok(PodList { resource_version: list.metadata.resource_version.unwrap_or_default(), items: list.items })
    }

    async fn watch(&self, namespace: &str, selector: &Selector, resource_version: &str) -> Result<PodStream, RolloutError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let sel = selector.to_string();
        let stream = api
            .watch(&WatchParams::default().labels(&sel), resource_version)
            .await
            .map_err(RolloutError::query)?;
        info!(ns = %namespace, selector = %sel, rv = %resource_version, "pod watch started");
        Ok(stream.map_ok(pod_event).map_err(RolloutError::query).boxed())
    }
}
