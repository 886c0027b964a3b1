use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kroll_core::{ContainerPattern, WorkloadKind};
use kroll_ops::{KubeOps, ResourceUpdate, RolloutOps, StatusEvent, StatusOptions};
use kroll_workload::parse_resource_list;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "krollctl", version, about = "Rollout status, resources and restarts for Kubernetes workloads")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the kinds kroll knows and what it can do with each
    Kinds,
    /// Show rollout status of a workload
    Status {
        /// GVK key, e.g. "apps/v1/Deployment" or "apps.kruise.io/v1alpha1/CloneSet"
        gvk: String,
        name: String,
        /// Pin the expected Deployment revision
        #[arg(long = "revision")]
        revision: Option<i64>,
        /// Keep watching until the rollout is done
        #[arg(short = 'w', long = "watch", action = ArgAction::SetTrue)]
        watch: bool,
        /// Give up watching after this many seconds
        #[arg(long = "timeout")]
        timeout: Option<u64>,
    },
    /// Merge resource limits/requests into containers of a workload
    SetResources {
        gvk: String,
        name: String,
        /// Container name, or "*" for all (repeatable; default "*")
        #[arg(short = 'c', long = "containers")]
        containers: Vec<String>,
        /// e.g. "cpu=200m,memory=512Mi"
        #[arg(long = "limits", default_value = "")]
        limits: String,
        #[arg(long = "requests", default_value = "")]
        requests: String,
    },
    /// Restart the pods of a workload
    Restart {
        gvk: String,
        name: String,
    },
    /// Print the pod kroll would pick for logs/exec, waiting for one to appear
    FirstPod {
        gvk: String,
        name: String,
        /// Seconds to wait when no pod exists yet
        #[arg(long = "timeout", default_value_t = 60)]
        timeout: u64,
    },
}

fn init_tracing() {
    let env = std::env::var("KROLL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KROLL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KROLL_METRICS_ADDR; expected host:port");
        }
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; cancelling");
            token.cancel();
        }
    });
}

#[derive(serde::Serialize)]
struct KindRow {
    group: &'static str,
    kind: &'static str,
    status: Option<&'static str>,
    containers: Option<String>,
    selector: Option<String>,
}

fn kind_rows() -> Vec<KindRow> {
    WorkloadKind::registered()
        .map(|(group, kind, wk)| KindRow {
            group,
            kind,
            status: wk.status_policy().map(|p| p.label()),
            containers: wk.pod_spec_path().map(|p| p.pointer()),
            selector: wk.selector_source().map(|s| format!("{s:?}")),
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_deref();
    let ops = KubeOps::new();

    match cli.command {
        Commands::Kinds => {
            let rows = kind_rows();
            match cli.output {
                Output::Human => {
                    println!("{:<16} {:<22} {:<22} {:<36} SELECTOR", "GROUP", "KIND", "STATUS", "CONTAINERS");
                    for r in rows {
                        let group = if r.group.is_empty() { "core" } else { r.group };
                        println!(
                            "{:<16} {:<22} {:<22} {:<36} {}",
                            group,
                            r.kind,
                            r.status.unwrap_or("-"),
                            r.containers.as_deref().unwrap_or("-"),
                            r.selector.as_deref().unwrap_or("-")
                        );
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Commands::Status { gvk, name, revision, watch, timeout } => {
            info!(gvk = %gvk, ns = ?ns, name = %name, watch, "status invoked");
            let opts = StatusOptions { revision, watch, timeout: timeout.map(Duration::from_secs) };
            let mut handle = ops.rollout_status(&gvk, ns, &name, opts).await?;
            cancel_on_ctrl_c(handle.cancel.token());
            let mut failed = None;
            while let Some(ev) = handle.rx.recv().await {
                match cli.output {
                    Output::Human => match &ev {
                        StatusEvent::Progress(p) => println!("{}", p.message),
                        StatusEvent::Failed { message } => eprintln!("error: {message}"),
                    },
                    Output::Json => println!("{}", serde_json::to_string(&ev)?),
                }
                if let StatusEvent::Failed { message } = ev {
                    failed = Some(message);
                }
            }
            if let Some(message) = failed {
                bail!(message);
            }
        }
        Commands::SetResources { gvk, name, containers, limits, requests } => {
            info!(gvk = %gvk, ns = ?ns, name = %name, "set-resources invoked");
            let update = ResourceUpdate {
                containers: containers.iter().map(|c| ContainerPattern::parse(c)).collect(),
                limits: parse_resource_list(&limits)?,
                requests: parse_resource_list(&requests)?,
            };
            if update.limits.is_empty() && update.requests.is_empty() {
                bail!("at least one of --limits or --requests is required");
            }
            let updated = ops.set_resources(&gvk, ns, &name, &update).await?;
            match cli.output {
                Output::Human => println!("{} {:?} resource requirements updated ({})", gvk, name, updated.join(", ")),
                Output::Json => println!("{}", serde_json::json!({ "name": name, "containers": updated })),
            }
        }
        Commands::Restart { gvk, name } => {
            info!(gvk = %gvk, ns = ?ns, name = %name, "restart invoked");
            ops.restart(&gvk, ns, &name).await?;
            match cli.output {
                Output::Human => println!("{} {:?} restarted", gvk, name),
                Output::Json => println!("{}", serde_json::json!({ "name": name, "restarted": true })),
            }
        }
        Commands::FirstPod { gvk, name, timeout } => {
            info!(gvk = %gvk, ns = ?ns, name = %name, timeout, "first-pod invoked");
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let timeout = (timeout > 0).then(|| Duration::from_secs(timeout));
            let (pod, count) = ops.first_pod(&gvk, ns, &name, timeout, &cancel).await?;
            if count > 1 {
                warn!(count, "several pods match; picked one");
            }
            match cli.output {
                Output::Human => {
                    let meta = &pod.metadata;
                    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("-");
                    let age = render_age(meta.creation_timestamp.as_ref().map(|t| t.0));
                    println!("NAMESPACE   NAME                                PHASE     AGE   MATCHED");
                    println!(
                        "{:<11} {:<35} {:<9} {:<5} {}",
                        meta.namespace.as_deref().unwrap_or("-"),
                        meta.name.as_deref().unwrap_or("-"),
                        phase,
                        age,
                        count
                    );
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "pod": pod, "matched": count }))?),
            }
        }
    }

    Ok(())
}

fn render_age(created: Option<DateTime<Utc>>) -> String {
    let Some(created) = created else { return "-".to_string() };
    let age = (Utc::now() - created).max(chrono::Duration::zero());
    let (days, hours, mins) = (age.num_days(), age.num_hours() % 24, age.num_minutes() % 60);
    if days > 0 {
        format!("{days}d{hours}h")
    } else if hours > 0 {
        format!("{hours}h{mins}m")
    } else if mins > 0 {
        format!("{mins}m")
    } else {
        format!("{}s", age.num_seconds())
    }
}
