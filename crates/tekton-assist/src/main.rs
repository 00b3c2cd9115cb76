//! tekton-assist CLI
//!
//! Diagnoses failed TaskRuns and PipelineRuns and prints the failure record
//! as JSON, either from direct API reads or from a locally synced cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tekton_assist::cache::{CacheManager, CacheService, Selector};
use tekton_assist::crds::{succeeded_condition, ConditionStatus, PipelineRun};
use tekton_assist::inspect::{ClusterSource, Inspector, RunSource};
use tekton_assist::AssistConfig;

/// Tekton failure diagnosis
#[derive(Parser)]
#[command(name = "tekton-assist")]
#[command(about = "Extracts structured failure signals from Tekton TaskRuns and PipelineRuns")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML configuration file
    #[arg(
        long,
        env = "TEKTON_ASSIST_CONFIG",
        default_value = "/config/config.yaml",
        global = true
    )]
    config: String,

    /// Namespace to mirror, overriding cache.namespace
    #[arg(long, env = "TEKTON_ASSIST_NAMESPACE", global = true)]
    watch_namespace: Option<String>,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Diagnose a single TaskRun
    Taskrun {
        namespace: String,
        name: String,

        /// Read through the synced cache instead of direct API calls
        #[arg(long)]
        cached: bool,
    },
    /// Diagnose a PipelineRun and its failed TaskRuns
    Pipelinerun {
        namespace: String,
        name: String,

        /// Read through the synced cache instead of direct API calls
        #[arg(long)]
        cached: bool,
    },
    /// Keep the cache synced and report every newly failed PipelineRun
    Watch {
        /// Seconds between scans of the cache
        #[arg(long, default_value_t = 30)]
        report_interval: u64,

        /// Only report PipelineRuns matching this label selector (`k=v,k2=v2`)
        #[arg(long)]
        selector: Option<Selector>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = AssistConfig::load(&cli.config).context("Failed to load configuration")?;
    if let Some(ns) = cli.watch_namespace {
        config.cache.namespace = Some(ns);
    }
    config.validate().context("Invalid configuration")?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let result = match cli.command {
        Commands::Taskrun {
            namespace,
            name,
            cached,
        } => {
            let inspector = build_inspector(&client, &config, cached, &cancel).await?;
            let info = inspector
                .inspect_task_run(&namespace, &name, &cancel)
                .await
                .context("TaskRun inspection interrupted")?;
            print_json(&info)
        }
        Commands::Pipelinerun {
            namespace,
            name,
            cached,
        } => {
            let inspector = build_inspector(&client, &config, cached, &cancel).await?;
            let info = inspector
                .inspect_pipeline_run(&namespace, &name, &cancel)
                .await
                .with_context(|| format!("Failed to inspect PipelineRun {namespace}/{name}"))?;
            print_json(&info)
        }
        Commands::Watch {
            report_interval,
            selector,
        } => {
            let selector = selector.unwrap_or_default();
            let interval = Duration::from_secs(report_interval);
            watch(&client, &config, interval, &selector, &cancel).await
        }
    };

    cancel.cancel();
    result
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
        }
        cancel.cancel();
    });
}

/// Starts the cache and waits for its initial sync, bounded by the configured timeout.
async fn start_cache(
    client: &Client,
    config: &AssistConfig,
    cancel: &CancellationToken,
) -> Result<CacheService> {
    let service = CacheService::new(CacheManager::new(client.clone(), &config.cache));
    match tokio::time::timeout(config.cache.sync_timeout(), service.start(cancel)).await {
        Ok(started) => started.context("Cache failed to sync")?,
        Err(_) => {
            cancel.cancel();
            anyhow::bail!(
                "Cache did not sync within {}s",
                config.cache.sync_timeout_seconds
            );
        }
    }
    Ok(service)
}

async fn build_inspector(
    client: &Client,
    config: &AssistConfig,
    cached: bool,
    cancel: &CancellationToken,
) -> Result<Inspector> {
    let cluster = Arc::new(ClusterSource::new(client.clone()));
    let runs: Arc<dyn RunSource> = if cached {
        Arc::new(start_cache(client, config, cancel).await?)
    } else {
        cluster.clone()
    };
    Ok(Inspector::new(runs, &config.inspect).with_logs(cluster))
}

async fn watch(
    client: &Client,
    config: &AssistConfig,
    interval: Duration,
    selector: &Selector,
    cancel: &CancellationToken,
) -> Result<()> {
    let service = start_cache(client, config, cancel).await?;
    let inspector = Inspector::new(Arc::new(service.clone()), &config.inspect)
        .with_logs(Arc::new(ClusterSource::new(client.clone())));
    let namespace = config.cache.namespace.clone().unwrap_or_default();
    let mut reported = ReportedRuns::default();
    let mut ticker = tokio::time::interval(interval);
    info!(selector = %selector, "Watching for failed PipelineRuns");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let pipeline_runs = service.list_pipeline_runs(&namespace, selector);
        reported.retain_listed(pipeline_runs.iter().map(|pr| run_key(pr)).collect());

        for pr in pipeline_runs {
            let failed = succeeded_condition(pr.conditions())
                .is_some_and(|c| c.status == ConditionStatus::False);
            let key = run_key(&pr);
            if !failed || reported.contains(&key) {
                continue;
            }

            let ns = pr.namespace().unwrap_or_default();
            match inspector.inspect_pipeline_run(&ns, &pr.name_any(), cancel).await {
                Ok(info) => {
                    print_json(&info)?;
                    reported.insert(key);
                }
                Err(tekton_assist::Error::Cancelled) => return Ok(()),
                Err(e) => warn!(error = %e, pipelinerun = %pr.name_any(), "Inspection failed"),
            }
        }
    }
    Ok(())
}

/// UID of a run, or namespace/name when the server has not assigned one
fn run_key(pr: &PipelineRun) -> String {
    pr.uid()
        .unwrap_or_else(|| format!("{}/{}", pr.namespace().unwrap_or_default(), pr.name_any()))
}

/// Keys of failed PipelineRuns already printed by `watch`.
///
/// Only keys still present in the cache are kept, so deleted runs are forgotten.
#[derive(Default)]
struct ReportedRuns {
    keys: HashSet<String>,
}

impl ReportedRuns {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String) {
        self.keys.insert(key);
    }

    fn retain_listed(&mut self, listed: HashSet<String>) {
        self.keys.retain(|key| listed.contains(key));
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{out}");
    Ok(())
}
