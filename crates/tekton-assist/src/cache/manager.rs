//! Owns the three mirrors and the readiness barrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::mirror::Mirror;
use super::source::ListWatch;
use crate::config::CacheConfig;
use crate::crds::{PipelineRun, TaskRun, TASK_RUN_LABEL};
use crate::error::{Error, Result};

/// TaskRun, PipelineRun and Pod mirrors behind a single start barrier.
pub struct CacheManager {
    pub(crate) task_runs: Arc<Mirror<TaskRun>>,
    pub(crate) pipeline_runs: Arc<Mirror<PipelineRun>>,
    pub(crate) pods: Arc<Mirror<Pod>>,
    started: AtomicBool,
    /// Set when a mirror task ends before cancellation
    mirror_lost: Arc<AtomicBool>,
}

impl CacheManager {
    /// Builds mirrors over the cluster, scoped to `config.namespace` when set.
    pub fn new(client: Client, config: &CacheConfig) -> Self {
        let (task_runs, pipeline_runs, pods): (Api<TaskRun>, Api<PipelineRun>, Api<Pod>) =
            match config.namespace.as_deref().filter(|ns| !ns.is_empty()) {
                Some(ns) => (
                    Api::namespaced(client.clone(), ns),
                    Api::namespaced(client.clone(), ns),
                    Api::namespaced(client, ns),
                ),
                None => (
                    Api::all(client.clone()),
                    Api::all(client.clone()),
                    Api::all(client),
                ),
            };
        Self::from_sources(
            Arc::new(task_runs),
            Arc::new(pipeline_runs),
            Arc::new(pods),
            config.resync(),
        )
    }

    /// Builds mirrors over arbitrary list/watch sources.
    ///
    /// Pods are always constrained server-side to those carrying the TaskRun label.
    pub fn from_sources(
        task_runs: Arc<dyn ListWatch<TaskRun>>,
        pipeline_runs: Arc<dyn ListWatch<PipelineRun>>,
        pods: Arc<dyn ListWatch<Pod>>,
        resync: Duration,
    ) -> Self {
        Self::from_mirrors(
            Mirror::new(task_runs, None, resync),
            Mirror::new(pipeline_runs, None, resync),
            Mirror::new(pods, Some(TASK_RUN_LABEL.to_string()), resync),
        )
    }

    pub fn from_mirrors(
        task_runs: Mirror<TaskRun>,
        pipeline_runs: Mirror<PipelineRun>,
        pods: Mirror<Pod>,
    ) -> Self {
        Self {
            task_runs: Arc::new(task_runs),
            pipeline_runs: Arc::new(pipeline_runs),
            pods: Arc::new(pods),
            started: AtomicBool::new(false),
            mirror_lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the mirrors and waits until every one has synced.
    ///
    /// Fails with `SyncTimeout` if `cancel` fires first. The mirrors keep
    /// running until `cancel` fires; calling `start` again only re-waits.
    #[instrument(skip_all)]
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.supervise(
                self.task_runs.kind(),
                tokio::spawn(run_mirror(self.task_runs.clone(), cancel.clone())),
                cancel,
            );
            self.supervise(
                self.pipeline_runs.kind(),
                tokio::spawn(run_mirror(self.pipeline_runs.clone(), cancel.clone())),
                cancel,
            );
            self.supervise(
                self.pods.kind(),
                tokio::spawn(run_mirror(self.pods.clone(), cancel.clone())),
                cancel,
            );
        }

        tokio::select! {
            () = cancel.cancelled() => Err(Error::SyncTimeout {
                pending: self.pending().join(", "),
            }),
            () = self.wait_synced() => {
                info!(
                    task_runs = self.task_runs.len(),
                    pipeline_runs = self.pipeline_runs.len(),
                    pods = self.pods.len(),
                    "Cache synced"
                );
                Ok(())
            }
        }
    }

    /// True once every mirror has synced, and false again if any mirror
    /// task has died since.
    pub fn has_synced(&self) -> bool {
        !self.mirror_lost.load(Ordering::SeqCst) && self.pending().is_empty()
    }

    /// Watches a mirror task and flags the cache as lost if it ends early.
    fn supervise(&self, kind: String, task: JoinHandle<()>, cancel: &CancellationToken) {
        let lost = self.mirror_lost.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match task.await {
                Ok(()) if cancel.is_cancelled() => {}
                Ok(()) => {
                    lost.store(true, Ordering::SeqCst);
                    error!(kind = %kind, "Mirror task exited before cancellation");
                }
                Err(e) => {
                    lost.store(true, Ordering::SeqCst);
                    error!(kind = %kind, error = %e, "Mirror task failed");
                }
            }
        });
    }

    async fn wait_synced(&self) {
        tokio::join!(
            self.task_runs.wait_synced(),
            self.pipeline_runs.wait_synced(),
            self.pods.wait_synced(),
        );
    }

    /// Kinds whose mirror has not finished its first listing
    fn pending(&self) -> Vec<String> {
        [
            (self.task_runs.has_synced(), self.task_runs.kind()),
            (self.pipeline_runs.has_synced(), self.pipeline_runs.kind()),
            (self.pods.has_synced(), self.pods.kind()),
        ]
        .into_iter()
        .filter(|(synced, _)| !synced)
        .map(|(_, kind)| kind)
        .collect()
    }
}

async fn run_mirror<K>(mirror: Arc<Mirror<K>>, cancel: CancellationToken)
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    mirror.run(cancel).await;
}
