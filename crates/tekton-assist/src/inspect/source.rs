//! Data sources the inspector reads through.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::{Api, Client};
use tracing::debug;

use crate::cache::Selector;
use crate::crds::{PipelineRun, TaskRun};
use crate::error::{Error, Result};

/// Point lookups and label-filtered listings of runs.
///
/// Implemented directly against the API server by [`ClusterSource`] and over
/// the mirrored snapshot by [`crate::cache::CacheService`].
#[async_trait]
pub trait RunSource: Send + Sync {
    async fn get_task_run(&self, namespace: &str, name: &str) -> Result<TaskRun>;

    async fn get_pipeline_run(&self, namespace: &str, name: &str) -> Result<PipelineRun>;

    async fn list_task_runs(&self, namespace: &str, selector: &Selector) -> Result<Vec<TaskRun>>;
}

/// Container log retrieval
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Returns the last `tail_lines` lines of one container's log
    async fn fetch_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<String>;
}

/// Reads runs and logs straight from the cluster
#[derive(Clone)]
pub struct ClusterSource {
    client: Client,
}

impl ClusterSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RunSource for ClusterSource {
    async fn get_task_run(&self, namespace: &str, name: &str) -> Result<TaskRun> {
        let api: Api<TaskRun> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_pipeline_run(&self, namespace: &str, name: &str) -> Result<PipelineRun> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn list_task_runs(&self, namespace: &str, selector: &Selector) -> Result<Vec<TaskRun>> {
        let api: Api<TaskRun> = Api::namespaced(self.client.clone(), namespace);
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector.to_string());
        }
        Ok(api.list(&lp).await?.items)
    }
}

#[async_trait]
impl LogSource for ClusterSource {
    async fn fetch_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };
        debug!(namespace, pod, container, tail_lines, "Fetching container logs");
        pods.logs(pod, &params)
            .await
            .map_err(|e| Error::LogFetchFailed {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
                source: Box::new(Error::KubeError(e)),
            })
    }
}
