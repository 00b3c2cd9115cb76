//! Query surface over the mirrored snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;

use super::manager::CacheManager;
use super::selector::Selector;
use crate::crds::{PipelineRun, TaskRun, PIPELINE_RUN_LABEL, TASK_RUN_LABEL};
use crate::error::{Error, Result};
use crate::inspect::RunSource;

/// Cheap to clone; every clone reads the same mirrors.
#[derive(Clone)]
pub struct CacheService {
    manager: Arc<CacheManager>,
}

impl CacheService {
    pub fn new(manager: CacheManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }

    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        self.manager.start(cancel).await
    }

    pub fn has_synced(&self) -> bool {
        self.manager.has_synced()
    }

    pub fn get_task_run(&self, namespace: &str, name: &str) -> Result<Arc<TaskRun>> {
        self.manager
            .task_runs
            .get(namespace, name)
            .ok_or_else(|| not_found("TaskRun", namespace, name))
    }

    pub fn list_task_runs(&self, namespace: &str, selector: &Selector) -> Vec<Arc<TaskRun>> {
        self.manager.task_runs.list(namespace, selector)
    }

    pub fn get_pipeline_run(&self, namespace: &str, name: &str) -> Result<Arc<PipelineRun>> {
        self.manager
            .pipeline_runs
            .get(namespace, name)
            .ok_or_else(|| not_found("PipelineRun", namespace, name))
    }

    pub fn list_pipeline_runs(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Vec<Arc<PipelineRun>> {
        self.manager.pipeline_runs.list(namespace, selector)
    }

    pub fn get_pod(&self, namespace: &str, name: &str) -> Result<Arc<Pod>> {
        self.manager
            .pods
            .get(namespace, name)
            .ok_or_else(|| not_found("Pod", namespace, name))
    }

    pub fn list_pods(&self, namespace: &str, selector: &Selector) -> Vec<Arc<Pod>> {
        self.manager.pods.list(namespace, selector)
    }

    /// TaskRuns labelled as members of `pipeline_run`
    pub fn list_task_runs_for_pipeline_run(
        &self,
        namespace: &str,
        pipeline_run: &str,
    ) -> Vec<Arc<TaskRun>> {
        self.list_task_runs(namespace, &Selector::eq(PIPELINE_RUN_LABEL, pipeline_run))
    }

    /// Pods labelled as running `task_run`
    pub fn list_pods_for_task_run(&self, namespace: &str, task_run: &str) -> Vec<Arc<Pod>> {
        self.list_pods(namespace, &Selector::eq(TASK_RUN_LABEL, task_run))
    }
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> Error {
    Error::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl RunSource for CacheService {
    async fn get_task_run(&self, namespace: &str, name: &str) -> Result<TaskRun> {
        CacheService::get_task_run(self, namespace, name).map(|tr| (*tr).clone())
    }

    async fn get_pipeline_run(&self, namespace: &str, name: &str) -> Result<PipelineRun> {
        CacheService::get_pipeline_run(self, namespace, name).map(|pr| (*pr).clone())
    }

    async fn list_task_runs(&self, namespace: &str, selector: &Selector) -> Result<Vec<TaskRun>> {
        Ok(CacheService::list_task_runs(self, namespace, selector)
            .into_iter()
            .map(|tr| (*tr).clone())
            .collect())
    }
}
