//! `PipelineRun` resource (`tekton.dev/v1`)

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::taskrun::Param;

/// Reference to the Pipeline a PipelineRun executes
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct PipelineRef {
    #[serde(default)]
    pub name: String,
}

/// `PipelineRun` spec, trimmed to the fields worth surfacing
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(group = "tekton.dev", version = "v1", kind = "PipelineRun")]
#[kube(namespaced)]
#[kube(status = "PipelineRunStatus")]
#[kube(schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<PipelineRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
