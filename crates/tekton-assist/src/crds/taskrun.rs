//! `TaskRun` resource (`tekton.dev/v1`)

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::condition::Condition;

/// Reference to the Task a TaskRun executes
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct TaskRef {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Parameter passed to a run
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Param {
    pub name: String,
    pub value: serde_json::Value,
}

/// `TaskRun` spec, trimmed to the fields worth surfacing
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(group = "tekton.dev", version = "v1", kind = "TaskRun")]
#[kube(namespaced)]
#[kube(status = "TaskRunStatus")]
#[kube(schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Status of the TaskRun
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Name of the pod backing the run, empty until scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Step states in declared order
    #[serde(default)]
    pub steps: Vec<StepState>,
}

/// State of a single step container
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub name: String,

    /// Container backing the step, usually `step-<name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<TerminatedState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<WaitingState>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedState {
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct WaitingState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepState {
    /// A step that terminated with a non-zero exit code
    pub fn is_failed(&self) -> bool {
        self.terminated.as_ref().is_some_and(|t| t.exit_code != 0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.terminated.as_ref().map(|t| t.exit_code)
    }

    /// Container running this step; Tekton names it `step-<name>` when unreported
    pub fn container_name(&self) -> String {
        match self.container.as_deref() {
            Some(container) if !container.is_empty() => container.to_string(),
            _ => format!("step-{}", self.name),
        }
    }
}

impl TaskRun {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn steps(&self) -> &[StepState] {
        self.status
            .as_ref()
            .map(|s| s.steps.as_slice())
            .unwrap_or_default()
    }

    /// Backing pod name, ignoring the empty string Tekton writes before scheduling
    pub fn pod_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.pod_name.as_deref())
            .filter(|name| !name.is_empty())
    }
}
