//! Diagnosis records handed to the rendering layer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crds::{Condition, ConditionStatus};

/// Failure signal extracted from a single TaskRun
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRunDebugInfo {
    pub taskrun: String,
    pub namespace: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<StepInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// First step that terminated with a non-zero exit code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub name: String,
    pub exit_code: i32,
}

/// Either the authoritative condition of a failed run or a captured fetch error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    pub log_snippet: String,
}

impl ErrorInfo {
    /// Seeds the record from a condition; the snippet starts as the message.
    pub fn from_condition(condition: Option<&Condition>) -> Self {
        let Some(c) = condition else {
            return Self::default();
        };
        Self {
            error_type: c.condition_type.clone(),
            status: c.status.to_string(),
            reason: c.reason().to_string(),
            message: c.message().to_string(),
            log_snippet: c.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunDebugInfo {
    pub pipeline_run: PipelineRunMetadata,
    pub status: PipelineRunStatusInfo,
    pub failed_task_runs: Vec<TaskRunSummary>,
    pub analysis: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunMetadata {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatusInfo {
    pub phase: RunPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub conditions: Vec<Condition>,
}

/// Coarse state derived from the `Succeeded` condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Succeeded,
    Failed,
    Running,
    Unknown,
}

impl RunPhase {
    pub fn from_condition(condition: Option<&Condition>) -> Self {
        match condition.map(|c| c.status) {
            Some(ConditionStatus::True) => RunPhase::Succeeded,
            Some(ConditionStatus::False) => RunPhase::Failed,
            Some(ConditionStatus::Unknown) => RunPhase::Running,
            None => RunPhase::Unknown,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Succeeded => "Succeeded",
            RunPhase::Failed => "Failed",
            RunPhase::Running => "Running",
            RunPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A member TaskRun whose `Succeeded` condition is `False`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRunSummary {
    pub name: String,
    pub namespace: String,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<TaskRunDebugInfo>,
}
