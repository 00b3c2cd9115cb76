//! Failure diagnosis engine.
//!
//! Turns a TaskRun or PipelineRun into a structured failure record: the
//! authoritative condition, the first failing step, and a short log excerpt
//! around the most recent error line.
//!
//! The two entry points differ on purpose. `inspect_task_run` is best effort
//! and encodes fetch failures into the returned record, while
//! `inspect_pipeline_run` propagates them since no group record is meaningful
//! without the group object.

mod snippet;
mod source;
mod types;

use std::future::Future;
use std::sync::Arc;

use futures::future::try_join_all;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::Selector;
use crate::config::InspectConfig;
use crate::crds::{
    succeeded_condition, Condition, ConditionStatus, PipelineRun, StepState, TaskRun,
    PIPELINE_RUN_LABEL, SUCCEEDED,
};
use crate::error::{classify_error, Error, Result};

pub use snippet::extract_error_snippet;
pub use source::{ClusterSource, LogSource, RunSource};
pub use types::*;

pub struct Inspector {
    runs: Arc<dyn RunSource>,
    logs: Option<Arc<dyn LogSource>>,
    log_tail_lines: i64,
    snippet_lines: usize,
}

impl Inspector {
    pub fn new(runs: Arc<dyn RunSource>, config: &InspectConfig) -> Self {
        Self {
            runs,
            logs: None,
            log_tail_lines: config.log_tail_lines,
            snippet_lines: config.snippet_lines,
        }
    }

    /// Enables log enrichment of failed steps
    #[must_use]
    pub fn with_logs(mut self, logs: Arc<dyn LogSource>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Diagnoses one TaskRun.
    ///
    /// Fetch failures do not fail the call: they come back as a record with
    /// `succeeded = false` and an `ErrorInfo` of status `Error` whose type is
    /// the error classification. Only cancellation is returned as `Err`.
    #[instrument(skip(self, cancel))]
    pub async fn inspect_task_run(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskRunDebugInfo> {
        let task_run = match cancellable(cancel, self.runs.get_task_run(namespace, name)).await {
            Ok(task_run) => task_run,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                let class = classify_error(&e);
                warn!(error = %e, class = %class, "Failed to fetch TaskRun");
                let message = e.to_string();
                return Ok(TaskRunDebugInfo {
                    taskrun: name.to_string(),
                    namespace: namespace.to_string(),
                    succeeded: false,
                    failed_step: None,
                    error: Some(ErrorInfo {
                        error_type: class.to_string(),
                        status: "Error".to_string(),
                        reason: String::new(),
                        message: message.clone(),
                        log_snippet: message,
                    }),
                });
            }
        };
        self.diagnose_task_run(&task_run, cancel).await
    }

    /// Diagnoses an already fetched TaskRun.
    pub async fn diagnose_task_run(
        &self,
        task_run: &TaskRun,
        cancel: &CancellationToken,
    ) -> Result<TaskRunDebugInfo> {
        let mut info = TaskRunDebugInfo {
            taskrun: task_run.name_any(),
            namespace: task_run.namespace().unwrap_or_default(),
            ..TaskRunDebugInfo::default()
        };

        let condition = succeeded_condition(task_run.conditions());
        // No terminal condition is never reported as success.
        info.succeeded = condition.is_some_and(|c| c.status == ConditionStatus::True);
        if info.succeeded {
            return Ok(info);
        }

        let failed_step = task_run.steps().iter().find(|s| s.is_failed());
        let mut error = ErrorInfo::from_condition(condition);

        if let (Some(step), Some(pod)) = (failed_step, task_run.pod_name()) {
            if let Some(excerpt) = self.log_excerpt(&info.namespace, pod, step, cancel).await? {
                error.log_snippet = excerpt;
            }
        }

        info.failed_step = failed_step.map(|s| StepInfo {
            name: s.name.clone(),
            exit_code: s.exit_code().unwrap_or_default(),
        });
        info.error = Some(error);
        Ok(info)
    }

    /// Tail of the failed step's container log, reduced to an excerpt.
    ///
    /// `Ok(None)` when no log source is configured, the fetch fails, or the
    /// excerpt is empty.
    async fn log_excerpt(
        &self,
        namespace: &str,
        pod: &str,
        step: &StepState,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let Some(logs) = &self.logs else {
            return Ok(None);
        };
        let container = step.container_name();
        let fetch = logs.fetch_logs(namespace, pod, &container, self.log_tail_lines);
        match cancellable(cancel, fetch).await {
            Ok(raw) => {
                let excerpt = extract_error_snippet(&raw, self.snippet_lines);
                Ok((!excerpt.is_empty()).then_some(excerpt))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                debug!(error = %e, pod, container = %container, "Log enrichment skipped");
                Ok(None)
            }
        }
    }

    /// Diagnoses a PipelineRun and its member TaskRuns.
    ///
    /// Fetching the PipelineRun or listing its TaskRuns fails the call.
    #[instrument(skip(self, cancel))]
    pub async fn inspect_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineRunDebugInfo> {
        let pipeline_run =
            match cancellable(cancel, self.runs.get_pipeline_run(namespace, name)).await {
                Ok(pr) => pr,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    return Err(Error::FetchFailed {
                        kind: "pipelinerun",
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                        source: Box::new(e),
                    })
                }
            };

        let selector = Selector::eq(PIPELINE_RUN_LABEL, name);
        let members =
            match cancellable(cancel, self.runs.list_task_runs(namespace, &selector)).await {
                Ok(members) => members,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    return Err(Error::ListFailed {
                        kind: "taskruns",
                        owner: format!("pipelinerun {namespace}/{name}"),
                        source: Box::new(e),
                    })
                }
            };

        let failed: Vec<&TaskRun> = members
            .iter()
            .filter(|tr| {
                succeeded_condition(tr.conditions())
                    .is_some_and(|c| c.status == ConditionStatus::False)
            })
            .collect();

        let analysis = if !failed.is_empty() {
            let names: Vec<String> = failed.iter().map(|tr| tr.name_any()).collect();
            format!(
                "Found {} failed TaskRuns. Run failure analysis on the individual taskrun failures: {}",
                failed.len(),
                names.join(", ")
            )
        } else if members.is_empty() {
            format!(
                "No TaskRuns were created. PipelineRun failed during validation or scheduling. {}",
                validation_analysis(pipeline_run.conditions())
            )
        } else {
            format!(
                "PipelineRun failed but no TaskRuns reported failures. Found {} TaskRuns total.",
                members.len()
            )
        };

        let diagnoses = try_join_all(failed.iter().map(|tr| self.diagnose_task_run(tr, cancel))).await?;
        let failed_task_runs = failed
            .iter()
            .zip(diagnoses)
            .map(|(tr, debug)| {
                let condition = succeeded_condition(tr.conditions());
                TaskRunSummary {
                    name: tr.name_any(),
                    namespace: tr.namespace().unwrap_or_default(),
                    reason: condition.map(Condition::reason).unwrap_or_default().to_string(),
                    message: condition.map(Condition::message).unwrap_or_default().to_string(),
                    debug: Some(debug),
                }
            })
            .collect();

        info!(
            members = members.len(),
            failed = failed.len(),
            "Inspected PipelineRun"
        );

        Ok(PipelineRunDebugInfo {
            pipeline_run: PipelineRunMetadata {
                name: pipeline_run.name_any(),
                namespace: pipeline_run.namespace().unwrap_or_default(),
                uid: pipeline_run.uid().unwrap_or_default(),
                labels: pipeline_run.labels().clone(),
                annotations: pipeline_run.annotations().clone(),
            },
            status: status_info(&pipeline_run),
            failed_task_runs,
            analysis,
        })
    }
}

/// Races `fut` against `cancel`, preferring cancellation when both are ready.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

fn status_info(pipeline_run: &PipelineRun) -> PipelineRunStatusInfo {
    let status = pipeline_run.status.as_ref();
    let start_time = status.and_then(|s| s.start_time);
    let completion_time = status.and_then(|s| s.completion_time);
    let duration_seconds = match (start_time, completion_time) {
        (Some(start), Some(end)) => (end - start).num_seconds(),
        _ => 0,
    };
    PipelineRunStatusInfo {
        phase: RunPhase::from_condition(succeeded_condition(pipeline_run.conditions())),
        start_time,
        completion_time,
        duration_seconds,
        conditions: pipeline_run.conditions().to_vec(),
    }
}

/// Explains a PipelineRun that failed before creating any TaskRun.
fn validation_analysis(conditions: &[Condition]) -> String {
    let Some(failed) = conditions
        .iter()
        .find(|c| c.condition_type == SUCCEEDED && c.status == ConditionStatus::False)
    else {
        return "PipelineRun failed for an unknown reason.".to_string();
    };

    match failed.reason() {
        "CouldntGetPipeline" => "Pipeline resource could not be found or accessed.".to_string(),
        "PipelineValidationFailed" => {
            format!("Pipeline validation failed: {}", failed.message())
        }
        "CouldntGetTask" => {
            "One or more tasks referenced in the pipeline could not be found.".to_string()
        }
        "InvalidWorkspaceBindings" => "Workspace bindings are invalid or missing.".to_string(),
        "ParameterMissing" => "Required parameters are missing from the PipelineRun.".to_string(),
        "InvalidGraph" => {
            "Pipeline has an invalid dependency graph (cycles or wrong order).".to_string()
        }
        reason => format!(
            "PipelineRun failed with reason '{reason}': {}",
            failed.message()
        ),
    }
}
