//! Diagnosis engine tests
//!
//! Runs the inspector against in-memory run and log sources.

#![allow(clippy::too_many_lines)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::error::ErrorResponse;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use tekton_assist::cache::Selector;
use tekton_assist::config::InspectConfig;
use tekton_assist::crds::{
    Condition, ConditionStatus, PipelineRun, PipelineRunSpec, PipelineRunStatus, StepState,
    TaskRun, TaskRunSpec, TaskRunStatus, TerminatedState, PIPELINE_RUN_LABEL, SUCCEEDED,
};
use tekton_assist::inspect::{
    ErrorInfo, Inspector, LogSource, RunPhase, RunSource, StepInfo, TaskRunDebugInfo,
};
use tekton_assist::{classify_error, Error, ErrorClass, Result};

// ============================================================================
// Fakes
// ============================================================================

fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("request rejected: {reason}"),
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Default)]
struct FakeRuns {
    task_runs: Vec<TaskRun>,
    pipeline_runs: Vec<PipelineRun>,
    get_error: Option<(u16, &'static str)>,
    list_error: Option<(u16, &'static str)>,
    /// Listing never completes
    stall_list: bool,
}

#[async_trait]
impl RunSource for FakeRuns {
    async fn get_task_run(&self, namespace: &str, name: &str) -> Result<TaskRun> {
        if let Some((code, reason)) = self.get_error {
            return Err(api_error(code, reason));
        }
        self.task_runs
            .iter()
            .find(|tr| tr.namespace().as_deref() == Some(namespace) && tr.name_any() == name)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn get_pipeline_run(&self, namespace: &str, name: &str) -> Result<PipelineRun> {
        if let Some((code, reason)) = self.get_error {
            return Err(api_error(code, reason));
        }
        self.pipeline_runs
            .iter()
            .find(|pr| pr.namespace().as_deref() == Some(namespace) && pr.name_any() == name)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn list_task_runs(&self, namespace: &str, selector: &Selector) -> Result<Vec<TaskRun>> {
        if self.stall_list {
            futures::future::pending::<()>().await;
        }
        if let Some((code, reason)) = self.list_error {
            return Err(api_error(code, reason));
        }
        Ok(self
            .task_runs
            .iter()
            .filter(|tr| tr.namespace().as_deref() == Some(namespace))
            .filter(|tr| selector.matches(tr.labels()))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeLogs {
    text: Option<String>,
    /// Fetches are recorded and then never complete
    stall: bool,
    requests: Mutex<Vec<(String, String, String, i64)>>,
}

impl FakeLogs {
    fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Some(text.to_string()),
            ..Self::default()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn stalled() -> Arc<Self> {
        Arc::new(Self {
            stall: true,
            ..Self::default()
        })
    }

    fn requests(&self) -> Vec<(String, String, String, i64)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSource for FakeLogs {
    async fn fetch_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<String> {
        self.requests.lock().unwrap().push((
            namespace.to_string(),
            pod.to_string(),
            container.to_string(),
            tail_lines,
        ));
        if self.stall {
            futures::future::pending::<()>().await;
        }
        self.text.clone().ok_or_else(|| Error::LogFetchFailed {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
            source: Box::new(api_error(400, "BadRequest")),
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn condition(status: ConditionStatus, reason: &str, message: &str) -> Condition {
    Condition {
        condition_type: SUCCEEDED.to_string(),
        status,
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: None,
    }
}

fn step(name: &str, exit_code: Option<i32>) -> StepState {
    StepState {
        name: name.to_string(),
        terminated: exit_code.map(|exit_code| TerminatedState {
            exit_code,
            ..TerminatedState::default()
        }),
        ..StepState::default()
    }
}

fn task_run(
    namespace: &str,
    name: &str,
    conditions: Vec<Condition>,
    steps: Vec<StepState>,
    pod_name: Option<&str>,
) -> TaskRun {
    let mut tr = TaskRun::new(name, TaskRunSpec::default());
    tr.metadata.namespace = Some(namespace.to_string());
    tr.status = Some(TaskRunStatus {
        conditions,
        steps,
        pod_name: pod_name.map(str::to_string),
        ..TaskRunStatus::default()
    });
    tr
}

fn member(name: &str, pipeline_run: &str, conditions: Vec<Condition>) -> TaskRun {
    let mut tr = task_run("ci", name, conditions, vec![step("run", Some(2))], None);
    tr.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(PIPELINE_RUN_LABEL.to_string(), pipeline_run.to_string());
    tr
}

fn pipeline_run(name: &str, conditions: Vec<Condition>) -> PipelineRun {
    let mut pr = PipelineRun::new(name, PipelineRunSpec::default());
    pr.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("ci".to_string()),
        uid: Some("0b7c-42".to_string()),
        annotations: Some(BTreeMap::from([(
            "owner".to_string(),
            "platform".to_string(),
        )])),
        ..ObjectMeta::default()
    };
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
    pr.status = Some(PipelineRunStatus {
        conditions,
        start_time: Some(start),
        completion_time: Some(start + chrono::Duration::seconds(42)),
    });
    pr
}

fn inspector(runs: FakeRuns) -> Inspector {
    Inspector::new(Arc::new(runs), &InspectConfig::default())
}

fn inspector_with_logs(runs: FakeRuns, logs: Arc<FakeLogs>) -> Inspector {
    inspector(runs).with_logs(logs)
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    cancel
}

// ============================================================================
// TaskRun path
// ============================================================================

#[tokio::test]
async fn succeeded_task_run_has_no_failure_fields() {
    let runs = FakeRuns {
        task_runs: vec![task_run(
            "ci",
            "ok",
            vec![condition(ConditionStatus::True, "Succeeded", "All Steps have completed")],
            vec![step("build", Some(0))],
            Some("ok-pod"),
        )],
        ..FakeRuns::default()
    };

    let info = inspector(runs)
        .inspect_task_run("ci", "ok", &CancellationToken::new())
        .await
        .unwrap();
    assert!(info.succeeded);
    assert!(info.failed_step.is_none());
    assert!(info.error.is_none());
}

#[tokio::test]
async fn missing_condition_is_reported_as_failure() {
    let runs = FakeRuns {
        task_runs: vec![task_run("ci", "fresh", Vec::new(), Vec::new(), None)],
        ..FakeRuns::default()
    };

    let info = inspector(runs)
        .inspect_task_run("ci", "fresh", &CancellationToken::new())
        .await
        .unwrap();
    assert!(!info.succeeded);
    assert!(info.failed_step.is_none());
}

#[tokio::test]
async fn running_task_run_is_not_succeeded() {
    let runs = FakeRuns {
        task_runs: vec![task_run(
            "ci",
            "busy",
            vec![condition(ConditionStatus::Unknown, "Running", "")],
            vec![step("build", None)],
            Some("busy-pod"),
        )],
        ..FakeRuns::default()
    };

    let info = inspector(runs)
        .inspect_task_run("ci", "busy", &CancellationToken::new())
        .await
        .unwrap();
    assert!(!info.succeeded);
    assert_eq!(info.error.unwrap().status, "Unknown");
}

#[tokio::test]
async fn first_failing_step_in_declared_order_wins() {
    let runs = FakeRuns {
        task_runs: vec![task_run(
            "ci",
            "multi",
            vec![condition(ConditionStatus::False, "Failed", "step failed")],
            vec![
                step("a", Some(0)),
                step("b", Some(1)),
                step("c", Some(137)),
                step("d", None),
            ],
            None,
        )],
        ..FakeRuns::default()
    };

    let info = inspector(runs)
        .inspect_task_run("ci", "multi", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        info.failed_step,
        Some(StepInfo {
            name: "b".to_string(),
            exit_code: 1
        })
    );
}

#[tokio::test]
async fn demo_task_run_without_pod_keeps_condition_message() {
    let message = "Failed to pull image \"registry.local/build:1\"";
    let runs = FakeRuns {
        task_runs: vec![task_run(
            "default",
            "demo",
            vec![condition(
                ConditionStatus::False,
                "TaskRunImagePullFailed",
                message,
            )],
            vec![step("build", Some(1))],
            None,
        )],
        ..FakeRuns::default()
    };
    let logs = FakeLogs::returning("error: should never be read");

    let info = inspector_with_logs(runs, logs.clone())
        .inspect_task_run("default", "demo", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        info,
        TaskRunDebugInfo {
            taskrun: "demo".to_string(),
            namespace: "default".to_string(),
            succeeded: false,
            failed_step: Some(StepInfo {
                name: "build".to_string(),
                exit_code: 1,
            }),
            error: Some(ErrorInfo {
                error_type: "Succeeded".to_string(),
                status: "False".to_string(),
                reason: "TaskRunImagePullFailed".to_string(),
                message: message.to_string(),
                log_snippet: message.to_string(),
            }),
        }
    );
    assert!(logs.requests().is_empty());
}

#[tokio::test]
async fn failed_step_logs_replace_snippet() {
    let runs = FakeRuns {
        task_runs: vec![task_run(
            "ci",
            "compile",
            vec![condition(ConditionStatus::False, "Failed", "exit status 2")],
            vec![step("fetch", Some(0)), step("build", Some(2))],
            Some("compile-pod"),
        )],
        ..FakeRuns::default()
    };
    let log = "Compiling crate\nwarning: unused import\nerror[E0425]: cannot find value `x`\n\n";
    let logs = FakeLogs::returning(log);

    let info = inspector_with_logs(runs, logs.clone())
        .inspect_task_run("ci", "compile", &CancellationToken::new())
        .await
        .unwrap();

    let error = info.error.unwrap();
    assert_eq!(error.message, "exit status 2");
    assert_eq!(
        error.log_snippet,
        "Compiling crate\nwarning: unused import\nerror[E0425]: cannot find value `x`"
    );
    assert_eq!(
        logs.requests(),
        vec![(
            "ci".to_string(),
            "compile-pod".to_string(),
            "step-build".to_string(),
            200
        )]
    );
}

#[tokio::test]
async fn explicit_step_container_is_used_for_logs() {
    let mut failing = step("build", Some(1));
    failing.container = Some("step-build-and-push".to_string());
    let runs = FakeRuns {
        task_runs: vec![task_run(
            "ci",
            "push",
            vec![condition(ConditionStatus::False, "Failed", "")],
            vec![failing],
            Some("push-pod"),
        )],
        ..FakeRuns::default()
    };
    let logs = FakeLogs::returning("fatal: denied");

    inspector_with_logs(runs, logs.clone())
        .inspect_task_run("ci", "push", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(logs.requests()[0].2, "step-build-and-push");
}

#[tokio::test]
async fn log_failures_fall_back_to_condition_message() {
    let make_runs = || FakeRuns {
        task_runs: vec![task_run(
            "ci",
            "flaky",
            vec![condition(ConditionStatus::False, "Failed", "step build failed")],
            vec![step("build", Some(1))],
            Some("flaky-pod"),
        )],
        ..FakeRuns::default()
    };

    for logs in [FakeLogs::failing(), FakeLogs::returning("\n  \n\n")] {
        let info = inspector_with_logs(make_runs(), logs.clone())
            .inspect_task_run("ci", "flaky", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(info.error.unwrap().log_snippet, "step build failed");
        assert_eq!(logs.requests().len(), 1);
    }
}

#[tokio::test]
async fn fetch_errors_are_captured_in_record() {
    for (code, reason, class) in [
        (404, "NotFound", ErrorClass::NotFound),
        (403, "Forbidden", ErrorClass::Forbidden),
        (401, "Unauthorized", ErrorClass::Unauthorized),
        (503, "ServiceUnavailable", ErrorClass::Unknown),
    ] {
        let runs = FakeRuns {
            get_error: Some((code, reason)),
            ..FakeRuns::default()
        };
        let info = inspector(runs)
            .inspect_task_run("ci", "gone", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(info.taskrun, "gone");
        assert_eq!(info.namespace, "ci");
        assert!(!info.succeeded);
        let error = info.error.unwrap();
        assert_eq!(error.error_type, class.as_str());
        assert_eq!(error.status, "Error");
        assert_eq!(error.reason, "");
        assert!(error.message.contains(reason));
        assert_eq!(error.log_snippet, error.message);
    }
}

#[tokio::test]
async fn cancelled_inspection_returns_error() {
    let runs = FakeRuns {
        task_runs: vec![task_run("ci", "any", Vec::new(), Vec::new(), None)],
        pipeline_runs: vec![pipeline_run("any", Vec::new())],
        ..FakeRuns::default()
    };
    let inspector = inspector(runs);
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(
        inspector.inspect_task_run("ci", "any", &cancel).await,
        Err(Error::Cancelled)
    ));
    assert!(matches!(
        inspector.inspect_pipeline_run("ci", "any", &cancel).await,
        Err(Error::Cancelled)
    ));
}

#[tokio::test]
async fn cancellation_interrupts_log_fetch() {
    let runs = FakeRuns {
        task_runs: vec![task_run(
            "ci",
            "build",
            vec![condition(ConditionStatus::False, "Failed", "step failed")],
            vec![step("compile", Some(2))],
            Some("build-pod"),
        )],
        ..FakeRuns::default()
    };
    let logs = FakeLogs::stalled();
    let inspector = inspector_with_logs(runs, logs.clone());
    let cancel = cancel_after(Duration::from_millis(20));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        inspector.inspect_task_run("ci", "build", &cancel),
    )
    .await
    .expect("inspection ignored cancellation");
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(logs.requests().len(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_member_listing() {
    let runs = FakeRuns {
        pipeline_runs: vec![pipeline_run(
            "release",
            vec![condition(ConditionStatus::False, "Failed", "Tasks Completed: 1 (Failed: 1)")],
        )],
        stall_list: true,
        ..FakeRuns::default()
    };
    let inspector = inspector(runs);
    let cancel = cancel_after(Duration::from_millis(20));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        inspector.inspect_pipeline_run("ci", "release", &cancel),
    )
    .await
    .expect("inspection ignored cancellation");
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn cancellation_interrupts_member_log_fetch() {
    let mut failed = member(
        "release-build",
        "release",
        vec![condition(ConditionStatus::False, "Failed", "step failed")],
    );
    if let Some(status) = failed.status.as_mut() {
        status.pod_name = Some("release-build-pod".to_string());
    }
    let runs = FakeRuns {
        pipeline_runs: vec![pipeline_run(
            "release",
            vec![condition(ConditionStatus::False, "Failed", "Tasks Completed: 1 (Failed: 1)")],
        )],
        task_runs: vec![failed],
        ..FakeRuns::default()
    };
    let logs = FakeLogs::stalled();
    let inspector = inspector_with_logs(runs, logs.clone());
    let cancel = cancel_after(Duration::from_millis(20));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        inspector.inspect_pipeline_run("ci", "release", &cancel),
    )
    .await
    .expect("inspection ignored cancellation");
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(logs.requests()[0].1, "release-build-pod");
}

// ============================================================================
// PipelineRun path
// ============================================================================

#[tokio::test]
async fn failed_members_are_summarized_and_diagnosed() {
    let runs = FakeRuns {
        pipeline_runs: vec![pipeline_run(
            "release",
            vec![condition(ConditionStatus::False, "Failed", "Tasks Completed: 3 (Failed: 2)")],
        )],
        task_runs: vec![
            member(
                "release-build",
                "release",
                vec![condition(ConditionStatus::True, "Succeeded", "")],
            ),
            member(
                "release-test",
                "release",
                vec![condition(ConditionStatus::False, "Failed", "tests failed")],
            ),
            member(
                "release-lint",
                "release",
                vec![condition(ConditionStatus::False, "TaskRunTimeout", "timed out")],
            ),
            member(
                "other-test",
                "other",
                vec![condition(ConditionStatus::False, "Failed", "")],
            ),
        ],
        ..FakeRuns::default()
    };

    let info = inspector(runs)
        .inspect_pipeline_run("ci", "release", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        info.analysis,
        "Found 2 failed TaskRuns. Run failure analysis on the individual taskrun failures: release-test, release-lint"
    );
    assert_eq!(info.failed_task_runs.len(), 2);
    let lint = &info.failed_task_runs[1];
    assert_eq!(lint.name, "release-lint");
    assert_eq!(lint.namespace, "ci");
    assert_eq!(lint.reason, "TaskRunTimeout");
    assert_eq!(lint.message, "timed out");
    let debug = lint.debug.as_ref().unwrap();
    assert!(!debug.succeeded);
    assert_eq!(debug.failed_step.as_ref().unwrap().name, "run");

    assert_eq!(info.pipeline_run.name, "release");
    assert_eq!(info.pipeline_run.uid, "0b7c-42");
    assert_eq!(
        info.pipeline_run.annotations.get("owner").map(String::as_str),
        Some("platform")
    );
    assert_eq!(info.status.phase, RunPhase::Failed);
    assert_eq!(info.status.duration_seconds, 42);
    assert_eq!(info.status.conditions.len(), 1);
}

#[tokio::test]
async fn no_members_explains_validation_failure() {
    let runs = FakeRuns {
        pipeline_runs: vec![pipeline_run(
            "params",
            vec![condition(
                ConditionStatus::False,
                "ParameterMissing",
                "pipelinerun missing parameters: [revision]",
            )],
        )],
        ..FakeRuns::default()
    };

    let info = inspector(runs)
        .inspect_pipeline_run("ci", "params", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        info.analysis,
        "No TaskRuns were created. PipelineRun failed during validation or scheduling. Required parameters are missing from the PipelineRun."
    );
    assert!(info.failed_task_runs.is_empty());
}

#[tokio::test]
async fn no_members_with_unrecognized_reason_is_verbatim() {
    let runs = FakeRuns {
        pipeline_runs: vec![pipeline_run(
            "quota",
            vec![condition(
                ConditionStatus::False,
                "ExceededResourceQuota",
                "quota exceeded",
            )],
        )],
        ..FakeRuns::default()
    };

    let info = inspector(runs)
        .inspect_pipeline_run("ci", "quota", &CancellationToken::new())
        .await
        .unwrap();
    assert!(info
        .analysis
        .ends_with("PipelineRun failed with reason 'ExceededResourceQuota': quota exceeded"));
}

#[tokio::test]
async fn members_without_failures_are_reported_as_inconsistent() {
    let runs = FakeRuns {
        pipeline_runs: vec![pipeline_run(
            "odd",
            vec![condition(ConditionStatus::False, "Cancelled", "")],
        )],
        task_runs: vec![
            member("odd-a", "odd", vec![condition(ConditionStatus::True, "Succeeded", "")]),
            member("odd-b", "odd", Vec::new()),
        ],
        ..FakeRuns::default()
    };

    let info = inspector(runs)
        .inspect_pipeline_run("ci", "odd", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        info.analysis,
        "PipelineRun failed but no TaskRuns reported failures. Found 2 TaskRuns total."
    );
}

#[tokio::test]
async fn pipeline_run_fetch_failure_propagates() {
    let runs = FakeRuns {
        get_error: Some((403, "Forbidden")),
        ..FakeRuns::default()
    };

    let err = inspector(runs)
        .inspect_pipeline_run("ci", "secret", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FetchFailed { .. }));
    assert_eq!(classify_error(&err), ErrorClass::Forbidden);
    assert!(err.to_string().contains("ci/secret"));
}

#[tokio::test]
async fn member_list_failure_propagates() {
    let runs = FakeRuns {
        pipeline_runs: vec![pipeline_run("release", Vec::new())],
        list_error: Some((500, "InternalError")),
        ..FakeRuns::default()
    };

    let err = inspector(runs)
        .inspect_pipeline_run("ci", "release", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ListFailed { .. }));
    assert!(err.to_string().contains("pipelinerun ci/release"));
}
