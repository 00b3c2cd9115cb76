//! Models of the Tekton resources the assistant reads.
//!
//! These are consumer-side views of `tekton.dev/v1` objects: only the fields
//! the diagnosis engine needs are declared, everything else is ignored on
//! deserialization. Schema generation is disabled since the CRDs are owned
//! by Tekton.

pub mod condition;
pub mod pipelinerun;
pub mod taskrun;

pub use condition::*;
pub use pipelinerun::*;
pub use taskrun::*;

/// Label Tekton sets on every TaskRun created for a PipelineRun
pub const PIPELINE_RUN_LABEL: &str = "tekton.dev/pipelineRun";

/// Label Tekton sets on every Pod created for a TaskRun
pub const TASK_RUN_LABEL: &str = "tekton.dev/taskRun";
