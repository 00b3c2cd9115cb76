//! Failure diagnosis for Tekton TaskRuns and PipelineRuns.
//!
//! [`cache`] keeps a continuously synced local mirror of TaskRuns,
//! PipelineRuns and TaskRun pods. [`inspect`] turns a run into a structured
//! failure record that a rendering layer can consume.

pub mod cache;
pub mod config;
pub mod crds;
pub mod error;
pub mod inspect;

pub use cache::{CacheManager, CacheService, Selector};
pub use config::AssistConfig;
pub use error::{classify_error, Error, ErrorClass, Result};
pub use inspect::{ClusterSource, Inspector, PipelineRunDebugInfo, TaskRunDebugInfo};
