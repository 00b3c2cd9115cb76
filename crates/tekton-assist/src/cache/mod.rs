//! Resource synchronization cache.
//!
//! Mirrors TaskRuns, PipelineRuns and TaskRun pods into local indexes so
//! that lookups never touch the API server.

pub mod manager;
pub mod mirror;
pub mod namespace;
pub mod selector;
pub mod service;
pub mod source;
mod store;

pub use manager::CacheManager;
pub use mirror::{Backoff, Mirror};
pub use namespace::allow_namespace;
pub use selector::Selector;
pub use service::CacheService;
pub use source::{ListPage, ListWatch, WatchStream};
pub use store::ObjectKey;
