//! Built-in pipeline stages.

pub mod fetch_all;
pub mod persist_merge;

pub use fetch_all::FetchAllStage;
pub use persist_merge::PersistWithMergeStage;
