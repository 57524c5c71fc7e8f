pub mod job;
pub mod mapper;
pub mod orchestrator;
pub mod publisher;
pub mod run_log;
pub mod sources;
pub mod stats;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use job::{Checkpoint, ImportJob, ImportOptions, ImportRecord, JobStatus, RecordStatus};
pub use mapper::{normalize, SourceMapping};
pub use orchestrator::ImportOrchestrator;
pub use stats::ImportStats;
