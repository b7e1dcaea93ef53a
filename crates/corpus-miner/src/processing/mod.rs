//! Extraction processing: worker processes, their supervisor and the run orchestrator

pub mod deadline;
pub mod orchestrator;
pub mod protocol;
pub mod supervisor;
pub mod transform;
pub mod worker;

pub use deadline::{DeadlinePolicy, PageScaledDeadline};
pub use orchestrator::{evict_documents, Orchestrator, RunReport, RunState};
pub use protocol::{ExtractionOutcome, TaskId, WorkerEvent, WorkerRequest};
pub use supervisor::{
    ExtractionResult, ExtractionSupervisor, LaunchWorker, WorkerBinary, WorkerId,
    INVALID_PATH_ERROR, NO_WORKER_ERROR,
};
pub use transform::{apply_extraction, content_hash, delete_eol};
