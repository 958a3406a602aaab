//! Encoding repair and keyword classification workflows for a library of plain-text novels.
//!
//! The encoding engine itself lives in `novel-shelf-core`; this crate adds configuration,
//! the classifier, file relocation, run artifacts and the [`Orchestrator`] that runs the
//! two workflows.

pub mod classifier;
pub mod config;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod progress;
pub mod relocate;
pub mod report;
pub mod scanner;
pub mod workflows;

pub use classifier::{
    prepare_text, CategoryScore, Classification, Classifier, Decision, KeywordClassifier, ReviewReason,
};
pub use config::{Config, ConfigError};
pub use error::{ResetError, StartError, WorkflowError};
pub use manifest::ProblemManifest;
pub use orchestrator::{
    Accepted, HistoryEntry, HistoryEvent, Orchestrator, WorkflowInfo, WorkflowStatus, SHUTDOWN_WAIT,
};
pub use progress::{CancelToken, Progress, ProgressSink, SilentProgress};
pub use relocate::relocate;
pub use report::{BatchDetails, BatchReport, ReportStore};
pub use scanner::{format_size, scan_pending, scan_text_files};
pub use workflows::{
    ClassificationParams, EncodingFixParams, Execute, FixMode, Workflow, WorkflowContext, WorkflowId,
};
