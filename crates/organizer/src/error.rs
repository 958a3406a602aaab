use thiserror::Error;

use crate::config::ConfigError;
use crate::workflows::WorkflowId;

/// A failure that aborts a whole batch.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Directory not found: {}", .0.display())]
    DirectoryMissing(std::path::PathBuf),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Workflow panicked: {0}")]
    Panicked(String),
}

/// Why a workflow could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("{0} is already running")]
    AlreadyRunning(WorkflowId),

    #[error("cannot run {requested} synchronously while {running} is running")]
    OtherRunning {
        requested: WorkflowId,
        running: WorkflowId,
    },

    #[error("library directory does not exist: {0}")]
    LibraryMissing(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResetError {
    #[error("{0} is running and cannot be reset")]
    Running(WorkflowId),
}
