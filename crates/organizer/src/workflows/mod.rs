//! The batch operations the orchestrator can run.

pub mod classification;
pub mod encoding_fix;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use novel_shelf_core::{ChardetDetector, Detector};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::WorkflowError;
use crate::progress::Progress;
use crate::report::{BatchReport, ReportStore};

pub use classification::ClassificationParams;
pub use encoding_fix::{EncodingFixParams, FixMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowId {
    EncodingFix,
    AutoClassification,
}

impl WorkflowId {
    pub const ALL: [WorkflowId; 2] = [WorkflowId::EncodingFix, WorkflowId::AutoClassification];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EncodingFix => "encoding_fix",
            Self::AutoClassification => "auto_classification",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::EncodingFix => "Encoding repair",
            Self::AutoClassification => "Automatic classification",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::EncodingFix => "Detect files that are not in the target encoding and convert them",
            Self::AutoClassification => "Score pending novels by keyword and move them into genre folders",
        }
    }

    /// Whether the library directory must exist before the workflow may start.
    pub fn requires_library(self) -> bool {
        true
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for WorkflowId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown workflow: {s}"))
    }
}

/// A workflow together with its parameters.
#[derive(Debug, Clone)]
pub enum Workflow {
    EncodingFix(EncodingFixParams),
    AutoClassification(ClassificationParams),
}

impl Workflow {
    pub fn id(&self) -> WorkflowId {
        match self {
            Self::EncodingFix(_) => WorkflowId::EncodingFix,
            Self::AutoClassification(_) => WorkflowId::AutoClassification,
        }
    }

    /// The workflow with default parameters.
    pub fn default_for(id: WorkflowId) -> Self {
        match id {
            WorkflowId::EncodingFix => Self::EncodingFix(EncodingFixParams::default()),
            WorkflowId::AutoClassification => Self::AutoClassification(ClassificationParams::default()),
        }
    }
}

/// Shared inputs of every workflow body.
#[derive(Clone)]
pub struct WorkflowContext {
    pub config: Config,
    pub detector: Arc<dyn Detector>,
}

impl WorkflowContext {
    pub fn new(config: Config) -> Self {
        Self::with_detector(config, Arc::new(ChardetDetector))
    }

    pub fn with_detector(config: Config, detector: Arc<dyn Detector>) -> Self {
        Self { config, detector }
    }

    pub fn library_path(&self) -> &PathBuf {
        &self.config.library_path
    }

    pub fn reports(&self) -> ReportStore {
        ReportStore::new(self.config.logs_dir())
    }
}

pub trait Execute {
    fn execute(&self, ctx: &WorkflowContext, progress: &Progress) -> Result<BatchReport, WorkflowError>;
}

impl Execute for Workflow {
    fn execute(&self, ctx: &WorkflowContext, progress: &Progress) -> Result<BatchReport, WorkflowError> {
        match self {
            Self::EncodingFix(params) => params.execute(ctx, progress),
            Self::AutoClassification(params) => params.execute(ctx, progress),
        }
    }
}
