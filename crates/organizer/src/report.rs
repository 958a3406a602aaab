use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use novel_shelf_core::{timestamp, unique_path, FileRecord};
use tracing::{info, warn};

/// Result envelope shared by every workflow.
///
/// `success` means the batch loop ran to completion; per-file failures live in the details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub cancelled: bool,
    pub stats: BTreeMap<String, usize>,
    pub errors: Vec<String>,
    pub details: BatchDetails,
}

impl BatchReport {
    pub fn completed(message: impl Into<String>, stats: BTreeMap<String, usize>, details: BatchDetails) -> Self {
        Self {
            success: true,
            message: message.into(),
            cancelled: false,
            stats,
            errors: Vec::new(),
            details,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: error.clone(),
            cancelled: false,
            stats: BTreeMap::new(),
            errors: vec![error],
            details: BatchDetails::None,
        }
    }

    pub fn cancelled(self) -> Self {
        Self {
            success: false,
            cancelled: true,
            message: format!("cancelled: {}", self.message),
            ..self
        }
    }

    pub fn stat(&self, key: &str) -> usize {
        self.stats.get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchDetails {
    None,
    Encoding(EncodingDetails),
    Classification(ClassificationDetails),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodingDetails {
    pub scan: Option<ScanSummary>,
    pub fix: Option<FixReport>,
}

/// Everything one scan found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub timestamp: DateTime<Utc>,
    pub scan_dir: PathBuf,
    pub recursive: bool,
    pub total_files: usize,
    pub problem_count: usize,
    pub fixable_count: usize,
    pub files: Vec<FileRecord>,
}

impl ScanResult {
    pub fn new(scan_dir: impl Into<PathBuf>, recursive: bool, files: Vec<FileRecord>) -> Self {
        Self {
            timestamp: Utc::now(),
            scan_dir: scan_dir.into(),
            recursive,
            total_files: files.len(),
            problem_count: files.iter().filter(|f| f.has_problem).count(),
            fixable_count: files.iter().filter(|f| f.has_problem && f.can_fix).count(),
            files,
        }
    }

    pub fn problems(&self) -> Vec<FileRecord> {
        self.files.iter().filter(|f| f.has_problem).cloned().collect()
    }
}

/// What a scan reports back in the envelope: the problems, not every clean file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scan_dir: PathBuf,
    pub total_files: usize,
    pub problem_files: Vec<FileRecord>,
    pub report_file: Option<PathBuf>,
    pub manifest_file: Option<PathBuf>,
    pub problem_list_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedFile {
    pub path: PathBuf,
    pub original_encoding: Option<String>,
    pub strategy: String,
    pub replaced_chars: usize,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIssue {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationDetail {
    pub path: PathBuf,
    pub fixed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub total_files: usize,
    pub fixed_files: usize,
    pub still_problematic: usize,
    pub all_fixed: bool,
    pub details: Vec<VerificationDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    pub timestamp: DateTime<Utc>,
    pub fixed_files: Vec<FixedFile>,
    pub failed_files: Vec<FileIssue>,
    pub skipped_files: Vec<FileIssue>,
    pub backup_dir: Option<PathBuf>,
    pub verification: Option<Verification>,
    pub manifest_removed: bool,
    pub report_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub filename: String,
    pub success: bool,
    pub category: Option<String>,
    pub is_secondary_check: bool,
    pub info: Option<String>,
    pub target: Option<PathBuf>,
    pub encoding_fixed: bool,
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            success: false,
            category: None,
            is_secondary_check: false,
            info: None,
            target: None,
            encoding_fixed: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub categories_count: usize,
    pub score_threshold: u32,
    pub score_difference_threshold: u32,
    pub weights: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationDetails {
    pub processing_log: Vec<FileOutcome>,
    pub config: ConfigSnapshot,
    pub report_file: Option<PathBuf>,
}

#[derive(Serialize)]
struct ClassificationReportFile<'a> {
    timestamp: DateTime<Utc>,
    classification_summary: &'a BTreeMap<String, usize>,
    processing_log: &'a [FileOutcome],
    errors: &'a [String],
    config_info: &'a ConfigSnapshot,
}

/// Writes the per-run artifacts under the library's `logs/` directory.
#[derive(Debug, Clone)]
pub struct ReportStore {
    logs_dir: PathBuf,
}

impl ReportStore {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn write_scan(&self, scan: &ScanResult) -> std::io::Result<PathBuf> {
        self.write_json("encoding_scan_report", scan)
    }

    /// One path per line, for manual inspection.
    pub fn write_problem_list(&self, problems: &[FileRecord]) -> std::io::Result<PathBuf> {
        let path = self.next_path("problem_files", "txt")?;
        let body: String = problems.iter().map(|f| format!("{}\n", f.path)).collect();
        std::fs::write(&path, body)?;
        Ok(path)
    }

    pub fn write_fix(&self, report: &FixReport) -> std::io::Result<PathBuf> {
        self.write_json("encoding_fix_report", report)
    }

    pub fn write_classification(
        &self,
        stats: &BTreeMap<String, usize>,
        details: &ClassificationDetails,
        errors: &[String],
    ) -> std::io::Result<PathBuf> {
        let file = ClassificationReportFile {
            timestamp: Utc::now(),
            classification_summary: stats,
            processing_log: &details.processing_log,
            errors,
            config_info: &details.config,
        };
        self.write_json("classification_report", &file)
    }

    /// Write a report, logging instead of failing the batch when the disk refuses.
    pub fn try_write<T>(&self, what: &str, write: impl FnOnce(&Self) -> std::io::Result<T>) -> Option<T> {
        write(self)
            .inspect_err(|e| warn!(report = what, error = %e, "failed to write report"))
            .ok()
    }

    fn write_json<T: Serialize>(&self, prefix: &str, value: &T) -> std::io::Result<PathBuf> {
        let path = self.next_path(prefix, "json")?;
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        info!(path = %path.display(), "report written");
        Ok(path)
    }

    fn next_path(&self, prefix: &str, ext: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.logs_dir)?;
        Ok(unique_path(&self.logs_dir, &format!("{prefix}_{}.{ext}", timestamp())))
    }
}
