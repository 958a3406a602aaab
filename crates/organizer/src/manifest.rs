use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use novel_shelf_core::FileRecord;

use crate::error::WorkflowError;

pub const MANIFEST_FILE: &str = "encoding_problems_current.json";

/// The problems found by the latest scan. Repair reads this instead of rescanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemManifest {
    pub timestamp: DateTime<Utc>,
    pub scan_dir: PathBuf,
    pub problem_files: Vec<FileRecord>,
    pub total_problems: usize,
    pub scan_report_file: Option<PathBuf>,
}

impl ProblemManifest {
    pub fn new(scan_dir: impl Into<PathBuf>, problem_files: Vec<FileRecord>) -> Self {
        Self {
            timestamp: Utc::now(),
            scan_dir: scan_dir.into(),
            total_problems: problem_files.len(),
            problem_files,
            scan_report_file: None,
        }
    }

    pub fn with_report(self, report: Option<PathBuf>) -> Self {
        Self {
            scan_report_file: report,
            ..self
        }
    }

    /// Returns a manifest holding only `remaining`, with the count updated.
    pub fn with_remaining(&self, remaining: Vec<FileRecord>) -> Self {
        Self {
            timestamp: Utc::now(),
            total_problems: remaining.len(),
            problem_files: remaining,
            ..self.clone()
        }
    }

    pub fn path_in(logs_dir: &Path) -> PathBuf {
        logs_dir.join(MANIFEST_FILE)
    }

    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::Manifest(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| WorkflowError::Manifest(format!("cannot parse {}: {e}", path.display())))
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }

    pub fn remove(path: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novel_shelf_core::{ChardetDetector, EncodingPolicy};
    use tempfile::TempDir;

    fn record(dir: &Path, name: &str, bytes: &[u8]) -> FileRecord {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        EncodingPolicy::default().inspect(&path, &ChardetDetector)
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let problems = vec![record(dir.path(), "a.txt", b"plain ascii")];
        let manifest = ProblemManifest::new(dir.path(), problems);
        let path = ProblemManifest::path_in(&dir.path().join("logs"));

        manifest.save_to(&path).unwrap();
        let loaded = ProblemManifest::load(&path).unwrap();

        assert_eq!(loaded.total_problems, 1);
        assert_eq!(loaded.problem_files, manifest.problem_files);
        assert_eq!(loaded.scan_dir, dir.path());
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = ProblemManifest::load(&dir.path().join(MANIFEST_FILE)).unwrap_err();
        assert!(matches!(err, WorkflowError::Manifest(_)));
    }

    #[test]
    fn corrupt_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        assert!(ProblemManifest::load(&path).is_err());
    }

    #[test]
    fn remaining_updates_count() {
        let dir = TempDir::new().unwrap();
        let a = record(dir.path(), "a.txt", b"one");
        let b = record(dir.path(), "b.txt", b"two");
        let manifest = ProblemManifest::new(dir.path(), vec![a, b.clone()]);

        let remaining = manifest.with_remaining(vec![b]);
        assert_eq!(remaining.total_problems, 1);
        assert_eq!(remaining.problem_files[0].name, "b.txt");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        ProblemManifest::new(dir.path(), Vec::new()).save_to(&path).unwrap();

        ProblemManifest::remove(&path).unwrap();
        ProblemManifest::remove(&path).unwrap();
        assert!(!path.exists());
    }
}
