use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use novel_shelf_core::{create_backup, repair_file, timestamp, EncodingPolicy, FileRecord};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Execute, WorkflowContext};
use crate::error::WorkflowError;
use crate::manifest::ProblemManifest;
use crate::progress::Progress;
use crate::report::{
    BatchDetails, BatchReport, EncodingDetails, FileIssue, FixReport, FixedFile, ScanResult,
    ScanSummary, Verification, VerificationDetail,
};
use crate::scanner::scan_text_files;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixMode {
    Scan,
    #[default]
    ScanAndFix,
    FromManifest,
}

#[derive(Debug, Clone)]
pub struct EncodingFixParams {
    pub mode: FixMode,
    /// Defaults to the pending directory.
    pub scan_dir: Option<PathBuf>,
    pub recursive: bool,
    /// Overrides the configured backup switch.
    pub create_backup: Option<bool>,
    pub backup_dir: Option<PathBuf>,
}

impl Default for EncodingFixParams {
    fn default() -> Self {
        Self {
            mode: FixMode::default(),
            scan_dir: None,
            recursive: true,
            create_backup: None,
            backup_dir: None,
        }
    }
}

impl Execute for EncodingFixParams {
    fn execute(&self, ctx: &WorkflowContext, progress: &Progress) -> Result<BatchReport, WorkflowError> {
        let policy = ctx.config.encoding.policy()?;
        let manifest_path = ProblemManifest::path_in(&ctx.config.logs_dir());

        match self.mode {
            FixMode::Scan => {
                let (scan, summary) = self.scan(ctx, &policy, progress, 95.0)?;
                let report = scan_envelope(&scan, summary);
                progress.report(100.0, "scan finished");
                Ok(finish(report, progress))
            }
            FixMode::ScanAndFix => {
                let (scan, summary) = self.scan(ctx, &policy, progress, 50.0)?;
                if progress.is_cancelled() || scan.problem_count == 0 {
                    return Ok(finish(scan_envelope(&scan, summary), progress));
                }
                let manifest = ProblemManifest::load(&manifest_path)?;
                let fix = self.fix(ctx, &policy, &manifest, &manifest_path, progress, 50.0)?;
                progress.report(100.0, "repair finished");
                Ok(finish(fix_envelope(Some(summary), fix, manifest.problem_files.len()), progress))
            }
            FixMode::FromManifest => {
                let manifest = ProblemManifest::load(&manifest_path)?;
                progress.report(5.0, format!("{} problem files in manifest", manifest.total_problems));
                let fix = self.fix(ctx, &policy, &manifest, &manifest_path, progress, 5.0)?;
                progress.report(100.0, "repair finished");
                Ok(finish(fix_envelope(None, fix, manifest.problem_files.len()), progress))
            }
        }
    }
}

fn finish(report: BatchReport, progress: &Progress) -> BatchReport {
    if progress.is_cancelled() {
        report.cancelled()
    } else {
        report
    }
}

impl EncodingFixParams {
    fn scan_dir(&self, ctx: &WorkflowContext) -> PathBuf {
        self.scan_dir.clone().unwrap_or_else(|| ctx.config.pending_dir())
    }

    /// Inspect every text file, then persist the report, manifest and problem list.
    fn scan(
        &self,
        ctx: &WorkflowContext,
        policy: &EncodingPolicy,
        progress: &Progress,
        until: f32,
    ) -> Result<(ScanResult, ScanSummary), WorkflowError> {
        let dir = self.scan_dir(ctx);
        if !dir.is_dir() {
            return Err(WorkflowError::DirectoryMissing(dir));
        }

        let files = scan_text_files(&dir, self.recursive);
        info!(dir = %dir.display(), files = files.len(), "scanning");
        progress.report(1.0, format!("found {} text files", files.len()));

        let mut records = Vec::with_capacity(files.len());
        for (i, path) in files.iter().enumerate() {
            if progress.is_cancelled() {
                break;
            }
            records.push(policy.inspect(path, ctx.detector.as_ref()));
            progress.step(1.0, until, i + 1, files.len(), format!("inspected {}", display_name(path)));
        }

        let scan = ScanResult::new(&dir, self.recursive, records);
        let store = ctx.reports();
        let report_file = store.try_write("scan", |s| s.write_scan(&scan));

        let problems = scan.problems();
        let manifest_path = ProblemManifest::path_in(store.logs_dir());
        let (manifest_file, problem_list_file) = if progress.is_cancelled() {
            (None, None)
        } else if problems.is_empty() {
            ProblemManifest::remove(&manifest_path)?;
            (None, None)
        } else {
            ProblemManifest::new(&dir, problems.clone())
                .with_report(report_file.clone())
                .save_to(&manifest_path)?;
            let list = store.try_write("problem list", |s| s.write_problem_list(&problems));
            (Some(manifest_path), list)
        };

        info!(total = scan.total_files, problems = scan.problem_count, fixable = scan.fixable_count, "scan complete");
        let summary = ScanSummary {
            scan_dir: dir,
            total_files: scan.total_files,
            problem_files: problems,
            report_file,
            manifest_file,
            problem_list_file,
        };
        Ok((scan, summary))
    }

    fn backup_dir(&self, ctx: &WorkflowContext) -> Option<PathBuf> {
        self.create_backup
            .unwrap_or(ctx.config.create_backup)
            .then(|| {
                self.backup_dir
                    .clone()
                    .unwrap_or_else(|| ctx.config.backup_dir().join(format!("encoding_fix_{}", timestamp())))
            })
    }

    /// Repair the fixable members of `manifest`, verify them, and update the manifest on disk.
    fn fix(
        &self,
        ctx: &WorkflowContext,
        policy: &EncodingPolicy,
        manifest: &ProblemManifest,
        manifest_path: &Path,
        progress: &Progress,
        from: f32,
    ) -> Result<FixReport, WorkflowError> {
        let backup_dir = self.backup_dir(ctx);
        let total = manifest.problem_files.len();
        let repair_until = from + (90.0 - from) * 0.8;

        let mut fixed = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        let mut remaining = Vec::new();

        for (i, record) in manifest.problem_files.iter().enumerate() {
            if progress.is_cancelled() {
                break;
            }
            let path = PathBuf::from(&record.path);
            progress.step(from, repair_until, i, total, format!("repairing {}", record.name));

            if !path.exists() {
                skipped.push(issue(&path, "file no longer exists"));
                continue;
            }
            if !record.can_fix {
                skipped.push(issue(&path, &format!("not fixable: {}", record.problem_type)));
                remaining.push(record.clone());
                continue;
            }

            match repair_one(&path, record, backup_dir.as_deref(), policy) {
                Ok(done) => fixed.push(done),
                Err(reason) => {
                    warn!(file = %record.name, error = %reason, "repair failed");
                    failed.push(issue(&path, &reason));
                    remaining.push(record.clone());
                }
            }
        }

        let cancelled = progress.is_cancelled();
        let verification = (!cancelled).then(|| {
            progress.report(repair_until, "verifying repaired files");
            let (verification, still_bad) = verify(&fixed, policy, ctx);
            remaining.extend(still_bad);
            verification
        });

        let manifest_removed = match (&verification, remaining.is_empty()) {
            (None, _) => false,
            (Some(_), true) => {
                ProblemManifest::remove(manifest_path)?;
                info!("all problem files repaired; manifest removed");
                true
            }
            (Some(_), false) => {
                manifest.with_remaining(remaining).save_to(manifest_path)?;
                false
            }
        };

        let mut report = FixReport {
            timestamp: Utc::now(),
            fixed_files: fixed,
            failed_files: failed,
            skipped_files: skipped,
            backup_dir: backup_dir.filter(|d| d.exists()),
            verification,
            manifest_removed,
            report_file: None,
        };
        report.report_file = ctx.reports().try_write("fix", |s| s.write_fix(&report));
        Ok(report)
    }
}

fn repair_one(
    path: &Path,
    record: &FileRecord,
    backup_dir: Option<&Path>,
    policy: &EncodingPolicy,
) -> Result<FixedFile, String> {
    let backup = backup_dir
        .map(|dir| create_backup(path, dir))
        .transpose()
        .map_err(|e| format!("backup failed: {e}"))?;

    let outcome = repair_file(path, record.detected_encoding.as_deref(), policy.target).map_err(|e| e.to_string())?;

    Ok(FixedFile {
        path: path.to_path_buf(),
        original_encoding: record.detected_encoding.clone(),
        strategy: outcome.strategy,
        replaced_chars: outcome.replaced_chars,
        backup,
    })
}

/// Re-run the scan decision on every repaired file.
fn verify(fixed: &[FixedFile], policy: &EncodingPolicy, ctx: &WorkflowContext) -> (Verification, Vec<FileRecord>) {
    let records: Vec<FileRecord> = fixed
        .iter()
        .map(|f| policy.inspect(&f.path, ctx.detector.as_ref()))
        .collect();

    let details = records
        .iter()
        .map(|r| VerificationDetail {
            path: PathBuf::from(&r.path),
            fixed: !r.has_problem,
            error: r.has_problem.then(|| r.problem_type.clone()),
        })
        .collect();

    let still_bad: Vec<FileRecord> = records.into_iter().filter(|r| r.has_problem).collect();
    let verification = Verification {
        total_files: fixed.len(),
        fixed_files: fixed.len() - still_bad.len(),
        still_problematic: still_bad.len(),
        all_fixed: still_bad.is_empty(),
        details,
    };
    (verification, still_bad)
}

fn issue(path: &Path, reason: &str) -> FileIssue {
    FileIssue {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn scan_envelope(scan: &ScanResult, summary: ScanSummary) -> BatchReport {
    let stats = BTreeMap::from([
        ("total_files".to_string(), scan.total_files),
        ("problem_files".to_string(), scan.problem_count),
        ("fixable_files".to_string(), scan.fixable_count),
    ]);
    let message = format!(
        "scanned {} files: {} with encoding problems, {} fixable",
        scan.total_files, scan.problem_count, scan.fixable_count
    );
    BatchReport::completed(
        message,
        stats,
        BatchDetails::Encoding(EncodingDetails {
            scan: Some(summary),
            fix: None,
        }),
    )
}

fn fix_envelope(scan: Option<ScanSummary>, fix: FixReport, members: usize) -> BatchReport {
    let still = fix.verification.as_ref().map_or(0, |v| v.still_problematic);
    let mut stats = BTreeMap::from([
        ("total_files".to_string(), members),
        ("fixed_files".to_string(), fix.fixed_files.len()),
        ("failed_files".to_string(), fix.failed_files.len()),
        ("skipped_files".to_string(), fix.skipped_files.len()),
        ("still_problematic".to_string(), still),
    ]);
    if let Some(scan) = &scan {
        stats.insert("scanned_files".to_string(), scan.total_files);
    }

    let message = if fix.manifest_removed {
        format!("repaired {} files; every problem file is now clean", fix.fixed_files.len())
    } else {
        format!(
            "repaired {} of {} problem files; {} failed, {} skipped, {} still problematic",
            fix.fixed_files.len(),
            members,
            fix.failed_files.len(),
            fix.skipped_files.len(),
            still
        )
    };

    let errors = fix
        .failed_files
        .iter()
        .map(|f| format!("{}: {}", f.path.display(), f.reason))
        .collect();

    BatchReport {
        errors,
        ..BatchReport::completed(
            message,
            stats,
            BatchDetails::Encoding(EncodingDetails {
                scan,
                fix: Some(fix),
            }),
        )
    }
}
