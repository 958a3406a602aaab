use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use novel_shelf_core::{create_backup, repair_file, sample_file, timestamp, EncodingPolicy};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::{Execute, WorkflowContext};
use crate::classifier::{Classifier, Decision, KeywordClassifier};
use crate::config::Config;
use crate::error::WorkflowError;
use crate::progress::Progress;
use crate::relocate::relocate;
use crate::report::{BatchDetails, BatchReport, ClassificationDetails, ConfigSnapshot, FileOutcome};
use crate::scanner::scan_pending;

#[derive(Debug, Clone, Default)]
pub struct ClassificationParams {
    /// Stop after this many pending files. `Some(0)` means no cap.
    pub max_files: Option<usize>,
    /// Seed for fragment sampling. Runs with the same seed sample the same fragments.
    pub seed: Option<u64>,
}

const STAT_KEYS: [&str; 6] = [
    "total_files",
    "classified_files",
    "secondary_check_files",
    "encoding_fixed",
    "skipped_files",
    "error_files",
];

impl Execute for ClassificationParams {
    fn execute(&self, ctx: &WorkflowContext, progress: &Progress) -> Result<BatchReport, WorkflowError> {
        let config = &ctx.config;
        let policy = config.encoding.policy()?;
        let classifier = KeywordClassifier::new(&config.classification);

        let mut files = scan_pending(&config.pending_dir())?;
        if let Some(max) = self.max_files.filter(|&n| n > 0) {
            files.truncate(max);
        }
        info!(files = files.len(), "classifying pending files");
        progress.report(5.0, format!("found {} pending files", files.len()));

        let mut stats: BTreeMap<String, usize> = STAT_KEYS.iter().map(|k| (k.to_string(), 0)).collect();
        stats.insert("total_files".to_string(), files.len());
        let snapshot = snapshot(config);

        if files.is_empty() {
            progress.report(100.0, "no pending files");
            let details = ClassificationDetails {
                processing_log: Vec::new(),
                config: snapshot,
                report_file: None,
            };
            return Ok(BatchReport::completed(
                "no pending files",
                stats,
                BatchDetails::Classification(details),
            ));
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let run = FileRun {
            config,
            policy: &policy,
            ctx,
            backup_dir: config.backup_dir().join(format!("classification_{}", timestamp())),
        };

        let mut log = Vec::with_capacity(files.len());
        let mut errors = Vec::new();
        for (i, path) in files.iter().enumerate() {
            if progress.is_cancelled() {
                info!(done = i, "classification cancelled");
                break;
            }
            let name = file_name(path);
            progress.step(5.0, 95.0, i, files.len(), format!("classifying {name}"));

            if !path.exists() {
                let mut outcome = FileOutcome::new(&name);
                outcome.error = Some("file no longer exists".to_string());
                *stats.entry("skipped_files".to_string()).or_default() += 1;
                log.push(outcome);
                continue;
            }

            let outcome = run.classify_one(path, &classifier, &mut rng);
            let mut bump = |key: &str| *stats.entry(key.to_string()).or_default() += 1;
            if outcome.encoding_fixed {
                bump("encoding_fixed");
            }
            match (&outcome.error, outcome.is_secondary_check) {
                (Some(e), _) => {
                    bump("error_files");
                    errors.push(format!("{name}: {e}"));
                }
                (None, true) => bump("secondary_check_files"),
                (None, false) => bump("classified_files"),
            }
            log.push(outcome);
        }

        let mut details = ClassificationDetails {
            processing_log: log,
            config: snapshot,
            report_file: None,
        };
        details.report_file = ctx
            .reports()
            .try_write("classification", |s| s.write_classification(&stats, &details, &errors));

        let message = format!(
            "classified {} of {} files, {} sent to review, {} errors",
            stats["classified_files"], stats["total_files"], stats["secondary_check_files"], stats["error_files"]
        );
        progress.report(100.0, &message);

        let report = BatchReport {
            errors,
            ..BatchReport::completed(message, stats, BatchDetails::Classification(details))
        };
        Ok(if progress.is_cancelled() { report.cancelled() } else { report })
    }
}

/// What each file in one batch shares.
struct FileRun<'a> {
    config: &'a Config,
    policy: &'a EncodingPolicy,
    ctx: &'a WorkflowContext,
    backup_dir: PathBuf,
}

impl FileRun<'_> {
    fn classify_one(&self, path: &Path, classifier: &dyn Classifier, rng: &mut StdRng) -> FileOutcome {
        let mut outcome = FileOutcome::new(file_name(path));
        outcome.encoding_fixed = self.ensure_target_encoding(path);

        let sample = match sample_file(path, &self.config.sampling.spec(), rng) {
            Ok(sample) => sample,
            Err(e) => {
                outcome.error = Some(format!("sampling failed: {e}"));
                return outcome;
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let classification = classifier.classify(&stem, &sample);
        debug!(file = %outcome.filename, scores = ?classification.scores, "scored");

        let decision = classification.decision;
        match relocate(path, &decision, self.config) {
            Ok(target) => {
                outcome.success = true;
                outcome.is_secondary_check = decision.is_review();
                outcome.info = Some(decision.info());
                outcome.target = Some(target);
                if let Decision::Classified { category, .. } = &decision {
                    outcome.category = Some(category.clone());
                }
            }
            Err(e) => outcome.error = Some(format!("move failed: {e}")),
        }
        outcome
    }

    /// Convert a pending file to the target encoding when a validated source encoding was found.
    /// Failures are logged and the file is still classified.
    fn ensure_target_encoding(&self, path: &Path) -> bool {
        let record = self.policy.inspect(path, self.ctx.detector.as_ref());
        let Some(encoding) = record.detected_encoding.as_deref() else {
            return false;
        };
        if !record.has_problem || !record.can_fix || encoding == "ascii" {
            return false;
        }
        if !self.config.encoding.is_validated(encoding) {
            debug!(file = %record.name, encoding, "encoding not validated; leaving as is");
            return false;
        }

        if self.config.create_backup {
            if let Err(e) = create_backup(path, &self.backup_dir) {
                warn!(file = %record.name, error = %e, "backup failed; skipping encoding repair");
                return false;
            }
        }
        match repair_file(path, Some(encoding), self.policy.target) {
            Ok(outcome) => {
                info!(file = %record.name, from = encoding, strategy = %outcome.strategy, "encoding repaired");
                true
            }
            Err(e) => {
                warn!(file = %record.name, error = %e, "encoding repair failed");
                false
            }
        }
    }
}

fn snapshot(config: &Config) -> ConfigSnapshot {
    let c = &config.classification;
    ConfigSnapshot {
        categories_count: c.categories.len(),
        score_threshold: c.thresholds.direct_classification,
        score_difference_threshold: c.thresholds.score_difference,
        weights: BTreeMap::from([
            ("high".to_string(), c.weights.high),
            ("medium".to_string(), c.weights.medium),
            ("low".to_string(), c.weights.low),
        ]),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::WorkflowId;
    use novel_shelf_core::Codec;
    use std::fs;
    use tempfile::TempDir;

    fn library() -> (TempDir, WorkflowContext) {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path());
        fs::create_dir_all(config.pending_dir()).unwrap();
        (dir, WorkflowContext::new(config))
    }

    fn pending(ctx: &WorkflowContext, name: &str, text: &str) -> PathBuf {
        let path = ctx.config.pending_dir().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn run(ctx: &WorkflowContext, params: ClassificationParams) -> BatchReport {
        params
            .execute(ctx, &Progress::silent(WorkflowId::AutoClassification))
            .unwrap()
    }

    fn urban() -> String {
        "他在都市里重生了，一切从头开始。\n".repeat(40)
    }

    #[test]
    fn classified_file_moves_to_category() {
        let (_dir, ctx) = library();
        let path = pending(&ctx, "城中记.txt", &urban());

        let report = run(&ctx, ClassificationParams { seed: Some(7), ..Default::default() });

        assert!(report.success);
        assert_eq!(report.stat("classified_files"), 1);
        assert!(!path.exists());
        assert!(ctx.config.category_dir("05-都市").join("城中记.txt").exists());
    }

    #[test]
    fn unmatched_file_goes_to_review_with_reason() {
        let (_dir, ctx) = library();
        pending(&ctx, "book.txt", &"平凡的一天。\n".repeat(20));

        let report = run(&ctx, ClassificationParams::default());

        assert_eq!(report.stat("secondary_check_files"), 1);
        assert!(ctx.config.review_dir().join("book【no keyword match】.txt").exists());
    }

    #[test]
    fn gbk_pending_file_is_repaired_before_scoring() {
        let (_dir, ctx) = library();
        let bytes = Codec::parse("gbk").unwrap().encode(&urban()).unwrap();
        fs::write(ctx.config.pending_dir().join("gbk.txt"), bytes).unwrap();

        let report = run(&ctx, ClassificationParams::default());

        assert_eq!(report.stat("encoding_fixed"), 1);
        assert_eq!(report.stat("classified_files"), 1);
        let moved = ctx.config.category_dir("05-都市").join("gbk.txt");
        assert_eq!(fs::read_to_string(moved).unwrap(), urban());
        assert!(ctx.config.backup_dir().exists());
    }

    #[test]
    fn max_files_caps_the_batch() {
        let (_dir, ctx) = library();
        for n in 0..3 {
            pending(&ctx, &format!("{n}.txt"), &urban());
        }

        let report = run(&ctx, ClassificationParams { max_files: Some(2), ..Default::default() });

        assert_eq!(report.stat("total_files"), 2);
        assert_eq!(fs::read_dir(ctx.config.pending_dir()).unwrap().count(), 1);
    }

    #[test]
    fn zero_max_files_is_no_cap() {
        let (_dir, ctx) = library();
        for n in 0..3 {
            pending(&ctx, &format!("{n}.txt"), &urban());
        }

        let report = run(&ctx, ClassificationParams { max_files: Some(0), ..Default::default() });

        assert_eq!(report.stat("total_files"), 3);
        assert_eq!(fs::read_dir(ctx.config.pending_dir()).unwrap().count(), 0);
    }

    #[test]
    fn empty_pending_is_success() {
        let (_dir, ctx) = library();
        let report = run(&ctx, ClassificationParams::default());

        assert!(report.success);
        assert_eq!(report.message, "no pending files");
        assert_eq!(report.stat("total_files"), 0);
    }

    #[test]
    fn report_file_has_summary_and_config() {
        let (_dir, ctx) = library();
        pending(&ctx, "a.txt", &urban());

        let report = run(&ctx, ClassificationParams::default());
        let BatchDetails::Classification(details) = report.details else {
            panic!("wrong details");
        };
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(details.report_file.unwrap()).unwrap()).unwrap();

        assert_eq!(written["classification_summary"]["classified_files"], 1);
        assert_eq!(written["config_info"]["categories_count"], 4);
        assert_eq!(written["processing_log"][0]["category"], "05-都市");
    }

    #[test]
    fn cancelled_before_start_moves_nothing() {
        let (_dir, ctx) = library();
        let path = pending(&ctx, "a.txt", &urban());
        let progress = Progress::silent(WorkflowId::AutoClassification);
        progress.cancel_token().cancel();

        let report = ClassificationParams::default().execute(&ctx, &progress).unwrap();

        assert!(report.cancelled);
        assert!(!report.success);
        assert!(path.exists());
    }
}
