use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use novel_shelf::classifier::{Decision, ReviewReason};
use novel_shelf::{
    relocate, BatchReport, ClassificationParams, Config, EncodingFixParams, Execute, FixMode,
    ProblemManifest, Progress, Workflow, WorkflowContext, WorkflowId,
};
use novel_shelf_core::{ChardetDetector, Codec, Detection, Detector, EncodingPolicy, ProblemKind};
use tempfile::TempDir;

/// Never guesses.
struct NoGuess;

impl Detector for NoGuess {
    fn detect(&self, _sample: &[u8]) -> Detection {
        Detection::none()
    }
}

/// Insists on GBK for any sample containing `stubborn`.
struct Stubborn;

impl Detector for Stubborn {
    fn detect(&self, sample: &[u8]) -> Detection {
        if sample.windows(8).any(|w| w == b"stubborn") {
            Detection::of("gbk", 0.99)
        } else {
            ChardetDetector.detect(sample)
        }
    }
}

fn library() -> (TempDir, Config) {
    let dir = TempDir::new().unwrap();
    let config = Config::new(dir.path());
    fs::create_dir_all(config.pending_dir()).unwrap();
    (dir, config)
}

fn write_gbk(config: &Config, name: &str, text: &str) -> PathBuf {
    let path = config.pending_dir().join(name);
    fs::write(&path, Codec::parse("gbk").unwrap().encode(text).unwrap()).unwrap();
    path
}

fn novel() -> String {
    "第一章 重生\n他回到了都市，一切都重新开始。修炼之路漫长而艰难。\n".repeat(40)
}

fn run(ctx: &WorkflowContext, workflow: Workflow) -> BatchReport {
    workflow
        .execute(ctx, &Progress::silent(workflow.id()))
        .unwrap()
}

fn scan_params(mode: FixMode) -> Workflow {
    Workflow::EncodingFix(EncodingFixParams {
        mode,
        ..Default::default()
    })
}

#[test]
fn undetected_gbk_is_readable_via_fallback() {
    let (_dir, config) = library();
    let path = write_gbk(&config, "lost.txt", &novel());

    let record = EncodingPolicy::default().inspect(&path, &NoGuess);

    assert!(record.has_problem);
    assert_eq!(record.problem, ProblemKind::DetectionFailed);
    assert_eq!(record.problem_type, "detection failed but readable via gbk");
    assert_eq!(record.detected_encoding.as_deref(), Some("gbk"));
    assert!(record.can_fix);
}

#[test]
fn manifest_decouples_scan_from_repair() {
    let (_dir, config) = library();
    let path = write_gbk(&config, "lost.txt", &novel());
    let manifest_path = ProblemManifest::path_in(&config.logs_dir());

    let scan_ctx = WorkflowContext::with_detector(config.clone(), Arc::new(NoGuess));
    let scanned = run(&scan_ctx, scan_params(FixMode::Scan));
    assert_eq!(scanned.stat("fixable_files"), 1);

    let manifest = ProblemManifest::load(&manifest_path).unwrap();
    assert_eq!(manifest.problem_files[0].problem_type, "detection failed but readable via gbk");

    let fix_ctx = WorkflowContext::new(config);
    let fixed = run(&fix_ctx, scan_params(FixMode::FromManifest));

    assert!(fixed.success);
    assert_eq!(fixed.stat("fixed_files"), 1);
    assert_eq!(fs::read_to_string(path).unwrap(), novel());
    assert!(!manifest_path.exists());
}

#[test]
fn manifest_persists_with_remaining_count() {
    let (_dir, config) = library();
    write_gbk(&config, "clean.txt", &novel());
    write_gbk(&config, "stuck.txt", &format!("stubborn\n{}", novel()));
    let manifest_path = ProblemManifest::path_in(&config.logs_dir());
    let ctx = WorkflowContext::with_detector(config, Arc::new(Stubborn));

    let report = run(&ctx, scan_params(FixMode::ScanAndFix));

    assert!(report.success);
    assert_eq!(report.stat("fixed_files"), 2);
    assert_eq!(report.stat("still_problematic"), 1);

    let manifest = ProblemManifest::load(&manifest_path).unwrap();
    assert_eq!(manifest.total_problems, 1);
    assert_eq!(manifest.problem_files.len(), 1);
    assert_eq!(manifest.problem_files[0].name, "stuck.txt");
}

#[test]
fn rescanning_a_repaired_library_is_clean() {
    let (_dir, config) = library();
    write_gbk(&config, "a.txt", &novel());
    let ctx = WorkflowContext::new(config);

    run(&ctx, scan_params(FixMode::ScanAndFix));
    let rescan = run(&ctx, scan_params(FixMode::Scan));

    assert_eq!(rescan.stat("problem_files"), 0);
    assert!(!ProblemManifest::path_in(&ctx.config.logs_dir()).exists());
}

#[test]
fn same_name_relocations_never_overwrite() {
    let dir = TempDir::new().unwrap();
    let config = Config::new(dir.path());
    let decision = Decision::NeedsReview(ReviewReason::NoKeywordMatch);

    let targets: Vec<PathBuf> = (0..4)
        .map(|n| {
            let source_dir = dir.path().join(format!("src{n}"));
            fs::create_dir_all(&source_dir).unwrap();
            let source = source_dir.join("book.txt");
            fs::write(&source, format!("copy {n}")).unwrap();
            relocate(&source, &decision, &config).unwrap()
        })
        .collect();

    let mut unique = targets.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 4);
    for (n, target) in targets.iter().enumerate() {
        assert_eq!(fs::read_to_string(target).unwrap(), format!("copy {n}"));
    }
}

#[test]
fn classification_end_to_end() {
    let (_dir, config) = library();
    fs::write(config.pending_dir().join("都市之王.TXT"), "他在都市里重生了。\n".repeat(30)).unwrap();
    fs::write(config.pending_dir().join("日记.txt"), "今天天气很好。\n".repeat(30)).unwrap();
    write_gbk(&config, "星际.txt", &"星际舰队驶向未来，机甲列阵。\n".repeat(30));
    let ctx = WorkflowContext::new(config);

    let report = run(
        &ctx,
        Workflow::AutoClassification(ClassificationParams {
            seed: Some(42),
            ..Default::default()
        }),
    );

    assert!(report.success);
    assert_eq!(report.stat("total_files"), 3);
    assert_eq!(report.stat("classified_files"), 2);
    assert_eq!(report.stat("secondary_check_files"), 1);
    assert_eq!(report.stat("encoding_fixed"), 1);
    assert!(ctx.config.category_dir("05-都市").join("都市之王.txt").exists());
    assert!(ctx.config.category_dir("10-科幻").join("星际.txt").exists());
    assert!(ctx.config.review_dir().join("日记【no keyword match】.txt").exists());
    assert_eq!(fs::read_dir(ctx.config.pending_dir()).unwrap().count(), 0);
}

#[test]
fn workflow_ids_match_params() {
    assert_eq!(
        Workflow::AutoClassification(ClassificationParams::default()).id(),
        WorkflowId::AutoClassification
    );
}
