//! Scan decision policy: decide whether a file has an encoding problem and whether it can be fixed.

use crate::codec::{Codec, DecodeMode};
use crate::detect::{Detection, Detector};
use crate::plausibility::PlausibilityPolicy;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Bytes read from each file for detection.
pub const SAMPLE_BYTES: u64 = 10 * 1024;

/// Characters that must decode at the target encoding before a file counts as clean.
pub const VERIFY_CHARS: usize = 1000;

/// Confidence assigned when the detector gave up but a fallback codec reads the file.
pub const FALLBACK_CONFIDENCE: f32 = 0.8;

pub const DEFAULT_SUPPORTED: &[&str] = &[
    "utf-8", "utf-8-sig", "gbk", "gb2312", "gb18030", "big5", "big5-hkscs", "cp936", "cp950",
    "utf-16", "utf-16le", "utf-16be", "utf-32", "utf-32le", "utf-32be", "latin1", "cp1252", "ascii",
];

pub const DEFAULT_DETECTION: &[&str] = &[
    "gbk", "gb2312", "gb18030", "big5", "big5-hkscs", "cp936", "cp950", "utf-8-sig", "utf-16",
    "utf-16le", "utf-16be", "utf-32", "utf-32le", "utf-32be", "cp1252", "latin1",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    None,
    DetectionFailed,
    LowConfidence,
    WrongEncoding,
    DecodeFailure,
    AnalysisFailed,
}

impl ProblemKind {
    pub fn is_problem(self) -> bool {
        self != Self::None
    }
}

/// Result of inspecting one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub detected_encoding: Option<String>,
    pub confidence: f32,
    pub has_problem: bool,
    pub problem: ProblemKind,
    pub problem_type: String,
    pub can_fix: bool,
}

impl FileRecord {
    fn new(path: &Path, size: u64, verdict: Verdict) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size,
            detected_encoding: verdict.detected_encoding,
            confidence: verdict.confidence,
            has_problem: verdict.problem.is_problem(),
            problem: verdict.problem,
            problem_type: verdict.problem_type,
            can_fix: verdict.can_fix,
        }
    }
}

/// The outcome of the decision for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub detected_encoding: Option<String>,
    pub confidence: f32,
    pub problem: ProblemKind,
    pub problem_type: String,
    pub can_fix: bool,
}

impl Verdict {
    fn clean(detected_encoding: Option<String>, confidence: f32) -> Self {
        Self {
            detected_encoding,
            confidence,
            problem: ProblemKind::None,
            problem_type: String::new(),
            can_fix: false,
        }
    }

    fn flag(self, problem: ProblemKind, problem_type: String, can_fix: bool) -> Self {
        Self {
            problem,
            problem_type,
            can_fix,
            ..self
        }
    }
}

/// The parameters of the scan decision.
#[derive(Debug, Clone)]
pub struct EncodingPolicy {
    pub target: Codec,
    pub min_confidence: f32,
    pub supported: Vec<String>,
    pub detection_fallbacks: Vec<Codec>,
    pub plausibility: PlausibilityPolicy,
}

impl Default for EncodingPolicy {
    fn default() -> Self {
        Self {
            target: Codec::Utf8,
            min_confidence: 0.7,
            supported: DEFAULT_SUPPORTED.iter().map(|l| canonical(l)).collect(),
            detection_fallbacks: DEFAULT_DETECTION.iter().filter_map(|l| Codec::from_label(l)).collect(),
            plausibility: PlausibilityPolicy::default(),
        }
    }
}

/// Normalized encoding name: the codec's own name for known labels, the lowercased label otherwise.
pub fn canonical(label: &str) -> String {
    Codec::from_label(label)
        .map(|c| c.name())
        .unwrap_or_else(|| label.trim().to_ascii_lowercase())
}

impl EncodingPolicy {
    pub fn is_supported(&self, encoding: &str) -> bool {
        let name = canonical(encoding);
        self.supported.iter().any(|s| *s == name)
    }

    /// Read a sample of `path`, ask the detector, and apply the decision.
    pub fn inspect(&self, path: &Path, detector: &dyn Detector) -> FileRecord {
        let record = match read_sample(path) {
            Ok((size, sample)) => {
                FileRecord::new(path, size, self.classify(detector.detect(&sample), &sample))
            }
            Err(e) => FileRecord::new(
                path,
                0,
                Verdict::clean(None, 0.0).flag(
                    ProblemKind::AnalysisFailed,
                    format!("analysis failed: {e}"),
                    false,
                ),
            ),
        };

        debug!(file = %record.name, problem = ?record.problem, encoding = ?record.detected_encoding, "inspected");
        record
    }

    /// Apply the decision order to an already-detected sample.
    pub fn classify(&self, detection: Detection, sample: &[u8]) -> Verdict {
        let detected = detection.encoding.as_deref().map(canonical);
        let verdict = Verdict::clean(detected.clone(), detection.confidence);

        let Some(encoding) = detected else {
            let working = self
                .detection_fallbacks
                .iter()
                .find(|codec| self.plausibility.probe(**codec, sample).is_some());
            return match working {
                Some(codec) => Verdict::clean(Some(codec.name()), FALLBACK_CONFIDENCE).flag(
                    ProblemKind::DetectionFailed,
                    format!("detection failed but readable via {}", codec.name()),
                    true,
                ),
                None => verdict.flag(
                    ProblemKind::DetectionFailed,
                    "encoding could not be detected".to_string(),
                    false,
                ),
            };
        };

        if detection.confidence < self.min_confidence {
            let can_fix = self.is_supported(&encoding);
            verdict.flag(
                ProblemKind::LowConfidence,
                format!("low detection confidence ({:.2})", detection.confidence),
                can_fix,
            )
        } else if encoding != self.target.name() {
            let problem_type = if encoding == "ascii" {
                format!("ascii file (convert to {})", self.target.name())
            } else {
                format!("not target encoding ({encoding})")
            };
            let can_fix = encoding == "ascii" || self.is_supported(&encoding);
            verdict.flag(ProblemKind::WrongEncoding, problem_type, can_fix)
        } else if !self.decodes_at_target(sample) {
            let can_fix = self.is_supported(&encoding);
            verdict.flag(
                ProblemKind::DecodeFailure,
                format!("{} decode failure", self.target.name()),
                can_fix,
            )
        } else {
            verdict
        }
    }

    /// Whether the first [`VERIFY_CHARS`] characters of `sample` decode strictly at the target.
    pub fn decodes_at_target(&self, sample: &[u8]) -> bool {
        match self.target.decode(sample, DecodeMode::Strict, false) {
            Ok(_) => true,
            Err(crate::codec::CodecError::Malformed { offset, .. }) => {
                let prefix = &sample[..offset.min(sample.len())];
                self.target
                    .decode(prefix, DecodeMode::Replace, false)
                    .map(|text| text.chars().count() >= VERIFY_CHARS)
                    .unwrap_or(false)
            }
            Err(_) => false,
        }
    }
}

/// Read up to [`SAMPLE_BYTES`] from the start of `path`, returning the file size too.
pub fn read_sample(path: &Path) -> std::io::Result<(u64, Vec<u8>)> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut sample = Vec::with_capacity(size.min(SAMPLE_BYTES) as usize);
    file.take(SAMPLE_BYTES).read_to_end(&mut sample)?;
    Ok((size, sample))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ChardetDetector;
    use std::fs;
    use tempfile::TempDir;

    fn gbk(text: &str) -> Vec<u8> {
        Codec::parse("gbk").unwrap().encode(text).unwrap()
    }

    #[test]
    fn clean_utf8_has_no_problem() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.txt");
        fs::write(&path, "第一章 重生\n他回到了都市。".repeat(50)).unwrap();

        let record = EncodingPolicy::default().inspect(&path, &ChardetDetector);
        assert_eq!(record.problem, ProblemKind::None);
        assert!(!record.has_problem);
        assert_eq!(record.detected_encoding.as_deref(), Some("utf-8"));
        assert_eq!(record.name, "book.txt");
    }

    #[test]
    fn undetected_gbk_is_readable_via_gbk() {
        let sample = gbk("第一章 他回到了都市，一切重新开始。");
        let v = EncodingPolicy::default().classify(Detection::none(), &sample);

        assert_eq!(v.problem, ProblemKind::DetectionFailed);
        assert_eq!(v.problem_type, "detection failed but readable via gbk");
        assert_eq!(v.detected_encoding.as_deref(), Some("gbk"));
        assert_eq!(v.confidence, FALLBACK_CONFIDENCE);
        assert!(v.can_fix);
    }

    #[test]
    fn undetected_without_fallback_is_unfixable() {
        let policy = EncodingPolicy {
            detection_fallbacks: vec![Codec::Ascii],
            ..EncodingPolicy::default()
        };
        let v = policy.classify(Detection::none(), &[0xFF; 64]);

        assert_eq!(v.problem, ProblemKind::DetectionFailed);
        assert!(!v.can_fix);
    }

    #[test]
    fn low_confidence_is_flagged() {
        let v = EncodingPolicy::default().classify(Detection::of("gbk", 0.4), b"x");

        assert_eq!(v.problem, ProblemKind::LowConfidence);
        assert_eq!(v.problem_type, "low detection confidence (0.40)");
        assert!(v.can_fix);
    }

    #[test]
    fn low_confidence_unsupported_is_unfixable() {
        let v = EncodingPolicy::default().classify(Detection::of("koi8-r", 0.4), b"x");
        assert!(!v.can_fix);
    }

    #[test]
    fn ascii_is_wrong_encoding_but_fixable() {
        let v = EncodingPolicy::default().classify(Detection::of("ascii", 1.0), b"plain text");

        assert_eq!(v.problem, ProblemKind::WrongEncoding);
        assert_eq!(v.problem_type, "ascii file (convert to utf-8)");
        assert!(v.can_fix);
    }

    #[test]
    fn aliases_compare_canonically() {
        let v = EncodingPolicy::default().classify(Detection::of("GB2312", 0.99), &gbk("都市"));

        assert_eq!(v.detected_encoding.as_deref(), Some("gbk"));
        assert_eq!(v.problem, ProblemKind::WrongEncoding);
        assert!(v.can_fix);
    }

    #[test]
    fn confident_target_that_fails_to_decode_is_decode_failure() {
        let sample = gbk("第一章 他回到了都市");
        let v = EncodingPolicy::default().classify(Detection::of("utf-8", 0.99), &sample);

        assert_eq!(v.problem, ProblemKind::DecodeFailure);
        assert_eq!(v.problem_type, "utf-8 decode failure");
    }

    #[test]
    fn decode_error_past_verify_window_is_ignored() {
        let mut sample = "a".repeat(VERIFY_CHARS + 10).into_bytes();
        sample.push(0xFF);
        sample.push(b'b');

        assert!(EncodingPolicy::default().decodes_at_target(&sample));
    }

    #[test]
    fn missing_file_is_analysis_failure() {
        let dir = TempDir::new().unwrap();
        let record = EncodingPolicy::default().inspect(&dir.path().join("gone.txt"), &ChardetDetector);

        assert_eq!(record.problem, ProblemKind::AnalysisFailed);
        assert!(record.problem_type.starts_with("analysis failed"));
        assert!(!record.can_fix);
    }
}
